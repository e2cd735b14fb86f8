use std::sync::Arc;

use tracing::debug;

use crate::adapters::{EndpointAllocator, FfglitchCommandBuilder, Settings, TimerQueue, ZmqTransport};
use crate::app::pipeline::{DynChannel, Pipeline};
use crate::app::playback_interactor::{PlaybackInteractor, PlaybackOptions};
use crate::app::probe_interactor::ProbeInteractor;
use crate::control::ControlChannel;
use crate::domain::model::SessionRequest;
use crate::error::MosherResult;
use crate::ports::{ControlTransport, HostEvents};

pub trait AppContainer {
    fn settings(&self) -> &Settings;
    fn probe_interactor(&self) -> Arc<ProbeInteractor>;
}

/// Wires the concrete adapters into the interactors
pub struct DefaultAppContainer {
    settings: Settings,
    endpoints: EndpointAllocator,
    probe_interactor: Arc<ProbeInteractor>,
}

impl DefaultAppContainer {
    pub fn new(settings: Settings) -> MosherResult<Self> {
        let endpoints = EndpointAllocator::new(settings.control.prefer_ipc)?;
        let probe_interactor = Arc::new(ProbeInteractor::new(
            Arc::new(Self::command_builder(&settings)),
            settings.thresholds.reconcile_tolerance,
        ));

        Ok(Self {
            settings,
            endpoints,
            probe_interactor,
        })
    }

    fn command_builder(settings: &Settings) -> FfglitchCommandBuilder {
        FfglitchCommandBuilder::new(settings.tools.clone(), settings.recording.clone())
    }

    /// Request/reply channel for the process called `name`
    fn channel(&self, name: &str) -> MosherResult<DynChannel> {
        let transport: Box<dyn ControlTransport> = Box::new(ZmqTransport::request());
        let mut channel = ControlChannel::new(name, transport)
            .with_soft_timeout(self.settings.control.soft_timeout());
        channel.set_endpoint(self.endpoints.allocate(name)?);
        Ok(channel)
    }

    pub fn playback_options(&self) -> PlaybackOptions {
        let playback = &self.settings.playback;
        let recording = &self.settings.recording;
        PlaybackOptions {
            window_title: playback.window_title.clone(),
            window_size: playback.window_size(),
            check_delay: playback.check_delay(),
            check_interval: playback.check_interval(),
            drain_interval: playback.drain_interval(),
            finalize_timeout: recording.finalize_timeout(),
            terminate_grace: recording.terminate_grace(),
            wait_notice: recording.wait_notice(),
            auto_rename: recording.auto_rename,
            thresholds: self.settings.thresholds.clone(),
            sync: self.settings.sync.clone(),
        }
    }

    /// Player for `project`, reporting to `host` and scheduled by a [`TimerQueue`]
    pub fn playback<H: HostEvents>(
        &self,
        project: SessionRequest,
        host: H,
    ) -> MosherResult<PlaybackInteractor<TimerQueue, H>> {
        let midi: Box<dyn ControlTransport> = Box::new(ZmqTransport::push());
        let pipeline = Pipeline::new(
            Box::new(Self::command_builder(&self.settings)),
            self.channel("renderer")?,
            self.channel("audio-renderer")?,
            ControlChannel::push("midi", midi),
        );
        debug!(
            renderer = %pipeline.renderer_bind_url(),
            audio = %pipeline.audio_bind_url(),
            mode = ?self.endpoints.mode(),
            "Control endpoints allocated"
        );
        Ok(PlaybackInteractor::new(
            self.playback_options(),
            pipeline,
            TimerQueue::new(),
            host,
            project,
        ))
    }
}

impl AppContainer for DefaultAppContainer {
    fn settings(&self) -> &Settings {
        &self.settings
    }

    fn probe_interactor(&self) -> Arc<ProbeInteractor> {
        Arc::clone(&self.probe_interactor)
    }
}
