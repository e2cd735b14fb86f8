// Pipeline - Launches and supervises the process chain of one session

use tracing::{debug, info, warn};

use crate::control::{ChannelState, ControlChannel, Endpoint, RequestOutcome};
use crate::domain::model::Line;
use crate::engine::{ManagedProcess, OutputSink, Priority, ProcessSpec, ProcessStatus, ProcessTable, StdinSource};
use crate::error::{MosherError, MosherResult};
use crate::planner::{plan_stages, AudioStage, Stage, StageParams};
use crate::ports::{CommandBuilder, ControlTransport};

/// Control channel with a runtime-chosen transport
pub type DynChannel = ControlChannel<Box<dyn ControlTransport>>;

/// Owner of every process handle and control channel of the live session
pub struct Pipeline {
    builder: Box<dyn CommandBuilder>,
    table: ProcessTable,
    renderer: DynChannel,
    audio: DynChannel,
    midi: DynChannel,
    params: Option<StageParams>,
    audio_stage: Option<AudioStage>,
    audio_generation: Option<u64>,
}

impl Pipeline {
    /// `renderer` and `audio` must already carry their endpoints
    pub fn new(builder: Box<dyn CommandBuilder>, renderer: DynChannel, audio: DynChannel, midi: DynChannel) -> Self {
        Self {
            builder,
            table: ProcessTable::new(),
            renderer,
            audio,
            midi,
            params: None,
            audio_stage: None,
            audio_generation: None,
        }
    }

    /// Bind address handed to the renderer
    pub fn renderer_bind_url(&self) -> String {
        self.renderer.endpoint().map(Endpoint::bind_url).unwrap_or_default()
    }

    /// Bind address handed to the audio renderer
    pub fn audio_bind_url(&self) -> String {
        self.audio.endpoint().map(Endpoint::bind_url).unwrap_or_default()
    }

    pub fn builder(&self) -> &dyn CommandBuilder {
        self.builder.as_ref()
    }

    pub fn params(&self) -> Option<&StageParams> {
        self.params.as_ref()
    }

    pub fn audio_stage(&self) -> Option<&AudioStage> {
        self.audio_stage.as_ref()
    }

    fn spec_for(&self, stage: Stage, params: &StageParams, audio: &AudioStage) -> ProcessSpec {
        let spec = match stage {
            Stage::Decoder => ProcessSpec::new(stage.name(), self.builder.build_decoder_args(params))
                .stdout(OutputSink::Pipe)
                .stderr(OutputSink::Capture),
            Stage::Renderer => {
                let stdin = if params.needs_decoder() {
                    StdinSource::FromProcess(Stage::Decoder.name().to_string())
                } else {
                    StdinSource::Null
                };
                let stdout = if params.recording {
                    OutputSink::Pipe
                } else {
                    OutputSink::Capture
                };
                ProcessSpec::new(stage.name(), self.builder.build_renderer_args(params))
                    .stdin(stdin)
                    .stdout(stdout)
                    .stderr(OutputSink::Capture)
            }
            Stage::Encoder => ProcessSpec::new(stage.name(), self.builder.build_encoder_args(params))
                .stdin(StdinSource::FromProcess(Stage::Renderer.name().to_string()))
                .stdout(OutputSink::Discard)
                .stderr(OutputSink::Capture)
                .priority(Priority::Idle),
            Stage::AudioDecoder => {
                ProcessSpec::new(stage.name(), self.builder.build_audio_decoder_args(params, audio))
                    .stdout(OutputSink::Pipe)
                    .stderr(OutputSink::Discard)
            }
            Stage::AudioRenderer => {
                ProcessSpec::new(stage.name(), self.builder.build_audio_renderer_args(params, audio))
                    .stdin(StdinSource::FromProcess(Stage::AudioDecoder.name().to_string()))
                    .stdout(OutputSink::Discard)
                    .stderr(OutputSink::Discard)
            }
        };

        let env = self.builder.environment(stage);
        env.remove
            .into_iter()
            .fold(spec.envs(env.set), |spec, key| spec.env_remove(key))
    }

    /// Tear down whatever runs and start the chain planned for `params`.
    ///
    /// On error the partially started chain is left for [`Pipeline::shutdown`].
    pub fn launch(&mut self, params: StageParams, audio: Option<AudioStage>) -> MosherResult<()> {
        self.shutdown();

        let audio_enabled = audio.is_some();
        let audio_stage = audio.unwrap_or_else(|| AudioStage::initial(&params));
        for stage in plan_stages(&params, audio_enabled) {
            let spec = self.spec_for(stage, &params, &audio_stage);
            let generation = self.table.start(spec)?;
            if stage == Stage::AudioRenderer {
                self.audio_generation = Some(generation);
            }
        }

        self.renderer.connect();
        if audio_enabled {
            self.audio.connect();
            self.audio_stage = Some(audio_stage);
        }
        info!(
            stages = ?self.table.names(),
            start_at = params.start_at,
            speed = params.speed,
            recording = params.recording,
            "Pipeline launched"
        );
        self.params = Some(params);
        Ok(())
    }

    /// Hot-restart the audio pair with a new seek and tempo.
    ///
    /// Returns `Ok(None)` when `expected_generation` no longer names the
    /// running audio renderer; a superseded request is a no-op.
    pub fn restart_audio(&mut self, expected_generation: u64, stage: AudioStage) -> MosherResult<Option<u64>> {
        if self.audio_generation != Some(expected_generation) || !self.table.contains(Stage::AudioRenderer.name()) {
            debug!(expected_generation, current = ?self.audio_generation, "Stale audio restart ignored");
            return Ok(None);
        }
        let params = self.params.clone().ok_or_else(|| MosherError::MissingPipe {
            name: Stage::AudioDecoder.name().to_string(),
        })?;

        // Stop the consumer first so the old decoder is not left blocked on a full pipe
        if let Some(renderer) = self.table.get_mut(Stage::AudioRenderer.name()) {
            renderer.kill();
        }
        self.table.restart(
            Stage::AudioDecoder.name(),
            self.builder.build_audio_decoder_args(&params, &stage),
        )?;
        let generation = self.table.restart(
            Stage::AudioRenderer.name(),
            self.builder.build_audio_renderer_args(&params, &stage),
        )?;

        self.audio_generation = Some(generation);
        self.audio_stage = Some(stage);
        self.audio.connect();
        Ok(Some(generation))
    }

    /// Generation of the running audio renderer
    pub fn audio_generation(&self) -> Option<u64> {
        self.audio_generation
    }

    /// Pending output of every captured stream, tagged with its stage
    pub fn drain(&self) -> Vec<(Stage, Line)> {
        let mut lines = Vec::new();
        self.table.drain_all(|name, _stream, batch| {
            if let Some(stage) = Stage::from_name(name) {
                lines.extend(batch.into_iter().map(|line| (stage, line)));
            }
        });
        lines
    }

    pub fn has(&self, stage: Stage) -> bool {
        self.table.contains(stage.name())
    }

    pub fn status(&mut self, stage: Stage) -> ProcessStatus {
        self.table.status(stage.name())
    }

    /// Forget an exited stage
    pub fn remove(&mut self, stage: Stage) -> Option<ManagedProcess> {
        if stage == Stage::AudioRenderer {
            self.audio_generation = None;
        }
        self.table.stop(stage.name())
    }

    /// Kill everything but the encoder, so it sees end of input and finalizes
    pub fn stop_playback_stages(&mut self) {
        for stage in [Stage::Renderer, Stage::Decoder, Stage::AudioRenderer, Stage::AudioDecoder] {
            self.table.stop(stage.name());
        }
        self.audio_generation = None;
        self.renderer.disconnect();
        self.audio.disconnect();
        self.midi.disconnect();
    }

    /// Kill every stage and close every channel. Idempotent.
    pub fn shutdown(&mut self) {
        if !self.table.is_empty() {
            debug!(stages = ?self.table.names(), "Shutting down pipeline");
        }
        self.table.stop_all();
        self.renderer.disconnect();
        self.audio.disconnect();
        self.midi.disconnect();
        self.params = None;
        self.audio_stage = None;
        self.audio_generation = None;
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Ask the encoder to finish (SIGTERM where available)
    pub fn terminate_encoder(&mut self) {
        if let Some(encoder) = self.table.get_mut(Stage::Encoder.name()) {
            warn!("Terminating encoder");
            encoder.terminate();
        }
    }

    pub fn kill_encoder(&mut self) {
        if self.table.stop(Stage::Encoder.name()).is_some() {
            warn!("Encoder killed");
        }
    }

    pub fn renderer_request(&mut self, command: &str) -> RequestOutcome {
        self.renderer.request(command)
    }

    pub fn audio_request(&mut self, command: &str) -> RequestOutcome {
        self.audio.request(command)
    }

    /// Whether the audio channel is attached to a running audio renderer
    pub fn audio_attached(&self) -> bool {
        self.audio.is_attached()
    }

    /// Stop talking to an audio renderer that went away
    pub fn detach_audio(&mut self) {
        self.audio.disconnect();
        self.audio_stage = None;
    }

    /// Point the MIDI push channel at the endpoint the renderer announced
    pub fn attach_midi(&mut self, url: &str) -> bool {
        match Endpoint::parse(url) {
            Some(endpoint) => {
                info!(%endpoint, "MIDI emulation endpoint attached");
                self.midi.set_endpoint(endpoint);
                self.midi.connect();
                true
            }
            None => {
                warn!(url, "Unrecognized MIDI endpoint");
                false
            }
        }
    }

    pub fn midi_attached(&self) -> bool {
        self.midi.state() != ChannelState::Closed
    }

    /// Forward one message to the MIDI sink
    pub fn send_midi(&mut self, message: &str) -> RequestOutcome {
        self.midi.request(message)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.table.names())
            .field("renderer", &self.renderer.state())
            .field("audio", &self.audio.state())
            .field("midi", &self.midi.state())
            .field("audio_generation", &self.audio_generation)
            .finish()
    }
}
