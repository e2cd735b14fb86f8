// Tracing log adapter - Host events rendered as structured log records

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::domain::errors::DomainError;
use crate::domain::model::{PlaybackState, RecordingOutcome, Severity, VideoMetadata};
use crate::ports::HostEvents;
use crate::utils::TimeParser;

/// Host that reports everything through `tracing`.
///
/// Progress is only logged when the displayed second changes.
#[derive(Debug, Default)]
pub struct TracingHost {
    metadata: Option<VideoMetadata>,
    last_second: Option<u64>,
    state: Option<PlaybackState>,
    recording_outcome: Option<RecordingOutcome>,
    errors: Vec<DomainError>,
    time: TimeParser,
}

impl TracingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metadata(&self) -> Option<VideoMetadata> {
        self.metadata
    }

    pub fn state(&self) -> Option<PlaybackState> {
        self.state
    }

    pub fn recording_outcome(&self) -> Option<&RecordingOutcome> {
        self.recording_outcome.as_ref()
    }

    /// Hand out the last recording outcome once
    pub fn take_recording_outcome(&mut self) -> Option<RecordingOutcome> {
        self.recording_outcome.take()
    }

    pub fn errors(&self) -> &[DomainError] {
        &self.errors
    }
}

impl HostEvents for TracingHost {
    fn on_progress(&mut self, frame: u64, seconds: f64) {
        let second = seconds.max(0.0) as u64;
        if self.last_second == Some(second) {
            return;
        }
        self.last_second = Some(second);
        info!(frame, "{}", self.time.format_time(seconds, Some(frame)));
    }

    fn on_metadata(&mut self, metadata: &VideoMetadata) {
        self.metadata = Some(*metadata);
        info!(
            duration = metadata.duration,
            fps = metadata.fps,
            frames = metadata.frame_count,
            "Video duration: {}",
            self.time.format_time(metadata.duration, None)
        );
    }

    fn on_console_line(&mut self, text: &str, _timestamp: DateTime<Utc>, severity: Severity) {
        match severity {
            Severity::Info => info!(target: "console", "{}", text),
            Severity::Warning => warn!(target: "console", "{}", text),
            Severity::Error => error!(target: "console", "{}", text),
        }
    }

    fn on_state_change(&mut self, state: PlaybackState, recording: bool) {
        self.state = Some(state);
        info!(%state, recording, "Playback state changed");
    }

    fn on_session_error(&mut self, err: &DomainError) {
        error!("{}", err);
        self.errors.push(err.clone());
    }

    fn on_recording_finished(&mut self, outcome: &RecordingOutcome) {
        match outcome {
            RecordingOutcome::Finished { .. } => info!("{}", outcome),
            _ => warn!("{}", outcome),
        }
        self.recording_outcome = Some(outcome.clone());
    }

    fn on_throughput(&mut self, fps: Option<f64>) {
        if let Some(fps) = fps {
            info!("FPS: {:.1}", fps);
        }
    }
}
