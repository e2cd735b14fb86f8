// Ports - Interface definitions (contracts)

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::control::Endpoint;
use crate::domain::errors::DomainError;
use crate::domain::model::{PlaybackState, RecordingOutcome, Severity, VideoMetadata};
use crate::planner::{AudioStage, Stage, StageParams};

/// Port for the host that embeds the player (terminal, GUI, tests)
pub trait HostEvents {
    /// Displayed frame changed
    fn on_progress(&mut self, frame: u64, seconds: f64);

    /// Effective video metadata changed
    fn on_metadata(&mut self, metadata: &VideoMetadata);

    /// One cleaned line of tool output
    fn on_console_line(&mut self, text: &str, timestamp: DateTime<Utc>, severity: Severity);

    /// Playback state or recording flag changed
    fn on_state_change(&mut self, state: PlaybackState, recording: bool);

    /// A session ended with an error
    fn on_session_error(&mut self, error: &DomainError);

    /// Recording finalization completed
    fn on_recording_finished(&mut self, outcome: &RecordingOutcome);

    /// Smoothed renderer throughput, `None` while unknown
    fn on_throughput(&mut self, _fps: Option<f64>) {}
}

/// Timers the player asks the host to fire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timer {
    /// Process liveness, end-of-stream and A/V sync
    CheckProcesses,
    /// Pull captured lines from the readers
    DrainPipes,
    /// Throughput estimate, aligned to whole seconds
    RecomputeFps,
    /// Poll the encoder while a recording is being finalized
    FinalizeRecording,
}

/// Handle of a scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(pub u64);

/// Port for the host's single-threaded scheduling primitive
pub trait Scheduler {
    /// Fire `timer` once after `after`
    fn schedule(&mut self, after: Duration, timer: Timer) -> TimerHandle;

    /// Cancel a pending timer. Unknown handles are ignored.
    fn cancel(&mut self, handle: TimerHandle);
}

/// Port for the byte transport under a control channel
pub trait ControlTransport {
    /// Dial the endpoint, replacing any previous connection
    fn connect(&mut self, endpoint: &Endpoint) -> io::Result<()>;

    /// Send one message
    fn send(&mut self, message: &str) -> io::Result<()>;

    /// Wait up to `timeout` for one reply. `Ok(None)` on timeout.
    fn receive(&mut self, timeout: Duration) -> io::Result<Option<String>>;

    /// Drop the connection. Idempotent.
    fn disconnect(&mut self);
}

impl<T: ControlTransport + ?Sized> ControlTransport for Box<T> {
    fn connect(&mut self, endpoint: &Endpoint) -> io::Result<()> {
        (**self).connect(endpoint)
    }

    fn send(&mut self, message: &str) -> io::Result<()> {
        (**self).send(message)
    }

    fn receive(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        (**self).receive(timeout)
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }
}

/// Environment changes applied to one stage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageEnv {
    pub set: HashMap<String, String>,
    pub remove: Vec<String>,
}

/// Port for building tool command lines.
///
/// Every builder is pure and returns a fresh argument vector, tool path first.
pub trait CommandBuilder {
    fn build_decoder_args(&self, params: &StageParams) -> Vec<String>;

    fn build_renderer_args(&self, params: &StageParams) -> Vec<String>;

    fn build_encoder_args(&self, params: &StageParams) -> Vec<String>;

    fn build_audio_decoder_args(&self, params: &StageParams, audio: &AudioStage) -> Vec<String>;

    fn build_audio_renderer_args(&self, params: &StageParams, audio: &AudioStage) -> Vec<String>;

    /// Standalone metadata probe of `input`
    fn build_probe_args(&self, input: &Path) -> Vec<String>;

    /// Environment for a stage's process
    fn environment(&self, stage: Stage) -> StageEnv;
}
