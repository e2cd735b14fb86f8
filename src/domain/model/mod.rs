// Domain models - Core types and data structures

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainError;

/// Lowest selectable playback speed
pub const MIN_SPEED: f64 = 0.1;
/// Highest selectable playback speed
pub const MAX_SPEED: f64 = 5.0;

/// Output stream a line was captured from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Stdout => write!(f, "stdout"),
            StreamKind::Stderr => write!(f, "stderr"),
        }
    }
}

/// One decoded line of process output.
///
/// `overwrite` marks a carriage-return sub-line: it replaces the visually
/// current console row (live progress counters) instead of adding a new one.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub text: String,
    pub overwrite: bool,
    pub stream: StreamKind,
    pub timestamp: DateTime<Utc>,
    /// Monotonic instant the line was split off the pipe
    pub captured: Instant,
}

impl Line {
    /// Create a new line captured now
    pub fn new(text: String, overwrite: bool, stream: StreamKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            text,
            overwrite,
            stream,
            timestamp,
            captured: Instant::now(),
        }
    }

    /// True for CR-prefixed progress updates
    pub fn is_progress(&self) -> bool {
        self.overwrite
    }
}

/// Severity attached to console lines forwarded to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Reconciled description of the input video
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VideoMetadata {
    /// Duration in seconds
    pub duration: f64,
    /// Effective frame rate
    pub fps: f64,
    /// Total number of frames
    pub frame_count: u64,
}

impl VideoMetadata {
    /// Convert a time in seconds to the nearest frame index
    pub fn time_to_frame(&self, seconds: f64) -> u64 {
        time_to_frame(seconds, self.fps)
    }

    /// Convert a frame index to seconds
    pub fn frame_to_time(&self, frame: u64) -> f64 {
        frame_to_time(frame, self.fps)
    }

    /// Duration of one frame in seconds
    pub fn frame_duration(&self) -> f64 {
        if self.fps > 0.0 {
            1.0 / self.fps
        } else {
            0.0
        }
    }
}

/// Convert seconds to a frame index at the given rate
pub fn time_to_frame(seconds: f64, fps: f64) -> u64 {
    if fps <= 0.0 || seconds <= 0.0 {
        return 0;
    }
    (seconds * fps).round() as u64
}

/// Convert a frame index to seconds at the given rate
pub fn frame_to_time(frame: u64, fps: f64) -> f64 {
    if fps > 0.0 {
        frame as f64 / fps
    } else {
        0.0
    }
}

/// Start/end time bounds used for loop-like playback
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MarkRange {
    pub start: Option<f64>,
    pub end: Option<f64>,
}

impl MarkRange {
    /// Create a mark range, rejecting inverted bounds
    pub fn new(start: Option<f64>, end: Option<f64>) -> Result<Self, DomainError> {
        if let (Some(s), Some(e)) = (start, end) {
            if s >= e {
                return Err(DomainError::BadArgs(format!(
                    "start mark ({:.3}) must be before end mark ({:.3})",
                    s, e
                )));
            }
        }
        if start.map_or(false, |s| s < 0.0) || end.map_or(false, |e| e < 0.0) {
            return Err(DomainError::BadArgs("marks cannot be negative".to_string()));
        }
        Ok(Self { start, end })
    }

    /// Start of the active range (0 when unset)
    pub fn start_or_zero(&self) -> f64 {
        self.start.unwrap_or(0.0).max(0.0)
    }

    /// Whether a playback starting at `at` lies within the marks
    pub fn contains(&self, at: f64, duration: Option<f64>) -> bool {
        let end = self.end.or(duration).unwrap_or(0.0);
        self.start_or_zero() <= at && at <= end
    }
}

/// How a transform script is handed to the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptKind {
    /// Per-frame glitch script passed with `-s`
    Glitch,
    /// Filter-graph script, the renderer reads the input itself
    Filter,
}

/// Reference to the user transform script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptRef {
    /// Script file, `None` for an inline filter graph
    pub path: Option<PathBuf>,
    pub kind: ScriptKind,
    pub parameters: Option<String>,
}

impl ScriptRef {
    /// Create a glitch-style script reference
    pub fn glitch(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            kind: ScriptKind::Glitch,
            parameters: None,
        }
    }

    /// Create a filter-style script reference
    pub fn filter(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            kind: ScriptKind::Filter,
            parameters: None,
        }
    }

    /// Filter graph given inline; the renderer opens the input itself
    pub fn inline_filter(graph: impl Into<String>) -> Self {
        Self {
            path: None,
            kind: ScriptKind::Filter,
            parameters: Some(graph.into()),
        }
    }

    /// Attach script parameters
    pub fn with_parameters(mut self, parameters: impl Into<String>) -> Self {
        let parameters = parameters.into();
        self.parameters = if parameters.is_empty() {
            None
        } else {
            Some(parameters)
        };
        self
    }

    pub fn is_filter(&self) -> bool {
        self.kind == ScriptKind::Filter
    }

    /// Whether frames have to be produced by a separate decoder stage
    pub fn needs_decoder(&self) -> bool {
        !(self.is_filter() && self.path.is_none())
    }
}

/// Parameters for one (re)start of playback
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRequest {
    pub input: PathBuf,
    pub script: Option<ScriptRef>,
    /// Requested seek offset, `None` starts from the active range start
    pub start_at: Option<f64>,
    pub speed: f64,
    pub record: bool,
    pub start_paused: bool,
    pub marks: MarkRange,
    pub output: Option<PathBuf>,
    pub muted: bool,
}

impl SessionRequest {
    /// Create a preview request for the given input
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            script: None,
            start_at: None,
            speed: 1.0,
            record: false,
            start_paused: false,
            marks: MarkRange::default(),
            output: None,
            muted: false,
        }
    }

    /// Validate request invariants
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.input.as_os_str().is_empty() {
            return Err(DomainError::BadArgs("no input video selected".to_string()));
        }
        if !(MIN_SPEED..=MAX_SPEED).contains(&self.speed) {
            return Err(DomainError::BadArgs(format!(
                "speed {} outside [{}, {}]",
                self.speed, MIN_SPEED, MAX_SPEED
            )));
        }
        if self.record && self.output.is_none() {
            return Err(DomainError::BadArgs("recording requires an output path".to_string()));
        }
        Ok(())
    }
}

/// Playback lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    Idle,
    Starting,
    Playing,
    Paused,
    Stopping,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Starting => "starting",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Stopping => "stopping",
        };
        write!(f, "{}", name)
    }
}

/// The single live playback session
#[derive(Debug, Clone)]
pub struct PlaybackSession {
    /// Monotonic session identity
    pub id: u64,
    pub input: PathBuf,
    /// Seek offset the session was launched at
    pub start_at: f64,
    pub start_frame: u64,
    /// Video clock in frames
    pub current_frame: u64,
    pub speed: f64,
    pub state: PlaybackState,
    pub recording: bool,
    pub start_paused: bool,
    pub marks: MarkRange,
    /// Whether the session was started inside the marks
    pub within_marks: bool,
    pub output: Option<PathBuf>,
    pub script: Option<ScriptRef>,
    pub muted: bool,
    /// Renderer frames displayed since launch
    pub played_frames: u64,
    /// Arrival time of the last renderer progress token
    pub last_progress: Option<Instant>,
    /// Last frame reported by the standalone decoder
    pub decoder_frame: Option<u64>,
    /// Last frame reported by the encoder while recording
    pub encoder_frame: Option<u64>,
}

impl PlaybackSession {
    /// Whether the renderer is currently advancing frames
    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    pub fn is_paused(&self) -> bool {
        self.state == PlaybackState::Paused
    }

    /// Whether the session still owns running stages
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            PlaybackState::Starting | PlaybackState::Playing | PlaybackState::Paused
        )
    }

    /// End of the active range in seconds, if bounded by an end mark
    pub fn end_mark(&self) -> Option<f64> {
        if self.within_marks {
            self.marks.end
        } else {
            None
        }
    }

    /// Time elapsed since the last progress token
    pub fn since_progress(&self, now: Instant) -> Option<Duration> {
        self.last_progress.map(|t| now.saturating_duration_since(t))
    }
}

/// How a recording ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingOutcome {
    /// Encoder exited cleanly, output is complete
    Finished { output: PathBuf },
    /// Encoder exited with a non-zero code
    Failed { exit_code: Option<i32> },
    /// Encoder had to be terminated
    TimedOut,
}

impl fmt::Display for RecordingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingOutcome::Finished { output } => {
                write!(f, "Recording finished: {}", output.display())
            }
            RecordingOutcome::Failed { exit_code: Some(code) } => {
                write!(f, "Encoder finished with exit code {}", code)
            }
            RecordingOutcome::Failed { exit_code: None } => {
                write!(f, "Encoder was killed by a signal")
            }
            RecordingOutcome::TimedOut => write!(f, "Recording stopped"),
        }
    }
}

/// Wall-clock anchored audio position.
///
/// Elapsed media time only advances while not paused, scaled by `speed`.
#[derive(Debug, Clone)]
pub struct AudioClock {
    time: f64,
    speed: f64,
    paused: bool,
    last_check: Instant,
}

impl AudioClock {
    /// Create a paused clock anchored at `anchor` seconds
    pub fn new(anchor: f64, speed: f64, now: Instant) -> Self {
        Self {
            time: anchor,
            speed,
            paused: true,
            last_check: now,
        }
    }

    /// Advance the clock to `now`
    pub fn update(&mut self, now: Instant) {
        if !self.paused {
            let elapsed = now.saturating_duration_since(self.last_check).as_secs_f64();
            self.time += elapsed * self.speed;
        }
        self.last_check = now;
    }

    /// Re-anchor after a hot-restart, running
    pub fn rearm(&mut self, anchor: f64, speed: f64, now: Instant) {
        self.time = anchor;
        self.speed = speed;
        self.paused = false;
        self.last_check = now;
    }

    pub fn pause(&mut self, now: Instant) {
        self.update(now);
        self.paused = true;
    }

    pub fn resume(&mut self, now: Instant) {
        self.update(now);
        self.paused = false;
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }
}

/// Drift controller tuning.
///
/// Values are empirically tuned; keep them configurable rather than derived.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncThresholds {
    /// Audio ahead of video by more than this pauses or slows audio (s)
    pub ahead: f64,
    /// Audio behind by more than this always restarts (s)
    pub behind_hard: f64,
    /// Audio behind by more than this restarts when speed is close (s)
    pub behind_soft: f64,
    /// Audio behind by more than this resumes a paused audio stream (s)
    pub behind_resume: f64,
    /// Lead added to the anchor when restarting because audio ran ahead (s)
    pub restart_lead: f64,
    /// Minimum interval between slow-down restarts (s)
    pub min_restart_interval: f64,
    /// Ideal speed must stay below current + margin for a soft restart
    pub speed_margin: f64,
    /// Audio slower than this is never slowed further
    pub min_audio_speed: f64,
    pub min_ideal_speed: f64,
    pub max_ideal_speed: f64,
}

impl Default for SyncThresholds {
    fn default() -> Self {
        Self {
            ahead: 0.5,
            behind_hard: 1.0,
            behind_soft: 0.3,
            behind_resume: 0.1,
            restart_lead: 0.1,
            min_restart_interval: 1.0,
            speed_margin: 0.1,
            min_audio_speed: 0.5,
            min_ideal_speed: MIN_SPEED,
            max_ideal_speed: MAX_SPEED,
        }
    }
}

/// Playback and metadata tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackThresholds {
    /// No progress for this long counts as stalled (s)
    pub stall: f64,
    /// Frames before the end that count as "at the end"
    pub end_margin_frames: u64,
    /// Same, for filter-style scripts
    pub filter_end_margin_frames: u64,
    /// Relative tolerance for metadata source agreement
    pub reconcile_tolerance: f64,
    /// Decoder finishing this much before the end is reported (s)
    pub early_finish_margin: f64,
    /// No progress for this long resets the throughput estimate (s)
    pub fps_idle_reset: f64,
    /// Minimum window before the first throughput estimate (s)
    pub fps_warmup: f64,
    /// Weight of the newest throughput sample
    pub fps_smoothing: f64,
}

impl Default for PlaybackThresholds {
    fn default() -> Self {
        Self {
            stall: 0.1,
            end_margin_frames: 5,
            filter_end_margin_frames: 2,
            reconcile_tolerance: 0.1,
            early_finish_margin: 5.0,
            fps_idle_reset: 1.0,
            fps_warmup: 0.3,
            fps_smoothing: 0.8,
        }
    }
}

#[cfg(test)]
mod tests;
