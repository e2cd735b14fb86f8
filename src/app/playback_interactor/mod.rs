// Playback interactor - Session state machine driven by host timers

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::app::av_sync::AudioSync;
use crate::app::pipeline::Pipeline;
use crate::domain::errors::DomainError;
use crate::domain::model::*;
use crate::domain::rules::{
    video_clock_time, DecoderExit, DecoderExitRule, DriftAction, EndOfStreamAction, EndOfStreamInput,
    EndOfStreamRule, SeekPolicy,
};
use crate::engine::{ManagedProcess, ProcessStatus, ThroughputMeter};
use crate::planner::{AudioStage, Stage, StageParams};
use crate::ports::{HostEvents, Scheduler, Timer, TimerHandle};
use crate::probe::{MetadataTracker, StatusEvent, StatusParser};
use crate::utils::PathUtils;

/// Decoder output kept for the invalid-input report
const MAX_DECODER_LINES: usize = 200;

/// Encoder poll period while a recording is finalized
const FINALIZE_POLL: Duration = Duration::from_millis(50);

/// Tuning of the playback loop
#[derive(Debug, Clone)]
pub struct PlaybackOptions {
    pub window_title: String,
    pub window_size: Option<(u32, u32)>,
    pub check_delay: Duration,
    pub check_interval: Duration,
    pub drain_interval: Duration,
    pub finalize_timeout: Duration,
    pub terminate_grace: Duration,
    pub wait_notice: Duration,
    pub auto_rename: bool,
    pub thresholds: PlaybackThresholds,
    pub sync: SyncThresholds,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            window_title: "mosher preview".to_string(),
            window_size: None,
            check_delay: Duration::from_millis(500),
            check_interval: Duration::from_millis(100),
            drain_interval: Duration::from_millis(50),
            finalize_timeout: Duration::from_secs(100),
            terminate_grace: Duration::from_secs(5),
            wait_notice: Duration::from_secs(2),
            auto_rename: true,
            thresholds: PlaybackThresholds::default(),
            sync: SyncThresholds::default(),
        }
    }
}

/// Encoder shutdown in progress
#[derive(Debug, Clone)]
struct Finalizer {
    started: Instant,
    terminated: Option<Instant>,
    announced: bool,
    forced: bool,
    output: PathBuf,
}

/// Interactor owning the single playback session.
///
/// Every method runs on the host's control loop. Nothing blocks longer than
/// one control request; long waits (recording finalization) are split into
/// timer ticks.
pub struct PlaybackInteractor<S: Scheduler, H: HostEvents> {
    options: PlaybackOptions,
    pipeline: Pipeline,
    scheduler: S,
    host: H,
    /// User choices carried from one session to the next
    project: SessionRequest,
    tracker: MetadataTracker,
    /// Last metadata seen for the current input, kept across sessions
    known: Option<VideoMetadata>,
    session: Option<PlaybackSession>,
    next_session_id: u64,
    sync: AudioSync,
    meter: ThroughputMeter,
    timers: HashMap<Timer, TimerHandle>,
    finalizer: Option<Finalizer>,
    starting: bool,
    /// Last known frame, survives sessions
    position: u64,
    within_marks: bool,
    /// Play resumes at `position` instead of the range start
    resume_pending: bool,
    decoder_lines: Vec<String>,
    paths: PathUtils,
}

impl<S: Scheduler, H: HostEvents> PlaybackInteractor<S, H> {
    pub fn new(options: PlaybackOptions, pipeline: Pipeline, scheduler: S, host: H, project: SessionRequest) -> Self {
        let now = Instant::now();
        let thresholds = options.thresholds.clone();
        Self {
            tracker: MetadataTracker::new(thresholds.reconcile_tolerance),
            sync: AudioSync::new(options.sync.clone(), now),
            meter: ThroughputMeter::new(now, thresholds.fps_smoothing, thresholds.fps_warmup, thresholds.fps_idle_reset),
            options,
            pipeline,
            scheduler,
            host,
            project,
            known: None,
            session: None,
            next_session_id: 0,
            timers: HashMap::new(),
            finalizer: None,
            starting: false,
            position: 0,
            within_marks: true,
            resume_pending: false,
            decoder_lines: Vec::new(),
            paths: PathUtils::new(),
        }
    }

    pub fn project(&self) -> &SessionRequest {
        &self.project
    }

    /// Switch to another input; metadata of the previous one is forgotten
    pub fn set_input(&mut self, input: impl Into<PathBuf>) {
        self.project.input = input.into();
        self.known = None;
        self.position = 0;
        self.resume_pending = false;
    }

    pub fn set_script(&mut self, script: Option<ScriptRef>) {
        self.project.script = script;
    }

    pub fn set_output(&mut self, output: Option<PathBuf>) {
        self.project.output = output;
    }

    pub fn session(&self) -> Option<&PlaybackSession> {
        self.session.as_ref()
    }

    pub fn state(&self) -> PlaybackState {
        self.session.as_ref().map_or(PlaybackState::Idle, |s| s.state)
    }

    /// Whether a recording runs or is being finalized
    pub fn is_recording(&self) -> bool {
        self.finalizer.is_some() || self.session.as_ref().map_or(false, |s| s.recording)
    }

    pub fn is_finalizing(&self) -> bool {
        self.finalizer.is_some()
    }

    /// No session and nothing left to finalize
    pub fn is_idle(&self) -> bool {
        self.session.is_none() && self.finalizer.is_none()
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Effective metadata of the current input, if any was seen
    pub fn metadata(&self) -> Option<VideoMetadata> {
        self.tracker.metadata().or(self.known)
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    // Commands

    /// Start a new session, replacing the current one.
    ///
    /// `start_at` of `None` starts from the active range start.
    pub fn start(&mut self, start_at: Option<f64>, record: bool, start_paused: bool) -> Result<(), DomainError> {
        self.start_at(Instant::now(), start_at, record, start_paused)
    }

    /// Play/pause toggle
    pub fn toggle_play(&mut self) -> Result<(), DomainError> {
        self.toggle_play_at(Instant::now())
    }

    pub fn pause(&mut self) -> bool {
        self.pause_at(Instant::now())
    }

    pub fn resume(&mut self) -> bool {
        self.resume_at(Instant::now())
    }

    /// Advance exactly one frame, pausing first if needed
    pub fn step(&mut self) -> bool {
        self.step_at(Instant::now())
    }

    /// Relative seek in seconds
    pub fn seek_by(&mut self, seconds: f64) -> Result<(), DomainError> {
        self.seek_by_at(Instant::now(), seconds)
    }

    /// Relative seek in frames; a single frame forward is a step
    pub fn seek_frames(&mut self, frames: i64) -> Result<(), DomainError> {
        let now = Instant::now();
        if frames == 1 && self.session.is_some() {
            self.step_at(now);
            return Ok(());
        }
        let Some(meta) = self.metadata() else {
            return Ok(());
        };
        self.seek_by_at(now, frames as f64 * meta.frame_duration())
    }

    /// Absolute seek in seconds
    pub fn seek_to(&mut self, seconds: f64) -> Result<(), DomainError> {
        if self.is_recording() {
            warn!("Seeking is disabled while recording");
            return Ok(());
        }
        let paused = self.session.as_ref().map_or(false, PlaybackSession::is_paused);
        self.start_at(Instant::now(), Some(seconds), false, paused)
    }

    /// Change the playback speed, restarting at the current position
    pub fn set_speed(&mut self, speed: f64) -> Result<(), DomainError> {
        if !(MIN_SPEED..=MAX_SPEED).contains(&speed) {
            return Err(DomainError::BadArgs(format!(
                "speed {} outside [{}, {}]",
                speed, MIN_SPEED, MAX_SPEED
            )));
        }
        if self.is_recording() {
            return Err(DomainError::BadArgs("speed cannot change while recording".to_string()));
        }
        self.project.speed = speed;
        info!(speed, "Playback speed changed");
        if self.session.is_none() {
            return Ok(());
        }
        let at = self.current_time();
        let paused = self.session.as_ref().map_or(false, PlaybackSession::is_paused);
        self.start_at(Instant::now(), Some(at), false, paused)
    }

    /// Mute or unmute; remembered for later audio restarts
    pub fn set_muted(&mut self, muted: bool) -> bool {
        self.project.muted = muted;
        if !self.pipeline.audio_attached() {
            return true;
        }
        let command = if muted { "volume:0" } else { "volume:100" };
        let acknowledged = self.pipeline.audio_request(command).acknowledged();
        if !acknowledged {
            warn!(muted, "Error setting audio volume");
        }
        acknowledged
    }

    pub fn toggle_mute(&mut self) -> bool {
        self.set_muted(!self.project.muted)
    }

    /// Put the start mark on the current frame and play from it
    pub fn set_start_mark(&mut self) -> Result<(), DomainError> {
        if self.is_recording() {
            warn!("Marks are disabled while recording");
            return Ok(());
        }
        let Some(meta) = self.metadata() else {
            return Ok(());
        };
        let at = meta.frame_to_time(self.position);
        let end = self.project.marks.end.filter(|end| *end > at);
        self.project.marks = MarkRange { start: Some(at), end };
        info!(start = at, end = ?end, "Start mark set");
        self.within_marks = true;
        self.start_at(Instant::now(), Some(at), false, false)
    }

    /// Put the end mark on the current frame and play from the start mark.
    ///
    /// A mark within two frames of the end clears the end bound.
    pub fn set_end_mark(&mut self) -> Result<(), DomainError> {
        if self.is_recording() {
            warn!("Marks are disabled while recording");
            return Ok(());
        }
        let Some(meta) = self.metadata() else {
            return Ok(());
        };
        let end = SeekPolicy::end_mark_at(self.position, &meta);
        let start = self
            .project
            .marks
            .start
            .filter(|start| end.map_or(true, |end| *start < end));
        self.project.marks = MarkRange { start, end };
        info!(start = ?start, end = ?end, "End mark set");
        self.within_marks = true;
        let at = self.project.marks.start_or_zero();
        self.start_at(Instant::now(), Some(at), false, false)
    }

    pub fn clear_marks(&mut self) {
        self.project.marks = MarkRange::default();
        info!("Marks cleared");
    }

    /// Start recording from the current position, or stop the running one
    pub fn toggle_recording(&mut self) -> Result<(), DomainError> {
        let now = Instant::now();
        if self.finalizer.is_some() {
            self.stop_at(now, true);
            return Ok(());
        }
        if self.session.as_ref().map_or(false, |s| s.recording) {
            self.stop_at(now, false);
            return Ok(());
        }
        if self.project.output.is_none() {
            return Err(DomainError::BadArgs("recording requires an output path".to_string()));
        }
        let at = self.resume_time();
        self.start_at(now, Some(at), true, false)
    }

    /// Stop the session. A recording is finalized first unless `force`.
    pub fn stop(&mut self, force: bool) {
        self.stop_at(Instant::now(), force)
    }

    /// Kill everything right away
    pub fn shutdown(&mut self) {
        if self.finalizer.take().is_some() {
            warn!("Recording interrupted by shutdown");
        }
        self.teardown(true);
    }

    /// Forward one message to the renderer's MIDI emulation sink
    pub fn send_midi(&mut self, message: &str) -> bool {
        if !self.pipeline.midi_attached() {
            warn!("No MIDI endpoint announced by the renderer");
            return false;
        }
        self.pipeline.send_midi(message).acknowledged()
    }

    /// Entry point for timers scheduled through the host
    pub fn on_timer(&mut self, timer: Timer) {
        self.on_timer_at(timer, Instant::now())
    }

    pub fn on_timer_at(&mut self, timer: Timer, now: Instant) {
        self.timers.remove(&timer);
        match timer {
            Timer::DrainPipes => {
                self.drain_pipes(now);
                if self.session.is_some() && self.finalizer.is_none() {
                    self.arm(Timer::DrainPipes, self.options.drain_interval);
                }
            }
            Timer::CheckProcesses => self.check_processes(now),
            Timer::RecomputeFps => self.recompute_fps(now),
            Timer::FinalizeRecording => self.poll_finalizer(now),
        }
    }

    // Session lifecycle

    fn start_at(
        &mut self,
        now: Instant,
        start_at: Option<f64>,
        record: bool,
        start_paused: bool,
    ) -> Result<(), DomainError> {
        if self.starting {
            warn!("Start already in progress, ignored");
            return Ok(());
        }
        if self.is_recording() {
            warn!("Recording in progress, start ignored");
            return Ok(());
        }

        let request = SessionRequest {
            start_at,
            record,
            start_paused,
            ..self.project.clone()
        };
        request.validate()?;
        if !request.input.is_file() {
            return Err(DomainError::FileNotFound(request.input.display().to_string()));
        }

        self.starting = true;
        let result = self.launch(now, request);
        self.starting = false;
        result
    }

    fn launch(&mut self, now: Instant, request: SessionRequest) -> Result<(), DomainError> {
        let meta = self.metadata();
        let requested = request.start_at.unwrap_or_else(|| self.range_start());
        let seek = SeekPolicy::clamp_start(requested, meta.as_ref());
        let start_frame = meta.map_or(0, |m| m.time_to_frame(seek));

        self.teardown(false);
        self.tracker.reset();
        self.decoder_lines.clear();
        self.resume_pending = false;

        if request.record {
            if let Some(output) = request.output.as_deref().filter(|p| p.exists()) {
                if let Err(e) = std::fs::remove_file(output) {
                    warn!(output = %output.display(), error = %e, "Could not remove previous output");
                }
            }
        }

        let within_marks = request.marks.contains(seek, meta.map(|m| m.duration));
        self.within_marks = within_marks;
        let params = StageParams {
            input: request.input.clone(),
            start_at: seek,
            start_frame,
            end_at: if within_marks { request.marks.end } else { None },
            speed: request.speed,
            script: request.script.clone(),
            start_paused: request.start_paused,
            recording: request.record,
            output: request.output.clone(),
            source_fps: meta.map(|m| m.fps),
            muted: request.muted,
            window_title: self.window_title(&request.input),
            window_size: self.options.window_size,
            control_url: self.pipeline.renderer_bind_url(),
            audio_control_url: self.pipeline.audio_bind_url(),
        };
        let tempo = params.effective_speed();
        let audio = SeekPolicy::audio_enabled(tempo, &self.options.sync).then(|| AudioStage::initial(&params));

        info!(
            input = %request.input.display(),
            start_at = seek,
            speed = request.speed,
            recording = request.record,
            paused = request.start_paused,
            audio = audio.is_some(),
            "Starting playback"
        );
        if let Err(e) = self.pipeline.launch(params, audio) {
            self.pipeline.shutdown();
            let err = DomainError::LaunchFailed(e.to_string());
            self.console(&err.to_string(), Severity::Error);
            self.host.on_session_error(&err);
            self.emit_state(PlaybackState::Idle, false);
            return Err(err);
        }

        self.next_session_id += 1;
        let state = if request.start_paused {
            PlaybackState::Paused
        } else {
            PlaybackState::Starting
        };
        self.session = Some(PlaybackSession {
            id: self.next_session_id,
            input: request.input,
            start_at: seek,
            start_frame,
            current_frame: start_frame,
            speed: request.speed,
            state,
            recording: request.record,
            start_paused: request.start_paused,
            marks: request.marks,
            within_marks,
            output: request.output,
            script: request.script,
            muted: request.muted,
            played_frames: 0,
            last_progress: None,
            decoder_frame: None,
            encoder_frame: None,
        });
        self.position = start_frame;

        if audio.is_some() {
            self.sync.arm(seek, tempo, now);
        } else {
            self.sync.disarm();
        }
        self.meter.reset(now, start_frame);
        if request.start_paused {
            if let Some(meta) = meta {
                self.host.on_progress(start_frame, meta.frame_to_time(start_frame));
            }
        }

        self.arm(Timer::CheckProcesses, self.options.check_delay);
        self.arm(Timer::DrainPipes, self.options.drain_interval);
        let fps_delay = self.meter.next_delay(now);
        self.arm(Timer::RecomputeFps, fps_delay);
        self.emit_state(state, request.record);
        Ok(())
    }

    /// Kill the pipeline and forget the session
    fn teardown(&mut self, notify: bool) {
        for timer in [
            Timer::CheckProcesses,
            Timer::DrainPipes,
            Timer::RecomputeFps,
            Timer::FinalizeRecording,
        ] {
            self.disarm(timer);
        }
        self.finalizer = None;
        self.pipeline.shutdown();
        self.tracker.freeze();
        self.sync.disarm();

        if let Some(session) = self.session.take() {
            self.position = session.current_frame;
            debug!(session = session.id, "Session torn down");
            if notify {
                self.emit_state(PlaybackState::Stopping, session.recording);
                self.emit_state(PlaybackState::Idle, false);
            }
        }
    }

    fn stop_at(&mut self, now: Instant, force: bool) {
        if let Some(finalizer) = self.finalizer.as_mut() {
            if force && finalizer.terminated.is_none() {
                self.pipeline.terminate_encoder();
                finalizer.terminated = Some(now);
                finalizer.forced = true;
            }
            return;
        }
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if session.recording && self.pipeline.has(Stage::Encoder) {
            self.begin_finalize(now, force);
        } else {
            info!("Playback stopped");
            self.teardown(true);
        }
    }

    fn toggle_play_at(&mut self, now: Instant) -> Result<(), DomainError> {
        match self.session.as_ref().map(|s| s.state) {
            Some(PlaybackState::Paused) if self.pipeline.has(Stage::Renderer) => {
                self.resume_at(now);
                Ok(())
            }
            Some(PlaybackState::Paused) => {
                let at = self.resume_time();
                self.start_at(now, Some(at), false, false)
            }
            Some(PlaybackState::Starting | PlaybackState::Playing) => {
                self.pause_at(now);
                Ok(())
            }
            Some(PlaybackState::Stopping) => Ok(()),
            Some(PlaybackState::Idle) | None => {
                let at = self.resume_pending.then(|| self.resume_time());
                self.start_at(now, at, false, false)
            }
        }
    }

    fn pause_at(&mut self, now: Instant) -> bool {
        let Some(session) = self.session.as_ref() else {
            return false;
        };
        if !matches!(session.state, PlaybackState::Starting | PlaybackState::Playing)
            || !self.pipeline.has(Stage::Renderer)
        {
            return false;
        }
        if !self.pipeline.renderer_request("pause").acknowledged() {
            warn!("Error pausing video");
            return false;
        }
        if self.pipeline.audio_attached() && !self.pipeline.audio_request("pause").acknowledged() {
            warn!("Error pausing audio");
        }
        self.sync.paused(now);

        let Some(session) = self.session.as_mut() else {
            return false;
        };
        session.state = PlaybackState::Paused;
        let (frame, recording) = (session.current_frame, session.recording);
        self.meter.reset(now, frame);
        self.host.on_throughput(None);
        self.emit_state(PlaybackState::Paused, recording);
        true
    }

    fn resume_at(&mut self, now: Instant) -> bool {
        let Some(session) = self.session.as_ref() else {
            return false;
        };
        if !session.is_paused() || !self.pipeline.has(Stage::Renderer) {
            return false;
        }
        if !self.pipeline.renderer_request("play").acknowledged() {
            warn!("Error resuming video");
            return false;
        }
        if self.pipeline.audio_attached() {
            if self.pipeline.audio_request("play").acknowledged() {
                self.sync.resumed(now);
            } else {
                warn!("Error resuming audio");
            }
        }

        let Some(session) = self.session.as_mut() else {
            return false;
        };
        session.state = PlaybackState::Playing;
        session.last_progress = Some(now);
        let recording = session.recording;
        self.emit_state(PlaybackState::Playing, recording);
        true
    }

    fn step_at(&mut self, now: Instant) -> bool {
        let Some(meta) = self.metadata() else {
            return false;
        };
        let Some(state) = self.session.as_ref().map(|s| s.state) else {
            return false;
        };
        if self.is_recording() || !self.pipeline.has(Stage::Renderer) {
            return false;
        }
        if matches!(state, PlaybackState::Starting | PlaybackState::Playing) && !self.pause_at(now) {
            return false;
        }
        if !self.pipeline.renderer_request("step").acknowledged() {
            warn!("Error stepping video");
            return false;
        }

        let frame = (self.position + 1).min(meta.frame_count.saturating_sub(1));
        if let Some(session) = self.session.as_mut() {
            session.current_frame = frame;
        }
        self.position = frame;
        self.host.on_progress(frame, meta.frame_to_time(frame));
        true
    }

    fn seek_by_at(&mut self, now: Instant, seconds: f64) -> Result<(), DomainError> {
        if self.is_recording() {
            warn!("Seeking is disabled while recording");
            return Ok(());
        }
        if self.metadata().is_none() || seconds == 0.0 {
            return Ok(());
        }
        let target = self.current_time() + seconds;
        let paused = self.session.as_ref().map_or(false, PlaybackSession::is_paused);
        self.start_at(now, Some(target), false, paused)
    }

    fn current_time(&self) -> f64 {
        self.metadata().map_or(0.0, |m| m.frame_to_time(self.position))
    }

    /// Where play continues after a stop, wrapping at the end
    fn resume_time(&self) -> f64 {
        self.metadata()
            .map_or(0.0, |m| SeekPolicy::resume_point(m.frame_to_time(self.position), &m))
    }

    fn range_start(&self) -> f64 {
        if self.within_marks {
            self.project.marks.start_or_zero()
        } else {
            0.0
        }
    }

    fn window_title(&self, input: &Path) -> String {
        match input.file_name() {
            Some(name) => format!("{}: {}", self.options.window_title, name.to_string_lossy()),
            None => self.options.window_title.clone(),
        }
    }

    // Output routing

    fn drain_pipes(&mut self, now: Instant) {
        for (stage, line) in self.pipeline.drain() {
            self.route_line(stage, line, now);
        }
    }

    fn route_line(&mut self, stage: Stage, line: Line, now: Instant) {
        match stage {
            Stage::Renderer => self.on_renderer_line(line, now),
            Stage::Decoder => self.on_decoder_line(line),
            Stage::Encoder => self.on_encoder_line(line),
            Stage::AudioDecoder | Stage::AudioRenderer => {}
        }
    }

    fn on_renderer_line(&mut self, line: Line, now: Instant) {
        match StatusParser::parse_renderer_line(&line.text) {
            StatusEvent::DisplayedFrame(n) => {
                let offset = self
                    .tracker
                    .metadata()
                    .zip(self.session.as_ref())
                    .map(|(meta, session)| meta.time_to_frame(session.start_at));
                // Progress is dated by capture, not by when the queue was drained
                if let Some(offset) = offset {
                    self.on_frame_progress(n + offset, line.captured.min(now));
                }
            }
            StatusEvent::MidiEndpoint(url) => {
                self.console_at(&line.text, line.timestamp, Severity::Info);
                self.pipeline.attach_midi(&url);
            }
            StatusEvent::Text(text) => {
                // Without a decoder the renderer opens the input and reports its header
                let renderer_probes = self.pipeline.params().map_or(false, |p| !p.needs_decoder());
                if !renderer_probes {
                    self.console_at(&text, line.timestamp, Severity::Info);
                    return;
                }
                match StatusParser::parse_metadata_line(&text) {
                    StatusEvent::Text(text) => self.console_at(&text, line.timestamp, Severity::Info),
                    StatusEvent::Noise | StatusEvent::EncodedFrame(_) => {}
                    event => self.apply_metadata(&event),
                }
            }
            _ => {}
        }
    }

    fn on_decoder_line(&mut self, line: Line) {
        match StatusParser::parse_metadata_line(&line.text) {
            StatusEvent::EncodedFrame(n) => {
                if let Some(session) = self.session.as_mut() {
                    session.decoder_frame = Some(n + session.start_frame);
                }
            }
            StatusEvent::Text(text) => {
                if self.decoder_lines.len() < MAX_DECODER_LINES {
                    self.decoder_lines.push(text);
                }
            }
            StatusEvent::Noise => {}
            event => self.apply_metadata(&event),
        }
    }

    fn on_encoder_line(&mut self, line: Line) {
        match StatusParser::parse_encoder_line(&line.text) {
            StatusEvent::EncodedFrame(n) => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                let frame = n + session.start_frame;
                session.encoder_frame = Some(frame);
                if let Some(meta) = self.metadata() {
                    self.host.on_progress(frame, meta.frame_to_time(frame));
                }
            }
            StatusEvent::Text(text) => self.console_at(&text, line.timestamp, Severity::Info),
            _ => {}
        }
    }

    fn apply_metadata(&mut self, event: &StatusEvent) {
        if let Some(meta) = self.tracker.apply(event) {
            self.known = Some(meta);
            self.host.on_metadata(&meta);
        }
    }

    fn on_frame_progress(&mut self, frame: u64, now: Instant) {
        let Some(meta) = self.tracker.metadata().filter(|m| m.frame_count > 0) else {
            return;
        };
        if meta.frame_to_time(frame) > meta.duration {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !matches!(session.state, PlaybackState::Starting | PlaybackState::Playing) {
            return;
        }

        session.current_frame = frame;
        session.last_progress = Some(now);
        session.played_frames += 1;
        let first = session.played_frames == 1;
        let started = session.state == PlaybackState::Starting;
        if started {
            session.state = PlaybackState::Playing;
        }
        let recording = session.recording;

        self.position = frame;
        self.meter.note_progress(now, frame);
        if !recording {
            self.host.on_progress(frame, meta.frame_to_time(frame));
        }
        if first && self.pipeline.audio_attached() {
            if self.pipeline.audio_request("play").acknowledged() {
                self.sync.resumed(now);
            } else {
                warn!("Error playing audio");
            }
        }
        if started {
            self.emit_state(PlaybackState::Playing, recording);
        }
    }

    // Periodic checks

    fn check_processes(&mut self, now: Instant) {
        let Some(session_id) = self.session.as_ref().map(|s| s.id) else {
            return;
        };
        if self.finalizer.is_some() {
            return;
        }

        if self.pipeline.has(Stage::Renderer) && self.pipeline.audio_attached() {
            self.sync_tick(now);
        }

        self.check_decoder(now);
        if self.session.as_ref().map(|s| s.id) != Some(session_id) {
            return;
        }

        if let ProcessStatus::Exited(code) = self.pipeline.status(Stage::Renderer) {
            self.on_renderer_exit(code, now);
            return;
        }

        let recording = self.session.as_ref().map_or(false, |s| s.recording);
        if recording {
            if let ProcessStatus::Exited(code) = self.pipeline.status(Stage::Encoder) {
                warn!(exit_code = ?code, "Encoder finished before the renderer");
                self.begin_finalize(now, false);
                return;
            }
        }

        if self.check_end_of_stream(now) {
            return;
        }
        self.check_audio_exit();
        self.arm(Timer::CheckProcesses, self.options.check_interval);
    }

    fn check_decoder(&mut self, now: Instant) {
        if !self.pipeline.has(Stage::Decoder) {
            return;
        }
        let ProcessStatus::Exited(code) = self.pipeline.status(Stage::Decoder) else {
            return;
        };
        if let Some(decoder) = self.pipeline.remove(Stage::Decoder) {
            self.drain_exited(decoder, now);
        }

        let Some(session) = self.session.as_ref() else {
            return;
        };
        let bounded = self.tracker.metadata().map(|meta| VideoMetadata {
            duration: session.end_mark().map_or(meta.duration, |end| end.min(meta.duration)),
            ..meta
        });
        let reached_frame = session.decoder_frame.unwrap_or(session.current_frame);
        let reached = bounded.map_or(0.0, |m| m.frame_to_time(reached_frame));
        let path = session.input.display().to_string();

        match DecoderExitRule::classify(code, bounded.as_ref(), reached, &self.options.thresholds) {
            DecoderExit::Finished => debug!("Decoder finished"),
            DecoderExit::FinishedTooEarly { reached, duration } => {
                warn!(reached, duration, "Decoder finished early");
                self.console(
                    "Video finished too early. Check if the file is valid.",
                    Severity::Warning,
                );
            }
            DecoderExit::InvalidInput { exit_code } => {
                let err = DomainError::InvalidInput { path, exit_code };
                self.console(&err.to_string(), Severity::Error);
                for line in std::mem::take(&mut self.decoder_lines) {
                    self.console(&line, Severity::Info);
                }
                self.host.on_session_error(&err);
                self.teardown(true);
            }
            DecoderExit::Failed { exit_code } => {
                let err = DomainError::UnexpectedExit {
                    stage: Stage::Decoder.to_string(),
                    exit_code,
                };
                warn!("{}", err);
                self.console(&err.to_string(), Severity::Warning);
            }
        }
    }

    fn on_renderer_exit(&mut self, code: Option<i32>, now: Instant) {
        if let Some(renderer) = self.pipeline.remove(Stage::Renderer) {
            self.drain_exited(renderer, now);
        }
        if self.session.as_ref().map_or(false, |s| s.recording) {
            info!(exit_code = ?code, "Renderer finished, finalizing recording");
            self.begin_finalize(now, false);
            return;
        }
        match code {
            Some(0) => info!("Renderer closed"),
            exit_code => {
                let err = DomainError::UnexpectedExit {
                    stage: Stage::Renderer.to_string(),
                    exit_code,
                };
                self.console(&err.to_string(), Severity::Error);
                self.host.on_session_error(&err);
            }
        }
        self.teardown(true);
    }

    /// Returns true when the session was replaced or ended
    fn check_end_of_stream(&mut self, now: Instant) -> bool {
        let Some(meta) = self.tracker.metadata() else {
            return false;
        };
        let Some(session) = self.session.as_ref() else {
            return false;
        };
        if !session.is_playing() {
            return false;
        }

        let end_frame = session
            .end_mark()
            .map_or(meta.frame_count, |end| meta.time_to_frame(end));
        let input = EndOfStreamInput {
            current_frame: session.current_frame,
            end_frame: Some(end_frame),
            since_progress: session.since_progress(now).map(|d| d.as_secs_f64()),
            decoder_alive: self.pipeline.has(Stage::Decoder),
            filter_script: session.script.as_ref().map_or(false, ScriptRef::is_filter),
            paused: false,
            recording: session.recording,
        };

        match EndOfStreamRule::evaluate(&input, &self.options.thresholds) {
            EndOfStreamAction::Continue => false,
            EndOfStreamAction::Hold => {
                info!(frame = input.current_frame, "End of video reached");
                let recording = input.recording;
                if let Some(session) = self.session.as_mut() {
                    session.state = PlaybackState::Paused;
                }
                self.emit_state(PlaybackState::Paused, recording);
                false
            }
            EndOfStreamAction::Loop => {
                info!(frame = input.current_frame, "End of video detected, looping");
                if let Err(e) = self.start_at(now, None, false, false) {
                    self.host.on_session_error(&e);
                    self.teardown(true);
                }
                true
            }
        }
    }

    fn check_audio_exit(&mut self) {
        if !self.pipeline.has(Stage::AudioRenderer) {
            return;
        }
        if let ProcessStatus::Exited(code) = self.pipeline.status(Stage::AudioRenderer) {
            info!(exit_code = ?code, "Audio renderer finished");
            self.pipeline.remove(Stage::AudioRenderer);
            self.pipeline.remove(Stage::AudioDecoder);
            self.pipeline.detach_audio();
            self.sync.disarm();
        }
    }

    fn sync_tick(&mut self, now: Instant) {
        let Some(meta) = self.tracker.metadata() else {
            return;
        };
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let Some(generation) = self.pipeline.audio_generation() else {
            return;
        };

        let since = session.since_progress(now).map_or(0.0, |d| d.as_secs_f64());
        let throughput = self.meter.fps();
        let video_time = video_clock_time(session.current_frame, since, throughput, meta.fps);
        let Some((input, action)) = self.sync.measure(now, video_time, throughput, meta.fps) else {
            return;
        };

        match action {
            DriftAction::None => {}
            DriftAction::PauseAudio => {
                debug!(drift = input.drift(), "Audio ahead, pausing it");
                if self.pipeline.audio_request("pause").acknowledged() {
                    self.sync.paused(now);
                } else {
                    warn!("Error pausing audio");
                }
            }
            DriftAction::ResumeAudio => {
                debug!(drift = input.drift(), "Audio behind, resuming it");
                if self.pipeline.audio_request("play").acknowledged() {
                    self.sync.resumed(now);
                } else {
                    warn!("Error resuming audio");
                }
            }
            DriftAction::Restart { speed, anchor } => {
                info!(drift = input.drift(), speed, time = anchor, "Restarting audio");
                let stage = AudioStage {
                    start_at: anchor,
                    tempo: speed,
                    muted: self.project.muted,
                    start_paused: false,
                };
                match self.pipeline.restart_audio(generation, stage) {
                    Ok(Some(_)) => self.sync.restarted(anchor, speed, now),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(error = %e, "Audio restart failed, continuing without audio");
                        self.pipeline.remove(Stage::AudioRenderer);
                        self.pipeline.remove(Stage::AudioDecoder);
                        self.pipeline.detach_audio();
                        self.sync.disarm();
                    }
                }
            }
        }
    }

    fn recompute_fps(&mut self, now: Instant) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if self.finalizer.is_some() {
            return;
        }
        let info = self
            .meter
            .sample(now, session.current_frame, session.last_progress, session.is_playing());
        self.host.on_throughput(info.fps);
        let delay = self.meter.next_delay(now);
        self.arm(Timer::RecomputeFps, delay);
    }

    // Recording finalization

    fn begin_finalize(&mut self, now: Instant, force: bool) {
        self.drain_pipes(now);
        self.pipeline.stop_playback_stages();
        self.sync.disarm();
        for timer in [Timer::CheckProcesses, Timer::DrainPipes, Timer::RecomputeFps] {
            self.disarm(timer);
        }

        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.state = PlaybackState::Stopping;
        let output = session.output.clone().unwrap_or_default();
        info!(output = %output.display(), "Finalizing recording");
        self.emit_state(PlaybackState::Stopping, true);

        let mut finalizer = Finalizer {
            started: now,
            terminated: None,
            announced: false,
            forced: force,
            output,
        };
        if force {
            self.pipeline.terminate_encoder();
            finalizer.terminated = Some(now);
        }
        self.finalizer = Some(finalizer);
        self.arm(Timer::FinalizeRecording, Duration::ZERO);
    }

    fn poll_finalizer(&mut self, now: Instant) {
        self.drain_pipes(now);
        let Some(mut finalizer) = self.finalizer.take() else {
            return;
        };

        let outcome = match self.pipeline.status(Stage::Encoder) {
            ProcessStatus::Exited(Some(0)) => Some(RecordingOutcome::Finished {
                output: finalizer.output.clone(),
            }),
            ProcessStatus::Exited(_) if finalizer.terminated.is_some() => Some(RecordingOutcome::TimedOut),
            ProcessStatus::Exited(code) => Some(RecordingOutcome::Failed { exit_code: code }),
            ProcessStatus::Stopped => Some(RecordingOutcome::Failed { exit_code: None }),
            ProcessStatus::Running => {
                let waited = now.saturating_duration_since(finalizer.started);
                if !finalizer.announced && waited >= self.options.wait_notice {
                    finalizer.announced = true;
                    self.console("Waiting for recording to finish...", Severity::Info);
                }
                match finalizer.terminated {
                    None if waited >= self.options.finalize_timeout => {
                        self.pipeline.terminate_encoder();
                        finalizer.terminated = Some(now);
                        None
                    }
                    Some(at) if now.saturating_duration_since(at) >= self.options.terminate_grace => {
                        self.pipeline.kill_encoder();
                        Some(RecordingOutcome::TimedOut)
                    }
                    _ => None,
                }
            }
        };

        match outcome {
            Some(outcome) => self.finish_recording(now, finalizer, outcome),
            None => {
                self.finalizer = Some(finalizer);
                self.arm(Timer::FinalizeRecording, FINALIZE_POLL);
            }
        }
    }

    fn finish_recording(&mut self, now: Instant, finalizer: Finalizer, outcome: RecordingOutcome) {
        if let Some(encoder) = self.pipeline.remove(Stage::Encoder) {
            self.drain_exited(encoder, now);
        }

        let severity = match outcome {
            RecordingOutcome::Finished { .. } => Severity::Info,
            _ => Severity::Warning,
        };
        self.console(&outcome.to_string(), severity);
        if outcome == RecordingOutcome::TimedOut && !finalizer.forced {
            self.host.on_session_error(&DomainError::RecordingTimeout {
                output: finalizer.output.display().to_string(),
            });
        }
        self.host.on_recording_finished(&outcome);

        let session = self.session.take();
        self.teardown(false);
        if let Some(session) = session {
            self.position = session.encoder_frame.unwrap_or(session.current_frame);
        }

        if self.options.auto_rename {
            if let Some(output) = self.project.output.clone() {
                match self.paths.next_output_file(&output) {
                    Ok(next) if next != output => {
                        info!(output = %next.display(), "Next recording goes to a new file");
                        self.project.output = Some(next);
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Could not pick the next output name"),
                }
            }
        }
        self.resume_pending = true;
        self.emit_state(PlaybackState::Idle, false);
    }

    /// Route whatever an exited process left in its queues
    fn drain_exited(&mut self, process: ManagedProcess, now: Instant) {
        let Some(stage) = Stage::from_name(process.name()) else {
            return;
        };
        let mut lines = Vec::new();
        process.drain(|_, batch| lines.extend(batch));
        for line in lines {
            self.route_line(stage, line, now);
        }
    }

    // Host plumbing

    fn arm(&mut self, timer: Timer, after: Duration) {
        if let Some(handle) = self.timers.remove(&timer) {
            self.scheduler.cancel(handle);
        }
        let handle = self.scheduler.schedule(after, timer);
        self.timers.insert(timer, handle);
    }

    fn disarm(&mut self, timer: Timer) {
        if let Some(handle) = self.timers.remove(&timer) {
            self.scheduler.cancel(handle);
        }
    }

    fn emit_state(&mut self, state: PlaybackState, recording: bool) {
        debug!(%state, recording, "State change");
        self.host.on_state_change(state, recording);
    }

    fn console(&mut self, text: &str, severity: Severity) {
        self.console_at(text, Utc::now(), severity);
    }

    fn console_at(&mut self, text: &str, timestamp: DateTime<Utc>, severity: Severity) {
        self.host.on_console_line(text, timestamp, severity);
    }
}

impl<S: Scheduler, H: HostEvents> Drop for PlaybackInteractor<S, H> {
    fn drop(&mut self) {
        self.pipeline.shutdown();
    }
}
