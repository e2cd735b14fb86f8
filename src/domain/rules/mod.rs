// Domain rules - Playback policies and synchronization decisions

use crate::domain::model::*;

/// Raw metadata values as reported by the status streams
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetadataSources {
    /// `Duration:` header field
    pub duration: Option<f64>,
    /// `DURATION :` tag, usually more precise
    pub duration_alt: Option<f64>,
    /// Frame rate from the video stream description
    pub fps: Option<f64>,
    /// `NUMBER_OF_FRAMES:` tag
    pub frame_count_alt: Option<u64>,
}

/// Reconciliation of metadata reported by independent sources
pub struct MetadataReconciler;

impl MetadataReconciler {
    /// Derive effective metadata from the reported sources.
    ///
    /// Returns `None` until both a duration and a frame rate are known.
    pub fn reconcile(sources: &MetadataSources, tolerance: f64) -> Option<VideoMetadata> {
        let duration = Self::reconcile_duration(sources, tolerance)?;
        let mut fps = sources.fps.filter(|f| *f > 0.0)?;
        if duration <= 0.0 {
            return None;
        }

        let mut frame_count = (duration * fps + 1e-9).floor() as u64;
        if let Some(alt) = sources.frame_count_alt.filter(|c| *c > 0) {
            if Self::agrees(frame_count as f64, alt as f64, tolerance) {
                frame_count = alt;
                fps = alt as f64 / duration;
            }
        }

        Some(VideoMetadata {
            duration,
            fps,
            frame_count,
        })
    }

    /// Pick the tag duration when it agrees with the header one
    pub fn reconcile_duration(sources: &MetadataSources, tolerance: f64) -> Option<f64> {
        match (sources.duration, sources.duration_alt) {
            (Some(primary), Some(alt)) if primary > 0.0 => {
                if Self::agrees(alt, primary, tolerance) {
                    Some(alt)
                } else {
                    Some(primary)
                }
            }
            (Some(primary), _) if primary > 0.0 => Some(primary),
            (_, Some(alt)) if alt > 0.0 => Some(alt),
            _ => None,
        }
    }

    /// Relative agreement of `value` against `reference`
    fn agrees(value: f64, reference: f64, tolerance: f64) -> bool {
        reference > 0.0 && (value / reference - 1.0).abs() < tolerance
    }
}

/// Inputs for end-of-stream detection, sampled on each process check
#[derive(Debug, Clone, Copy)]
pub struct EndOfStreamInput {
    pub current_frame: u64,
    /// End of the active range in frames
    pub end_frame: Option<u64>,
    /// Seconds since the renderer last reported progress
    pub since_progress: Option<f64>,
    pub decoder_alive: bool,
    pub filter_script: bool,
    pub paused: bool,
    pub recording: bool,
}

/// What to do once the end of the active range may have been reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOfStreamAction {
    /// Keep playing
    Continue,
    /// End reached, hold in paused state
    Hold,
    /// End reached, restart from the top of the active range
    Loop,
}

/// End-of-range detection for live playback
pub struct EndOfStreamRule;

impl EndOfStreamRule {
    pub fn evaluate(input: &EndOfStreamInput, thresholds: &PlaybackThresholds) -> EndOfStreamAction {
        let end_frame = match input.end_frame {
            Some(end) if end > 0 => end,
            _ => return EndOfStreamAction::Continue,
        };

        let reached = if input.filter_script {
            input.current_frame + thresholds.filter_end_margin_frames >= end_frame
        } else {
            let stalled = input
                .since_progress
                .map_or(true, |elapsed| elapsed > thresholds.stall);
            !input.decoder_alive
                && stalled
                && input.current_frame + thresholds.end_margin_frames >= end_frame
        };

        if !reached {
            EndOfStreamAction::Continue
        } else if input.recording || input.paused {
            EndOfStreamAction::Hold
        } else {
            EndOfStreamAction::Loop
        }
    }
}

/// Correction chosen by the drift controller
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriftAction {
    /// Audio and video are close enough
    None,
    /// Pause the audio renderer until video catches up
    PauseAudio,
    /// Resume a paused audio renderer
    ResumeAudio,
    /// Hot-restart the audio pair at `speed`, anchored at `anchor` seconds
    Restart { speed: f64, anchor: f64 },
}

/// One drift measurement
#[derive(Debug, Clone, Copy)]
pub struct DriftInput {
    pub audio_time: f64,
    pub video_time: f64,
    /// Smoothed renderer throughput in frames per second, if known
    pub throughput: Option<f64>,
    /// Frame rate of the input video
    pub source_fps: f64,
    pub audio_speed: f64,
    pub audio_paused: bool,
    /// Seconds since the audio pair was last restarted
    pub since_last_restart: f64,
}

impl DriftInput {
    /// Signed difference, positive when audio is ahead
    pub fn drift(&self) -> f64 {
        self.audio_time - self.video_time
    }
}

/// Audio/video drift decision
pub struct DriftController;

impl DriftController {
    /// Speed the audio should play at to track the measured video throughput
    pub fn ideal_speed(throughput: f64, source_fps: f64, thresholds: &SyncThresholds) -> f64 {
        if source_fps <= 0.0 {
            return 1.0;
        }
        (throughput / source_fps).clamp(thresholds.min_ideal_speed, thresholds.max_ideal_speed)
    }

    pub fn decide(input: &DriftInput, thresholds: &SyncThresholds) -> DriftAction {
        let drift = input.drift();
        let restart_speed = |ideal: f64| ideal.max(thresholds.min_audio_speed);

        let throughput = match input.throughput.filter(|t| *t > 0.0) {
            Some(t) => t,
            None => {
                // Without a throughput estimate only a hard lag is corrected
                if drift < -thresholds.behind_hard {
                    return DriftAction::Restart {
                        speed: restart_speed(input.audio_speed),
                        anchor: input.video_time,
                    };
                }
                return DriftAction::None;
            }
        };

        let ideal = Self::ideal_speed(throughput, input.source_fps, thresholds);

        if drift > thresholds.ahead {
            if ideal < input.audio_speed
                && input.audio_speed > thresholds.min_audio_speed
                && input.since_last_restart > thresholds.min_restart_interval
            {
                DriftAction::Restart {
                    speed: restart_speed(ideal),
                    anchor: input.video_time + thresholds.restart_lead,
                }
            } else if !input.audio_paused {
                DriftAction::PauseAudio
            } else {
                DriftAction::None
            }
        } else if drift < -thresholds.behind_hard
            || (drift < -thresholds.behind_soft && ideal < input.audio_speed + thresholds.speed_margin)
        {
            DriftAction::Restart {
                speed: restart_speed(ideal),
                anchor: input.video_time,
            }
        } else if drift < -thresholds.behind_resume && input.audio_paused {
            DriftAction::ResumeAudio
        } else {
            DriftAction::None
        }
    }
}

/// Estimate of the video position in seconds.
///
/// Extrapolates from the last reported frame using the measured throughput.
pub fn video_clock_time(
    current_frame: u64,
    since_progress: f64,
    throughput: Option<f64>,
    source_fps: f64,
) -> f64 {
    if source_fps <= 0.0 {
        return 0.0;
    }
    match throughput {
        Some(fps) if fps >= 0.0 => (current_frame as f64 + since_progress * fps) / source_fps,
        _ => current_frame as f64 / source_fps,
    }
}

/// Seek and mark placement rules
pub struct SeekPolicy;

impl SeekPolicy {
    /// Latest position playback can start from
    pub fn last_start(meta: &VideoMetadata) -> f64 {
        if meta.fps <= 0.0 {
            return meta.duration.max(0.0);
        }
        (meta.duration - 2.0 / meta.fps).max(0.0)
    }

    /// Clamp a requested seek into the playable range
    pub fn clamp_start(seek: f64, meta: Option<&VideoMetadata>) -> f64 {
        let seek = if seek.is_finite() { seek.max(0.0) } else { 0.0 };
        match meta {
            Some(meta) if meta.duration > 0.0 => seek.min(Self::last_start(meta)),
            _ => seek,
        }
    }

    /// Position to resume from when playback is started again at `current`.
    ///
    /// Playback that already reached the end wraps to the beginning.
    pub fn resume_point(current: f64, meta: &VideoMetadata) -> f64 {
        if current <= Self::last_start(meta) {
            current.max(0.0)
        } else {
            0.0
        }
    }

    /// End mark placed at `current_frame`, or `None` when it sits at the very end
    pub fn end_mark_at(current_frame: u64, meta: &VideoMetadata) -> Option<f64> {
        if current_frame + 2 < meta.frame_count {
            Some(meta.frame_to_time(current_frame))
        } else {
            None
        }
    }

    /// Whether the audio sub-pipeline can run at `speed`
    pub fn audio_enabled(speed: f64, thresholds: &SyncThresholds) -> bool {
        speed >= thresholds.min_audio_speed
    }
}

/// Outcome of the standalone decoder exiting on its own
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecoderExit {
    /// Normal end of input
    Finished,
    /// Exited cleanly but well short of the expected duration
    FinishedTooEarly { reached: f64, duration: f64 },
    /// Failed before any usable metadata: the input is not readable
    InvalidInput { exit_code: Option<i32> },
    /// Failed after metadata was known
    Failed { exit_code: Option<i32> },
}

/// Classification of decoder exits
pub struct DecoderExitRule;

impl DecoderExitRule {
    pub fn classify(
        exit_code: Option<i32>,
        metadata: Option<&VideoMetadata>,
        reached: f64,
        thresholds: &PlaybackThresholds,
    ) -> DecoderExit {
        if exit_code != Some(0) {
            return match metadata {
                Some(_) => DecoderExit::Failed { exit_code },
                None => DecoderExit::InvalidInput { exit_code },
            };
        }
        match metadata {
            Some(meta) if reached + thresholds.early_finish_margin < meta.duration => {
                DecoderExit::FinishedTooEarly {
                    reached,
                    duration: meta.duration,
                }
            }
            _ => DecoderExit::Finished,
        }
    }
}

#[cfg(test)]
mod tests;
