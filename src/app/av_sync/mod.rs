// A/V sync - Audio clock bookkeeping around the drift controller

use std::time::Instant;

use crate::domain::model::{AudioClock, SyncThresholds};
use crate::domain::rules::{DriftAction, DriftController, DriftInput};

/// Audio side of the synchronization loop.
///
/// Holds the wall-clock audio estimate of the running audio pair. Disarmed
/// whenever no audio renderer is attached, in which case every measurement is
/// a no-op.
#[derive(Debug, Clone)]
pub struct AudioSync {
    clock: Option<AudioClock>,
    last_restart: Instant,
    thresholds: SyncThresholds,
}

impl AudioSync {
    pub fn new(thresholds: SyncThresholds, now: Instant) -> Self {
        Self {
            clock: None,
            last_restart: now,
            thresholds,
        }
    }

    pub fn thresholds(&self) -> &SyncThresholds {
        &self.thresholds
    }

    /// Start tracking a freshly launched, paused audio pair
    pub fn arm(&mut self, anchor: f64, speed: f64, now: Instant) {
        self.clock = Some(AudioClock::new(anchor, speed, now));
        self.last_restart = now;
    }

    pub fn disarm(&mut self) {
        self.clock = None;
    }

    pub fn is_armed(&self) -> bool {
        self.clock.is_some()
    }

    pub fn clock(&self) -> Option<&AudioClock> {
        self.clock.as_ref()
    }

    /// Current audio position in seconds
    pub fn audio_time(&mut self, now: Instant) -> Option<f64> {
        let clock = self.clock.as_mut()?;
        clock.update(now);
        Some(clock.time())
    }

    pub fn paused(&mut self, now: Instant) {
        if let Some(clock) = self.clock.as_mut() {
            clock.pause(now);
        }
    }

    pub fn resumed(&mut self, now: Instant) {
        if let Some(clock) = self.clock.as_mut() {
            clock.resume(now);
        }
    }

    /// The audio pair was relaunched at `anchor` with tempo `speed`
    pub fn restarted(&mut self, anchor: f64, speed: f64, now: Instant) {
        match self.clock.as_mut() {
            Some(clock) => clock.rearm(anchor, speed, now),
            None => {
                let mut clock = AudioClock::new(anchor, speed, now);
                clock.resume(now);
                self.clock = Some(clock);
            }
        }
        self.last_restart = now;
    }

    /// Compare the audio clock against `video_time` and pick a correction
    pub fn measure(
        &mut self,
        now: Instant,
        video_time: f64,
        throughput: Option<f64>,
        source_fps: f64,
    ) -> Option<(DriftInput, DriftAction)> {
        let clock = self.clock.as_mut()?;
        clock.update(now);
        let input = DriftInput {
            audio_time: clock.time(),
            video_time,
            throughput,
            source_fps,
            audio_speed: clock.speed(),
            audio_paused: clock.is_paused(),
            since_last_restart: now.saturating_duration_since(self.last_restart).as_secs_f64(),
        };
        let action = DriftController::decide(&input, &self.thresholds);
        Some((input, action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_disarmed_is_noop() {
        let now = Instant::now();
        let mut sync = AudioSync::new(SyncThresholds::default(), now);
        assert!(sync.measure(now, 10.0, Some(25.0), 25.0).is_none());
        assert!(sync.audio_time(now).is_none());
        sync.paused(now);
        assert!(!sync.is_armed());
    }

    #[test]
    fn test_clock_runs_only_after_resume() {
        let t0 = Instant::now();
        let mut sync = AudioSync::new(SyncThresholds::default(), t0);
        sync.arm(10.0, 1.0, t0);
        let t1 = t0 + Duration::from_secs(1);
        assert_eq!(sync.audio_time(t1), Some(10.0));

        sync.resumed(t1);
        let t2 = t1 + Duration::from_secs(2);
        assert!((sync.audio_time(t2).unwrap() - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_audio_ahead_restarts_slower() {
        let t0 = Instant::now();
        let mut sync = AudioSync::new(SyncThresholds::default(), t0);
        sync.arm(10.6, 1.0, t0);
        let t1 = t0 + Duration::from_secs(2);
        sync.resumed(t1);

        let (input, action) = sync.measure(t1, 10.0, Some(20.0), 25.0).unwrap();
        assert!((input.drift() - 0.6).abs() < 1e-9);
        match action {
            DriftAction::Restart { speed, anchor } => {
                assert!((speed - 0.8).abs() < 1e-9);
                assert!((anchor - 10.1).abs() < 1e-9);
            }
            other => panic!("unexpected {:?}", other),
        }

        sync.restarted(10.1, 0.8, t1);
        let clock = sync.clock().unwrap();
        assert!(!clock.is_paused());
        assert!((clock.speed() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_recent_restart_pauses_instead() {
        let t0 = Instant::now();
        let mut sync = AudioSync::new(SyncThresholds::default(), t0);
        sync.arm(10.6, 1.0, t0);
        sync.resumed(t0);
        let (_, action) = sync.measure(t0, 10.0, Some(20.0), 25.0).unwrap();
        assert_eq!(action, DriftAction::PauseAudio);
    }
}
