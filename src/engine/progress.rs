//! Renderer throughput estimation

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Snapshot of the throughput estimate, for display
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ThroughputInfo {
    /// Smoothed frames per second, `None` while unknown
    pub fps: Option<f64>,
    /// Frames counted in the last window
    pub frames: u64,
}

/// Exponentially smoothed frames-per-second meter.
///
/// Sampled roughly once per second. The first estimate is only produced after
/// a short warm-up, and the estimate falls back to unknown whenever progress
/// stops or playback is not running.
#[derive(Debug, Clone)]
pub struct ThroughputMeter {
    fps: Option<f64>,
    first_progress: Option<(Instant, u64)>,
    last_sample: Option<(Instant, u64)>,
    next_check: Instant,
    smoothing: f64,
    warmup: Duration,
    idle_reset: Duration,
}

impl ThroughputMeter {
    pub fn new(now: Instant, smoothing: f64, warmup: f64, idle_reset: f64) -> Self {
        Self {
            fps: None,
            first_progress: None,
            last_sample: None,
            next_check: now,
            smoothing: smoothing.clamp(0.0, 1.0),
            warmup: Duration::from_secs_f64(warmup.max(0.0)),
            idle_reset: Duration::from_secs_f64(idle_reset.max(0.0)),
        }
    }

    /// Current estimate
    pub fn fps(&self) -> Option<f64> {
        self.fps
    }

    /// Forget everything, anchoring the frame counter at `frame`
    pub fn reset(&mut self, now: Instant, frame: u64) {
        self.fps = None;
        self.first_progress = None;
        self.last_sample = Some((now, frame));
    }

    /// Record a progress token from the renderer
    pub fn note_progress(&mut self, now: Instant, frame: u64) {
        if self.first_progress.is_none() {
            self.first_progress = Some((now, frame));
        }
    }

    /// Recompute the estimate.
    ///
    /// `last_progress` is the arrival time of the newest progress token and
    /// `running` tells whether frames are expected to advance at all.
    pub fn sample(
        &mut self,
        now: Instant,
        current_frame: u64,
        last_progress: Option<Instant>,
        running: bool,
    ) -> ThroughputInfo {
        let (prev_t, prev_frame) = self.last_sample.unwrap_or((now, current_frame));
        let frames = current_frame.saturating_sub(prev_frame);
        self.last_sample = Some((now, current_frame));

        let idle = last_progress.map_or(true, |t| now.saturating_duration_since(t) > self.idle_reset);
        if idle || !running {
            self.fps = None;
            self.first_progress = None;
        } else if let Some(fps) = self.fps {
            let window = now.saturating_duration_since(prev_t).as_secs_f64();
            let measured = if window > 0.0 {
                frames as f64 / window
            } else {
                fps
            };
            self.fps = Some(measured * self.smoothing + fps * (1.0 - self.smoothing));
        } else if let Some((t0, frame0)) = self.first_progress {
            let elapsed = now.saturating_duration_since(t0);
            if elapsed > self.warmup {
                let counted = current_frame.saturating_sub(frame0);
                self.fps = Some(counted as f64 / elapsed.as_secs_f64());
            }
        }

        ThroughputInfo { fps: self.fps, frames }
    }

    /// Delay until the next sample, keeping samples on whole-second boundaries
    pub fn next_delay(&mut self, now: Instant) -> Duration {
        while self.next_check < now + Duration::from_millis(500) {
            self.next_check += Duration::from_secs(1);
        }
        self.next_check.saturating_duration_since(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meter(now: Instant) -> ThroughputMeter {
        ThroughputMeter::new(now, 0.8, 0.3, 1.0)
    }

    #[test]
    fn test_unknown_until_warmup() {
        let t0 = Instant::now();
        let mut m = meter(t0);
        m.reset(t0, 0);
        m.note_progress(t0, 0);
        let t1 = t0 + Duration::from_millis(200);
        let info = m.sample(t1, 5, Some(t1), true);
        assert_eq!(info.fps, None);
    }

    #[test]
    fn test_first_estimate_and_smoothing() {
        let t0 = Instant::now();
        let mut m = meter(t0);
        m.reset(t0, 0);
        m.note_progress(t0, 0);

        let t1 = t0 + Duration::from_secs(1);
        let info = m.sample(t1, 25, Some(t1), true);
        assert!((info.fps.unwrap() - 25.0).abs() < 1e-9);

        let t2 = t1 + Duration::from_secs(1);
        let info = m.sample(t2, 40, Some(t2), true);
        // 0.8 * 15 + 0.2 * 25
        assert!((info.fps.unwrap() - 17.0).abs() < 1e-9);
        assert_eq!(info.frames, 15);
    }

    #[test]
    fn test_reset_when_idle() {
        let t0 = Instant::now();
        let mut m = meter(t0);
        m.reset(t0, 0);
        m.note_progress(t0, 0);
        let t1 = t0 + Duration::from_secs(1);
        m.sample(t1, 25, Some(t1), true);
        assert!(m.fps().is_some());

        let t2 = t1 + Duration::from_millis(1500);
        let info = m.sample(t2, 25, Some(t1), true);
        assert_eq!(info.fps, None);
    }

    #[test]
    fn test_reset_when_paused() {
        let t0 = Instant::now();
        let mut m = meter(t0);
        m.reset(t0, 0);
        m.note_progress(t0, 0);
        let t1 = t0 + Duration::from_secs(1);
        let info = m.sample(t1, 25, Some(t1), false);
        assert_eq!(info.fps, None);
    }

    #[test]
    fn test_next_delay_aligned() {
        let t0 = Instant::now();
        let mut m = meter(t0);
        let delay = m.next_delay(t0);
        assert_eq!(delay, Duration::from_secs(1));
        let delay = m.next_delay(t0 + Duration::from_millis(700));
        assert_eq!(delay, Duration::from_millis(1300));
    }
}
