//! Metadata and progress extraction from tool status output

pub mod status;

pub use status::{strip_hex_address, StatusEvent, StatusParser};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::model::VideoMetadata;
use crate::domain::rules::{MetadataReconciler, MetadataSources};

/// Metadata report printed by the `probe` command
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeReport {
    pub path: String,
    pub duration: f64,
    pub fps: f64,
    pub frame_count: u64,
    /// Header duration before reconciliation
    pub duration_header: Option<f64>,
    /// Tag duration before reconciliation
    pub duration_tag: Option<f64>,
    /// Tag frame count before reconciliation
    pub frame_count_tag: Option<u64>,
}

/// Accumulates metadata reported by status lines.
///
/// Raw source values are stored as reported and the effective metadata is
/// recomputed from them on every update, so repeated lines never compound.
#[derive(Debug, Clone)]
pub struct MetadataTracker {
    sources: MetadataSources,
    tolerance: f64,
    current: Option<VideoMetadata>,
    frozen: bool,
}

impl MetadataTracker {
    pub fn new(tolerance: f64) -> Self {
        Self {
            sources: MetadataSources::default(),
            tolerance,
            current: None,
            frozen: false,
        }
    }

    /// Feed one parsed status event.
    ///
    /// Returns the new effective metadata when it changed.
    pub fn apply(&mut self, event: &StatusEvent) -> Option<VideoMetadata> {
        if self.frozen {
            return None;
        }
        match event {
            StatusEvent::Duration(d) => self.sources.duration = Some(*d),
            StatusEvent::DurationTag(d) => self.sources.duration_alt = Some(*d),
            StatusEvent::Fps(f) => self.sources.fps = Some(*f),
            StatusEvent::FrameCountTag(n) => self.sources.frame_count_alt = Some(*n),
            _ => return None,
        }

        let reconciled = MetadataReconciler::reconcile(&self.sources, self.tolerance);
        if reconciled.is_some() && reconciled != self.current {
            self.current = reconciled;
            if let Some(meta) = &self.current {
                info!(
                    duration = meta.duration,
                    fps = meta.fps,
                    frames = meta.frame_count,
                    "Video metadata updated"
                );
            }
            return self.current;
        }
        None
    }

    pub fn metadata(&self) -> Option<VideoMetadata> {
        self.current
    }

    pub fn sources(&self) -> &MetadataSources {
        &self.sources
    }

    /// Whether any header field was recognized yet
    pub fn has_any(&self) -> bool {
        self.sources != MetadataSources::default()
    }

    /// Stop accepting updates
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Start over for a new session, keeping nothing
    pub fn reset(&mut self) {
        self.sources = MetadataSources::default();
        self.current = None;
        self.frozen = false;
    }

    /// Build a printable report for `path`
    pub fn report(&self, path: &str) -> Option<ProbeReport> {
        let meta = self.current?;
        Some(ProbeReport {
            path: path.to_string(),
            duration: meta.duration,
            fps: meta.fps,
            frame_count: meta.frame_count,
            duration_header: self.sources.duration,
            duration_tag: self.sources.duration_alt,
            frame_count_tag: self.sources.frame_count_alt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(tracker: &mut MetadataTracker, lines: &[&str]) -> Vec<VideoMetadata> {
        lines
            .iter()
            .filter_map(|line| tracker.apply(&StatusParser::parse_metadata_line(line)))
            .collect()
    }

    #[test]
    fn test_tracker_reconciles_from_lines() {
        let mut tracker = MetadataTracker::new(0.1);
        let updates = feed(
            &mut tracker,
            &[
                "  Duration: 00:00:05.00, start: 0.000000, bitrate: 1000 kb/s",
                "    Stream #0:0: Video: h264, yuv420p, 640x480, 25 fps, 25 tbr",
                "      NUMBER_OF_FRAMES: 124",
            ],
        );
        assert_eq!(updates.len(), 2);
        let meta = tracker.metadata().unwrap();
        assert_eq!(meta.frame_count, 124);
        assert!((meta.fps - 24.8).abs() < 1e-9);
    }

    #[test]
    fn test_tracker_repeated_lines_are_stable() {
        let mut tracker = MetadataTracker::new(0.1);
        let lines = [
            "  Duration: 00:00:26.00, start: 0.040000, bitrate: 3933 kb/s",
            "    Stream #0:0: Video: h264, yuv420p, 1920x1080, 25 fps, 25 tbr",
            "      DURATION        : 00:00:26.040000000",
        ];
        feed(&mut tracker, &lines);
        let first = tracker.metadata();
        let again = feed(&mut tracker, &lines);
        assert!(again.is_empty());
        assert_eq!(tracker.metadata(), first);
        assert!((first.unwrap().duration - 26.04).abs() < 1e-9);
    }

    #[test]
    fn test_tracker_frozen_ignores_updates() {
        let mut tracker = MetadataTracker::new(0.1);
        tracker.freeze();
        let updates = feed(&mut tracker, &["  Duration: 00:00:05.00, start: 0"]);
        assert!(updates.is_empty());
        assert!(!tracker.has_any());

        tracker.reset();
        assert!(!tracker.is_frozen());
    }

    #[test]
    fn test_report() {
        let mut tracker = MetadataTracker::new(0.1);
        assert!(tracker.report("a.mp4").is_none());
        feed(
            &mut tracker,
            &[
                "  Duration: 00:00:10.00, start: 0",
                "    Stream #0:0: Video: h264, 30 fps, 30 tbr",
            ],
        );
        let report = tracker.report("a.mp4").unwrap();
        assert_eq!(report.frame_count, 300);
        assert_eq!(report.duration_header, Some(10.0));
    }
}
