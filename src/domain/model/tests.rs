// Unit tests for domain models

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::*;
    use crate::domain::model::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_time_to_frame_rounds() {
        assert_eq!(time_to_frame(1.0, 25.0), 25);
        assert_eq!(time_to_frame(1.02, 25.0), 26);
        assert_eq!(time_to_frame(0.0, 25.0), 0);
        assert_eq!(time_to_frame(3.0, 0.0), 0);
    }

    #[test]
    fn test_frame_to_time() {
        assert_eq!(frame_to_time(50, 25.0), 2.0);
        assert_eq!(frame_to_time(50, 0.0), 0.0);
    }

    #[test]
    fn test_metadata_frame_duration() {
        let meta = VideoMetadata {
            duration: 10.0,
            fps: 25.0,
            frame_count: 250,
        };
        assert!((meta.frame_duration() - 0.04).abs() < 1e-12);
        assert_eq!(meta.time_to_frame(2.0), 50);
        assert_eq!(meta.frame_to_time(125), 5.0);
        assert_eq!(VideoMetadata::default().frame_duration(), 0.0);
    }

    #[test]
    fn test_mark_range_rejects_inverted() {
        let result = MarkRange::new(Some(5.0), Some(2.0));
        assert!(matches!(result, Err(DomainError::BadArgs(_))));
    }

    #[test]
    fn test_mark_range_rejects_negative() {
        assert!(MarkRange::new(Some(-1.0), None).is_err());
    }

    #[test]
    fn test_mark_range_contains() {
        let marks = MarkRange::new(Some(2.0), Some(6.0)).unwrap();
        assert!(marks.contains(2.0, Some(10.0)));
        assert!(marks.contains(6.0, Some(10.0)));
        assert!(!marks.contains(1.9, Some(10.0)));
        assert!(!marks.contains(7.0, Some(10.0)));

        let open_end = MarkRange::new(Some(2.0), None).unwrap();
        assert!(open_end.contains(9.0, Some(10.0)));
        assert!(!open_end.contains(9.0, None));
    }

    #[test]
    fn test_script_ref_parameters() {
        let script = ScriptRef::glitch("mosh.js").with_parameters("");
        assert_eq!(script.parameters, None);
        assert!(!script.is_filter());

        let script = ScriptRef::filter("graph.js").with_parameters("{\"a\":1}");
        assert_eq!(script.parameters.as_deref(), Some("{\"a\":1}"));
        assert!(script.is_filter());
        assert!(script.needs_decoder());
    }

    #[test]
    fn test_inline_filter_skips_decoder() {
        let script = ScriptRef::inline_filter("negate");
        assert!(script.is_filter());
        assert!(!script.needs_decoder());
        assert!(ScriptRef::glitch("a.js").needs_decoder());
    }

    #[test]
    fn test_session_request_validation() {
        let mut request = SessionRequest::new("input.mp4");
        assert!(request.validate().is_ok());

        request.speed = 7.0;
        assert!(request.validate().is_err());

        request.speed = 1.0;
        request.record = true;
        assert!(request.validate().is_err());

        request.output = Some("out.mp4".into());
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_session_request_empty_input() {
        let request = SessionRequest::new("");
        assert!(matches!(request.validate(), Err(DomainError::BadArgs(_))));
    }

    #[test]
    fn test_line_progress_flag() {
        let line = Line::new(
            "frame=  10".to_string(),
            true,
            StreamKind::Stderr,
            chrono::Utc::now(),
        );
        assert!(line.is_progress());
        assert_eq!(line.stream.to_string(), "stderr");
    }

    #[test]
    fn test_audio_clock_paused_does_not_advance() {
        let t0 = Instant::now();
        let mut clock = AudioClock::new(10.0, 1.0, t0);
        clock.update(t0 + Duration::from_secs(2));
        assert_eq!(clock.time(), 10.0);
        assert!(clock.is_paused());
    }

    #[test]
    fn test_audio_clock_scales_by_speed() {
        let t0 = Instant::now();
        let mut clock = AudioClock::new(0.0, 1.0, t0);
        clock.rearm(4.0, 0.5, t0);
        clock.update(t0 + Duration::from_secs(2));
        assert!((clock.time() - 5.0).abs() < 1e-9);
        assert_eq!(clock.speed(), 0.5);
    }

    #[test]
    fn test_audio_clock_pause_resume() {
        let t0 = Instant::now();
        let mut clock = AudioClock::new(0.0, 1.0, t0);
        clock.resume(t0);
        clock.pause(t0 + Duration::from_secs(1));
        clock.update(t0 + Duration::from_secs(5));
        assert!((clock.time() - 1.0).abs() < 1e-9);
        clock.resume(t0 + Duration::from_secs(5));
        clock.update(t0 + Duration::from_secs(6));
        assert!((clock.time() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_threshold_defaults() {
        let sync = SyncThresholds::default();
        assert_eq!(sync.ahead, 0.5);
        assert_eq!(sync.behind_hard, 1.0);
        assert_eq!(sync.behind_soft, 0.3);
        assert_eq!(sync.behind_resume, 0.1);

        let playback = PlaybackThresholds::default();
        assert_eq!(playback.end_margin_frames, 5);
        assert_eq!(playback.filter_end_margin_frames, 2);
        assert_eq!(playback.reconcile_tolerance, 0.1);
    }

    #[test]
    fn test_playback_state_display() {
        assert_eq!(PlaybackState::Playing.to_string(), "playing");
        assert_eq!(PlaybackState::Stopping.to_string(), "stopping");
    }
}
