// Unit tests for playback rules

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::*;
    use crate::domain::rules::*;

    fn meta(duration: f64, fps: f64, frame_count: u64) -> VideoMetadata {
        VideoMetadata {
            duration,
            fps,
            frame_count,
        }
    }

    #[test]
    fn test_duration_prefers_close_tag() {
        let sources = MetadataSources {
            duration: Some(26.0),
            duration_alt: Some(26.04),
            ..Default::default()
        };
        let duration = MetadataReconciler::reconcile_duration(&sources, 0.1).unwrap();
        assert!((duration - 26.04).abs() < 1e-12);
    }

    #[test]
    fn test_duration_keeps_primary_when_far() {
        let sources = MetadataSources {
            duration: Some(26.0),
            duration_alt: Some(40.0),
            ..Default::default()
        };
        assert_eq!(MetadataReconciler::reconcile_duration(&sources, 0.1), Some(26.0));
    }

    #[test]
    fn test_duration_falls_back_to_tag() {
        let sources = MetadataSources {
            duration_alt: Some(12.5),
            ..Default::default()
        };
        assert_eq!(MetadataReconciler::reconcile_duration(&sources, 0.1), Some(12.5));
    }

    #[test]
    fn test_frame_count_from_duration_and_fps() {
        let sources = MetadataSources {
            duration: Some(5.0),
            fps: Some(25.0),
            ..Default::default()
        };
        let meta = MetadataReconciler::reconcile(&sources, 0.1).unwrap();
        assert_eq!(meta.frame_count, 125);
        assert_eq!(meta.fps, 25.0);
    }

    #[test]
    fn test_frame_count_snaps_to_tag() {
        let sources = MetadataSources {
            duration: Some(5.0),
            fps: Some(25.0),
            frame_count_alt: Some(124),
            ..Default::default()
        };
        let meta = MetadataReconciler::reconcile(&sources, 0.1).unwrap();
        assert_eq!(meta.frame_count, 124);
        assert!((meta.fps - 24.8).abs() < 1e-9);
    }

    #[test]
    fn test_frame_count_ignores_distant_tag() {
        let sources = MetadataSources {
            duration: Some(5.0),
            fps: Some(25.0),
            frame_count_alt: Some(300),
            ..Default::default()
        };
        let meta = MetadataReconciler::reconcile(&sources, 0.1).unwrap();
        assert_eq!(meta.frame_count, 125);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let sources = MetadataSources {
            duration: Some(26.0),
            duration_alt: Some(26.04),
            fps: Some(25.0),
            frame_count_alt: Some(651),
        };
        let first = MetadataReconciler::reconcile(&sources, 0.1);
        let second = MetadataReconciler::reconcile(&sources, 0.1);
        assert_eq!(first, second);
    }

    #[test]
    fn test_reconcile_requires_fps() {
        let sources = MetadataSources {
            duration: Some(5.0),
            ..Default::default()
        };
        assert!(MetadataReconciler::reconcile(&sources, 0.1).is_none());
    }

    fn eos_input(current_frame: u64) -> EndOfStreamInput {
        EndOfStreamInput {
            current_frame,
            end_frame: Some(300),
            since_progress: Some(0.15),
            decoder_alive: false,
            filter_script: false,
            paused: false,
            recording: false,
        }
    }

    #[test]
    fn test_end_of_stream_loops() {
        let action = EndOfStreamRule::evaluate(&eos_input(298), &PlaybackThresholds::default());
        assert_eq!(action, EndOfStreamAction::Loop);
    }

    #[test]
    fn test_end_of_stream_needs_stall() {
        let mut input = eos_input(298);
        input.since_progress = Some(0.05);
        let action = EndOfStreamRule::evaluate(&input, &PlaybackThresholds::default());
        assert_eq!(action, EndOfStreamAction::Continue);
    }

    #[test]
    fn test_end_of_stream_waits_for_decoder() {
        let mut input = eos_input(298);
        input.decoder_alive = true;
        let action = EndOfStreamRule::evaluate(&input, &PlaybackThresholds::default());
        assert_eq!(action, EndOfStreamAction::Continue);
    }

    #[test]
    fn test_end_of_stream_far_from_end() {
        let action = EndOfStreamRule::evaluate(&eos_input(200), &PlaybackThresholds::default());
        assert_eq!(action, EndOfStreamAction::Continue);
    }

    #[test]
    fn test_end_of_stream_holds_while_recording() {
        let mut input = eos_input(299);
        input.recording = true;
        let action = EndOfStreamRule::evaluate(&input, &PlaybackThresholds::default());
        assert_eq!(action, EndOfStreamAction::Hold);
    }

    #[test]
    fn test_end_of_stream_filter_script() {
        let mut input = eos_input(298);
        input.filter_script = true;
        input.decoder_alive = true;
        input.since_progress = Some(0.0);
        let action = EndOfStreamRule::evaluate(&input, &PlaybackThresholds::default());
        assert_eq!(action, EndOfStreamAction::Loop);

        input.current_frame = 297;
        let action = EndOfStreamRule::evaluate(&input, &PlaybackThresholds::default());
        assert_eq!(action, EndOfStreamAction::Continue);
    }

    fn drift_input(audio_time: f64, video_time: f64) -> DriftInput {
        DriftInput {
            audio_time,
            video_time,
            throughput: Some(20.0),
            source_fps: 25.0,
            audio_speed: 1.0,
            audio_paused: false,
            since_last_restart: 2.0,
        }
    }

    #[test]
    fn test_drift_ahead_restarts_slower() {
        let action = DriftController::decide(&drift_input(10.6, 10.0), &SyncThresholds::default());
        match action {
            DriftAction::Restart { speed, anchor } => {
                assert!((anchor - 10.1).abs() < 1e-9);
                assert!((speed - 0.8).abs() < 1e-9);
            }
            other => panic!("expected restart, got {:?}", other),
        }
    }

    #[test]
    fn test_drift_ahead_pauses_after_recent_restart() {
        let mut input = drift_input(10.6, 10.0);
        input.since_last_restart = 0.5;
        let action = DriftController::decide(&input, &SyncThresholds::default());
        assert_eq!(action, DriftAction::PauseAudio);

        input.audio_paused = true;
        let action = DriftController::decide(&input, &SyncThresholds::default());
        assert_eq!(action, DriftAction::None);
    }

    #[test]
    fn test_drift_far_behind_restarts_at_video() {
        let mut input = drift_input(8.5, 10.0);
        input.throughput = Some(25.0);
        let action = DriftController::decide(&input, &SyncThresholds::default());
        assert_eq!(
            action,
            DriftAction::Restart {
                speed: 1.0,
                anchor: 10.0
            }
        );
    }

    #[test]
    fn test_drift_far_behind_without_throughput() {
        let mut input = drift_input(8.5, 10.0);
        input.throughput = None;
        let action = DriftController::decide(&input, &SyncThresholds::default());
        assert_eq!(
            action,
            DriftAction::Restart {
                speed: 1.0,
                anchor: 10.0
            }
        );
    }

    #[test]
    fn test_drift_soft_behind_restarts_when_speed_close() {
        let action = DriftController::decide(&drift_input(9.6, 10.0), &SyncThresholds::default());
        assert!(matches!(action, DriftAction::Restart { anchor, .. } if anchor == 10.0));
    }

    #[test]
    fn test_drift_soft_behind_keeps_faster_ideal() {
        let mut input = drift_input(9.6, 10.0);
        input.throughput = Some(50.0);
        let action = DriftController::decide(&input, &SyncThresholds::default());
        assert_eq!(action, DriftAction::None);
    }

    #[test]
    fn test_drift_mild_behind_resumes_paused_audio() {
        let mut input = drift_input(9.8, 10.0);
        input.throughput = Some(50.0);
        input.audio_paused = true;
        let action = DriftController::decide(&input, &SyncThresholds::default());
        assert_eq!(action, DriftAction::ResumeAudio);
    }

    #[test]
    fn test_drift_restart_speed_floor() {
        let mut input = drift_input(10.6, 10.0);
        input.throughput = Some(5.0);
        let action = DriftController::decide(&input, &SyncThresholds::default());
        assert!(matches!(action, DriftAction::Restart { speed, .. } if speed == 0.5));
    }

    #[test]
    fn test_ideal_speed_clamped() {
        let thresholds = SyncThresholds::default();
        assert_eq!(DriftController::ideal_speed(1.0, 25.0, &thresholds), 0.1);
        assert_eq!(DriftController::ideal_speed(500.0, 25.0, &thresholds), 5.0);
    }

    #[test]
    fn test_video_clock_time() {
        assert_eq!(video_clock_time(250, 0.5, Some(20.0), 25.0), 10.4);
        assert_eq!(video_clock_time(250, 0.5, None, 25.0), 10.0);
        assert_eq!(video_clock_time(250, 0.5, None, 0.0), 0.0);
    }

    #[test]
    fn test_clamp_start() {
        let m = meta(10.0, 25.0, 250);
        assert_eq!(SeekPolicy::clamp_start(-3.0, Some(&m)), 0.0);
        assert!((SeekPolicy::clamp_start(20.0, Some(&m)) - 9.92).abs() < 1e-9);
        assert_eq!(SeekPolicy::clamp_start(4.0, Some(&m)), 4.0);
        assert_eq!(SeekPolicy::clamp_start(4.0, None), 4.0);
    }

    #[test]
    fn test_resume_point_wraps() {
        let m = meta(10.0, 25.0, 250);
        assert_eq!(SeekPolicy::resume_point(5.0, &m), 5.0);
        assert_eq!(SeekPolicy::resume_point(9.99, &m), 0.0);
    }

    #[test]
    fn test_end_mark_near_end_cleared() {
        let m = meta(10.0, 25.0, 250);
        assert_eq!(SeekPolicy::end_mark_at(100, &m), Some(4.0));
        assert_eq!(SeekPolicy::end_mark_at(248, &m), None);
    }

    #[test]
    fn test_audio_enabled_threshold() {
        let thresholds = SyncThresholds::default();
        assert!(SeekPolicy::audio_enabled(0.5, &thresholds));
        assert!(!SeekPolicy::audio_enabled(0.4, &thresholds));
    }

    #[test]
    fn test_decoder_exit_classification() {
        let thresholds = PlaybackThresholds::default();
        let m = meta(60.0, 25.0, 1500);

        assert_eq!(
            DecoderExitRule::classify(Some(1), None, 0.0, &thresholds),
            DecoderExit::InvalidInput { exit_code: Some(1) }
        );
        assert_eq!(
            DecoderExitRule::classify(Some(1), Some(&m), 10.0, &thresholds),
            DecoderExit::Failed { exit_code: Some(1) }
        );
        assert_eq!(
            DecoderExitRule::classify(Some(0), Some(&m), 59.0, &thresholds),
            DecoderExit::Finished
        );
        assert!(matches!(
            DecoderExitRule::classify(Some(0), Some(&m), 30.0, &thresholds),
            DecoderExit::FinishedTooEarly { .. }
        ));
    }
}
