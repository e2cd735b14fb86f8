//! Integration tests for the process multiplexer

use chrono::Utc;
use mosher_cli::domain::model::{Line, StreamKind};
use mosher_cli::engine::LineAssembler;
use proptest::prelude::*;

// Test utilities

/// Feed `chunks` one after the other and flush, keeping text and overwrite flag
fn assemble(chunks: &[&[u8]]) -> Vec<(String, bool)> {
    let mut assembler = LineAssembler::new(StreamKind::Stderr);
    let now = Utc::now();
    let mut lines: Vec<Line> = Vec::new();
    for chunk in chunks {
        lines.extend(assembler.push(chunk, now));
    }
    lines.extend(assembler.finish(now));
    lines.into_iter().map(|l| (l.text, l.overwrite)).collect()
}

proptest! {
    #[test]
    fn chunking_never_changes_the_lines(
        tokens in proptest::collection::vec(
            prop_oneof![
                Just("a"),
                Just("b"),
                Just("\r"),
                Just("\n"),
                Just("ż"),
                Just("€"),
                Just("🎞"),
            ],
            0..48,
        ),
        cuts in proptest::collection::vec(0usize..192, 0..8),
    ) {
        // Cuts land anywhere, including inside a multibyte sequence
        let bytes: Vec<u8> = tokens.concat().into_bytes();
        let whole = assemble(&[bytes.as_slice()]);
        prop_assert!(whole.iter().all(|(text, _)| !text.contains('\u{FFFD}')), "decoded text contains U+FFFD replacement character");

        let mut cuts: Vec<usize> = cuts.into_iter().map(|c| c.min(bytes.len())).collect();
        cuts.sort_unstable();
        let mut chunks: Vec<&[u8]> = Vec::new();
        let mut from = 0;
        for cut in cuts {
            chunks.push(&bytes[from..cut]);
            from = cut;
        }
        chunks.push(&bytes[from..]);

        prop_assert_eq!(assemble(&chunks), whole);
    }
}

#[test]
fn test_progress_pieces_after_cr() {
    let lines = assemble(&[&b"frame=1\rframe=2\r"[..], &b"\ndone\n"[..]]);
    assert_eq!(
        lines,
        vec![
            ("frame=1".to_string(), false),
            ("frame=2".to_string(), true),
            ("done".to_string(), false),
        ]
    );
}

#[cfg(unix)]
mod processes {
    use std::collections::HashMap;
    use std::time::{Duration, Instant};

    use mosher_cli::domain::model::StreamKind;
    use mosher_cli::engine::{OutputSink, ProcessSpec, ProcessStatus, ProcessTable, StdinSource, TERMINATE_GRACE};
    use mosher_cli::error::MosherError;

    fn sh(name: &str, script: &str) -> ProcessSpec {
        ProcessSpec::new(name, vec!["sh".to_string(), "-c".to_string(), script.to_string()])
    }

    /// Poll until `name` exits, then collect every line it produced
    fn run_to_exit(table: &mut ProcessTable, name: &str) -> (ProcessStatus, Vec<(StreamKind, String, bool)>) {
        let mut lines = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(10);
        let status = loop {
            table.drain_all(|process, stream, batch| {
                if process == name {
                    lines.extend(batch.into_iter().map(|l| (stream, l.text, l.overwrite)));
                }
            });
            match table.status(name) {
                ProcessStatus::Running if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(10))
                }
                status => break status,
            }
        };
        if let Some(process) = table.stop(name) {
            process.drain(|stream, batch| {
                lines.extend(batch.into_iter().map(|l| (stream, l.text, l.overwrite)))
            });
        }
        (status, lines)
    }

    fn texts(lines: &[(StreamKind, String, bool)]) -> Vec<&str> {
        lines.iter().map(|(_, text, _)| text.as_str()).collect()
    }

    #[test]
    fn test_chained_stdout_feeds_next_stage() {
        let mut table = ProcessTable::new();
        table
            .start(sh("producer", "printf 'one\\ntwo\\nthree\\n'").stdout(OutputSink::Pipe))
            .unwrap();
        table
            .start(
                sh("consumer", "tr a-z A-Z")
                    .stdin(StdinSource::FromProcess("producer".to_string()))
                    .stdout(OutputSink::Capture),
            )
            .unwrap();

        let (status, lines) = run_to_exit(&mut table, "consumer");
        assert_eq!(status, ProcessStatus::Exited(Some(0)));
        assert_eq!(texts(&lines), vec!["ONE", "TWO", "THREE"]);
        assert!(lines.iter().all(|(stream, _, _)| *stream == StreamKind::Stdout));
    }

    #[test]
    fn test_stderr_capture_keeps_progress_flag() {
        let mut table = ProcessTable::new();
        table
            .start(sh("encoder", "printf 'frame=1\\rframe=2\\rdone\\n' >&2").stderr(OutputSink::Capture))
            .unwrap();

        let (_, lines) = run_to_exit(&mut table, "encoder");
        let flags: Vec<bool> = lines.iter().map(|(_, _, overwrite)| *overwrite).collect();
        assert_eq!(texts(&lines), vec!["frame=1", "frame=2", "done"]);
        assert_eq!(flags, vec![false, true, true]);
    }

    #[test]
    fn test_exit_codes_are_reported() {
        let mut table = ProcessTable::new();
        table.start(sh("failing", "exit 3")).unwrap();
        let (status, _) = run_to_exit(&mut table, "failing");
        assert_eq!(status, ProcessStatus::Exited(Some(3)));
        assert_eq!(table.status("failing"), ProcessStatus::Stopped);
        assert_eq!(table.status("never-started"), ProcessStatus::Stopped);
    }

    #[test]
    fn test_kill_is_idempotent() {
        let mut table = ProcessTable::new();
        table.start(sh("sleeper", "exec sleep 30")).unwrap();
        assert_eq!(table.status("sleeper"), ProcessStatus::Running);

        let started = Instant::now();
        let mut process = table.stop("sleeper").unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(process.exit_code(), Some(None));
        process.kill();
        process.kill();
        assert!(table.stop("sleeper").is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_stop_lets_the_process_exit_cleanly() {
        let mut table = ProcessTable::new();
        table
            .start(
                sh(
                    "graceful",
                    "trap 'echo got-term >&2; exit 0' TERM; echo ready >&2; while :; do :; done",
                )
                .stderr(OutputSink::Capture),
            )
            .unwrap();

        let mut lines = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(10);
        while !lines.iter().any(|text: &String| text == "ready") && Instant::now() < deadline {
            table.drain_all(|_, _, batch| lines.extend(batch.into_iter().map(|l| l.text)));
            std::thread::sleep(Duration::from_millis(10));
        }

        let process = table.stop("graceful").unwrap();
        process.drain(|_, batch| lines.extend(batch.into_iter().map(|l| l.text)));
        assert_eq!(lines, vec!["ready", "got-term"]);
        assert_eq!(process.exit_code(), Some(Some(0)));
    }

    #[test]
    fn test_stubborn_process_is_killed_after_grace() {
        let mut table = ProcessTable::new();
        table
            .start(sh("stubborn", "trap '' TERM; while :; do sleep 1; done"))
            .unwrap();
        std::thread::sleep(Duration::from_millis(100));

        let started = Instant::now();
        let process = table.stop("stubborn").unwrap();
        assert!(started.elapsed() >= TERMINATE_GRACE);
        assert_eq!(process.exit_code(), Some(None));
    }

    #[test]
    fn test_restart_bumps_generation() {
        let mut table = ProcessTable::new();
        let first = table.start(sh("renderer", "exec sleep 30")).unwrap();
        let second = table
            .restart("renderer", vec!["sh".to_string(), "-c".to_string(), "exit 0".to_string()])
            .unwrap();
        assert!(second > first);
        assert_eq!(table.generation_of("renderer"), Some(second));
        let (status, _) = run_to_exit(&mut table, "renderer");
        assert_eq!(status, ProcessStatus::Exited(Some(0)));
    }

    #[test]
    fn test_environment_changes() {
        let mut env = HashMap::new();
        env.insert("MOSHER_TEST_VALUE".to_string(), "42".to_string());
        let mut table = ProcessTable::new();
        table
            .start(
                sh("env", "echo \"$MOSHER_TEST_VALUE ${HOME:-unset}\"")
                    .envs(env)
                    .env_remove("HOME")
                    .stdout(OutputSink::Capture),
            )
            .unwrap();
        let (_, lines) = run_to_exit(&mut table, "env");
        assert_eq!(texts(&lines), vec!["42 unset"]);
    }

    #[test]
    fn test_launch_failures() {
        let mut table = ProcessTable::new();
        let missing_upstream = table.start(
            sh("renderer", "cat").stdin(StdinSource::FromProcess("decoder".to_string())),
        );
        assert!(matches!(missing_upstream, Err(MosherError::MissingPipe { .. })));

        let missing_binary = table.start(ProcessSpec::new(
            "decoder",
            vec!["/nonexistent/mosher-tool".to_string()],
        ));
        assert!(matches!(missing_binary, Err(MosherError::SpawnFailed { .. })));

        let empty = table.start(ProcessSpec::new("encoder", Vec::new()));
        assert!(matches!(empty, Err(MosherError::EmptyCommand { .. })));
        assert!(table.is_empty());
    }
}
