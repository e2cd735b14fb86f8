//! Command implementations

use std::str::FromStr;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::adapters::{TimerQueue, TracingHost};
use crate::app::container::{AppContainer, DefaultAppContainer};
use crate::app::playback_interactor::PlaybackInteractor;
use crate::cli::args::{ProbeArgs, RecordArgs, SessionArgs};
use crate::domain::model::{RecordingOutcome, SessionRequest};
use crate::utils::TimeParser;

type Player = PlaybackInteractor<TimerQueue, TracingHost>;

/// Wake-up period of the host loop while no timer is pending
const IDLE_WAKEUP: Duration = Duration::from_millis(250);

/// Seconds skipped by `+` and `-`
const SEEK_STEP: f64 = 5.0;

const KEY_HELP: &str = "\
p        play/pause
s        step one frame
+ / -    seek 5 s forward/backward
> / <    seek one frame forward/backward
seek T   jump to T (HH:MM:SS.ms, MM:SS.ms, or seconds)
speed X  change playback speed
[ / ]    set start/end mark at the current frame
c        clear marks
m        mute/unmute
r        restart
rec      start/stop recording
midi M   send M to the renderer's MIDI input
q        quit (twice to skip finalizing a recording)";

/// One keyboard command typed on stdin
#[derive(Debug, Clone, PartialEq)]
pub enum HostCommand {
    TogglePlay,
    Step,
    SeekBy(f64),
    SeekFrames(i64),
    SeekTo(f64),
    Speed(f64),
    StartMark,
    EndMark,
    ClearMarks,
    ToggleMute,
    Restart,
    ToggleRecording,
    Midi(String),
    Help,
    Quit,
}

impl FromStr for HostCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(word, rest)| (word, rest.trim()));
        let command = match word {
            "p" => HostCommand::TogglePlay,
            "s" => HostCommand::Step,
            "+" => HostCommand::SeekBy(SEEK_STEP),
            "-" => HostCommand::SeekBy(-SEEK_STEP),
            ">" => HostCommand::SeekFrames(1),
            "<" => HostCommand::SeekFrames(-1),
            "[" => HostCommand::StartMark,
            "]" => HostCommand::EndMark,
            "c" => HostCommand::ClearMarks,
            "m" => HostCommand::ToggleMute,
            "r" => HostCommand::Restart,
            "rec" => HostCommand::ToggleRecording,
            "h" | "?" | "help" => HostCommand::Help,
            "q" | "quit" => HostCommand::Quit,
            "seek" => HostCommand::SeekTo(
                TimeParser::new().parse_time(rest).map_err(|e| e.to_string())?,
            ),
            "speed" => HostCommand::Speed(
                rest.parse()
                    .map_err(|_| format!("`{}` is not a speed", rest))?,
            ),
            "midi" if !rest.is_empty() => HostCommand::Midi(rest.to_string()),
            "midi" => return Err("midi needs a message".to_string()),
            other => return Err(format!("unknown command `{}`, type h for help", other)),
        };
        Ok(command)
    }
}

/// How the host loop treats the end of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionMode {
    /// Keep previewing after an interactive recording finished
    Preview,
    /// Leave as soon as the recording is finalized
    Record,
}

/// Execute the play command
pub fn play(container: &DefaultAppContainer, args: SessionArgs) -> Result<()> {
    info!(input = %args.input.display(), "Starting preview");
    let request = args.to_request()?;
    run_session(container, request, SessionMode::Preview)
}

/// Execute the record command
pub fn record(container: &DefaultAppContainer, args: RecordArgs) -> Result<()> {
    info!(
        input = %args.session.input.display(),
        output = %args.output.display(),
        "Starting recording"
    );
    let request = args.to_request()?;
    run_session(container, request, SessionMode::Record)
}

/// Execute the probe command
pub fn probe(container: &DefaultAppContainer, args: ProbeArgs) -> Result<()> {
    info!(input = %args.input.display(), "Starting probe");
    let response = container
        .probe_interactor()
        .execute(args.to_request())
        .with_context(|| format!("Failed to probe {}", args.input.display()))?;
    println!("{}", response.summary.trim_end());
    Ok(())
}

fn run_session(container: &DefaultAppContainer, request: SessionRequest, mode: SessionMode) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build the host runtime")?;

    let (start_at, record, start_paused) = (request.start_at, request.record, request.start_paused);
    let mut player = container
        .playback(request, TracingHost::new())
        .context("Failed to prepare control endpoints")?;
    player
        .start(start_at, record, start_paused)
        .context("Failed to start playback")?;

    let result = runtime.block_on(host_loop(&mut player, mode));
    player.shutdown();
    // The stdin reader blocks in a read that cannot be cancelled
    runtime.shutdown_background();
    result?;

    if mode == SessionMode::Record {
        match player.host_mut().take_recording_outcome() {
            Some(RecordingOutcome::Finished { output }) => {
                info!(output = %output.display(), "Recording saved");
            }
            Some(outcome) => anyhow::bail!("{}", outcome),
            None => anyhow::bail!("Recording ended before it was finalized"),
        }
    }
    if let Some(err) = player.host().errors().last() {
        return Err(err.clone()).context("Session ended with an error");
    }
    Ok(())
}

async fn host_loop(player: &mut Player, mode: SessionMode) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut quitting = false;

    while !player.is_idle() {
        let deadline = player
            .scheduler()
            .next_deadline()
            .unwrap_or_else(|| Instant::now() + IDLE_WAKEUP);

        tokio::select! {
            _ = tokio::time::sleep_until(deadline.into()) => {
                let due = player.scheduler_mut().pop_due(Instant::now());
                for timer in due {
                    player.on_timer(timer);
                }
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match line.parse::<HostCommand>() {
                    Ok(command) => apply(player, command, &mut quitting),
                    Err(e) => warn!("{}", e),
                },
                Ok(None) => {
                    debug!("stdin closed, keyboard commands disabled");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read stdin, keyboard commands disabled");
                    stdin_open = false;
                }
            },
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "Failed to listen for ctrl-c");
                }
                apply(player, HostCommand::Quit, &mut quitting);
            }
        }

        if player.is_idle() && mode == SessionMode::Preview && !quitting {
            // Playback resumes where an interactive recording stopped
            if player.host_mut().take_recording_outcome().is_some() {
                player.start(None, false, false).context("Failed to resume playback")?;
            }
        }
    }
    Ok(())
}

fn apply(player: &mut Player, command: HostCommand, quitting: &mut bool) {
    debug!(?command, "Keyboard command");
    let result = match command {
        HostCommand::TogglePlay => player.toggle_play(),
        HostCommand::Step => {
            if !player.step() {
                warn!("Step not acknowledged");
            }
            Ok(())
        }
        HostCommand::SeekBy(seconds) => player.seek_by(seconds),
        HostCommand::SeekFrames(frames) => player.seek_frames(frames),
        HostCommand::SeekTo(seconds) => player.seek_to(seconds),
        HostCommand::Speed(speed) => player.set_speed(speed),
        HostCommand::StartMark => player.set_start_mark(),
        HostCommand::EndMark => player.set_end_mark(),
        HostCommand::ClearMarks => {
            player.clear_marks();
            Ok(())
        }
        HostCommand::ToggleMute => {
            if !player.toggle_mute() {
                warn!("Mute not acknowledged");
            }
            Ok(())
        }
        HostCommand::Restart => player.start(None, false, false),
        HostCommand::ToggleRecording => player.toggle_recording(),
        HostCommand::Midi(message) => {
            if !player.send_midi(&message) {
                warn!("MIDI message not delivered");
            }
            Ok(())
        }
        HostCommand::Help => {
            println!("{}", KEY_HELP);
            Ok(())
        }
        HostCommand::Quit => {
            // A second quit abandons the recording being finalized
            let force = *quitting;
            *quitting = true;
            player.stop(force);
            Ok(())
        }
    };
    if let Err(e) = result {
        warn!("{}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(line: &str) -> Result<HostCommand, String> {
        line.parse()
    }

    #[test]
    fn test_parse_keys() {
        assert_eq!(cmd("p"), Ok(HostCommand::TogglePlay));
        assert_eq!(cmd(" + "), Ok(HostCommand::SeekBy(5.0)));
        assert_eq!(cmd("-"), Ok(HostCommand::SeekBy(-5.0)));
        assert_eq!(cmd("<"), Ok(HostCommand::SeekFrames(-1)));
        assert_eq!(cmd("]"), Ok(HostCommand::EndMark));
        assert_eq!(cmd("rec"), Ok(HostCommand::ToggleRecording));
        assert_eq!(cmd("q"), Ok(HostCommand::Quit));
    }

    #[test]
    fn test_parse_commands_with_arguments() {
        assert_eq!(cmd("seek 1:05"), Ok(HostCommand::SeekTo(65.0)));
        assert_eq!(cmd("speed 0.5"), Ok(HostCommand::Speed(0.5)));
        assert_eq!(
            cmd("midi note_on 60 100"),
            Ok(HostCommand::Midi("note_on 60 100".to_string()))
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(cmd("seek later").is_err());
        assert!(cmd("speed fast").is_err());
        assert!(cmd("midi").is_err());
        assert!(cmd("x").is_err());
    }
}
