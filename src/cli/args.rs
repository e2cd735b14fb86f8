//! Command-line argument definitions

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use clap_num::number_range;

use crate::app::probe_interactor::{ProbeRequest, ReportFormat};
use crate::domain::model::{MarkRange, ScriptRef, SessionRequest, MAX_SPEED, MIN_SPEED};
use crate::utils::TimeParser;

/// Arguments shared by `play` and `record`
#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
    /// Input video file path
    pub input: PathBuf,

    /// Transform script
    #[arg(short, long)]
    pub script: Option<PathBuf>,

    /// Treat the script as a filter graph instead of a glitch script
    #[arg(long, requires = "script")]
    pub filter: bool,

    /// Inline filter graph, read by the renderer directly
    #[arg(long, conflicts_with = "script")]
    pub filter_graph: Option<String>,

    /// Parameters handed to the script
    #[arg(short, long)]
    pub params: Option<String>,

    /// Start position (HH:MM:SS.ms, MM:SS.ms, or seconds)
    #[arg(long, value_parser = parse_clock)]
    pub start: Option<f64>,

    /// Start mark; playback loops back here
    #[arg(long, value_parser = parse_clock)]
    pub from: Option<f64>,

    /// End mark
    #[arg(long, value_parser = parse_clock)]
    pub to: Option<f64>,

    /// Playback speed multiplier
    #[arg(long, default_value_t = 1.0, value_parser = parse_speed)]
    pub speed: f64,

    /// Launch paused
    #[arg(long)]
    pub paused: bool,

    /// Start with audio muted
    #[arg(long)]
    pub mute: bool,

    /// Directory holding the decoder and renderer binaries
    #[arg(long)]
    pub bin_dir: Option<PathBuf>,

    /// Preview window width
    #[arg(long, value_parser = window_dimension, requires = "height")]
    pub width: Option<u32>,

    /// Preview window height
    #[arg(long, value_parser = window_dimension, requires = "width")]
    pub height: Option<u32>,
}

impl SessionArgs {
    fn script_ref(&self) -> Option<ScriptRef> {
        let script = match (&self.script, &self.filter_graph) {
            (Some(path), _) if self.filter => ScriptRef::filter(path),
            (Some(path), _) => ScriptRef::glitch(path),
            (None, Some(graph)) => ScriptRef::inline_filter(graph.clone()),
            (None, None) => return None,
        };
        Some(match &self.params {
            Some(params) => script.with_parameters(params.clone()),
            None => script,
        })
    }

    /// Build the session request these arguments describe
    pub fn to_request(&self) -> Result<SessionRequest> {
        let mut request = SessionRequest::new(&self.input);
        request.script = self.script_ref();
        request.start_at = self.start;
        request.speed = self.speed;
        request.start_paused = self.paused;
        request.muted = self.mute;
        request.marks = MarkRange::new(self.from, self.to).context("Invalid marks")?;
        Ok(request)
    }
}

/// Arguments for the record command
#[derive(Args, Debug, Clone)]
pub struct RecordArgs {
    #[command(flatten)]
    pub session: SessionArgs,

    /// Output video file path
    #[arg(short, long)]
    pub output: PathBuf,

    /// Constant Rate Factor (0-51), 0 is lossless
    #[arg(long, value_parser = crf_range)]
    pub crf: Option<u8>,

    /// Encoding preset
    #[arg(long)]
    pub preset: Option<String>,
}

impl RecordArgs {
    pub fn to_request(&self) -> Result<SessionRequest> {
        let mut request = self.session.to_request()?;
        request.record = true;
        request.output = Some(self.output.clone());
        Ok(request)
    }
}

/// Arguments for the probe command
#[derive(Args, Debug, Clone)]
pub struct ProbeArgs {
    /// Input video file path
    pub input: PathBuf,

    /// Report format (text, json, yaml)
    #[arg(long, default_value = "text")]
    pub format: ReportFormat,

    /// Give up after this many seconds
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,

    /// Directory holding the decoder binary
    #[arg(long)]
    pub bin_dir: Option<PathBuf>,
}

impl ProbeArgs {
    pub fn to_request(&self) -> ProbeRequest {
        let mut request = ProbeRequest::new(&self.input).with_format(self.format);
        request.timeout = Duration::from_secs(self.timeout);
        request
    }
}

fn parse_clock(s: &str) -> Result<f64, String> {
    TimeParser::new().parse_time(s).map_err(|e| e.to_string())
}

fn parse_speed(s: &str) -> Result<f64, String> {
    let speed: f64 = s.trim().parse().map_err(|_| format!("`{}` is not a number", s))?;
    if (MIN_SPEED..=MAX_SPEED).contains(&speed) {
        Ok(speed)
    } else {
        Err(format!("speed must be between {} and {}", MIN_SPEED, MAX_SPEED))
    }
}

fn crf_range(s: &str) -> Result<u8, String> {
    number_range(s, 0, 51)
}

fn window_dimension(s: &str) -> Result<u32, String> {
    number_range(s, 16, 8192)
}
