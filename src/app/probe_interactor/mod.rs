// Probe interactor - Standalone metadata probe of an input video

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::domain::errors::DomainError;
use crate::domain::model::Line;
use crate::engine::{OutputSink, ProcessSpec, ProcessStatus, ProcessTable};
use crate::planner::Stage;
use crate::ports::CommandBuilder;
use crate::probe::{MetadataTracker, ProbeReport, StatusEvent, StatusParser};
use crate::utils::TimeParser;

const PROBE_PROCESS: &str = "probe";
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Interactor for the metadata probe use case
pub struct ProbeInteractor {
    builder: Arc<dyn CommandBuilder>,
    tolerance: f64,
}

impl ProbeInteractor {
    /// Create new probe interactor with the injected command builder
    pub fn new(builder: Arc<dyn CommandBuilder>, tolerance: f64) -> Self {
        Self { builder, tolerance }
    }

    /// Run the decoder against the null muxer and collect its header
    pub fn execute(&self, request: ProbeRequest) -> Result<ProbeResponse, DomainError> {
        let path = request.input.display().to_string();
        if !request.input.is_file() {
            return Err(DomainError::FileNotFound(path));
        }
        info!(input = %path, "Probing input");

        let env = self.builder.environment(Stage::Decoder);
        let spec = env.remove.into_iter().fold(
            ProcessSpec::new(PROBE_PROCESS, self.builder.build_probe_args(&request.input))
                .stdout(OutputSink::Discard)
                .stderr(OutputSink::Capture)
                .envs(env.set),
            |spec, key| spec.env_remove(key),
        );

        let mut table = ProcessTable::new();
        table
            .start(spec)
            .map_err(|e| DomainError::LaunchFailed(e.to_string()))?;

        let mut tracker = MetadataTracker::new(self.tolerance);
        let mut console = Vec::new();
        let deadline = Instant::now() + request.timeout;
        let exit_code = loop {
            table.drain_all(|_, _, lines| feed(&mut tracker, &mut console, lines));
            match table.status(PROBE_PROCESS) {
                ProcessStatus::Running if Instant::now() >= deadline => {
                    warn!(timeout = ?request.timeout, "Probe did not finish in time");
                    break None;
                }
                ProcessStatus::Running => std::thread::sleep(POLL_INTERVAL),
                ProcessStatus::Exited(code) => break code,
                ProcessStatus::Stopped => break None,
            }
        };
        if let Some(process) = table.stop(PROBE_PROCESS) {
            process.drain(|_, lines| feed(&mut tracker, &mut console, lines));
        }
        debug!(exit_code = ?exit_code, lines = console.len(), "Probe finished");

        let report = tracker.report(&path).ok_or_else(|| {
            for line in &console {
                info!(target: "console", "{}", line);
            }
            DomainError::InvalidInput { path, exit_code }
        })?;

        let summary = match request.format {
            ReportFormat::Json => serde_json::to_string_pretty(&report)
                .map_err(|e| DomainError::InternalError(format!("JSON serialization failed: {}", e)))?,
            ReportFormat::Yaml => serde_yaml::to_string(&report)
                .map_err(|e| DomainError::InternalError(format!("YAML serialization failed: {}", e)))?,
            ReportFormat::Text => format_as_text(&report),
        };

        Ok(ProbeResponse { report, summary })
    }
}

fn feed(tracker: &mut MetadataTracker, console: &mut Vec<String>, lines: Vec<Line>) {
    for line in lines {
        match StatusParser::parse_metadata_line(&line.text) {
            StatusEvent::Text(text) => console.push(text),
            event => {
                tracker.apply(&event);
            }
        }
    }
}

fn format_as_text(report: &ProbeReport) -> String {
    let time = TimeParser::new();
    let mut output = String::new();
    output.push_str(&format!("File: {}\n", report.path));
    output.push_str(&format!(
        "  Duration: {} ({:.3}s)\n",
        time.format_time(report.duration, None),
        report.duration
    ));
    output.push_str(&format!("  Frame rate: {:.3} fps\n", report.fps));
    output.push_str(&format!("  Frames: {}\n", report.frame_count));
    if let Some(tag) = report.duration_tag {
        output.push_str(&format!("  Duration tag: {:.3}s\n", tag));
    }
    if let Some(tag) = report.frame_count_tag {
        output.push_str(&format!("  Frame count tag: {}\n", tag));
    }
    output
}

/// Output format of the probe report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" | "txt" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            "yaml" | "yml" => Ok(ReportFormat::Yaml),
            other => Err(format!("unknown report format: {}", other)),
        }
    }
}

/// Request for a metadata probe
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub input: PathBuf,
    pub format: ReportFormat,
    pub timeout: Duration,
}

impl ProbeRequest {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            format: ReportFormat::Text,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_format(mut self, format: ReportFormat) -> Self {
        self.format = format;
        self
    }
}

/// Response of a metadata probe
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub report: ProbeReport,
    pub summary: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use crate::planner::{AudioStage, StageParams};
    use crate::ports::StageEnv;

    /// Probe stand-in printing a canned header, then exiting with `code`
    struct HeaderTool {
        header: &'static str,
        code: i32,
    }

    impl CommandBuilder for HeaderTool {
        fn build_decoder_args(&self, _params: &StageParams) -> Vec<String> {
            Vec::new()
        }

        fn build_renderer_args(&self, _params: &StageParams) -> Vec<String> {
            Vec::new()
        }

        fn build_encoder_args(&self, _params: &StageParams) -> Vec<String> {
            Vec::new()
        }

        fn build_audio_decoder_args(&self, _params: &StageParams, _audio: &AudioStage) -> Vec<String> {
            Vec::new()
        }

        fn build_audio_renderer_args(&self, _params: &StageParams, _audio: &AudioStage) -> Vec<String> {
            Vec::new()
        }

        fn build_probe_args(&self, _input: &Path) -> Vec<String> {
            vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("printf '{}' >&2; exit {}", self.header, self.code),
            ]
        }

        fn environment(&self, _stage: Stage) -> StageEnv {
            StageEnv::default()
        }
    }

    fn input(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"data").unwrap();
        path
    }

    #[test]
    fn test_missing_input() {
        let interactor = ProbeInteractor::new(Arc::new(HeaderTool { header: "", code: 0 }), 0.1);
        let result = interactor.execute(ProbeRequest::new("/nonexistent/clip.mp4"));
        assert!(matches!(result, Err(DomainError::FileNotFound(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_probe_reports_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let tool = HeaderTool {
            header: "  Duration: 00:00:05.00, start: 0.000000\\n    Stream #0:0: Video: h264, 25 fps, 25 tbr\\n      NUMBER_OF_FRAMES: 124\\n",
            code: 0,
        };
        let interactor = ProbeInteractor::new(Arc::new(tool), 0.1);
        let response = interactor
            .execute(ProbeRequest::new(input(&dir)).with_format(ReportFormat::Json))
            .unwrap();
        assert_eq!(response.report.frame_count, 124);
        assert!((response.report.fps - 24.8).abs() < 1e-9);
        let parsed: ProbeReport = serde_json::from_str(&response.summary).unwrap();
        assert_eq!(parsed, response.report);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_input() {
        let dir = tempfile::tempdir().unwrap();
        let tool = HeaderTool {
            header: "clip.mp4: Invalid data found when processing input\\n",
            code: 1,
        };
        let interactor = ProbeInteractor::new(Arc::new(tool), 0.1);
        let result = interactor.execute(ProbeRequest::new(input(&dir)));
        assert_eq!(
            result.unwrap_err(),
            DomainError::InvalidInput {
                path: input(&dir).display().to_string(),
                exit_code: Some(1),
            }
        );
    }

    #[test]
    fn test_text_summary() {
        let report = ProbeReport {
            path: "clip.mp4".to_string(),
            duration: 5.0,
            fps: 25.0,
            frame_count: 125,
            duration_header: Some(5.0),
            duration_tag: None,
            frame_count_tag: None,
        };
        let text = format_as_text(&report);
        assert!(text.contains("Frames: 125"));
        assert!(text.contains("25.000 fps"));
    }

    #[test]
    fn test_report_format_names() {
        assert_eq!("JSON".parse::<ReportFormat>(), Ok(ReportFormat::Json));
        assert_eq!("yml".parse::<ReportFormat>(), Ok(ReportFormat::Yaml));
        assert!("xml".parse::<ReportFormat>().is_err());
    }
}
