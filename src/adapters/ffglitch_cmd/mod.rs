// FFglitch command adapter - Argument vectors for the decode/render/encode tools

use std::collections::HashMap;
use std::path::Path;

use crate::adapters::toml_config::{RecordingConfig, ToolsConfig};
use crate::planner::{find_fraction, AudioStage, Stage, StageParams};
use crate::ports::{CommandBuilder, StageEnv};
use crate::utils::PathUtils;

/// Flags that make the decoder emit an mpeg4 stream the glitch scripts can edit
const MPEG4_FLAGS: [&str; 10] = [
    "-mpv_flags",
    "+nopimb+forcemv",
    "-qscale:v",
    "0",
    "-g",
    "max",
    "-sc_threshold",
    "max",
    "-vcodec",
    "mpeg4",
];

/// Builds command lines for `ffgac` (decoder, encoder) and `fflive` (renderer)
#[derive(Debug, Clone)]
pub struct FfglitchCommandBuilder {
    tools: ToolsConfig,
    recording: RecordingConfig,
    paths: PathUtils,
}

impl FfglitchCommandBuilder {
    pub fn new(tools: ToolsConfig, recording: RecordingConfig) -> Self {
        Self {
            tools,
            recording,
            paths: PathUtils::new(),
        }
    }

    fn decoder_bin(&self) -> String {
        self.paths.tool_path(self.tools.bin_dir.as_deref(), &self.tools.decoder)
    }

    fn renderer_bin(&self) -> String {
        self.paths.tool_path(self.tools.bin_dir.as_deref(), &self.tools.renderer)
    }

    fn input(&self, params: &StageParams) -> String {
        self.paths.normalize_path(&params.input)
    }

    /// Library search path with the tools directory prepended
    fn library_path(&self, var: &str) -> Option<String> {
        let dir = self.tools.bin_dir.as_ref()?;
        let dir = dir.to_string_lossy().to_string();
        Some(match std::env::var(var) {
            Ok(existing) if !existing.is_empty() => format!("{}:{}", dir, existing),
            _ => dir,
        })
    }
}

fn args<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn seconds(value: f64) -> String {
    format!("{}", value)
}

fn tempo(value: f64) -> String {
    format!("atempo={:.3}", value)
}

impl CommandBuilder for FfglitchCommandBuilder {
    fn build_decoder_args(&self, params: &StageParams) -> Vec<String> {
        let mut argv = vec![self.decoder_bin()];
        argv.extend(args(["-accurate_seek", "-ss"]));
        argv.push(seconds(params.start_at));
        if let Some(end) = params.end_at {
            argv.push("-to".to_string());
            argv.push(seconds(end));
        }
        argv.extend(args(["-stats", "-hide_banner", "-i"]));
        argv.push(self.input(params));
        argv.push("-an".to_string());
        argv.extend(args(MPEG4_FLAGS));
        argv.extend(args(["-f", "rawvideo", "-"]));
        argv
    }

    fn build_renderer_args(&self, params: &StageParams) -> Vec<String> {
        let mut argv = vec![self.renderer_bin()];
        if params.needs_decoder() {
            argv.extend(args(["-i", "-"]));
        } else {
            argv.push("-ss".to_string());
            argv.push(seconds(params.start_at));
            if let Some(end) = params.end_at {
                argv.push("-to".to_string());
                argv.push(seconds(end));
            }
            argv.push("-i".to_string());
            argv.push(self.input(params));
        }
        if !params.is_filter() {
            argv.push("-vf".to_string());
            argv.push(format!("setpts=({:.4})*PTS", params.pts_ratio()));
        }
        argv.push("-af".to_string());
        argv.push(tempo(params.effective_speed()));
        argv.extend(args(["-stats", "-window_title"]));
        argv.push(params.window_title.clone());
        argv.extend(args([
            "-hide_banner",
            "-flush_packets",
            "0",
            "-sync",
            "audio",
            "-print_frameno",
            "-blockffplaykeys",
            "-frame_counter_off",
        ]));
        argv.push(params.start_frame.to_string());
        argv.extend(args(["-noframedropearly", "-zmq_url"]));
        argv.push(params.control_url.clone());

        if let Some((width, height)) = params.window_size {
            if width > 0 && height > 0 {
                argv.extend(["-x".to_string(), width.to_string()]);
                argv.extend(["-y".to_string(), height.to_string()]);
            }
        }
        if params.start_paused {
            argv.push("-start_paused".to_string());
        }

        if let Some(script) = &params.script {
            match (&script.path, script.is_filter()) {
                (Some(path), true) => {
                    argv.push("-vf".to_string());
                    argv.push(format!("script=file={}", self.paths.normalize_path(path)));
                }
                (Some(path), false) => {
                    argv.push("-s".to_string());
                    argv.push(self.paths.normalize_path(path));
                }
                (None, _) => {
                    if let Some(graph) = &script.parameters {
                        argv.push("-vf".to_string());
                        argv.push(graph.clone());
                    }
                }
            }
            if let (Some(_), Some(parameters)) = (&script.path, &script.parameters) {
                argv.push("-sp".to_string());
                argv.push(parameters.clone());
            }
        }

        if params.recording {
            argv.extend(args(["-o", "-", "-autoexit"]));
        }
        argv
    }

    fn build_encoder_args(&self, params: &StageParams) -> Vec<String> {
        let mut argv = vec![self.decoder_bin()];
        if let Some(fps) = params.source_fps.filter(|f| *f > 0.0) {
            argv.push("-r".to_string());
            argv.push(match find_fraction(fps) {
                Some(fraction) => fraction.to_string(),
                None => format!("{:.6}", fps),
            });
        }
        argv.extend(args(["-i", "-", "-ss"]));
        argv.push(seconds(params.start_at));
        argv.push("-i".to_string());
        argv.push(self.input(params));
        argv.extend(args(["-map", "0:v", "-map", "1:a?", "-c:a", "copy", "-c:v", "libx264"]));
        argv.push("-preset".to_string());
        argv.push(self.recording.preset.clone());
        argv.push("-crf".to_string());
        argv.push(self.recording.crf.to_string());
        argv.push("-shortest".to_string());
        if let Some(end) = params.end_at {
            argv.push("-t".to_string());
            argv.push(seconds(end - params.start_at));
        }
        argv.extend(args(["-loglevel", "info", "-hide_banner"]));
        if let Some(output) = &params.output {
            argv.push(self.paths.normalize_path(output));
        }
        argv
    }

    fn build_audio_decoder_args(&self, params: &StageParams, audio: &AudioStage) -> Vec<String> {
        let mut argv = vec![self.decoder_bin()];
        argv.extend(args(["-accurate_seek", "-ss"]));
        argv.push(seconds(audio.start_at));
        argv.extend(args(["-nostats", "-hide_banner", "-i"]));
        argv.push(self.input(params));
        argv.extend(args(MPEG4_FLAGS));
        argv.extend(args(["-vf", "scale=2:2", "-f", "nut", "-"]));
        argv
    }

    fn build_audio_renderer_args(&self, params: &StageParams, audio: &AudioStage) -> Vec<String> {
        let mut argv = vec![self.renderer_bin()];
        argv.push("-af".to_string());
        argv.push(tempo(audio.tempo));
        argv.extend(args(["-vn", "-nostats", "-nodisp", "-sync", "audio", "-window_title"]));
        argv.push(format!("{} audio", params.window_title));
        argv.push("-volume".to_string());
        argv.push(if audio.muted { "0" } else { "100" }.to_string());
        argv.push("-hide_banner".to_string());
        if audio.start_paused {
            argv.push("-start_paused".to_string());
        }
        argv.push("-zmq_url".to_string());
        argv.push(params.audio_control_url.clone());
        argv.push("-".to_string());
        if params.recording {
            argv.push("-autoexit".to_string());
        }
        argv
    }

    fn build_probe_args(&self, input: &Path) -> Vec<String> {
        let mut argv = vec![self.decoder_bin()];
        argv.extend(args(["-hide_banner", "-i"]));
        argv.push(self.paths.normalize_path(input));
        argv.extend(args(["-an", "-frames:v", "1", "-f", "null", "-"]));
        argv
    }

    fn environment(&self, stage: Stage) -> StageEnv {
        let mut set = HashMap::new();
        for var in ["LD_LIBRARY_PATH", "DYLD_LIBRARY_PATH"] {
            if let Some(value) = self.library_path(var) {
                set.insert(var.to_string(), value);
            }
        }
        let mut remove = Vec::new();
        match stage {
            Stage::Decoder | Stage::AudioDecoder => {
                set.insert("AV_LOG_FORCE_NOCOLOR".to_string(), "1".to_string());
            }
            Stage::Renderer | Stage::Encoder | Stage::AudioRenderer => {
                set.insert("AV_LOG_FORCE_COLOR".to_string(), "1".to_string());
                set.insert("TERM".to_string(), "1".to_string());
                remove.push("AV_LOG_FORCE_256COLOR".to_string());
            }
        }
        StageEnv { set, remove }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::ScriptRef;
    use std::path::PathBuf;

    fn builder() -> FfglitchCommandBuilder {
        FfglitchCommandBuilder::new(ToolsConfig::default(), RecordingConfig::default())
    }

    fn params() -> StageParams {
        StageParams {
            input: PathBuf::from("input.mp4"),
            start_at: 2.0,
            start_frame: 50,
            end_at: None,
            speed: 1.0,
            script: Some(ScriptRef::glitch("mosh.js")),
            start_paused: false,
            recording: false,
            output: None,
            source_fps: Some(25.0),
            muted: false,
            window_title: "mosher preview: input.mp4".to_string(),
            window_size: None,
            control_url: "tcp://*:5555".to_string(),
            audio_control_url: "tcp://*:5556".to_string(),
        }
    }

    fn value_after<'a>(argv: &'a [String], flag: &str) -> Option<&'a str> {
        argv.iter()
            .position(|a| a == flag)
            .and_then(|i| argv.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_decoder_args() {
        let mut p = params();
        p.end_at = Some(8.0);
        let argv = builder().build_decoder_args(&p);
        assert!(argv[0].ends_with("ffgac") || argv[0].ends_with("ffgac.exe"));
        assert_eq!(value_after(&argv, "-ss"), Some("2"));
        assert_eq!(value_after(&argv, "-to"), Some("8"));
        assert_eq!(value_after(&argv, "-f"), Some("rawvideo"));
        assert_eq!(argv.last().map(String::as_str), Some("-"));
        assert!(argv.contains(&"-an".to_string()));
    }

    #[test]
    fn test_renderer_args_glitch_script() {
        let mut p = params();
        p.script = Some(ScriptRef::glitch("mosh.js").with_parameters("{\"x\":1}"));
        p.start_paused = true;
        let argv = builder().build_renderer_args(&p);
        assert_eq!(value_after(&argv, "-i"), Some("-"));
        assert_eq!(value_after(&argv, "-vf"), Some("setpts=(1.0000)*PTS"));
        assert_eq!(value_after(&argv, "-frame_counter_off"), Some("50"));
        assert_eq!(value_after(&argv, "-zmq_url"), Some("tcp://*:5555"));
        assert_eq!(value_after(&argv, "-s"), Some("mosh.js"));
        assert_eq!(value_after(&argv, "-sp"), Some("{\"x\":1}"));
        assert!(argv.contains(&"-start_paused".to_string()));
        assert!(!argv.contains(&"-autoexit".to_string()));
    }

    #[test]
    fn test_renderer_args_filter_script_replaces_setpts() {
        let mut p = params();
        p.script = Some(ScriptRef::filter("sort.js"));
        let argv = builder().build_renderer_args(&p);
        let filters: Vec<_> = argv
            .iter()
            .enumerate()
            .filter(|(_, a)| *a == "-vf")
            .map(|(i, _)| argv[i + 1].clone())
            .collect();
        assert_eq!(filters, vec!["script=file=sort.js".to_string()]);
    }

    #[test]
    fn test_renderer_reads_input_without_decoder() {
        let mut p = params();
        p.script = Some(ScriptRef::inline_filter("negate"));
        let argv = builder().build_renderer_args(&p);
        assert_eq!(value_after(&argv, "-i"), Some("input.mp4"));
        assert_eq!(value_after(&argv, "-ss"), Some("2"));
        assert_eq!(value_after(&argv, "-vf"), Some("negate"));
        assert!(!argv.contains(&"-sp".to_string()));
    }

    #[test]
    fn test_renderer_recording_pipes_output() {
        let mut p = params();
        p.recording = true;
        p.speed = 2.0;
        let argv = builder().build_renderer_args(&p);
        assert_eq!(value_after(&argv, "-o"), Some("-"));
        assert!(argv.contains(&"-autoexit".to_string()));
        assert_eq!(value_after(&argv, "-vf"), Some("setpts=(0.5000)*PTS"));
        assert_eq!(value_after(&argv, "-af"), Some("atempo=2.000"));
    }

    #[test]
    fn test_encoder_args() {
        let mut p = params();
        p.recording = true;
        p.output = Some(PathBuf::from("out.mp4"));
        p.source_fps = Some(29.97);
        p.end_at = Some(6.0);
        let argv = builder().build_encoder_args(&p);
        assert_eq!(value_after(&argv, "-r"), Some("30000/1001"));
        assert_eq!(value_after(&argv, "-preset"), Some("medium"));
        assert_eq!(value_after(&argv, "-crf"), Some("18"));
        assert_eq!(value_after(&argv, "-t"), Some("4"));
        assert_eq!(argv.last().map(String::as_str), Some("out.mp4"));
    }

    #[test]
    fn test_audio_args() {
        let p = params();
        let audio = AudioStage {
            start_at: 10.25,
            tempo: 0.8,
            muted: true,
            start_paused: false,
        };
        let decoder = builder().build_audio_decoder_args(&p, &audio);
        assert_eq!(value_after(&decoder, "-ss"), Some("10.25"));
        assert_eq!(value_after(&decoder, "-f"), Some("nut"));

        let renderer = builder().build_audio_renderer_args(&p, &audio);
        assert_eq!(value_after(&renderer, "-af"), Some("atempo=0.800"));
        assert_eq!(value_after(&renderer, "-volume"), Some("0"));
        assert_eq!(value_after(&renderer, "-zmq_url"), Some("tcp://*:5556"));
        assert!(!renderer.contains(&"-start_paused".to_string()));
    }

    #[test]
    fn test_environment() {
        let tools = ToolsConfig {
            bin_dir: Some(PathBuf::from("/opt/ffglitch")),
            ..ToolsConfig::default()
        };
        let builder = FfglitchCommandBuilder::new(tools, RecordingConfig::default());

        let decoder = builder.environment(Stage::Decoder);
        assert_eq!(decoder.set.get("AV_LOG_FORCE_NOCOLOR").map(String::as_str), Some("1"));
        assert!(decoder.set["LD_LIBRARY_PATH"].starts_with("/opt/ffglitch"));

        let renderer = builder.environment(Stage::Renderer);
        assert_eq!(renderer.set.get("AV_LOG_FORCE_COLOR").map(String::as_str), Some("1"));
        assert_eq!(renderer.remove, vec!["AV_LOG_FORCE_256COLOR".to_string()]);
    }
}
