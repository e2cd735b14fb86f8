//! Pipeline planning: which stages run and with which parameters

pub mod framerate;

pub use framerate::{find_fraction, Fraction};

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::model::ScriptRef;

/// One process of the playback pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Input file to raw frames
    Decoder,
    /// Applies the script and displays frames
    Renderer,
    /// Muxes rendered frames with the original audio
    Encoder,
    /// Audio-only decode of the input
    AudioDecoder,
    /// Audio playback with tempo control
    AudioRenderer,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Decoder,
        Stage::Renderer,
        Stage::Encoder,
        Stage::AudioDecoder,
        Stage::AudioRenderer,
    ];

    /// Process table key
    pub fn name(self) -> &'static str {
        match self {
            Stage::Decoder => "decoder",
            Stage::Renderer => "renderer",
            Stage::Encoder => "encoder",
            Stage::AudioDecoder => "audio-decoder",
            Stage::AudioRenderer => "audio-renderer",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.name() == name)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Parameters shared by all argument builders for one session launch
#[derive(Debug, Clone, PartialEq)]
pub struct StageParams {
    pub input: PathBuf,
    /// Seek offset in seconds
    pub start_at: f64,
    /// Start offset in frames, used as the script frame counter offset
    pub start_frame: u64,
    /// End bound in seconds when playing inside marks
    pub end_at: Option<f64>,
    /// Playback speed multiplier
    pub speed: f64,
    pub script: Option<ScriptRef>,
    pub start_paused: bool,
    pub recording: bool,
    pub output: Option<PathBuf>,
    /// Source frame rate, known once metadata arrived in an earlier run
    pub source_fps: Option<f64>,
    pub muted: bool,
    pub window_title: String,
    pub window_size: Option<(u32, u32)>,
    /// Renderer control endpoint (bind side)
    pub control_url: String,
    /// Audio renderer control endpoint (bind side)
    pub audio_control_url: String,
}

impl StageParams {
    /// Presentation timestamp multiplier for the renderer
    pub fn pts_ratio(&self) -> f64 {
        1.0 / self.speed
    }

    /// Speed after rounding through the PTS ratio, as applied to audio tempo
    pub fn effective_speed(&self) -> f64 {
        let ratio = (self.pts_ratio() * 10_000.0).round() / 10_000.0;
        if ratio > 0.0 {
            1.0 / ratio
        } else {
            self.speed
        }
    }

    pub fn needs_decoder(&self) -> bool {
        self.script.as_ref().map_or(true, ScriptRef::needs_decoder)
    }

    pub fn is_filter(&self) -> bool {
        self.script.as_ref().map_or(false, ScriptRef::is_filter)
    }
}

/// Audio sub-pipeline launch parameters, rebuilt on every hot-restart
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioStage {
    /// Seek offset in seconds
    pub start_at: f64,
    /// Tempo factor
    pub tempo: f64,
    pub muted: bool,
    /// Wait for an explicit `play` before producing sound
    pub start_paused: bool,
}

impl AudioStage {
    /// Audio pair of a fresh launch: held paused until the first video frame
    pub fn initial(params: &StageParams) -> Self {
        Self {
            start_at: params.start_at,
            tempo: params.effective_speed(),
            muted: params.muted,
            start_paused: true,
        }
    }
}

/// Stages to launch for `params`, in start order
pub fn plan_stages(params: &StageParams, audio_enabled: bool) -> Vec<Stage> {
    let mut stages = Vec::with_capacity(5);
    if audio_enabled {
        stages.push(Stage::AudioDecoder);
    }
    if params.needs_decoder() {
        stages.push(Stage::Decoder);
    }
    if audio_enabled {
        stages.push(Stage::AudioRenderer);
    }
    stages.push(Stage::Renderer);
    if params.recording {
        stages.push(Stage::Encoder);
    }
    stages
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn params() -> StageParams {
        StageParams {
            input: PathBuf::from("input.mp4"),
            start_at: 0.0,
            start_frame: 0,
            end_at: None,
            speed: 1.0,
            script: Some(ScriptRef::glitch("mosh.js")),
            start_paused: false,
            recording: false,
            output: None,
            source_fps: Some(25.0),
            muted: false,
            window_title: "preview".to_string(),
            window_size: None,
            control_url: "tcp://*:5555".to_string(),
            audio_control_url: "tcp://*:5556".to_string(),
        }
    }

    #[test]
    fn test_plan_full_pipeline() {
        let mut p = params();
        p.recording = true;
        assert_eq!(
            plan_stages(&p, true),
            vec![
                Stage::AudioDecoder,
                Stage::Decoder,
                Stage::AudioRenderer,
                Stage::Renderer,
                Stage::Encoder
            ]
        );
    }

    #[test]
    fn test_plan_inline_filter_without_audio() {
        let mut p = params();
        p.script = Some(ScriptRef::inline_filter("negate"));
        assert_eq!(plan_stages(&p, false), vec![Stage::Renderer]);
    }

    #[test]
    fn test_effective_speed() {
        let mut p = params();
        p.speed = 3.0;
        assert!((p.effective_speed() - 1.0 / 0.3333).abs() < 1e-9);
    }

    #[test]
    fn test_stage_names_round_trip() {
        for stage in Stage::ALL {
            assert_eq!(Stage::from_name(stage.name()), Some(stage));
        }
    }
}
