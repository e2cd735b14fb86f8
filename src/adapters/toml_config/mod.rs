// TOML config adapter - Settings loaded from TOML or YAML files and the environment

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::model::{PlaybackThresholds, SyncThresholds};
use crate::error::{MosherError, MosherResult};
use crate::utils::logging::{LogLevel, LoggingConfig};

/// Default config file names, searched in the working directory
pub const CONFIG_CANDIDATES: [&str; 3] = ["mosher.toml", "mosher.yaml", "mosher.yml"];

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "MOSHER_";

/// External tool locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Directory holding the tools; `PATH` lookup when unset
    pub bin_dir: Option<PathBuf>,
    /// Decoder and encoder binary
    pub decoder: String,
    /// Renderer binary
    pub renderer: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            bin_dir: None,
            decoder: "ffgac".to_string(),
            renderer: "fflive".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub window_title: String,
    pub window_width: Option<u32>,
    pub window_height: Option<u32>,
    /// First process check after start (ms)
    pub check_delay_ms: u64,
    /// Process check period (ms)
    pub check_interval_ms: u64,
    /// Line drain period (ms)
    pub drain_interval_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            window_title: "mosher preview".to_string(),
            window_width: None,
            window_height: None,
            check_delay_ms: 500,
            check_interval_ms: 100,
            drain_interval_ms: 50,
        }
    }
}

impl PlaybackConfig {
    pub fn window_size(&self) -> Option<(u32, u32)> {
        match (self.window_width, self.window_height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            _ => None,
        }
    }

    pub fn check_delay(&self) -> Duration {
        Duration::from_millis(self.check_delay_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// x264 preset
    pub preset: String,
    /// Constant rate factor, 0 is lossless
    pub crf: u8,
    /// How long the encoder may take to finish after its input closed (s)
    pub finalize_timeout_secs: u64,
    /// Grace period after the terminate request (s)
    pub terminate_grace_secs: u64,
    /// Announce the wait after this long (s)
    pub wait_notice_secs: u64,
    /// Pick `name_N.ext` for the next recording once one finished
    pub auto_rename: bool,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            preset: "medium".to_string(),
            crf: 18,
            finalize_timeout_secs: 100,
            terminate_grace_secs: 5,
            wait_notice_secs: 2,
            auto_rename: true,
        }
    }
}

impl RecordingConfig {
    pub fn finalize_timeout(&self) -> Duration {
        Duration::from_secs(self.finalize_timeout_secs)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_secs(self.terminate_grace_secs)
    }

    pub fn wait_notice(&self) -> Duration {
        Duration::from_secs(self.wait_notice_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub soft_timeout_ms: u64,
    /// Try ipc:// endpoints before TCP
    pub prefer_ipc: bool,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            soft_timeout_ms: 500,
            prefer_ipc: true,
        }
    }
}

impl ControlConfig {
    pub fn soft_timeout(&self) -> Duration {
        Duration::from_millis(self.soft_timeout_ms)
    }
}

/// Complete application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub tools: ToolsConfig,
    pub playback: PlaybackConfig,
    pub thresholds: PlaybackThresholds,
    pub sync: SyncThresholds,
    pub recording: RecordingConfig,
    pub control: ControlConfig,
    pub logging: LoggingConfig,
}

/// Serialization format, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => ConfigFormat::Yaml,
            _ => ConfigFormat::Toml,
        }
    }
}

/// Loads and saves [`Settings`]
#[derive(Debug, Default)]
pub struct TomlConfigAdapter {
    config_file_path: Option<PathBuf>,
}

impl TomlConfigAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// File the settings were last loaded from or saved to
    pub fn config_file_path(&self) -> Option<&Path> {
        self.config_file_path.as_deref()
    }

    pub fn parse(content: &str, format: ConfigFormat) -> MosherResult<Settings> {
        match format {
            ConfigFormat::Toml => toml::from_str(content).map_err(|e| MosherError::ConfigError {
                message: format!("Failed to parse TOML config: {}", e),
            }),
            ConfigFormat::Yaml => {
                serde_yaml::from_str(content).map_err(|e| MosherError::ConfigError {
                    message: format!("Failed to parse YAML config: {}", e),
                })
            }
        }
    }

    pub fn serialize(settings: &Settings, format: ConfigFormat) -> MosherResult<String> {
        match format {
            ConfigFormat::Toml => {
                toml::to_string_pretty(settings).map_err(|e| MosherError::ConfigError {
                    message: format!("Failed to serialize TOML config: {}", e),
                })
            }
            ConfigFormat::Yaml => {
                serde_yaml::to_string(settings).map_err(|e| MosherError::ConfigError {
                    message: format!("Failed to serialize YAML config: {}", e),
                })
            }
        }
    }

    pub fn load_config(&mut self, path: &Path) -> MosherResult<Settings> {
        if !path.exists() {
            return Err(MosherError::ConfigError {
                message: format!("Config file does not exist: {}", path.display()),
            });
        }
        let content = std::fs::read_to_string(path)?;
        let settings = Self::parse(&content, ConfigFormat::from_path(path))?;
        info!(path = %path.display(), "Loaded configuration");
        self.config_file_path = Some(path.to_path_buf());
        Ok(settings)
    }

    pub fn save_config(&mut self, settings: &Settings, path: &Path) -> MosherResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let content = Self::serialize(settings, ConfigFormat::from_path(path))?;
        std::fs::write(path, content)?;
        self.config_file_path = Some(path.to_path_buf());
        Ok(())
    }

    /// First default config file present in `dir`
    pub fn find_default(dir: &Path) -> Option<PathBuf> {
        CONFIG_CANDIDATES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.exists())
    }

    /// Apply `MOSHER_*` overrides from `vars`.
    ///
    /// Returns how many overrides were applied.
    pub fn apply_env<I>(settings: &mut Settings, vars: I) -> MosherResult<usize>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut applied = 0;
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let known = match name {
                "BIN_DIR" => {
                    settings.tools.bin_dir = Some(PathBuf::from(&value));
                    true
                }
                "DECODER" => {
                    settings.tools.decoder = value.clone();
                    true
                }
                "RENDERER" => {
                    settings.tools.renderer = value.clone();
                    true
                }
                "LOG_LEVEL" => {
                    settings.logging.level = LogLevel::parse(&value).ok_or_else(|| {
                        MosherError::ConfigError {
                            message: format!("Invalid {}LOG_LEVEL: {}", ENV_PREFIX, value),
                        }
                    })?;
                    true
                }
                "CRF" => {
                    settings.recording.crf = parse_env(name, &value)?;
                    true
                }
                "PRESET" => {
                    settings.recording.preset = value.clone();
                    true
                }
                "SOFT_TIMEOUT_MS" => {
                    settings.control.soft_timeout_ms = parse_env(name, &value)?;
                    true
                }
                "PREFER_IPC" => {
                    settings.control.prefer_ipc = parse_env(name, &value)?;
                    true
                }
                _ => false,
            };
            if known {
                debug!(variable = %key, "Environment override applied");
                applied += 1;
            }
        }
        Ok(applied)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> MosherResult<T> {
    value.trim().parse().map_err(|_| MosherError::ConfigError {
        message: format!("Invalid value for {}{}: {}", ENV_PREFIX, name, value),
    })
}
