//! Configuration initialization and hierarchy management

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::adapters::toml_config::{Settings, TomlConfigAdapter};
use crate::cli::{Cli, Commands};
use crate::utils::LogLevel;

/// Build the settings following precedence: CLI > Env > File > Defaults
pub fn initialize_configuration_hierarchy(cli: &Cli) -> Result<Settings> {
    let cwd = std::env::current_dir().context("Failed to read the working directory")?;
    initialize_from(cli, &cwd, std::env::vars())
}

/// Same as [`initialize_configuration_hierarchy`] with an explicit search
/// directory and environment
pub fn initialize_from<I>(cli: &Cli, dir: &Path, vars: I) -> Result<Settings>
where
    I: IntoIterator<Item = (String, String)>,
{
    // Step 1: defaults, then the config file
    let mut adapter = TomlConfigAdapter::new();
    let mut settings = match cli.config.clone().or_else(|| TomlConfigAdapter::find_default(dir)) {
        Some(path) => adapter
            .load_config(&path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => {
            debug!("No config file found, using defaults");
            Settings::default()
        }
    };

    // Step 2: environment overrides
    let applied = TomlConfigAdapter::apply_env(&mut settings, vars)
        .context("Invalid environment override")?;
    if applied > 0 {
        info!("Applied {} environment variable overrides", applied);
    }

    // Step 3: CLI overrides
    let applied = apply_cli_overrides(&mut settings, cli)?;
    if applied > 0 {
        info!("Applied {} CLI configuration overrides", applied);
    }

    Ok(settings)
}

fn apply_cli_overrides(settings: &mut Settings, cli: &Cli) -> Result<usize> {
    let mut applied = 0;

    if let Some(level) = &cli.log_level {
        settings.logging.level = LogLevel::parse(level)
            .with_context(|| format!("Invalid log level: {}", level))?;
        applied += 1;
    }

    if let Some(args) = cli.command.session() {
        if let Some(dir) = &args.bin_dir {
            settings.tools.bin_dir = Some(dir.clone());
            applied += 1;
        }
        if let (Some(width), Some(height)) = (args.width, args.height) {
            settings.playback.window_width = Some(width);
            settings.playback.window_height = Some(height);
            applied += 1;
        }
    }

    match &cli.command {
        Commands::Record(args) => {
            if let Some(crf) = args.crf {
                settings.recording.crf = crf;
                applied += 1;
            }
            if let Some(preset) = &args.preset {
                settings.recording.preset = preset.clone();
                applied += 1;
            }
        }
        Commands::Probe(args) => {
            if let Some(dir) = &args.bin_dir {
                settings.tools.bin_dir = Some(dir.clone());
                applied += 1;
            }
        }
        Commands::Play(_) => {}
    }

    Ok(applied)
}
