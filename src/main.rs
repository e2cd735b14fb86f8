//! Mosher CLI
//!
//! Live preview and recording of script-based datamoshing.
//!
//! # Usage
//!
//! ```bash
//! mosher play input.mp4 --script mosh.js
//! mosher record input.mp4 --script mosh.js --output moshed.mp4
//! mosher probe input.mp4 --format json
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use mosher_cli::app::DefaultAppContainer;
use mosher_cli::cli::{commands, Cli, Commands};
use mosher_cli::config_initialization::initialize_configuration_hierarchy;
use mosher_cli::utils::LoggingSystem;

/// Main entry point for the Mosher CLI application
fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    let settings = initialize_configuration_hierarchy(&cli)?;

    // Initialize logging
    let logging = LoggingSystem::new(settings.logging.clone());
    logging
        .initialize()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
    logging.log_system_info();

    let container = DefaultAppContainer::new(settings).context("Failed to initialize the application")?;

    // Execute the requested command
    match cli.command {
        Commands::Play(args) => {
            info!("Executing play command");
            commands::play(&container, args)?;
        }
        Commands::Record(args) => {
            info!("Executing record command");
            commands::record(&container, args)?;
        }
        Commands::Probe(args) => {
            info!("Executing probe command");
            commands::probe(&container, args)?;
        }
    }

    Ok(())
}
