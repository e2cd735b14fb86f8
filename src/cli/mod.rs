//! CLI module for Mosher
//!
//! This module handles command-line argument parsing and command execution.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod args;
pub mod commands;

pub use args::{ProbeArgs, RecordArgs, SessionArgs};
pub use commands::HostCommand;

/// Mosher live datamosh player
///
/// Drives a decoder, a scriptable renderer and an optional encoder as one
/// pipeline, with audio kept in sync by a separate tempo-adjusted player.
#[derive(Parser, Debug)]
#[command(name = "mosher")]
#[command(about = "Mosher - Live preview and recording of script-based datamoshing")]
#[command(version)]
#[command(long_about = None)]
pub struct Cli {
    /// Logging level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Configuration file (TOML or YAML)
    #[arg(long, global = true, env = "MOSHER_CONFIG")]
    pub config: Option<PathBuf>,

    /// The command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Preview a video through the transform script
    Play(SessionArgs),
    /// Render the transformed video into a file while previewing it
    Record(RecordArgs),
    /// Print the metadata of a video
    Probe(ProbeArgs),
}

impl Commands {
    /// Session arguments shared by `play` and `record`
    pub fn session(&self) -> Option<&SessionArgs> {
        match self {
            Commands::Play(args) => Some(args),
            Commands::Record(args) => Some(&args.session),
            Commands::Probe(_) => None,
        }
    }
}
