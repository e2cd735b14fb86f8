//! Error handling module for Mosher

use thiserror::Error;

/// Main error type for Mosher operations
#[derive(Error, Debug)]
pub enum MosherError {
    /// Input file not found or inaccessible
    #[error("Input file not found: {path}")]
    InputFileNotFound { path: String },

    /// Invalid time format
    #[error("Invalid time format: {time}. Expected HH:MM:SS.ms, MM:SS.ms, or seconds")]
    InvalidTimeFormat { time: String },

    /// A child process could not be launched
    #[error("Failed to spawn {name}: {source}")]
    SpawnFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// A chained stage referenced a process that has no piped stdout
    #[error("Process {name} has no stdout handle to chain from")]
    MissingPipe { name: String },

    /// Empty argument vector handed to the multiplexer
    #[error("Empty command line for {name}")]
    EmptyCommand { name: String },

    /// Control channel endpoint could not be prepared
    #[error("Control channel {name}: {message}")]
    ControlChannel { name: String, message: String },

    /// Configuration file could not be parsed
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type alias for Mosher operations
pub type MosherResult<T> = std::result::Result<T, MosherError>;
