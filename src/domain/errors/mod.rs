// Domain errors - Session level failures surfaced to the host

use std::fmt;

/// Session-level error types
#[derive(Debug, Clone, PartialEq)]
pub enum DomainError {
    /// Invalid arguments provided
    BadArgs(String),
    /// File not found
    FileNotFound(String),
    /// Decoder rejected the input before producing any metadata
    InvalidInput { path: String, exit_code: Option<i32> },
    /// A stage exited outside a requested stop
    UnexpectedExit { stage: String, exit_code: Option<i32> },
    /// Recording did not finalize within the allowed time
    RecordingTimeout { output: String },
    /// Session could not be launched
    LaunchFailed(String),
    /// Internal error
    InternalError(String),
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainError::BadArgs(msg) => write!(f, "Bad arguments: {}", msg),
            DomainError::FileNotFound(msg) => write!(f, "File not found: {}", msg),
            DomainError::InvalidInput { path, exit_code } => write!(
                f,
                "Error while opening {}. Check if the file is valid (exit code {})",
                path,
                format_code(*exit_code)
            ),
            DomainError::UnexpectedExit { stage, exit_code } => write!(
                f,
                "{} finished itself, exit code {}",
                stage,
                format_code(*exit_code)
            ),
            DomainError::RecordingTimeout { output } => {
                write!(f, "Recording of {} did not finish in time", output)
            }
            DomainError::LaunchFailed(msg) => write!(f, "Launch failed: {}", msg),
            DomainError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for DomainError {}

fn format_code(code: Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "none (signal)".to_string())
}
