//! Common utilities and helpers

pub mod logging;
pub mod path;
pub mod time;

pub use logging::{LogFormat, LogLevel, LoggingConfig, LoggingSystem};
pub use path::PathUtils;
pub use time::TimeParser;
