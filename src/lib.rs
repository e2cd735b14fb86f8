//! Mosher CLI Library
//!
//! Live preview and recording driver for script-based datamoshing. A decoder,
//! a scriptable renderer and an optional encoder run as one chained pipeline,
//! with audio played by a separate tempo-adjusted player kept in sync with the
//! rendered video.

pub mod adapters;
pub mod app;
pub mod cli;
pub mod config_initialization;
pub mod control;
pub mod domain;
pub mod engine;
pub mod error;
pub mod planner;
pub mod ports;
pub mod probe;
pub mod utils;

// Re-export commonly used types
pub use app::{DefaultAppContainer, PlaybackInteractor, ProbeInteractor};
pub use domain::errors::DomainError;
pub use domain::model::{PlaybackState, RecordingOutcome, SessionRequest, VideoMetadata};
pub use error::{MosherError, MosherResult};
