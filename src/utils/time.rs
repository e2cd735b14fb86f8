//! Time parsing and formatting utilities

use crate::error::{MosherError, MosherResult};

/// Time parser for clock-style and plain-second time strings
#[derive(Debug, Clone, Copy)]
pub struct TimeParser;

impl TimeParser {
    /// Create a new time parser
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self
    }
}

impl Default for TimeParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeParser {
    /// Parse `SS.ms`, `MM:SS.ms` or `HH:MM:SS.ms` into seconds
    pub fn parse_time(&self, time_str: &str) -> MosherResult<f64> {
        let time_str = time_str.trim();
        let invalid = || MosherError::InvalidTimeFormat {
            time: time_str.to_string(),
        };

        let parts: Vec<&str> = time_str.split(':').collect();
        if parts.is_empty() || parts.len() > 3 {
            return Err(invalid());
        }

        let mut seconds = 0.0;
        for part in &parts {
            let value: f64 = part.trim().parse().map_err(|_| invalid())?;
            if !value.is_finite() || value < 0.0 {
                return Err(invalid());
            }
            seconds = seconds * 60.0 + value;
        }
        Ok(seconds)
    }

    /// Format seconds as `HH:MM:SS.cc`, optionally followed by the frame number
    pub fn format_time(&self, seconds: f64, frame: Option<u64>) -> String {
        let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        let whole = seconds.trunc() as u64;
        let hundredths = ((seconds - seconds.trunc()) * 100.0) as u64;
        let mut formatted = format!(
            "{:02}:{:02}:{:02}.{:02}",
            whole / 3600,
            (whole % 3600) / 60,
            whole % 60,
            hundredths
        );
        if let Some(frame) = frame {
            formatted.push_str(&format!(" ({})", frame));
        }
        formatted
    }
}
