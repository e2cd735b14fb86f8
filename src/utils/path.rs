//! Path utilities for output naming and tool lookup

use crate::error::MosherResult;
use std::path::{Path, PathBuf};

/// Path utilities
#[derive(Debug, Clone, Copy)]
pub struct PathUtils;

impl PathUtils {
    /// Create a new path utils instance
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self
    }
}

impl Default for PathUtils {
    fn default() -> Self {
        Self::new()
    }
}

impl PathUtils {
    /// Next free output name derived from `path`.
    ///
    /// Returns `path` itself when nothing exists there yet, otherwise
    /// `stem_N.ext` with `N` one past the highest index already present in the
    /// directory.
    pub fn next_output_file(&self, path: &Path) -> MosherResult<PathBuf> {
        if !path.exists() {
            return Ok(path.to_path_buf());
        }

        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        let dir = absolute.parent().map(Path::to_path_buf).unwrap_or_default();
        let stem = absolute
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let ext = absolute
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let prefix = format!("{}_", stem);

        let mut next = 1u64;
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let file_path = entry.path();
            let Some(file_stem) = file_path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
                continue;
            };
            if let Some(index) = file_stem
                .strip_prefix(&prefix)
                .and_then(|rest| rest.parse::<u64>().ok())
            {
                next = next.max(index + 1);
            }
        }

        Ok(dir.join(format!("{}{}{}", prefix, next, ext)))
    }

    /// Native separators for display and for passing to external tools
    pub fn normalize_path(&self, path: &Path) -> String {
        let text = path.to_string_lossy();
        if cfg!(windows) {
            text.replace('/', "\\")
        } else {
            text.to_string()
        }
    }

    /// Resolve a tool name against an optional binary directory
    pub fn tool_path(&self, bin_dir: Option<&Path>, name: &str) -> String {
        let file_name = if cfg!(windows) && !name.ends_with(".exe") {
            format!("{}.exe", name)
        } else {
            name.to_string()
        };
        match bin_dir {
            Some(dir) => self.normalize_path(&dir.join(file_name)),
            None => file_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_next_output_file_unused_name() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out.mp4");
        let next = PathUtils::new().next_output_file(&target).unwrap();
        assert_eq!(next, target);
    }

    #[test]
    fn test_next_output_file_picks_next_index() {
        let dir = TempDir::new().unwrap();
        for name in ["out.mp4", "out_1.mp4", "out_4.mp4", "out_x.mp4", "other_9.mp4"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let next = PathUtils::new()
            .next_output_file(&dir.path().join("out.mp4"))
            .unwrap();
        assert_eq!(next.file_name().unwrap(), "out_5.mp4");
    }

    #[test]
    fn test_next_output_file_first_index() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("clip.mkv"), b"").unwrap();
        let next = PathUtils::new()
            .next_output_file(&dir.path().join("clip.mkv"))
            .unwrap();
        assert_eq!(next.file_name().unwrap(), "clip_1.mkv");
    }

    #[test]
    fn test_tool_path() {
        let utils = PathUtils::new();
        let plain = utils.tool_path(None, "ffgac");
        assert!(plain.starts_with("ffgac"));
        let joined = utils.tool_path(Some(Path::new("bin")), "fflive");
        assert!(joined.contains("fflive"));
        assert!(joined.starts_with("bin"));
    }
}
