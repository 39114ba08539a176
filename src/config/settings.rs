//! Workspace configuration.
//!
//! A small TOML file describing where the script root lives and how the
//! watcher behaves. Missing file or missing keys fall back to defaults, so
//! a fresh checkout runs without any setup.

use crate::error::{PixelGraphError, Result};
use crate::scripting::COMPILED_DIR;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Workspace-level settings, persisted as TOML.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Root directory scanned for scripts.
    pub scripts_root: PathBuf,
    /// Name of the compilation cache file inside the compiled directory.
    pub cache_file_name: String,
    /// Watcher poll interval in milliseconds.
    pub watch_poll_ms: u64,
    /// Quiet window before a change burst is reported, in milliseconds.
    pub watch_debounce_ms: u64,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            scripts_root: default_scripts_root(),
            cache_file_name: "compilation_cache.json".to_string(),
            watch_poll_ms: 250,
            watch_debounce_ms: 1000,
        }
    }
}

fn default_scripts_root() -> PathBuf {
    dirs_next::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pixelgraph")
        .join("scripts")
}

impl WorkspaceConfig {
    /// Load from a TOML file, falling back to defaults if the file does not
    /// exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| PixelGraphError::Config(format!("{}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| PixelGraphError::Config(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn compiled_dir(&self) -> PathBuf {
        self.scripts_root.join(COMPILED_DIR)
    }

    pub fn cache_file(&self) -> PathBuf {
        self.compiled_dir().join(&self.cache_file_name)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.watch_poll_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = WorkspaceConfig::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, WorkspaceConfig::default());
        assert_eq!(config.watch_debounce_ms, 1000);
    }

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = WorkspaceConfig::default();
        config.scripts_root = PathBuf::from("/tmp/scripts");
        config.watch_poll_ms = 50;
        config.save(&path).unwrap();

        let loaded = WorkspaceConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.compiled_dir(), PathBuf::from("/tmp/scripts/compiled"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "watch_poll_ms = 10\n").unwrap();

        let config = WorkspaceConfig::load(&path).unwrap();
        assert_eq!(config.watch_poll_ms, 10);
        assert_eq!(config.cache_file_name, "compilation_cache.json");
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "watch_poll_ms = \"fast\"\n").unwrap();
        assert!(WorkspaceConfig::load(&path).is_err());
    }
}
