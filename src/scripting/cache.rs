//! Persistent compilation cache.
//!
//! A small JSON file maps each script's relative path to the artifact it was
//! last compiled into, the source modification time at compile time, and the
//! compile timestamp. An entry is valid only while the script's current
//! on-disk mtime equals the stored one AND the artifact file still exists;
//! otherwise the script needs recompilation.
//!
//! The file is loaded once at startup and rewritten after every successful
//! compile. Compilations may finish concurrently, so all read-modify-write
//! sequences go through a mutex.

use crate::error::{PixelGraphError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// File extension of persisted compiled artifacts.
pub const ARTIFACT_EXT: &str = "rhc";

/// One cache record per compiled script.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheEntry {
    pub script_path: String,
    pub artifact_file: String,
    /// Source modification time at compile time, in milliseconds since epoch.
    pub source_mtime_ms: i64,
    pub compiled_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    entries: HashMap<String, CacheEntry>,
}

/// Mutex-guarded cache backed by a JSON file.
#[derive(Debug)]
pub struct CompilationCache {
    file_path: PathBuf,
    inner: Mutex<CacheFile>,
}

/// Modification time of a file in milliseconds since the Unix epoch.
pub fn mtime_millis(path: &Path) -> Result<i64> {
    let modified = std::fs::metadata(path)?.modified()?;
    let since_epoch = modified
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|e| PixelGraphError::Cache(format!("mtime before epoch: {e}")))?;
    Ok(since_epoch.as_millis() as i64)
}

impl CompilationCache {
    /// Load the cache from disk, starting empty if the file is missing or
    /// unreadable. A corrupt cache only costs recompilation.
    pub fn load(file_path: impl Into<PathBuf>) -> Self {
        let file_path = file_path.into();
        let contents = match std::fs::read_to_string(&file_path) {
            Ok(contents) => contents,
            Err(_) => {
                return Self {
                    file_path,
                    inner: Mutex::new(CacheFile::default()),
                }
            }
        };
        let file = match serde_json::from_str::<CacheFile>(&contents) {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %file_path.display(), error = %e, "discarding corrupt compilation cache");
                CacheFile::default()
            }
        };
        debug!(path = %file_path.display(), entries = file.entries.len(), "loaded compilation cache");
        Self {
            file_path,
            inner: Mutex::new(file),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, CacheFile>> {
        self.inner
            .lock()
            .map_err(|e| PixelGraphError::Cache(format!("cache lock poisoned: {e}")))
    }

    fn save_locked(&self, file: &CacheFile) -> Result<()> {
        if let Some(parent) = self.file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(file)?;
        std::fs::write(&self.file_path, json)?;
        Ok(())
    }

    /// Look up the entry for a script.
    pub fn entry(&self, relative_path: &str) -> Option<CacheEntry> {
        self.inner
            .lock()
            .ok()
            .and_then(|file| file.entries.get(relative_path).cloned())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|f| f.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the script at `source_path` must be recompiled. True when no
    /// entry exists, the source mtime changed, or the artifact file is gone.
    pub fn needs_recompilation(
        &self,
        relative_path: &str,
        source_path: &Path,
        compiled_dir: &Path,
    ) -> bool {
        let Some(entry) = self.entry(relative_path) else {
            return true;
        };
        let Ok(current_mtime) = mtime_millis(source_path) else {
            return true;
        };
        if entry.source_mtime_ms != current_mtime {
            return true;
        }
        !compiled_dir.join(&entry.artifact_file).exists()
    }

    /// Record a successful compilation and rewrite the cache file.
    pub fn record(
        &self,
        relative_path: &str,
        artifact_file: &str,
        source_mtime_ms: i64,
    ) -> Result<()> {
        let mut file = self.lock()?;
        file.entries.insert(
            relative_path.to_string(),
            CacheEntry {
                script_path: relative_path.to_string(),
                artifact_file: artifact_file.to_string(),
                source_mtime_ms,
                compiled_at: Utc::now(),
            },
        );
        self.save_locked(&file)
    }

    /// Drop the entry for a script (e.g. after deletion) and rewrite.
    pub fn remove(&self, relative_path: &str) -> Result<()> {
        let mut file = self.lock()?;
        if file.entries.remove(relative_path).is_some() {
            self.save_locked(&file)?;
        }
        Ok(())
    }

    /// Delete artifact files in `compiled_dir` that no cache entry references.
    /// Bounds storage growth from renamed and deleted scripts. Returns the
    /// number of files removed.
    pub fn prune_orphan_artifacts(&self, compiled_dir: &Path) -> Result<usize> {
        if !compiled_dir.is_dir() {
            return Ok(0);
        }
        let referenced: HashSet<String> = {
            let file = self.lock()?;
            file.entries.values().map(|e| e.artifact_file.clone()).collect()
        };

        let mut removed = 0;
        for dir_entry in std::fs::read_dir(compiled_dir)? {
            let path = dir_entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ARTIFACT_EXT) {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !referenced.contains(file_name) {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "failed to prune orphan artifact");
                } else {
                    debug!(path = %path.display(), "pruned orphan artifact");
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}
