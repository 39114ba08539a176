//! Script root watcher.
//!
//! Polls the script root on a fixed tick and fingerprints the set of
//! `(path, mtime)` pairs for every script source it can see, skipping the
//! compiled and resource directories. Editors save in bursts, so a change is
//! only reported after the tree has been quiet for a debounce window; one
//! burst yields one [`WatchEvent::ScriptsChanged`].

use crate::scripting::{COMPILED_DIR, RESOURCES_DIR};
use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Change notification from the watcher thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchEvent {
    /// One or more script sources were added, removed or rewritten.
    ScriptsChanged,
}

/// Background polling watcher over a script root.
pub struct ScriptWatcher {
    events: Receiver<WatchEvent>,
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl ScriptWatcher {
    /// Start watching `root`. `poll_interval` bounds detection latency;
    /// `debounce` is how long the tree must stay unchanged before a burst is
    /// reported.
    pub fn spawn(root: impl Into<PathBuf>, poll_interval: Duration, debounce: Duration) -> Self {
        let root = root.into();
        let (event_tx, event_rx) = bounded(16);
        let (stop_tx, stop_rx) = bounded(1);
        let handle = std::thread::Builder::new()
            .name("script-watcher".to_string())
            .spawn(move || watch_loop(&root, poll_interval, debounce, &event_tx, &stop_rx));
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "failed to spawn script watcher thread");
                None
            }
        };
        Self {
            events: event_rx,
            stop: stop_tx,
            handle,
        }
    }

    pub fn events(&self) -> &Receiver<WatchEvent> {
        &self.events
    }
}

impl Drop for ScriptWatcher {
    fn drop(&mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn watch_loop(
    root: &Path,
    poll_interval: Duration,
    debounce: Duration,
    events: &Sender<WatchEvent>,
    stop: &Receiver<()>,
) {
    let ticker = tick(poll_interval);
    let mut last_fingerprint = fingerprint(root);
    let mut pending_since: Option<Instant> = None;

    loop {
        select! {
            recv(stop) -> _ => return,
            recv(ticker) -> _ => {
                let current = fingerprint(root);
                if current != last_fingerprint {
                    last_fingerprint = current;
                    pending_since = Some(Instant::now());
                } else if let Some(since) = pending_since {
                    if since.elapsed() >= debounce {
                        pending_since = None;
                        debug!(root = %root.display(), "script change settled");
                        if events.send(WatchEvent::ScriptsChanged).is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Hash of every script source path and its mtime under `root`.
fn fingerprint(root: &Path) -> u64 {
    let mut entries: Vec<(PathBuf, i64)> = Vec::new();
    let mut dirs = vec![root.to_path_buf()];
    while let Some(dir) = dirs.pop() {
        let Ok(read) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in read.flatten() {
            let path = entry.path();
            if path.is_dir() {
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
                if name == COMPILED_DIR || name == RESOURCES_DIR {
                    continue;
                }
                dirs.push(path);
            } else if matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("rhai") | Some("sn")
            ) {
                let mtime = crate::scripting::mtime_millis(&path).unwrap_or(0);
                entries.push((path, mtime));
            }
        }
    }
    entries.sort();

    let mut hasher = DefaultHasher::new();
    for (path, mtime) in &entries {
        path.hash(&mut hasher);
        mtime.hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_fingerprint_tracks_source_files() {
        let dir = TempDir::new().unwrap();
        let before = fingerprint(dir.path());

        std::fs::write(dir.path().join("a.rhai"), "fn process(i, p) { i }").unwrap();
        let after = fingerprint(dir.path());
        assert_ne!(before, after);

        std::fs::remove_file(dir.path().join("a.rhai")).unwrap();
        assert_eq!(fingerprint(dir.path()), before);
    }

    #[test]
    fn test_fingerprint_ignores_compiled_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.rhai"), "fn process(i, p) { i }").unwrap();
        let before = fingerprint(dir.path());

        let compiled = dir.path().join(COMPILED_DIR);
        std::fs::create_dir_all(&compiled).unwrap();
        std::fs::write(compiled.join("a.rhai.rhc"), "snapshot").unwrap();
        std::fs::write(compiled.join("stray.rhai"), "fn process(i, p) { i }").unwrap();

        assert_eq!(fingerprint(dir.path()), before);
    }

    // Timing sensitive: runs alone so parallel test load cannot stretch
    // the debounce window past the timeout.
    #[test]
    #[serial]
    fn test_watcher_reports_change_after_quiet_window() {
        let dir = TempDir::new().unwrap();
        let watcher = ScriptWatcher::spawn(
            dir.path(),
            Duration::from_millis(10),
            Duration::from_millis(30),
        );

        std::fs::write(dir.path().join("new.rhai"), "fn process(i, p) { i }").unwrap();

        let event = watcher
            .events()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        assert_eq!(event, WatchEvent::ScriptsChanged);
    }

    #[test]
    fn test_watcher_stops_on_drop() {
        let dir = TempDir::new().unwrap();
        let watcher = ScriptWatcher::spawn(
            dir.path(),
            Duration::from_millis(10),
            Duration::from_millis(20),
        );
        drop(watcher);
    }
}
