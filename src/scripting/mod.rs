//! Script discovery, compilation and isolated execution.
//!
//! Scripts are Rhai source units living under a script root. Each one
//! declares its metadata through plain functions the registry calls on a
//! throwaway compilation:
//!
//! ```rhai
//! fn metadata() {
//!     #{ "name": "Brightness", "author": "jane", "version": "1.0",
//!        "category": "Adjust", "color": "#FFAA00" }
//! }
//!
//! fn input_ports() {
//!     [ #{ "name": "image", "type": "f32bmp" } ]
//! }
//!
//! fn output_ports() {
//!     [ #{ "name": "result", "type": "f32bmp" } ]
//! }
//!
//! fn parameters() {
//!     [ #{ "name": "amount", "default": 1.0 } ]
//! }
//!
//! fn process(inputs, params) {
//!     #{ "result": inputs["image"] }
//! }
//! ```
//!
//! A second, declarative source kind exists for symbol nodes (`.sn` files,
//! see [`symbol`]); those require no compilation at all.
//!
//! Compiled scripts are cached persistently (see [`cache`]) and loaded into
//! fresh, per-node instances: two nodes running the same script never share
//! interpreter state.

mod cache;
mod engine;
mod symbol;
mod watcher;

pub use cache::{mtime_millis, CacheEntry, CompilationCache, ARTIFACT_EXT};
pub use engine::{CompileDiagnostics, CompileSummary, ScriptEngine, ScriptInstance};
pub use symbol::parse_symbol_node;
pub use watcher::{ScriptWatcher, WatchEvent};

use crate::error::{PixelGraphError, Result};
use crate::graph::{Node, NodeId, PortDefinition};
use rhai::Dynamic;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info, warn};

/// Directory under the script root holding persisted artifacts.
pub const COMPILED_DIR: &str = "compiled";
/// Directory under the script root holding per-script resource folders.
pub const RESOURCES_DIR: &str = "resources";

/// Declared parameter of a script.
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterDefinition {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub default: Value,
}

/// Compile-time metadata for one script source file, shared read-only across
/// all nodes that use that script.
#[derive(Clone, Debug)]
pub struct ScriptDescriptor {
    pub name: String,
    pub author: String,
    pub version: String,
    pub description: String,
    pub category: String,
    pub color: String,
    pub relative_path: String,
    pub absolute_path: PathBuf,
    /// Source mtime in milliseconds since epoch at registration time.
    pub last_modified_ms: Option<i64>,
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
    pub parameters: Vec<ParameterDefinition>,
    pub compiled: bool,
    pub artifact_path: Option<PathBuf>,
    pub is_symbol_node: bool,
}

impl ScriptDescriptor {
    pub fn new(relative_path: &str, absolute_path: &Path) -> Self {
        Self {
            name: String::new(),
            author: String::new(),
            version: String::new(),
            description: String::new(),
            category: "Uncategorized".to_string(),
            color: "#4A90D9".to_string(),
            relative_path: relative_path.to_string(),
            absolute_path: absolute_path.to_path_buf(),
            last_modified_ms: mtime_millis(absolute_path).ok(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            parameters: Vec::new(),
            compiled: false,
            artifact_path: None,
            is_symbol_node: false,
        }
    }

    /// Instantiate this script into a graph node: ports are copied from the
    /// declaration and parameters start at their declared defaults.
    pub fn create_node(&self, id: NodeId) -> Node {
        let mut node = Node::new(id, self.name.clone(), self.relative_path.clone());
        node.set_ports(self.inputs.clone(), self.outputs.clone());
        for param in &self.parameters {
            node.parameters
                .insert(param.name.clone(), param.default.clone());
        }
        node
    }
}

/// Outcome of one registry scan.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    pub registered: usize,
    pub skipped: usize,
}

/// Thread-safe registry of script descriptors keyed by relative path.
#[derive(Debug)]
pub struct ScriptRegistry {
    root: PathBuf,
    entries: RwLock<HashMap<String, ScriptDescriptor>>,
}

impl ScriptRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn compiled_dir(&self) -> PathBuf {
        self.root.join(COMPILED_DIR)
    }

    /// Resource folder for a script, derived from its file stem.
    pub fn resource_dir_for(&self, relative_path: &str) -> PathBuf {
        let stem = Path::new(relative_path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(relative_path);
        self.root.join(RESOURCES_DIR).join(stem)
    }

    /// Scan the script root, replacing all registry entries.
    ///
    /// `.rhai` scripts are compiled in a throwaway unit purely to extract
    /// their declared metadata; `.sn` symbol nodes are parsed directly.
    /// Files that fail to parse are logged and skipped, never raised.
    /// Parsing runs with bounded parallelism across worker threads; the
    /// registry map itself is only written by this thread.
    pub fn scan(&self) -> Result<ScanSummary> {
        let files = self.collect_script_files()?;
        info!(root = %self.root.display(), files = files.len(), "scanning script root");

        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(files.len().max(1));
        let chunk_size = files.len().div_ceil(workers);
        let (tx, rx) = crossbeam_channel::unbounded();

        std::thread::scope(|scope| {
            for chunk in files.chunks(chunk_size.max(1)) {
                let tx = tx.clone();
                scope.spawn(move || {
                    let engine = engine::build_engine();
                    for path in chunk {
                        let result = self.parse_one(&engine, path);
                        if tx.send(result).is_err() {
                            return;
                        }
                    }
                });
            }
        });
        drop(tx);

        let mut summary = ScanSummary::default();
        let mut new_entries = HashMap::new();
        for result in rx {
            match result {
                Ok(descriptor) => {
                    if !descriptor.is_symbol_node {
                        self.ensure_resource_folder(&descriptor.relative_path);
                    }
                    debug!(script = %descriptor.relative_path, name = %descriptor.name, "registered script");
                    new_entries.insert(descriptor.relative_path.clone(), descriptor);
                    summary.registered += 1;
                }
                Err(e) => {
                    warn!(error = %e, "skipping script");
                    summary.skipped += 1;
                }
            }
        }

        let mut entries = self
            .entries
            .write()
            .map_err(|e| PixelGraphError::Registry(format!("registry lock poisoned: {e}")))?;
        *entries = new_entries;
        Ok(summary)
    }

    fn parse_one(&self, engine: &rhai::Engine, path: &Path) -> Result<ScriptDescriptor> {
        let relative = self.relative_path_of(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("rhai") => {
                let source = std::fs::read_to_string(path)?;
                engine::extract_descriptor(engine, &source, path, &relative)
            }
            Some("sn") => symbol::parse_symbol_node(path, &relative),
            _ => Err(PixelGraphError::Registry(format!(
                "unsupported script kind: {relative}"
            ))),
        }
    }

    fn relative_path_of(&self, path: &Path) -> Result<String> {
        let rel = path.strip_prefix(&self.root).map_err(|_| {
            PixelGraphError::Registry(format!("{} is outside the script root", path.display()))
        })?;
        Ok(rel.to_string_lossy().replace('\\', "/"))
    }

    fn collect_script_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut dirs = vec![self.root.clone()];
        while let Some(dir) = dirs.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "failed to read script directory");
                    continue;
                }
            };
            for entry in entries.flatten() {
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
                    files.push(path);
                }
            }
        }
        files.sort();
        Ok(files)
    }

    fn ensure_resource_folder(&self, relative_path: &str) {
        let dir = self.resource_dir_for(relative_path);
        if let Err(e) = std::fs::create_dir_all(&dir) {
            warn!(dir = %dir.display(), error = %e, "failed to create script resource folder");
        }
    }

    // ── Entry access ──

    pub fn get(&self, relative_path: &str) -> Option<ScriptDescriptor> {
        self.entries
            .read()
            .ok()
            .and_then(|e| e.get(relative_path).cloned())
    }

    /// Snapshot of all descriptors, sorted by relative path.
    pub fn all(&self) -> Vec<ScriptDescriptor> {
        let mut all: Vec<ScriptDescriptor> = self
            .entries
            .read()
            .map(|e| e.values().cloned().collect())
            .unwrap_or_default();
        all.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        all
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record that a script now has a valid artifact.
    pub fn mark_compiled(&self, relative_path: &str, artifact_path: PathBuf) {
        if let Ok(mut entries) = self.entries.write() {
            if let Some(desc) = entries.get_mut(relative_path) {
                desc.compiled = true;
                desc.artifact_path = Some(artifact_path);
            }
        }
    }

    pub fn mark_not_compiled(&self, relative_path: &str) {
        if let Ok(mut entries) = self.entries.write() {
            if let Some(desc) = entries.get_mut(relative_path) {
                desc.compiled = false;
                desc.artifact_path = None;
            }
        }
    }
}

// ── Value conversions ──

/// Convert a script value into a JSON value for storage on a node.
pub fn dynamic_to_json(value: &Dynamic) -> Value {
    if value.is_unit() {
        return Value::Null;
    }
    if let Ok(b) = value.as_bool() {
        return Value::Bool(b);
    }
    if let Ok(i) = value.as_int() {
        return Value::from(i);
    }
    if let Ok(f) = value.as_float() {
        return serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null);
    }
    if value.is_string() {
        return Value::String(value.clone().into_string().unwrap_or_default());
    }
    if value.is_array() {
        let items = value.clone().into_array().unwrap_or_default();
        return Value::Array(items.iter().map(dynamic_to_json).collect());
    }
    if value.is_map() {
        if let Some(map) = value.clone().try_cast::<rhai::Map>() {
            return Value::Object(
                map.iter()
                    .map(|(k, v)| (k.to_string(), dynamic_to_json(v)))
                    .collect(),
            );
        }
    }
    Value::String(value.to_string())
}

/// Convert a stored JSON value into a script value.
pub fn json_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => (*b).into(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Dynamic::from(i)
            } else {
                Dynamic::from(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => s.clone().into(),
        Value::Array(items) => {
            let arr: rhai::Array = items.iter().map(json_to_dynamic).collect();
            arr.into()
        }
        Value::Object(fields) => {
            let mut map = rhai::Map::new();
            for (k, v) in fields {
                map.insert(k.as_str().into(), json_to_dynamic(v));
            }
            map.into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PASSTHROUGH: &str = r##"
fn metadata() {
    #{ "name": "Passthrough", "author": "test", "version": "1.0", "category": "Util" }
}

fn input_ports() {
    [ #{ "name": "image", "type": "f32bmp" } ]
}

fn output_ports() {
    [ #{ "name": "result", "type": "f32bmp" } ]
}

fn process(inputs, params) {
    #{ "result": inputs["image"] }
}
"##;

    fn setup_root() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("passthrough.rhai"), PASSTHROUGH).unwrap();
        dir
    }

    #[test]
    fn test_scan_registers_scripts() {
        let root = setup_root();
        let registry = ScriptRegistry::new(root.path());
        let summary = registry.scan().unwrap();
        assert_eq!(summary.registered, 1);
        assert_eq!(summary.skipped, 0);

        let desc = registry.get("passthrough.rhai").unwrap();
        assert_eq!(desc.name, "Passthrough");
        assert_eq!(desc.inputs.len(), 1);
        assert_eq!(desc.outputs.len(), 1);
        assert!(!desc.is_symbol_node);
    }

    #[test]
    fn test_scan_skips_broken_scripts() {
        let root = setup_root();
        std::fs::write(root.path().join("broken.rhai"), "fn process( {").unwrap();
        let registry = ScriptRegistry::new(root.path());
        let summary = registry.scan().unwrap();
        assert_eq!(summary.registered, 1);
        assert_eq!(summary.skipped, 1);
        assert!(registry.get("broken.rhai").is_none());
    }

    #[test]
    fn test_scan_skips_compiled_and_resources_dirs() {
        let root = setup_root();
        let compiled = root.path().join(COMPILED_DIR);
        std::fs::create_dir_all(&compiled).unwrap();
        std::fs::write(compiled.join("stray.rhai"), PASSTHROUGH).unwrap();

        let registry = ScriptRegistry::new(root.path());
        let summary = registry.scan().unwrap();
        assert_eq!(summary.registered, 1);
    }

    #[test]
    fn test_scan_creates_resource_folder() {
        let root = setup_root();
        let registry = ScriptRegistry::new(root.path());
        registry.scan().unwrap();
        assert!(root.path().join(RESOURCES_DIR).join("passthrough").is_dir());
    }

    #[test]
    fn test_rescan_replaces_entries() {
        let root = setup_root();
        let registry = ScriptRegistry::new(root.path());
        registry.scan().unwrap();
        assert_eq!(registry.len(), 1);

        std::fs::remove_file(root.path().join("passthrough.rhai")).unwrap();
        registry.scan().unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_create_node_from_descriptor() {
        let root = setup_root();
        let registry = ScriptRegistry::new(root.path());
        registry.scan().unwrap();

        let desc = registry.get("passthrough.rhai").unwrap();
        let node = desc.create_node(NodeId(3));
        assert_eq!(node.title, "Passthrough");
        assert_eq!(node.script_path, "passthrough.rhai");
        assert_eq!(node.inputs.len(), 1);
        assert!(node.to_be_processed);
    }

    #[test]
    fn test_dynamic_json_round_trip() {
        let original = serde_json::json!({
            "amount": 1.5,
            "mode": "soft",
            "enabled": true,
            "steps": [1, 2, 3],
        });
        let round_tripped = dynamic_to_json(&json_to_dynamic(&original));
        assert_eq!(round_tripped, original);
    }
}
