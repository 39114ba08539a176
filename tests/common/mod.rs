//! Shared fixtures: a temporary script workspace with a small set of
//! known scripts, plus the registry/engine pair wired over it.

// Not every test binary uses every helper.
#![allow(dead_code)]

use pixelgraph_rs::graph::{NodeGraph, NodeId};
use pixelgraph_rs::scripting::{CompilationCache, ScriptEngine, ScriptRegistry};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub const SOURCE_SCRIPT: &str = r##"
fn metadata() {
    #{ "name": "Source", "category": "Generate" }
}

fn output_ports() {
    [ #{ "name": "value", "type": "number" } ]
}

fn parameters() {
    [ #{ "name": "seed", "default": 10 } ]
}

fn process(inputs, params) {
    #{ "value": params["seed"] }
}
"##;

pub const SCALE_SCRIPT: &str = r##"
fn metadata() {
    #{ "name": "Scale", "category": "Adjust" }
}

fn input_ports() {
    [ #{ "name": "value", "type": "number" } ]
}

fn output_ports() {
    [ #{ "name": "value", "type": "number" } ]
}

fn parameters() {
    [ #{ "name": "factor", "default": 2 } ]
}

fn process(inputs, params) {
    let v = if "value" in inputs { inputs["value"] } else { 0 };
    #{ "value": v * params["factor"] }
}
"##;

pub const FAILING_SCRIPT: &str = r##"
fn metadata() {
    #{ "name": "Failing" }
}

fn input_ports() {
    [ #{ "name": "value", "type": "number" } ]
}

fn output_ports() {
    [ #{ "name": "value", "type": "number" } ]
}

fn process(inputs, params) {
    throw "intentional failure";
}
"##;

pub const RELAY_SYMBOL: &str = r##"
name = "Relay"
category = "Routing"

[[input]]
name = "value"
data_type = "number"

[[output]]
name = "value"
data_type = "number"
"##;

/// Temporary script root with the standard fixture scripts registered and
/// an engine over it.
pub struct ScriptWorkspace {
    pub dir: TempDir,
    pub registry: Arc<ScriptRegistry>,
    pub engine: Arc<ScriptEngine>,
}

impl ScriptWorkspace {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("source.rhai"), SOURCE_SCRIPT).unwrap();
        std::fs::write(dir.path().join("scale.rhai"), SCALE_SCRIPT).unwrap();
        std::fs::write(dir.path().join("failing.rhai"), FAILING_SCRIPT).unwrap();
        std::fs::write(dir.path().join("relay.sn"), RELAY_SYMBOL).unwrap();

        let registry = Arc::new(ScriptRegistry::new(dir.path()));
        registry.scan().unwrap();
        let engine = Self::fresh_engine(dir.path());
        Self {
            dir,
            registry,
            engine,
        }
    }

    /// A new engine over the same root, sharing nothing in memory with any
    /// previous one. Models a process restart.
    pub fn fresh_engine(root: &Path) -> Arc<ScriptEngine> {
        let compiled = root.join("compiled");
        let cache = Arc::new(CompilationCache::load(compiled.join("compilation_cache.json")));
        Arc::new(ScriptEngine::new(compiled, cache))
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn compiled_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("compiled")
    }

    /// Add a node backed by a registered script, ports and defaults included.
    pub fn add_node(&self, graph: &mut NodeGraph, script: &str) -> NodeId {
        let descriptor = self.registry.get(script).unwrap();
        let id = graph.add_node(descriptor.name.clone(), script);
        graph.insert_node(descriptor.create_node(id));
        id
    }
}

pub fn output_int(graph: &NodeGraph, id: NodeId, port: &str) -> i64 {
    graph.node(id).unwrap().processed_outputs[port]
        .as_int()
        .unwrap()
}
