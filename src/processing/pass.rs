//! Single processing pass execution.
//!
//! A pass takes the current dirty set, extends it with the upstream closure
//! so every executed node sees valid inputs, layers the subset and runs it
//! in order. Failures are isolated per node: a throwing script clears that
//! node's outputs and records the error, and the pass carries on. Nodes
//! pulled in only as dependencies are skipped when their cached outputs are
//! still valid.

use crate::error::PixelGraphError;
use crate::graph::{NodeGraph, NodeId};
use crate::processing::layering::{build_layers, collect_upstream};
use crate::scripting::{json_to_dynamic, ScriptEngine, ScriptRegistry};
use rhai::Dynamic;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What a pass should cover.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassScope {
    /// Re-execute the whole graph regardless of flags.
    Full,
    /// Execute only what is currently flagged, plus upstream dependencies.
    Changed,
}

/// Terminal state of one node within a pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeStatus {
    Succeeded,
    Failed(String),
    /// Unflagged dependency whose cached outputs were reused.
    SkippedClean,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeOutcome {
    pub node: NodeId,
    pub status: NodeStatus,
}

/// Summary of one completed pass.
#[derive(Clone, Debug, Default)]
pub struct PassReport {
    pub executed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub layer_count: usize,
    /// Nodes force-placed because of cycles.
    pub forced: Vec<NodeId>,
    pub outcomes: Vec<NodeOutcome>,
    pub elapsed: Duration,
}

impl PassReport {
    pub fn outcome_of(&self, node: NodeId) -> Option<&NodeStatus> {
        self.outcomes
            .iter()
            .find(|o| o.node == node)
            .map(|o| &o.status)
    }
}

/// Execute one pass over the graph.
pub fn run_pass(
    graph: &mut NodeGraph,
    registry: &ScriptRegistry,
    engine: &ScriptEngine,
    scope: PassScope,
) -> PassReport {
    let started = Instant::now();
    if scope == PassScope::Full {
        graph.mark_all();
    }

    let marked = graph.nodes_to_process();
    if marked.is_empty() {
        return PassReport {
            elapsed: started.elapsed(),
            ..PassReport::default()
        };
    }

    let subset = collect_upstream(graph, &marked);
    let order = build_layers(graph, &subset);
    debug!(
        marked = marked.len(),
        subset = subset.len(),
        layers = order.layers.len(),
        "starting pass"
    );

    let mut report = PassReport {
        layer_count: order.layers.len(),
        forced: order.forced.clone(),
        ..PassReport::default()
    };

    for layer in &order.layers {
        for &id in layer {
            let status = execute_node(graph, registry, engine, id);
            match &status {
                NodeStatus::Succeeded => report.executed += 1,
                NodeStatus::Failed(message) => {
                    warn!(node = %id, error = %message, "node failed");
                    report.failed += 1;
                }
                NodeStatus::SkippedClean => report.skipped += 1,
            }
            report.outcomes.push(NodeOutcome { node: id, status });
        }
    }

    report.elapsed = started.elapsed();
    info!(
        executed = report.executed,
        failed = report.failed,
        skipped = report.skipped,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "pass finished"
    );
    report
}

fn execute_node(
    graph: &mut NodeGraph,
    registry: &ScriptRegistry,
    engine: &ScriptEngine,
    id: NodeId,
) -> NodeStatus {
    let Some(node) = graph.node(id) else {
        return NodeStatus::Failed(format!("node {id} vanished during pass"));
    };

    // A clean dependency with cached outputs does not need to re-run.
    if !node.to_be_processed && node.is_processed && !node.processed_outputs.is_empty() {
        return NodeStatus::SkippedClean;
    }

    let script_path = node.script_path.clone();
    let inputs = gather_inputs(graph, id);

    let Some(descriptor) = registry.get(&script_path) else {
        return fail(graph, id, format!("script not registered: {script_path}"));
    };

    if descriptor.is_symbol_node {
        // Symbol nodes route values through declaratively: each output port
        // carries the same-named input value.
        let mut outputs = HashMap::new();
        for port in &descriptor.outputs {
            let value = inputs
                .get(port.name.as_str())
                .cloned()
                .unwrap_or(Dynamic::UNIT);
            outputs.insert(port.name.clone(), value);
        }
        if let Some(node) = graph.node_mut(id) {
            node.record_success(outputs);
        }
        return NodeStatus::Succeeded;
    }

    let mut instance = match engine.instantiate(&descriptor) {
        Ok(Some(instance)) => instance,
        Ok(None) => return fail(graph, id, format!("{script_path}: no executable body")),
        Err(e) => return fail(graph, id, e.to_string()),
    };

    let params = parameter_map(graph, id);
    match instance.process(inputs, params) {
        Ok(result) => {
            let outputs: HashMap<String, Dynamic> = result
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect();
            if let Some(node) = graph.node_mut(id) {
                node.record_success(outputs);
            }
            NodeStatus::Succeeded
        }
        Err(e) => fail(graph, id, e.to_string()),
    }
}

fn fail(graph: &mut NodeGraph, id: NodeId, message: String) -> NodeStatus {
    let rendered = PixelGraphError::Node {
        node_id: id.0,
        message,
    }
    .to_string();
    if let Some(node) = graph.node_mut(id) {
        node.record_failure(rendered.clone());
    }
    NodeStatus::Failed(rendered)
}

/// Clone each connected upstream output into a map keyed by input port name.
/// Unconnected ports and failed feeders simply contribute nothing; scripts
/// decide how to degrade.
fn gather_inputs(graph: &NodeGraph, id: NodeId) -> rhai::Map {
    let mut inputs = rhai::Map::new();
    let Some(node) = graph.node(id) else {
        return inputs;
    };

    for port in &node.inputs {
        let Some(conn) = graph.input_connection(id, &port.name) else {
            continue;
        };
        let Some(upstream) = graph.node(conn.output_node) else {
            continue;
        };
        if upstream.has_error {
            continue;
        }
        if let Some(value) = upstream.processed_outputs.get(&conn.output_port) {
            inputs.insert(port.name.as_str().into(), value.clone());
        }
    }
    inputs
}

fn parameter_map(graph: &NodeGraph, id: NodeId) -> rhai::Map {
    let mut params = rhai::Map::new();
    if let Some(node) = graph.node(id) {
        for (name, value) in &node.parameters {
            params.insert(name.as_str().into(), json_to_dynamic(value));
        }
    }
    params
}
