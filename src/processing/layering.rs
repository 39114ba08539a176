//! Dependency layering.
//!
//! A pass executes nodes in layers: a node may only run once everything
//! upstream of it inside the execution subset has already run. Layering is a
//! Kahn-style peel over the subset, deterministic because candidates are
//! kept in sorted order. The model accepts cyclic wirings, so a peel can
//! stall; when it does, the lowest remaining id is forced into its own
//! layer and the peel continues. Forced nodes are reported so callers can
//! surface the cycle.

use crate::graph::{NodeGraph, NodeId, NODE_WIDTH};
use std::collections::{BTreeSet, HashSet};
use tracing::warn;

/// Horizontal gap between layer bands in auto layout.
const LAYER_GAP: f64 = 60.0;
/// Vertical gap between nodes within a band.
const NODE_GAP: f64 = 30.0;

/// Execution order for one pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LayeredOrder {
    /// Layers in execution order; each layer is sorted by node id.
    pub layers: Vec<Vec<NodeId>>,
    /// Nodes placed by forced progress because a cycle stalled the peel.
    pub forced: Vec<NodeId>,
}

impl LayeredOrder {
    pub fn node_count(&self) -> usize {
        self.layers.iter().map(Vec::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.layers.iter().flatten().copied()
    }
}

/// Layer the given subset of the graph.
///
/// Only dependencies inside the subset constrain placement; upstream nodes
/// outside the subset are treated as already satisfied.
pub fn build_layers(graph: &NodeGraph, subset: &HashSet<NodeId>) -> LayeredOrder {
    let mut remaining: BTreeSet<NodeId> = subset
        .iter()
        .copied()
        .filter(|id| graph.node(*id).is_some())
        .collect();
    let mut placed: HashSet<NodeId> = HashSet::with_capacity(remaining.len());
    let mut order = LayeredOrder::default();

    while !remaining.is_empty() {
        let layer: Vec<NodeId> = remaining
            .iter()
            .copied()
            .filter(|id| {
                graph
                    .upstream_of(*id)
                    .iter()
                    .all(|up| !subset.contains(up) || placed.contains(up))
            })
            .collect();

        let layer = if layer.is_empty() {
            // Cycle: every remaining node waits on another remaining node.
            // Force the lowest id so the peel always makes progress.
            let lowest = *remaining.iter().next().unwrap_or(&NodeId::INVALID);
            warn!(node = %lowest, "cycle detected, forcing node into layer");
            order.forced.push(lowest);
            vec![lowest]
        } else {
            layer
        };

        for id in &layer {
            remaining.remove(id);
            placed.insert(*id);
        }
        order.layers.push(layer);
    }

    order
}

/// The seeds plus everything transitively upstream of them.
pub fn collect_upstream(graph: &NodeGraph, seeds: &[NodeId]) -> HashSet<NodeId> {
    let mut closure = HashSet::new();
    let mut stack: Vec<NodeId> = seeds
        .iter()
        .copied()
        .filter(|id| graph.node(*id).is_some())
        .collect();

    while let Some(id) = stack.pop() {
        if !closure.insert(id) {
            continue;
        }
        for up in graph.upstream_of(id) {
            if !closure.contains(&up) {
                stack.push(up);
            }
        }
    }
    closure
}

/// Arrange all nodes into horizontal bands, one per layer, for display.
pub fn apply_auto_layout(graph: &mut NodeGraph) {
    let all: HashSet<NodeId> = graph.node_ids().into_iter().collect();
    let order = build_layers(graph, &all);

    let mut x = 0.0;
    for layer in &order.layers {
        let mut y = 0.0;
        for id in layer {
            if let Some(node) = graph.node_mut(*id) {
                node.x = x;
                node.y = y;
                y += node.height + NODE_GAP;
            }
        }
        x += NODE_WIDTH + LAYER_GAP;
    }
}
