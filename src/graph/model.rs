//! Graph model: nodes, connections and topology queries.
//!
//! The model is a pure data structure. Mutations are synchronous and keep
//! the structure internally consistent, but connections are deliberately
//! permissive: no type-compatibility or self-loop checks are enforced when
//! wiring ports. [`PortDataType::are_compatible`] exists as an advisory
//! query for UI layers; the engine accepts whatever the author connects.
//!
//! Dependency marking lives here as well: after any edit the affected
//! downstream nodes are flagged `to_be_processed` so a subsequent pass only
//! re-executes what actually changed.

use crate::error::{PixelGraphError, Result};
use crate::graph::id::{ConnectionId, NodeId};
use crate::graph::node::Node;
use crate::graph::port::PortDataType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// A directed edge from one node's output port to another node's input port.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub output_node: NodeId,
    pub output_port: String,
    pub input_node: NodeId,
    pub input_port: String,
}

impl Connection {
    /// Connection validity is advisory only: any wiring the author creates
    /// is accepted, including type mismatches and self-loops.
    pub fn validate(&self) -> bool {
        true
    }
}

/// Viewport state carried with the graph for the editor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ViewportState {
    pub zoom: f64,
    pub pan_x: f64,
    pub pan_y: f64,
}

impl Default for ViewportState {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            pan_x: 0.0,
            pan_y: 0.0,
        }
    }
}

/// Serializable graph record exchanged with the persistence collaborator.
/// The on-disk file format is defined outside this crate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GraphRecord {
    pub name: String,
    pub nodes: Vec<Node>,
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub viewport: ViewportState,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
}

/// Owning collection of nodes and connections.
#[derive(Debug, Default)]
pub struct NodeGraph {
    pub name: String,
    nodes: HashMap<NodeId, Node>,
    connections: Vec<Connection>,
    pub viewport: ViewportState,
    pub metadata: HashMap<String, serde_json::Value>,
    pub modified_at: Option<DateTime<Utc>>,
    next_node_id: u32,
    next_connection_id: u32,
}

impl NodeGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    // ── Node access ──

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.values_mut()
    }

    /// All node ids, sorted for deterministic iteration.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    // ── Mutations ──

    /// Add a node bound to a script and return its id.
    pub fn add_node(&mut self, title: impl Into<String>, script_path: impl Into<String>) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        let node = Node::new(id, title, script_path);
        self.nodes.insert(id, node);
        self.touch();
        id
    }

    /// Insert a pre-built node, adjusting the id counter as needed.
    pub fn insert_node(&mut self, node: Node) {
        self.next_node_id = self.next_node_id.max(node.id.0.saturating_add(1));
        self.nodes.insert(node.id, node);
        self.touch();
    }

    /// Delete a node. The downstream neighbors are marked dirty first (the
    /// node itself is excluded since it no longer exists after removal),
    /// then every connection touching the node is removed.
    pub fn remove_node(&mut self, id: NodeId) -> Result<()> {
        if !self.nodes.contains_key(&id) {
            return Err(PixelGraphError::Graph(format!("unknown node {id}")));
        }

        let downstream: Vec<NodeId> = self
            .connections
            .iter()
            .filter(|c| c.output_node == id)
            .map(|c| c.input_node)
            .collect();
        for neighbor in downstream {
            self.mark_downstream(neighbor);
        }

        let before = self.connections.len();
        self.connections
            .retain(|c| c.output_node != id && c.input_node != id);
        debug!(
            node = %id,
            removed_connections = before - self.connections.len(),
            "removed node"
        );

        self.nodes.remove(&id);
        self.touch();
        Ok(())
    }

    /// Wire an output port to an input port. An input port holds at most one
    /// upstream connection, so any existing connection into the target port
    /// is replaced. Everything downstream of the source node is marked dirty.
    pub fn connect(
        &mut self,
        output_node: NodeId,
        output_port: impl Into<String>,
        input_node: NodeId,
        input_port: impl Into<String>,
    ) -> Result<ConnectionId> {
        if !self.nodes.contains_key(&output_node) {
            return Err(PixelGraphError::Graph(format!("unknown node {output_node}")));
        }
        if !self.nodes.contains_key(&input_node) {
            return Err(PixelGraphError::Graph(format!("unknown node {input_node}")));
        }

        let input_port = input_port.into();
        self.connections
            .retain(|c| !(c.input_node == input_node && c.input_port == input_port));

        let id = ConnectionId(self.next_connection_id);
        self.next_connection_id += 1;
        let connection = Connection {
            id,
            output_node,
            output_port: output_port.into(),
            input_node,
            input_port,
        };
        debug_assert!(connection.validate());
        self.connections.push(connection);

        self.mark_downstream(output_node);
        self.touch();
        Ok(id)
    }

    /// Remove a connection and mark downstream of its source node.
    pub fn disconnect(&mut self, id: ConnectionId) -> Result<()> {
        let pos = self
            .connections
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| PixelGraphError::Graph(format!("unknown connection {id:?}")))?;
        let removed = self.connections.remove(pos);
        self.mark_downstream(removed.output_node);
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.modified_at = Some(Utc::now());
    }

    // ── Topology queries ──

    /// Connections leaving a node's output ports.
    pub fn connections_from(&self, id: NodeId) -> Vec<&Connection> {
        self.connections.iter().filter(|c| c.output_node == id).collect()
    }

    /// Connections entering a node's input ports.
    pub fn connections_to(&self, id: NodeId) -> Vec<&Connection> {
        self.connections.iter().filter(|c| c.input_node == id).collect()
    }

    /// The single connection feeding an input port, if any.
    pub fn input_connection(&self, node: NodeId, port: &str) -> Option<&Connection> {
        self.connections
            .iter()
            .find(|c| c.input_node == node && c.input_port == port)
    }

    /// Distinct nodes directly downstream of a node.
    pub fn downstream_of(&self, id: NodeId) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        self.connections
            .iter()
            .filter(|c| c.output_node == id)
            .map(|c| c.input_node)
            .filter(|n| seen.insert(*n))
            .collect()
    }

    /// Distinct nodes directly upstream of a node.
    pub fn upstream_of(&self, id: NodeId) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        self.connections
            .iter()
            .filter(|c| c.input_node == id)
            .map(|c| c.output_node)
            .filter(|n| seen.insert(*n))
            .collect()
    }

    /// Advisory type check for a prospective connection. Not consulted by
    /// `connect`; exposed for UI layers that want to hint at mismatches.
    pub fn connection_would_be_compatible(
        &self,
        output_node: NodeId,
        output_port: &str,
        input_node: NodeId,
        input_port: &str,
    ) -> bool {
        let out_ty = self
            .node(output_node)
            .and_then(|n| n.output_port(output_port))
            .map(|p| p.data_type)
            .unwrap_or(PortDataType::Any);
        let in_ty = self
            .node(input_node)
            .and_then(|n| n.input_port(input_port))
            .map(|p| p.data_type)
            .unwrap_or(PortDataType::Any);
        PortDataType::are_compatible(out_ty, in_ty)
    }

    // ── Dependency marking ──

    /// Mark a node and everything reachable through its outgoing connections
    /// as needing processing. Iterative DFS with an explicit stack and a
    /// visited set, so cycles terminate and deep graphs cannot overflow the
    /// call stack.
    pub fn mark_downstream(&mut self, start: NodeId) {
        if !self.nodes.contains_key(&start) {
            return;
        }

        let mut visited = HashSet::new();
        let mut stack = vec![start];

        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            if let Some(node) = self.nodes.get_mut(&id) {
                node.mark_dirty();
            }
            for conn in &self.connections {
                if conn.output_node == id && !visited.contains(&conn.input_node) {
                    stack.push(conn.input_node);
                }
            }
        }

        debug!(start = %start, marked = visited.len(), "marked downstream");
    }

    /// Mark downstream starting at a connection's source node. Covers both
    /// "connection added" and "connection removed".
    pub fn mark_for_connection_change(&mut self, output_node: NodeId) {
        self.mark_downstream(output_node);
    }

    /// Mark every node as needing processing.
    pub fn mark_all(&mut self) {
        for node in self.nodes.values_mut() {
            node.mark_dirty();
        }
    }

    /// Clear all processing flags without touching stored outputs.
    pub fn clear_all_flags(&mut self) {
        for node in self.nodes.values_mut() {
            node.to_be_processed = false;
        }
    }

    /// Ids of all nodes currently flagged for processing, sorted.
    pub fn nodes_to_process(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|n| n.to_be_processed)
            .map(|n| n.id)
            .collect();
        ids.sort();
        ids
    }

    // ── Persistence boundary ──

    pub fn to_record(&self) -> GraphRecord {
        let mut nodes: Vec<Node> = self.nodes.values().cloned().collect();
        nodes.sort_by_key(|n| n.id);
        GraphRecord {
            name: self.name.clone(),
            nodes,
            connections: self.connections.clone(),
            viewport: self.viewport.clone(),
            metadata: self.metadata.clone(),
            modified_at: self.modified_at,
        }
    }

    /// Rebuild a graph from a record. Id counters are recomputed; every node
    /// comes back dirty since stored outputs are not persisted.
    pub fn from_record(record: GraphRecord) -> Self {
        let next_node_id = record
            .nodes
            .iter()
            .map(|n| n.id.0.saturating_add(1))
            .max()
            .unwrap_or(0);
        let next_connection_id = record
            .connections
            .iter()
            .map(|c| c.id.0.saturating_add(1))
            .max()
            .unwrap_or(0);
        let mut nodes = HashMap::with_capacity(record.nodes.len());
        for mut node in record.nodes {
            node.mark_dirty();
            nodes.insert(node.id, node);
        }
        Self {
            name: record.name,
            nodes,
            connections: record.connections,
            viewport: record.viewport,
            metadata: record.metadata,
            modified_at: record.modified_at,
            next_node_id,
            next_connection_id,
        }
    }
}
