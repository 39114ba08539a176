//! Node entity.
//!
//! A node is one instantiated script in the graph: it owns its ports,
//! parameter values, last-computed outputs, layout position and processing
//! flags. The script itself is shared read-only through the registry; the
//! node only stores the relative path that identifies it.

use crate::graph::id::NodeId;
use crate::graph::port::{PortDataType, PortDefinition};
use rhai::Dynamic;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Base height of a node in layout units.
pub const NODE_BASE_HEIGHT: f64 = 85.0;
/// Additional height per port row.
pub const PORT_ROW_HEIGHT: f64 = 24.0;
/// Default node width.
pub const NODE_WIDTH: f64 = 120.0;

/// One node in the graph.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub title: String,
    /// Relative path of the script this node executes, keyed into the
    /// script registry.
    pub script_path: String,
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
    /// Parameter values keyed by name, serialized with the graph.
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    /// Dirty flag: the node must re-execute before its outputs can be
    /// trusted. New nodes start dirty.
    #[serde(default = "default_true")]
    pub to_be_processed: bool,
    #[serde(default)]
    pub is_processed: bool,
    #[serde(default)]
    pub has_error: bool,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Last-computed output values keyed by output port name. Not
    /// serialized; a loaded graph starts with everything dirty.
    #[serde(skip)]
    pub processed_outputs: HashMap<String, Dynamic>,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

fn default_true() -> bool {
    true
}

impl Node {
    pub fn new(id: NodeId, title: impl Into<String>, script_path: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            script_path: script_path.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            parameters: HashMap::new(),
            to_be_processed: true,
            is_processed: false,
            has_error: false,
            error_message: None,
            processed_outputs: HashMap::new(),
            x: 0.0,
            y: 0.0,
            width: NODE_WIDTH,
            height: NODE_BASE_HEIGHT,
        }
    }

    /// Set the port lists from a script descriptor and recompute the height.
    pub fn set_ports(&mut self, inputs: Vec<PortDefinition>, outputs: Vec<PortDefinition>) {
        self.inputs = inputs;
        self.outputs = outputs;
        self.update_height();
    }

    /// Recompute the node footprint from its port count. The height grows by
    /// one row per port on the longer side.
    pub fn update_height(&mut self) {
        let rows = self.inputs.len().max(self.outputs.len());
        self.height = NODE_BASE_HEIGHT + PORT_ROW_HEIGHT * rows as f64;
    }

    pub fn input_port(&self, name: &str) -> Option<&PortDefinition> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn output_port(&self, name: &str) -> Option<&PortDefinition> {
        self.outputs.iter().find(|p| p.name == name)
    }

    /// Append a runtime-added input port next to a flexible base port.
    ///
    /// Returns the new port name, or `None` if `base_name` does not refer to
    /// a flexible input port.
    pub fn add_flexible_input(&mut self, base_name: &str) -> Option<String> {
        let base = self.inputs.iter().find(|p| p.name == base_name && p.flexible)?;
        let data_type = base.data_type;
        let description = base.description.clone();
        let mut index = 1;
        let name = loop {
            let candidate = format!("{}_{}", base_name, index);
            if self.input_port(&candidate).is_none() {
                break candidate;
            }
            index += 1;
        };
        self.inputs.push(PortDefinition {
            name: name.clone(),
            data_type,
            flexible: false,
            description,
        });
        self.update_height();
        Some(name)
    }

    /// Record a successful execution: store outputs and clear the flags.
    pub fn record_success(&mut self, outputs: HashMap<String, Dynamic>) {
        self.processed_outputs = outputs;
        self.is_processed = true;
        self.to_be_processed = false;
        self.has_error = false;
        self.error_message = None;
    }

    /// Record a failed execution: clear outputs so downstream nodes see the
    /// degraded state instead of stale values.
    pub fn record_failure(&mut self, message: impl Into<String>) {
        self.processed_outputs.clear();
        self.is_processed = false;
        self.to_be_processed = false;
        self.has_error = true;
        self.error_message = Some(message.into());
    }

    /// Mark this node as needing re-execution.
    pub fn mark_dirty(&mut self) {
        self.to_be_processed = true;
        self.is_processed = false;
    }

    /// Data type of the given input port, universal if the port is unknown.
    pub fn input_type(&self, name: &str) -> PortDataType {
        self.input_port(name)
            .map(|p| p.data_type)
            .unwrap_or(PortDataType::Any)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_node() -> Node {
        Node::new(NodeId(1), "Blur", "filters/blur.rhai")
    }

    #[test]
    fn test_new_node_starts_dirty() {
        let node = test_node();
        assert!(node.to_be_processed);
        assert!(!node.is_processed);
        assert!(!node.has_error);
    }

    #[test]
    fn test_height_from_port_count() {
        let mut node = test_node();
        node.set_ports(
            vec![
                PortDefinition::new("image", PortDataType::F32Bmp),
                PortDefinition::new("mask", PortDataType::Mask),
            ],
            vec![PortDefinition::new("result", PortDataType::F32Bmp)],
        );
        assert_eq!(node.height, NODE_BASE_HEIGHT + 2.0 * PORT_ROW_HEIGHT);
    }

    #[test]
    fn test_flexible_input_numbering() {
        let mut node = test_node();
        node.set_ports(
            vec![PortDefinition::new("layer", PortDataType::F32Bmp).flexible()],
            vec![],
        );

        assert_eq!(node.add_flexible_input("layer").as_deref(), Some("layer_1"));
        assert_eq!(node.add_flexible_input("layer").as_deref(), Some("layer_2"));
        assert_eq!(node.inputs.len(), 3);
        assert_eq!(node.input_type("layer_2"), PortDataType::F32Bmp);
    }

    #[test]
    fn test_flexible_input_rejects_fixed_port() {
        let mut node = test_node();
        node.set_ports(vec![PortDefinition::new("image", PortDataType::F32Bmp)], vec![]);
        assert!(node.add_flexible_input("image").is_none());
        assert!(node.add_flexible_input("missing").is_none());
    }

    #[test]
    fn test_record_failure_clears_outputs() {
        let mut node = test_node();
        let mut outputs = HashMap::new();
        outputs.insert("result".to_string(), Dynamic::from(1.0_f64));
        node.record_success(outputs);
        assert!(node.is_processed);
        assert!(!node.to_be_processed);

        node.record_failure("process() threw");
        assert!(node.has_error);
        assert!(node.processed_outputs.is_empty());
        assert_eq!(node.error_message.as_deref(), Some("process() threw"));
    }

    #[test]
    fn test_unknown_input_type_is_universal() {
        let node = test_node();
        assert_eq!(node.input_type("nope"), PortDataType::Any);
    }
}
