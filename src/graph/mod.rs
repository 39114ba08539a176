//! Graph model: nodes, ports, connections and dependency marking.
//!
//! ```text
//!   edits (parameters, wiring, deletion)
//!          │
//!          ▼
//!   ┌────────────┐   mark_downstream   ┌──────────────────┐
//!   │ NodeGraph  │ ──────────────────► │ to_be_processed  │
//!   │  nodes     │                     │ flags per node   │
//!   │  conns     │                     └──────────────────┘
//!   └────────────┘
//! ```
//!
//! # Design
//!
//! - IDs are `u32` newtypes handed out by per-graph counters.
//! - Connections are permissive: the model never rejects a wiring on type
//!   grounds. Compatibility is an advisory query for UI layers.
//! - Marking is an iterative DFS with a visited set, so cyclic graphs
//!   terminate.

mod id;
mod model;
mod node;
mod port;

pub use id::{ConnectionId, NodeId};
pub use model::{Connection, GraphRecord, NodeGraph, ViewportState};
pub use node::{Node, NODE_BASE_HEIGHT, NODE_WIDTH, PORT_ROW_HEIGHT};
pub use port::{PortCategory, PortDataType, PortDefinition, PortTypeInfo};
