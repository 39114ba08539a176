//! Incremental reprocessing engine.
//!
//! ```text
//!   commands ──► Coordinator ──► dirty set ──► upstream closure
//!                                                  │
//!                    events ◄── PassReport ◄── layered execution
//! ```
//!
//! # Design
//!
//! - Edits mark downstream nodes; a pass executes the marked set plus the
//!   upstream closure it needs for inputs, layer by layer.
//! - One pass at a time. Queued edits fold into the next pass, so a burst
//!   costs one pass plus at most one follow-up.
//! - A failing node never aborts a pass; its error is recorded and the rest
//!   of the layer plan still runs.

mod coordinator;
mod layering;
mod pass;

pub use coordinator::{
    Coordinator, CoordinatorHandle, CoordinatorState, GraphCommand, GraphEvent,
};
pub use layering::{apply_auto_layout, build_layers, collect_upstream, LayeredOrder};
pub use pass::{run_pass, NodeOutcome, NodeStatus, PassReport, PassScope};
