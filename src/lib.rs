//! PixelGraph: a node-graph image processing engine.
//!
//! The crate has two halves. [`scripting`] turns a directory of Rhai
//! scripts into a registry of node descriptors, compiles them behind a
//! persistent mtime-keyed cache and hands out isolated per-node execution
//! instances. [`processing`] owns the live [`graph::NodeGraph`] and keeps it
//! consistent incrementally: edits mark their downstream cone dirty, and a
//! coordinator folds bursts of edits into layered execution passes that
//! re-run only what changed.
//!
//! ```no_run
//! use pixelgraph_rs::config::WorkspaceConfig;
//! use pixelgraph_rs::graph::NodeGraph;
//! use pixelgraph_rs::processing::{Coordinator, GraphCommand};
//! use pixelgraph_rs::scripting::{CompilationCache, ScriptEngine, ScriptRegistry};
//! use std::sync::Arc;
//!
//! # fn main() -> pixelgraph_rs::error::Result<()> {
//! let config = WorkspaceConfig::default();
//! let registry = Arc::new(ScriptRegistry::new(&config.scripts_root));
//! registry.scan()?;
//!
//! let cache = Arc::new(CompilationCache::load(config.cache_file()));
//! let engine = Arc::new(ScriptEngine::new(config.compiled_dir(), cache));
//! engine.compile_all(&registry);
//!
//! let coordinator = Coordinator::new(NodeGraph::new("untitled"), registry, engine);
//! let handle = coordinator.spawn();
//! handle.commands().send(GraphCommand::ProcessAll).ok();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod processing;
pub mod scripting;

pub use error::{PixelGraphError, Result};
