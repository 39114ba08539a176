//! Reprocessing coordinator.
//!
//! Owns the live graph and serializes all edits and passes onto one thread.
//! Commands arrive over a channel; a burst of edits is drained before the
//! pass starts, so rapid parameter scrubbing coalesces into a single pass
//! plus at most one immediately-following pass for whatever arrived while
//! the first was running. At most one pass is ever in flight.

use crate::error::{PixelGraphError, Result};
use crate::graph::{GraphRecord, NodeGraph, NodeId};
use crate::processing::pass::{run_pass, PassReport, PassScope};
use crate::scripting::{ScriptEngine, ScriptRegistry};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// Edits and requests accepted by the coordinator.
#[derive(Clone, Debug)]
pub enum GraphCommand {
    /// Set one parameter value on a node and reprocess downstream.
    SetParameter {
        node: NodeId,
        name: String,
        value: serde_json::Value,
    },
    /// Add a node for a registered script at the given position.
    AddNode { script: String, x: f64, y: f64 },
    RemoveNode {
        node: NodeId,
    },
    Connect {
        output_node: NodeId,
        output_port: String,
        input_node: NodeId,
        input_port: String,
    },
    Disconnect {
        connection: crate::graph::ConnectionId,
    },
    /// Replace the live graph with a loaded record.
    LoadGraph(Box<GraphRecord>),
    /// Re-execute everything regardless of flags.
    ProcessAll,
    /// Execute the currently flagged set.
    ProcessChanged,
    /// Script sources changed on disk: rescan, recompile, reprocess.
    RescanScripts,
    Shutdown,
}

/// Notifications emitted by the coordinator.
#[derive(Clone, Debug)]
pub enum GraphEvent {
    PassCompleted(PassReport),
    CommandFailed { message: String },
    ScriptsRescanned { registered: usize, failed: usize },
}

/// Where the coordinator is in its cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CoordinatorState {
    #[default]
    Idle,
    Running,
    /// A pass finished while more work was already queued; one follow-up
    /// pass covers it.
    RunningWithPending,
}

/// Single-threaded owner of the graph and its processing schedule.
pub struct Coordinator {
    graph: NodeGraph,
    registry: Arc<ScriptRegistry>,
    engine: Arc<ScriptEngine>,
    commands: Receiver<GraphCommand>,
    command_tx: Sender<GraphCommand>,
    events: Sender<GraphEvent>,
    event_rx: Receiver<GraphEvent>,
    state: CoordinatorState,
    pending_scope: Option<PassScope>,
}

impl Coordinator {
    pub fn new(graph: NodeGraph, registry: Arc<ScriptRegistry>, engine: Arc<ScriptEngine>) -> Self {
        let (command_tx, commands) = unbounded();
        let (events, event_rx) = unbounded();
        Self {
            graph,
            registry,
            engine,
            commands,
            command_tx,
            events,
            event_rx,
            state: CoordinatorState::Idle,
            pending_scope: None,
        }
    }

    pub fn command_sender(&self) -> Sender<GraphCommand> {
        self.command_tx.clone()
    }

    pub fn event_receiver(&self) -> Receiver<GraphEvent> {
        self.event_rx.clone()
    }

    pub fn graph(&self) -> &NodeGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut NodeGraph {
        &mut self.graph
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// Merge a pass request into the schedule. A full request subsumes a
    /// changed-only one.
    fn schedule(&mut self, scope: PassScope) {
        self.pending_scope = match (self.pending_scope, scope) {
            (Some(PassScope::Full), _) | (_, PassScope::Full) => Some(PassScope::Full),
            _ => Some(PassScope::Changed),
        };
    }

    fn emit(&self, event: GraphEvent) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }

    fn fail_command(&self, message: String) {
        warn!(error = %message, "command rejected");
        self.emit(GraphEvent::CommandFailed { message });
    }

    /// Apply one command. Returns `false` on shutdown.
    fn apply(&mut self, command: GraphCommand) -> bool {
        match command {
            GraphCommand::SetParameter { node, name, value } => {
                match self.graph.node_mut(node) {
                    Some(n) => {
                        n.parameters.insert(name, value);
                        self.graph.mark_downstream(node);
                        self.schedule(PassScope::Changed);
                    }
                    None => self.fail_command(format!("unknown node {node}")),
                }
            }
            GraphCommand::AddNode { script, x, y } => match self.registry.get(&script) {
                Some(descriptor) => {
                    let id = self.graph.add_node(descriptor.name.clone(), &script);
                    let mut node = descriptor.create_node(id);
                    node.x = x;
                    node.y = y;
                    self.graph.insert_node(node);
                    self.schedule(PassScope::Changed);
                }
                None => self.fail_command(format!("script not registered: {script}")),
            },
            GraphCommand::RemoveNode { node } => match self.graph.remove_node(node) {
                Ok(()) => self.schedule(PassScope::Changed),
                Err(e) => self.fail_command(e.to_string()),
            },
            GraphCommand::Connect {
                output_node,
                output_port,
                input_node,
                input_port,
            } => match self
                .graph
                .connect(output_node, output_port, input_node, input_port)
            {
                Ok(_) => self.schedule(PassScope::Changed),
                Err(e) => self.fail_command(e.to_string()),
            },
            GraphCommand::Disconnect { connection } => match self.graph.disconnect(connection) {
                Ok(()) => self.schedule(PassScope::Changed),
                Err(e) => self.fail_command(e.to_string()),
            },
            GraphCommand::LoadGraph(record) => {
                self.graph = NodeGraph::from_record(*record);
                info!(graph = %self.graph.name, nodes = self.graph.node_count(), "graph loaded");
                self.schedule(PassScope::Changed);
            }
            GraphCommand::ProcessAll => self.schedule(PassScope::Full),
            GraphCommand::ProcessChanged => self.schedule(PassScope::Changed),
            GraphCommand::RescanScripts => {
                match self.registry.scan() {
                    Ok(summary) => {
                        let compile = self.engine.compile_all(&self.registry);
                        self.emit(GraphEvent::ScriptsRescanned {
                            registered: summary.registered,
                            failed: compile.failures.len(),
                        });
                        // Changed scripts invalidate every computed output.
                        self.graph.mark_all();
                        self.schedule(PassScope::Changed);
                    }
                    Err(e) => self.fail_command(e.to_string()),
                }
            }
            GraphCommand::Shutdown => return false,
        }
        true
    }

    fn run_scheduled_pass(&mut self) {
        let Some(scope) = self.pending_scope.take() else {
            return;
        };
        self.state = CoordinatorState::Running;
        let report = run_pass(&mut self.graph, &self.registry, &self.engine, scope);
        // Work that arrived during the pass is already queued; the state
        // stays observable as pending until that work is drained.
        self.state = if self.commands.is_empty() {
            CoordinatorState::Idle
        } else {
            CoordinatorState::RunningWithPending
        };
        self.emit(GraphEvent::PassCompleted(report));
    }

    /// Drain all queued commands and run at most one pass. Synchronous
    /// variant of the loop for embedders that drive processing themselves.
    /// Returns `false` once shutdown has been requested.
    pub fn pump(&mut self) -> bool {
        while let Ok(command) = self.commands.try_recv() {
            if !self.apply(command) {
                return false;
            }
        }
        self.run_scheduled_pass();
        if self.pending_scope.is_none() && self.commands.is_empty() {
            self.state = CoordinatorState::Idle;
        }
        true
    }

    /// Blocking command loop. Each burst of commands is folded into one
    /// pass; work that arrives during a pass is picked up right after it.
    pub fn run(mut self) {
        loop {
            let Ok(command) = self.commands.recv() else {
                return;
            };
            if !self.apply(command) {
                return;
            }
            loop {
                while let Ok(command) = self.commands.try_recv() {
                    if !self.apply(command) {
                        return;
                    }
                }
                if self.pending_scope.is_none() {
                    self.state = CoordinatorState::Idle;
                    break;
                }
                self.run_scheduled_pass();
            }
        }
    }

    /// Move the coordinator onto its own thread.
    pub fn spawn(self) -> CoordinatorHandle {
        let commands = self.command_sender();
        let events = self.event_receiver();
        let thread = std::thread::Builder::new()
            .name("graph-coordinator".to_string())
            .spawn(move || self.run())
            .ok();
        CoordinatorHandle {
            commands,
            events,
            thread,
        }
    }
}

/// Owning handle to a spawned coordinator. Dropping it shuts the thread
/// down.
pub struct CoordinatorHandle {
    commands: Sender<GraphCommand>,
    events: Receiver<GraphEvent>,
    thread: Option<JoinHandle<()>>,
}

impl CoordinatorHandle {
    pub fn commands(&self) -> &Sender<GraphCommand> {
        &self.commands
    }

    pub fn events(&self) -> &Receiver<GraphEvent> {
        &self.events
    }

    /// Send a command, mapping a closed channel (the coordinator thread has
    /// exited) to a crate error.
    pub fn send(&self, command: GraphCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|e| PixelGraphError::Channel(e.to_string()))
    }
}

impl Drop for CoordinatorHandle {
    fn drop(&mut self) {
        let _ = self.commands.send(GraphCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
