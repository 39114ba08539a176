use anyhow::Context;
use clap::Parser;
use pixelgraph_rs::config::WorkspaceConfig;
use pixelgraph_rs::graph::{GraphRecord, NodeGraph};
use pixelgraph_rs::processing::{Coordinator, GraphCommand, GraphEvent};
use pixelgraph_rs::scripting::{CompilationCache, ScriptEngine, ScriptRegistry, ScriptWatcher};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Node-graph image processing engine.
#[derive(Parser, Debug)]
#[command(name = "pixelgraph", version, about)]
struct Args {
    /// Workspace configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Keep running and reprocess when script sources change.
    #[arg(long)]
    watch: bool,

    /// Graph record to load and process.
    graph: Option<PathBuf>,
}

fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pixelgraph")
        .join("config.toml")
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,pixelgraph_rs=debug")
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(default_config_path);
    let config = WorkspaceConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    std::fs::create_dir_all(&config.scripts_root)
        .with_context(|| format!("creating {}", config.scripts_root.display()))?;

    let registry = Arc::new(ScriptRegistry::new(&config.scripts_root));
    let summary = registry.scan().context("scanning script root")?;
    info!(
        registered = summary.registered,
        skipped = summary.skipped,
        "script scan complete"
    );

    let cache = Arc::new(CompilationCache::load(config.cache_file()));
    let engine = Arc::new(ScriptEngine::new(config.compiled_dir(), cache));
    let compile = engine.compile_all(&registry);
    for failure in &compile.failures {
        warn!(script = %failure.relative_path, error = %failure.message, "compile failure");
    }
    match engine.cache().prune_orphan_artifacts(&config.compiled_dir()) {
        Ok(0) => {}
        Ok(pruned) => info!(pruned, "pruned orphan artifacts"),
        Err(e) => warn!(error = %e, "artifact pruning failed"),
    }

    let graph = match &args.graph {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let record: GraphRecord =
                serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
            NodeGraph::from_record(record)
        }
        None => NodeGraph::new("untitled"),
    };
    info!(graph = %graph.name, nodes = graph.node_count(), "graph ready");

    let coordinator = Coordinator::new(graph, Arc::clone(&registry), Arc::clone(&engine));
    let handle = coordinator.spawn();
    handle
        .send(GraphCommand::ProcessAll)
        .context("coordinator unavailable")?;

    if !args.watch {
        match handle.events().recv() {
            Ok(GraphEvent::PassCompleted(report)) => {
                info!(
                    executed = report.executed,
                    failed = report.failed,
                    skipped = report.skipped,
                    "initial pass complete"
                );
            }
            Ok(other) => warn!(?other, "unexpected event"),
            Err(e) => error!(error = %e, "coordinator stopped early"),
        }
        return Ok(());
    }

    let watcher = ScriptWatcher::spawn(
        config.scripts_root.clone(),
        config.poll_interval(),
        config.debounce(),
    );
    info!(root = %config.scripts_root.display(), "watching for script changes");

    loop {
        crossbeam_channel::select! {
            recv(watcher.events()) -> event => {
                if event.is_err() {
                    break;
                }
                info!("script sources changed, rescanning");
                if handle.send(GraphCommand::RescanScripts).is_err() {
                    break;
                }
            }
            recv(handle.events()) -> event => {
                match event {
                    Ok(GraphEvent::PassCompleted(report)) => {
                        info!(
                            executed = report.executed,
                            failed = report.failed,
                            skipped = report.skipped,
                            "pass complete"
                        );
                    }
                    Ok(GraphEvent::ScriptsRescanned { registered, failed }) => {
                        info!(registered, failed, "rescan complete");
                    }
                    Ok(GraphEvent::CommandFailed { message }) => {
                        warn!(error = %message, "command failed");
                    }
                    Err(_) => break,
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_cli_parses_graph_and_flags() {
        let args = Args::parse_from(["pixelgraph", "--watch", "scene.json"]);
        assert!(args.watch);
        assert_eq!(args.graph.as_deref(), Some(std::path::Path::new("scene.json")));
        assert!(args.config.is_none());
    }
}
