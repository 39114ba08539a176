//! Script compilation and per-node instances.
//!
//! Compilation has two products: an in-memory AST kept in a store keyed by
//! relative path (the loadable unit), and a source snapshot written under
//! `compiled/` (the persisted artifact the cache validates against). A
//! script executes only through a [`ScriptInstance`], created fresh for
//! every use so no interpreter state leaks between nodes.

use crate::error::{PixelGraphError, Result, ResultExt};
use crate::graph::{PortDataType, PortDefinition};
use crate::scripting::{
    cache::{mtime_millis, CompilationCache, ARTIFACT_EXT},
    dynamic_to_json, ParameterDefinition, ScriptDescriptor, ScriptRegistry,
};
use rhai::{Engine, EvalAltResult, Scope, AST};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Build a hardened engine. Limits are generous enough for image work but
/// still bound runaway scripts.
pub(crate) fn build_engine() -> Engine {
    let mut engine = Engine::new();
    engine.set_max_expr_depths(64, 64);
    engine.set_max_call_levels(64);
    engine.set_max_operations(100_000_000);
    engine.set_max_string_size(16 * 1024 * 1024);
    engine.set_max_array_size(64 * 1024 * 1024);
    engine.set_max_map_size(1_048_576);
    engine
}

fn is_function_not_found(err: &EvalAltResult) -> bool {
    matches!(err, EvalAltResult::ErrorFunctionNotFound(_, _))
}

fn str_field(map: &rhai::Map, key: &str) -> Option<String> {
    map.get(key)
        .filter(|v| v.is_string())
        .and_then(|v| v.clone().into_string().ok())
        .filter(|s| !s.trim().is_empty())
}

fn bool_field(map: &rhai::Map, key: &str) -> bool {
    map.get(key).and_then(|v| v.as_bool().ok()).unwrap_or(false)
}

/// Compile `source` in a throwaway unit and read its declared metadata.
///
/// `metadata()`, `input_ports()`, `output_ports()` and `parameters()` are all
/// optional; a missing function contributes defaults. `process()` is the one
/// function a script must define.
pub(crate) fn extract_descriptor(
    engine: &Engine,
    source: &str,
    path: &Path,
    relative_path: &str,
) -> Result<ScriptDescriptor> {
    let ast = engine
        .compile(source)
        .map_err(|e| PixelGraphError::Registry(format!("{relative_path}: {e}")))?;

    if !ast.iter_functions().any(|f| f.name == "process") {
        return Err(PixelGraphError::Registry(format!(
            "{relative_path}: script defines no process() function"
        )));
    }

    let mut scope = Scope::new();
    let meta: rhai::Map = match engine.call_fn(&mut scope, &ast, "metadata", ()) {
        Ok(m) => m,
        Err(e) if is_function_not_found(&e) => rhai::Map::new(),
        Err(e) => {
            return Err(PixelGraphError::Registry(format!(
                "{relative_path}: metadata(): {e}"
            )))
        }
    };

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(relative_path)
        .to_string();

    let mut descriptor = ScriptDescriptor::new(relative_path, path);
    descriptor.name = str_field(&meta, "name").unwrap_or(stem);
    descriptor.author = str_field(&meta, "author").unwrap_or_default();
    descriptor.version = str_field(&meta, "version").unwrap_or_default();
    descriptor.description = str_field(&meta, "description").unwrap_or_default();
    if let Some(category) = str_field(&meta, "category") {
        descriptor.category = category;
    }
    if let Some(color) = str_field(&meta, "color") {
        descriptor.color = color;
    }
    descriptor.inputs = port_list(engine, &ast, relative_path, "input_ports")?;
    descriptor.outputs = port_list(engine, &ast, relative_path, "output_ports")?;
    descriptor.parameters = parameter_list(engine, &ast, relative_path)?;
    Ok(descriptor)
}

fn port_list(
    engine: &Engine,
    ast: &AST,
    relative_path: &str,
    function: &str,
) -> Result<Vec<PortDefinition>> {
    let mut scope = Scope::new();
    let items: rhai::Array = match engine.call_fn(&mut scope, ast, function, ()) {
        Ok(items) => items,
        Err(e) if is_function_not_found(&e) => return Ok(Vec::new()),
        Err(e) => {
            return Err(PixelGraphError::Registry(format!(
                "{relative_path}: {function}(): {e}"
            )))
        }
    };

    let mut ports = Vec::new();
    for item in &items {
        let Some(map) = item.clone().try_cast::<rhai::Map>() else {
            continue;
        };
        let Some(name) = str_field(&map, "name") else {
            continue;
        };
        ports.push(PortDefinition {
            name,
            data_type: str_field(&map, "type")
                .as_deref()
                .map(PortDataType::parse)
                .unwrap_or(PortDataType::Any),
            flexible: bool_field(&map, "flexible"),
            description: str_field(&map, "description").unwrap_or_default(),
        });
    }
    Ok(ports)
}

fn parameter_list(
    engine: &Engine,
    ast: &AST,
    relative_path: &str,
) -> Result<Vec<ParameterDefinition>> {
    let mut scope = Scope::new();
    let items: rhai::Array = match engine.call_fn(&mut scope, ast, "parameters", ()) {
        Ok(items) => items,
        Err(e) if is_function_not_found(&e) => return Ok(Vec::new()),
        Err(e) => {
            return Err(PixelGraphError::Registry(format!(
                "{relative_path}: parameters(): {e}"
            )))
        }
    };

    let mut parameters = Vec::new();
    for item in &items {
        let Some(map) = item.clone().try_cast::<rhai::Map>() else {
            continue;
        };
        let Some(name) = str_field(&map, "name") else {
            continue;
        };
        parameters.push(ParameterDefinition {
            display_name: str_field(&map, "display_name").unwrap_or_else(|| name.clone()),
            description: str_field(&map, "description").unwrap_or_default(),
            default: map
                .get("default")
                .map(dynamic_to_json)
                .unwrap_or(serde_json::Value::Null),
            name,
        });
    }
    Ok(parameters)
}

/// One compile failure, attributed to its script.
#[derive(Clone, Debug)]
pub struct CompileDiagnostics {
    pub relative_path: String,
    pub message: String,
}

/// Aggregate outcome of a [`ScriptEngine::compile_all`] run.
#[derive(Debug, Default)]
pub struct CompileSummary {
    pub compiled: usize,
    pub up_to_date: usize,
    pub failures: Vec<CompileDiagnostics>,
}

/// Compiles scripts and hands out per-node execution instances.
pub struct ScriptEngine {
    engine: Arc<Engine>,
    compiled_dir: PathBuf,
    cache: Arc<CompilationCache>,
    asts: RwLock<HashMap<String, AST>>,
    /// Per-script locks held across the stale-check + compile sequence, so
    /// concurrent instantiation of the same script compiles it once.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ScriptEngine {
    pub fn new(compiled_dir: impl Into<PathBuf>, cache: Arc<CompilationCache>) -> Self {
        Self {
            engine: Arc::new(build_engine()),
            compiled_dir: compiled_dir.into(),
            cache,
            asts: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn script_lock(&self, relative_path: &str) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|e| PixelGraphError::Script(format!("script lock table poisoned: {e}")))?;
        Ok(Arc::clone(locks.entry(relative_path.to_string()).or_default()))
    }

    pub fn compiled_dir(&self) -> &Path {
        &self.compiled_dir
    }

    pub fn cache(&self) -> &CompilationCache {
        &self.cache
    }

    /// Name of the persisted artifact for a script. Flattened so every
    /// artifact lands directly in the compiled directory.
    pub fn artifact_file_name(relative_path: &str) -> String {
        format!("{}.{}", relative_path.replace(['/', '\\'], "_"), ARTIFACT_EXT)
    }

    /// Whether a script must be (re)compiled before use. Symbol nodes never
    /// need compilation.
    pub fn needs_recompilation(&self, descriptor: &ScriptDescriptor) -> bool {
        if descriptor.is_symbol_node {
            return false;
        }
        self.cache.needs_recompilation(
            &descriptor.relative_path,
            &descriptor.absolute_path,
            &self.compiled_dir,
        )
    }

    /// Compile a script: parse the source, persist the artifact, store the
    /// AST and record the cache entry.
    pub fn compile(&self, descriptor: &ScriptDescriptor) -> Result<PathBuf> {
        let lock = self.script_lock(&descriptor.relative_path)?;
        let _guard = lock
            .lock()
            .map_err(|e| PixelGraphError::Script(format!("script lock poisoned: {e}")))?;
        self.compile_locked(descriptor)
    }

    fn compile_locked(&self, descriptor: &ScriptDescriptor) -> Result<PathBuf> {
        let relative = &descriptor.relative_path;
        let source = std::fs::read_to_string(&descriptor.absolute_path)
            .map_err(|e| PixelGraphError::Io(e).with_context(format!("reading {relative}")))?;
        let ast = self
            .engine
            .compile(&source)
            .map_err(|e| PixelGraphError::Script(format!("{relative}: {e}")))?;

        std::fs::create_dir_all(&self.compiled_dir)?;
        let artifact_name = Self::artifact_file_name(relative);
        let artifact_path = self.compiled_dir.join(&artifact_name);
        std::fs::write(&artifact_path, &source).map_err(|e| {
            PixelGraphError::Io(e).with_context(format!("writing artifact for {relative}"))
        })?;

        let mtime = mtime_millis(&descriptor.absolute_path)?;
        self.cache.record(relative, &artifact_name, mtime)?;

        let mut asts = self
            .asts
            .write()
            .map_err(|e| PixelGraphError::Script(format!("ast store lock poisoned: {e}")))?;
        asts.insert(relative.clone(), ast);

        debug!(script = %relative, artifact = %artifact_name, "compiled script");
        Ok(artifact_path)
    }

    /// Make sure a usable AST exists for the script, compiling if the cache
    /// entry is stale or the AST was never loaded this run. The script's
    /// lock covers both the stale check and the compile, so two threads
    /// racing on the same stale script serialize and compile it once.
    fn ensure_compiled(&self, descriptor: &ScriptDescriptor) -> Result<()> {
        if descriptor.is_symbol_node {
            return Ok(());
        }
        let lock = self.script_lock(&descriptor.relative_path)?;
        let _guard = lock
            .lock()
            .map_err(|e| PixelGraphError::Script(format!("script lock poisoned: {e}")))?;
        if !self.needs_recompilation(descriptor) {
            let loaded = self
                .asts
                .read()
                .map_err(|e| PixelGraphError::Script(format!("ast store lock poisoned: {e}")))?
                .contains_key(&descriptor.relative_path);
            if loaded {
                return Ok(());
            }
        }
        self.compile_locked(descriptor)?;
        Ok(())
    }

    /// Create a fresh execution instance for a script, compiling first if
    /// needed. Symbol nodes have no executable body and yield `None`.
    pub fn instantiate(&self, descriptor: &ScriptDescriptor) -> Result<Option<ScriptInstance>> {
        if descriptor.is_symbol_node {
            return Ok(None);
        }
        self.ensure_compiled(descriptor)?;
        let ast = {
            let asts = self
                .asts
                .read()
                .map_err(|e| PixelGraphError::Script(format!("ast store lock poisoned: {e}")))?;
            asts.get(&descriptor.relative_path).cloned()
        };
        let Some(ast) = ast else {
            return Err(PixelGraphError::Script(format!(
                "{}: compiled unit missing after compile",
                descriptor.relative_path
            )));
        };
        Ok(Some(ScriptInstance {
            engine: Arc::clone(&self.engine),
            ast,
            scope: Scope::new(),
            relative_path: descriptor.relative_path.clone(),
        }))
    }

    /// Compile every stale script in the registry with bounded parallelism.
    /// Failures are collected, never raised, so one broken script cannot
    /// block the rest of the set.
    pub fn compile_all(&self, registry: &ScriptRegistry) -> CompileSummary {
        enum Outcome {
            Compiled(String, PathBuf),
            UpToDate(String, PathBuf),
            Failed(CompileDiagnostics),
        }

        let descriptors: Vec<ScriptDescriptor> = registry
            .all()
            .into_iter()
            .filter(|d| !d.is_symbol_node)
            .collect();
        if descriptors.is_empty() {
            return CompileSummary::default();
        }

        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(descriptors.len());
        let chunk_size = descriptors.len().div_ceil(workers);
        let (tx, rx) = crossbeam_channel::unbounded();

        std::thread::scope(|scope| {
            for chunk in descriptors.chunks(chunk_size.max(1)) {
                let tx = tx.clone();
                scope.spawn(move || {
                    for descriptor in chunk {
                        let outcome = if !self.needs_recompilation(descriptor) {
                            let artifact = self
                                .compiled_dir
                                .join(Self::artifact_file_name(&descriptor.relative_path));
                            Outcome::UpToDate(descriptor.relative_path.clone(), artifact)
                        } else {
                            match self.compile(descriptor) {
                                Ok(path) => {
                                    Outcome::Compiled(descriptor.relative_path.clone(), path)
                                }
                                Err(e) => Outcome::Failed(CompileDiagnostics {
                                    relative_path: descriptor.relative_path.clone(),
                                    message: e.to_string(),
                                }),
                            }
                        };
                        if tx.send(outcome).is_err() {
                            return;
                        }
                    }
                });
            }
        });
        drop(tx);

        let mut summary = CompileSummary::default();
        for outcome in rx {
            match outcome {
                Outcome::Compiled(relative, path) => {
                    registry.mark_compiled(&relative, path);
                    summary.compiled += 1;
                }
                Outcome::UpToDate(relative, path) => {
                    registry.mark_compiled(&relative, path);
                    summary.up_to_date += 1;
                }
                Outcome::Failed(diag) => {
                    warn!(script = %diag.relative_path, error = %diag.message, "script failed to compile");
                    registry.mark_not_compiled(&diag.relative_path);
                    summary.failures.push(diag);
                }
            }
        }
        info!(
            compiled = summary.compiled,
            up_to_date = summary.up_to_date,
            failed = summary.failures.len(),
            "compile pass finished"
        );
        summary
    }
}

impl std::fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("compiled_dir", &self.compiled_dir)
            .finish_non_exhaustive()
    }
}

/// A single node's live execution unit. Each instance owns its scope, so
/// two nodes running the same script never observe each other's state.
pub struct ScriptInstance {
    engine: Arc<Engine>,
    ast: AST,
    scope: Scope<'static>,
    relative_path: String,
}

impl ScriptInstance {
    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    /// Run the script's `process(inputs, params)` function.
    pub fn process(&mut self, inputs: rhai::Map, params: rhai::Map) -> Result<rhai::Map> {
        self.engine
            .call_fn::<rhai::Map>(&mut self.scope, &self.ast, "process", (inputs, params))
            .with_context(|| format!("{}: process()", self.relative_path))
    }

    /// Ask the script to serialize extra state. Scripts without a
    /// `serialize_state()` function yield `None`.
    pub fn save_state(&mut self) -> Result<Option<rhai::Map>> {
        match self
            .engine
            .call_fn::<rhai::Map>(&mut self.scope, &self.ast, "serialize_state", ())
        {
            Ok(state) => Ok(Some(state)),
            Err(e) if is_function_not_found(&e) => Ok(None),
            Err(e) => Err(PixelGraphError::from_rhai_error(e)
                .with_context(format!("{}: serialize_state()", self.relative_path))),
        }
    }

    /// Hand previously serialized state back to the script. Missing
    /// `restore_state()` is tolerated.
    pub fn restore_state(&mut self, state: rhai::Map) -> Result<()> {
        match self
            .engine
            .call_fn::<()>(&mut self.scope, &self.ast, "restore_state", (state,))
        {
            Ok(()) => Ok(()),
            Err(e) if is_function_not_found(&e) => Ok(()),
            Err(e) => Err(PixelGraphError::from_rhai_error(e)
                .with_context(format!("{}: restore_state()", self.relative_path))),
        }
    }
}
