//! Symbol-node descriptor parsing.
//!
//! Symbol nodes are a declarative source kind: a `.sn` file carries the port
//! layout and display metadata in TOML, with no executable code. Their
//! descriptors are parsed directly and marked pre-compiled.
//!
//! ```toml
//! name = "Splitter"
//! category = "Routing"
//! color = "#AA5500"
//!
//! [[input]]
//! name = "value"
//! data_type = "any"
//!
//! [[output]]
//! name = "value"
//! data_type = "any"
//! ```

use crate::error::{PixelGraphError, Result};
use crate::graph::{PortDataType, PortDefinition};
use crate::scripting::ScriptDescriptor;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct SymbolNodeFile {
    name: Option<String>,
    #[serde(default)]
    description: String,
    category: Option<String>,
    color: Option<String>,
    #[serde(default)]
    input: Vec<SymbolPort>,
    #[serde(default)]
    output: Vec<SymbolPort>,
}

#[derive(Debug, Deserialize)]
struct SymbolPort {
    name: String,
    data_type: Option<String>,
    #[serde(default)]
    flexible: bool,
    #[serde(default)]
    description: String,
}

impl SymbolPort {
    fn to_definition(&self) -> PortDefinition {
        PortDefinition {
            name: self.name.clone(),
            data_type: self
                .data_type
                .as_deref()
                .map(PortDataType::parse)
                .unwrap_or(PortDataType::Any),
            flexible: self.flexible,
            description: self.description.clone(),
        }
    }
}

/// Parse a symbol-node file into a descriptor. The descriptor comes back
/// marked compiled since there is nothing to compile.
pub fn parse_symbol_node(
    path: &Path,
    relative_path: &str,
) -> Result<ScriptDescriptor> {
    let contents = std::fs::read_to_string(path)?;
    let file: SymbolNodeFile = toml::from_str(&contents)
        .map_err(|e| PixelGraphError::Registry(format!("invalid symbol node {relative_path}: {e}")))?;

    let fallback_name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("symbol")
        .to_string();

    let mut descriptor = ScriptDescriptor::new(relative_path, path);
    descriptor.name = file.name.unwrap_or(fallback_name);
    descriptor.description = file.description;
    descriptor.category = file.category.unwrap_or_else(|| "Symbol".to_string());
    descriptor.color = file.color.unwrap_or_else(|| "#FF0000".to_string());
    descriptor.inputs = file
        .input
        .iter()
        .filter(|p| !p.name.trim().is_empty())
        .map(SymbolPort::to_definition)
        .collect();
    descriptor.outputs = file
        .output
        .iter()
        .filter(|p| !p.name.trim().is_empty())
        .map(SymbolPort::to_definition)
        .collect();
    descriptor.is_symbol_node = true;
    descriptor.compiled = true;
    Ok(descriptor)
}
