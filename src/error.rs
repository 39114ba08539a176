//! Error handling for the PixelGraph engine
//!
//! This module defines custom error types and a Result alias for use
//! throughout the crate.

use thiserror::Error;

/// Main error type for PixelGraph operations
#[derive(Error, Debug)]
pub enum PixelGraphError {
    /// Errors related to script compilation or execution
    #[error("Script error: {0}")]
    Script(String),

    /// Errors related to the script registry
    #[error("Registry error: {0}")]
    Registry(String),

    /// Errors related to the compilation cache
    #[error("Cache error: {0}")]
    Cache(String),

    /// Errors related to graph structure
    #[error("Graph error: {0}")]
    Graph(String),

    /// Errors related to a specific node
    #[error("Node {node_id} error: {message}")]
    Node { node_id: u32, message: String },

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to channel communication
    #[error("Channel error: {0}")]
    Channel(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<PixelGraphError>,
    },
}

impl PixelGraphError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        PixelGraphError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a script error from a Rhai error
    pub fn from_rhai_error(err: Box<rhai::EvalAltResult>) -> Self {
        PixelGraphError::Script(err.to_string())
    }
}

impl From<serde_json::Error> for PixelGraphError {
    fn from(err: serde_json::Error) -> Self {
        PixelGraphError::Serialization(err.to_string())
    }
}

/// Result type alias for PixelGraph operations
pub type Result<T> = std::result::Result<T, PixelGraphError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, Box<rhai::EvalAltResult>> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| PixelGraphError::from_rhai_error(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| PixelGraphError::from_rhai_error(e).with_context(f()))
    }
}
