//! Error handling for netloom
//!
//! The stream engine itself has no error type: a resource that fails closes
//! its stream. This module covers the layers around it (configuration,
//! logging setup and adapter lookup).

use thiserror::Error;

/// Main error type for netloom operations
#[derive(Error, Debug)]
pub enum NetloomError {
    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse errors
    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// JSON serialization errors (graph snapshots)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors installing the tracing subscriber
    #[error("Logging error: {0}")]
    Logging(String),

    /// A transform filter name with no registered preset
    #[error("Unknown transform: {0}")]
    UnknownTransform(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<NetloomError>,
    },
}

impl NetloomError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        NetloomError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Result type alias for netloom operations
pub type Result<T> = std::result::Result<T, NetloomError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<NetloomError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}
