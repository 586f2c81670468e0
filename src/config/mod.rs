//! Configuration module for netloom
//!
//! Settings are read from a TOML file with three tables:
//! - `[engine]` - traversal strategy and topology logging for the stream engine
//! - `[log]` - tracing filter, optional log file and ANSI colouring
//! - `[relay]` - transform chain and buffer sizes for the demo relay
//!
//! Every key is optional; missing keys take their defaults.
//!
//! # Config Location
//!
//! Without an explicit path the config is looked up in the platform config
//! directory under `netloom/netloom.toml`:
//! - **Linux**: `~/.config/netloom/`
//! - **macOS**: `~/Library/Application Support/netloom/`
//! - **Windows**: `%APPDATA%\netloom\`
//!
//! # Example
//!
//! ```toml
//! [engine]
//! traversal = "worklist"
//! log_topology = true
//!
//! [log]
//! filter = "info,netloom=debug"
//!
//! [relay]
//! filters = ["upper"]
//! chunk_size = 1024
//! ```

use crate::error::{NetloomError, Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "netloom";

/// Config filename
pub const CONFIG_FILE: &str = "netloom.toml";

/// Default tracing filter directive
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default read size for the relay, in bytes
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Default bound of the relay's output channel, in chunks
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Get the default config file path
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID).join(CONFIG_FILE))
}

// ==================== Engine ====================

/// How a graph walks its expanded view when pulling data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraversalMode {
    /// Depth-first recursion from each root.
    #[default]
    Recursive,
    /// Explicit stack, for graphs deep enough to strain the call stack.
    Worklist,
}

/// Stream engine settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Traversal strategy used by graph reads
    pub traversal: TraversalMode,

    /// Dump each graph's topology at debug level after it is re-expanded
    pub log_topology: bool,
}

// ==================== Logging ====================

/// Tracing subscriber settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence when set
    pub filter: String,

    /// Also write logs to this file
    pub file: Option<PathBuf>,

    /// Colour terminal output
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            file: None,
            ansi: true,
        }
    }
}

// ==================== Relay ====================

/// Settings for the stdin-to-stdout relay binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Transform presets applied as upstream filters, first listed runs first
    pub filters: Vec<String>,

    /// Bytes read from stdin per write
    pub chunk_size: usize,

    /// Capacity of the channel between the sink and the writer thread
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

// ==================== Config File ====================

/// Complete netloom configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetloomConfig {
    pub engine: EngineConfig,
    pub log: LogConfig,
    pub relay: RelayConfig,
}

impl NetloomConfig {
    /// Parse a config from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {:?}", path))?;
        Self::from_toml(&content).with_context(|| format!("Failed to parse config {:?}", path))
    }

    /// Load a config file, returning defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Load from `path` if given, else from the default location if present
    pub fn discover(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    /// Save config to disk as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {:?}", parent))?;
            }
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_context(|| format!("Failed to write config {:?}", path))
    }

    fn validate(&self) -> Result<()> {
        if self.relay.chunk_size == 0 {
            return Err(NetloomError::Config(
                "relay.chunk_size must be non-zero".to_string(),
            ));
        }
        if self.relay.channel_capacity == 0 {
            return Err(NetloomError::Config(
                "relay.channel_capacity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
