//! Persisted connection settings
//!
//! The controller treats the store as an opaque key-value record holding
//! `server`, `port`, `password` and `method`. Two implementations are
//! provided: a pretty-printed JSON file and an in-memory store.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::ConnectionConfig;
use crate::error::TunnelError;
use crate::Result;

/// Storage for the four user-editable connection fields
pub trait ConfigStore {
    /// Load the stored fields, falling back to defaults when nothing is stored
    fn load(&mut self) -> Result<ConnectionConfig>;

    /// Overwrite the stored fields
    fn save(&mut self, config: &ConnectionConfig) -> Result<()>;
}

/// JSON file store, e.g. `config.json` next to the executable
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for JsonFileStore {
    fn load(&mut self) -> Result<ConnectionConfig> {
        if !self.path.exists() {
            info!("No config at {}, writing defaults", self.path.display());
            let defaults = ConnectionConfig::default();
            self.save(&defaults)?;
            return Ok(defaults);
        }

        let text = fs::read_to_string(&self.path)
            .map_err(|e| TunnelError::store(format!("{}: {}", self.path.display(), e)))?;
        let config = serde_json::from_str(&text)
            .map_err(|e| TunnelError::store(format!("{}: {}", self.path.display(), e)))?;
        debug!("Loaded config from {}", self.path.display());
        Ok(config)
    }

    fn save(&mut self, config: &ConnectionConfig) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(config)?;
        fs::write(&self.path, text)
            .map_err(|e| TunnelError::store(format!("{}: {}", self.path.display(), e)))?;
        debug!("Saved config to {}", self.path.display());
        Ok(())
    }
}

/// Store that lives only as long as the process
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    config: Option<ConnectionConfig>,
    saves: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ConnectionConfig) -> Self {
        Self {
            config: Some(config),
            saves: 0,
        }
    }

    /// Last saved (or seeded) value
    pub fn current(&self) -> Option<&ConnectionConfig> {
        self.config.as_ref()
    }

    /// Number of completed `save` calls
    pub fn save_count(&self) -> usize {
        self.saves
    }
}

impl ConfigStore for MemoryStore {
    fn load(&mut self) -> Result<ConnectionConfig> {
        Ok(self.config.clone().unwrap_or_default())
    }

    fn save(&mut self, config: &ConnectionConfig) -> Result<()> {
        self.config = Some(config.clone());
        self.saves += 1;
        Ok(())
    }
}
