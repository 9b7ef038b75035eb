use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::store::StoreError;

/// Path that opens a private in-memory database.
pub const IN_MEMORY_PATH: &str = ":memory:";

/// Largest history page an operator may request.
pub const MAX_PAGE_SIZE: usize = 50;

/// Action store settings. Every field has a default, so a config file only
/// needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite file, or `:memory:`.
    pub path: PathBuf,
    /// Records buffered between producers and the writer thread.
    pub queue_capacity: usize,
    /// Most records committed per writer transaction.
    pub batch_size: usize,
    /// How long a statement waits on a locked database file.
    pub busy_timeout_ms: u64,
    /// Default number of history lines per page.
    pub page_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("blocklog.db"),
            queue_capacity: 5000,
            batch_size: 100,
            busy_timeout_ms: 5000,
            page_size: 5,
        }
    }
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::from(IN_MEMORY_PATH),
            ..Self::default()
        }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.path.as_os_str() == IN_MEMORY_PATH
    }

    /// Load from a YAML file; missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, StoreError> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the writer cannot run with.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.queue_capacity == 0 {
            return Err(StoreError::Config("queue_capacity must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(StoreError::Config("batch_size must be at least 1".into()));
        }
        Ok(())
    }

    /// Page size clamped to `1..=MAX_PAGE_SIZE`.
    pub fn effective_page_size(&self) -> usize {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }
}
