//! Persistence collaborator — durable key/document storage.
//!
//! The core never owns a database; it speaks to whatever the caller provides
//! through [`PersistenceStore`]. Two implementations ship with the crate: a
//! JSON-file store for simple durable setups and an in-memory store for
//! tests and ephemeral use.

use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Durable key → JSON document storage.
///
/// Used for registry seed data, feedback snapshots, and execution history.
pub trait PersistenceStore: Send + Sync {
    /// Load a document, `None` when the key has never been saved.
    fn load(&self, key: &str) -> StoreResult<Option<Value>>;

    /// Save (overwrite) a document.
    fn save(&self, key: &str, doc: &Value) -> StoreResult<()>;
}

/// One pretty-printed JSON file per key under a base directory.
#[derive(Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Create a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl AsRef<Path>) -> StoreResult<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    fn path_for(&self, key: &str) -> StoreResult<PathBuf> {
        // Keys become file names; path separators would escape the directory.
        if key.is_empty() || key.contains(['/', '\\', '.']) {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl PersistenceStore for JsonFileStore {
    fn load(&self, key: &str) -> StoreResult<Option<Value>> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn save(&self, key: &str, doc: &Value) -> StoreResult<()> {
        let path = self.path_for(key)?;
        let json = serde_json::to_string_pretty(doc)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// In-memory store for tests and ephemeral orchestrators.
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistenceStore for MemoryStore {
    fn load(&self, key: &str) -> StoreResult<Option<Value>> {
        Ok(self.docs.lock().expect("store lock poisoned").get(key).cloned())
    }

    fn save(&self, key: &str, doc: &Value) -> StoreResult<()> {
        self.docs
            .lock()
            .expect("store lock poisoned")
            .insert(key.to_string(), doc.clone());
        Ok(())
    }
}
