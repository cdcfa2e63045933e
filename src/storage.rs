//! Persistence of the script collection.
//!
//! The collection is always read and written as a whole, stored under a
//! single `scripts` key the way the extension's local storage area holds it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::script::ScriptCollection;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Stored scripts are not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ScriptStorage: Send + Sync {
    /// Read the whole collection; nothing stored yet reads as empty.
    async fn load(&self) -> Result<ScriptCollection, StorageError>;

    /// Replace the whole stored collection.
    async fn store(&self, scripts: &ScriptCollection) -> Result<(), StorageError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StorageArea {
    #[serde(default)]
    scripts: ScriptCollection,
}

/// In-memory storage, mostly for tests and one-off sessions
#[derive(Debug, Default)]
pub struct MemoryStorage {
    area: Mutex<Option<String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scripts(scripts: &ScriptCollection) -> Result<Self, StorageError> {
        let raw = serde_json::to_string(&StorageArea {
            scripts: scripts.clone(),
        })?;
        Ok(Self {
            area: Mutex::new(Some(raw)),
        })
    }
}

#[async_trait]
impl ScriptStorage for MemoryStorage {
    async fn load(&self) -> Result<ScriptCollection, StorageError> {
        let guard = self
            .area
            .lock()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        match guard.as_deref() {
            Some(raw) => Ok(serde_json::from_str::<StorageArea>(raw)?.scripts),
            None => Ok(ScriptCollection::new()),
        }
    }

    async fn store(&self, scripts: &ScriptCollection) -> Result<(), StorageError> {
        let raw = serde_json::to_string(&StorageArea {
            scripts: scripts.clone(),
        })?;
        let mut guard = self
            .area
            .lock()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        *guard = Some(raw);
        Ok(())
    }
}

/// JSON file on disk holding `{ "scripts": { ... } }`
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl ScriptStorage for JsonFileStorage {
    async fn load(&self) -> Result<ScriptCollection, StorageError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No script storage at {}, starting empty", self.path.display());
                return Ok(ScriptCollection::new());
            }
            Err(e) => return Err(self.io_error(e)),
        };
        if raw.trim().is_empty() {
            return Ok(ScriptCollection::new());
        }
        let area: StorageArea = serde_json::from_str(&raw)?;
        debug!(
            "Loaded {} scripts from {}",
            area.scripts.len(),
            self.path.display()
        );
        Ok(area.scripts)
    }

    async fn store(&self, scripts: &ScriptCollection) -> Result<(), StorageError> {
        let raw = serde_json::to_string_pretty(&StorageArea {
            scripts: scripts.clone(),
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        // Write next to the target and rename so a crash never leaves half a file
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, raw)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        debug!("Stored {} scripts to {}", scripts.len(), self.path.display());
        Ok(())
    }
}
