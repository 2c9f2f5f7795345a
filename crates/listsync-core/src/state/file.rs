// # File State Store
//
// File-based implementation of StateStore with crash recovery.
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - Corruption detection: JSON parse failure on load
// - Automatic backup: Keeps .backup of last known good state
// - Recovery: Falls back to backup if corruption detected
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "items": {
//     "office": {
//       "account_id": "f037e56e89293a057740de681ac9abbe",
//       "list_id": "2c0fc9fa937b11eaa1b71c4d701ab86e",
//       "item_id": "7c5dae5552338874e5053f2534d2767a",
//       "comment": "office egress",
//       "payload": { "ip": "192.0.2.0/24" },
//       "phase": "present",
//       "last_reconciled": "2025-01-09T12:00:00Z"
//     }
//   }
// }
// ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::state_store::{ItemState, StateStore, StateStoreFactory};

/// State file format version
const STATE_FILE_VERSION: &str = "1.0";

/// File-based state store with crash recovery
///
/// Every mutation is written through immediately; `flush` only matters if a
/// write failed and left the in-memory copy dirty.
///
/// # Example
///
/// ```rust,no_run
/// use listsync_core::state::FileStateStore;
/// use listsync_core::traits::StateStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileStateStore::new("/var/lib/listsync/state.json").await?;
///     for name in store.list().await? {
///         println!("tracking {}", name);
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    state: Arc<RwLock<FileState>>,
}

#[derive(Debug)]
struct FileState {
    items: HashMap<String, ItemState>,
    dirty: bool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct StateFileFormat {
    version: String,
    items: HashMap<String, ItemState>,
}

impl FileStateStore {
    /// Create or load a file state store
    ///
    /// This will:
    /// 1. Create parent directories if needed
    /// 2. Try to load the existing state file
    /// 3. If it is corrupted, try the backup
    /// 4. If both fail, start with empty state
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::config(format!(
                    "Failed to create state directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let items = Self::load_state_with_recovery(&path).await?;

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(FileState {
                items,
                dirty: false,
            })),
        })
    }

    async fn load_state_with_recovery(path: &Path) -> Result<HashMap<String, ItemState>, Error> {
        let parse_error = match Self::load_state(path).await {
            Ok(items) => {
                tracing::debug!("Loaded state from file: {} items", items.len());
                return Ok(items);
            }
            Err(Error::Json(e)) => e,
            Err(e) => return Err(e),
        };

        tracing::warn!(
            "State file appears corrupted: {}. Attempting recovery from backup.",
            parse_error
        );

        let backup_path = Self::backup_path(path);
        if !backup_path.exists() {
            tracing::warn!("No backup file found. Starting with empty state.");
            return Ok(HashMap::new());
        }

        match Self::load_state(&backup_path).await {
            Ok(items) => {
                tracing::info!("Recovered state from backup: {} items", items.len());
                if let Err(e) = fs::copy(&backup_path, path).await {
                    tracing::error!("Failed to restore state file from backup: {}", e);
                }
                Ok(items)
            }
            Err(e) => {
                tracing::error!("Backup also unreadable: {}. Starting with empty state.", e);
                Ok(HashMap::new())
            }
        }
    }

    /// Parse failures come back as [`Error::Json`]
    async fn load_state(path: &Path) -> Result<HashMap<String, ItemState>, Error> {
        if !path.exists() {
            tracing::debug!("State file does not exist: {}", path.display());
            return Ok(HashMap::new());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::state_store(format!(
                "Failed to read state file {}: {}",
                path.display(),
                e
            ))
        })?;

        let state_file: StateFileFormat = serde_json::from_str(&content)?;

        if state_file.version != STATE_FILE_VERSION {
            tracing::warn!(
                "State file version mismatch: expected {}, got {}. Attempting to load anyway.",
                STATE_FILE_VERSION,
                state_file.version
            );
        }

        Ok(state_file.items)
    }

    async fn write_state(&self) -> Result<(), Error> {
        let mut state_guard = self.state.write().await;

        let state_file = StateFileFormat {
            version: STATE_FILE_VERSION.to_string(),
            items: state_guard.items.clone(),
        };

        let json = serde_json::to_string_pretty(&state_file)
            .map_err(|e| Error::state_store(format!("Failed to serialize state: {}", e)))?;

        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to write to temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.flush().await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to flush temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::state_store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        state_guard.dirty = false;
        tracing::trace!("State written to file: {}", self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }

    /// Force immediate write to disk
    pub async fn sync(&self) -> Result<(), Error> {
        self.write_state().await
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get(&self, name: &str) -> Result<Option<ItemState>, Error> {
        let state_guard = self.state.read().await;
        Ok(state_guard.items.get(name).cloned())
    }

    async fn set(&self, name: &str, state: &ItemState) -> Result<(), Error> {
        {
            let mut state_guard = self.state.write().await;
            state_guard.items.insert(name.to_string(), state.clone());
            state_guard.dirty = true;
        }

        self.write_state().await
    }

    async fn delete(&self, name: &str) -> Result<(), Error> {
        {
            let mut state_guard = self.state.write().await;
            if state_guard.items.remove(name).is_none() {
                return Ok(());
            }
            state_guard.dirty = true;
        }

        self.write_state().await
    }

    async fn list(&self) -> Result<Vec<String>, Error> {
        let state_guard = self.state.read().await;
        Ok(state_guard.items.keys().cloned().collect())
    }

    async fn flush(&self) -> Result<(), Error> {
        let dirty = self.state.read().await.dirty;
        if dirty {
            self.write_state().await
        } else {
            Ok(())
        }
    }
}

/// Factory for [`FileStateStore`]
///
/// Expects the serialized `StateStoreConfig::File { path }`.
pub struct FileStateStoreFactory;

#[async_trait]
impl StateStoreFactory for FileStateStoreFactory {
    async fn create(&self, config: &serde_json::Value) -> Result<Box<dyn StateStore>, Error> {
        let path = config["path"]
            .as_str()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::config("File state store requires a non-empty path"))?;
        Ok(Box::new(FileStateStore::new(path).await?))
    }
}
