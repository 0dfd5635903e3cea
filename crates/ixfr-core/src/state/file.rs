// # File State Store
//
// File-based implementation of ZoneStateStore with crash recovery.
//
// ## Crash Recovery
//
// - Atomic writes: write to `.tmp`, then rename over the state file
// - Automatic backup: the previous state file is copied to `.backup`
// - Recovery: if the state file does not parse, the backup is loaded and
//   copied back into place
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "zones": {
//     "example.com.@192.0.2.53": {
//       "last_serial": 2024010101,
//       "last_checked": "2025-01-09T12:00:00Z",
//       "last_transfer": "2025-01-09T12:00:00Z",
//       "last_failure": null,
//       "consecutive_failures": 0
//     }
//   }
// }
// ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

use crate::error::{Error, Result};
use crate::model::ZoneKey;
use crate::serial::Serial;
use crate::traits::state_store::{ZoneState, ZoneStateStore};

/// State file format version
const STATE_FILE_VERSION: &str = "1.0";

type Zones = HashMap<ZoneKey, ZoneState>;

/// File-based zone state store
///
/// Every mutation is written through to disk before the call returns.
///
/// # Example
///
/// ```rust,no_run
/// use ixfr_core::state::FileStateStore;
/// use ixfr_core::{Serial, ZoneKey, ZoneStateStore};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileStateStore::new("/var/lib/ixfrd/state.json").await?;
///     let key: ZoneKey = "example.com@192.0.2.53".parse()?;
///     store.record_success(&key, Serial::from(11), chrono::Utc::now()).await?;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    zones: RwLock<Zones>,
    /// Serializes writers so two zones never race on the temp file
    write_lock: Mutex<()>,
}

#[derive(Debug, serde::Deserialize)]
struct StateFileFormat {
    version: String,
    zones: Zones,
}

#[derive(serde::Serialize)]
struct StateFileRef<'a> {
    version: &'a str,
    zones: &'a Zones,
}

/// Why a state file could not be loaded
enum LoadFailure {
    /// File exists but could not be read
    Unreadable(Error),
    /// File was read but is not a valid state file
    Corrupt(Error),
}

impl FileStateStore {
    /// Create or load a file state store
    ///
    /// Creates parent directories as needed. A corrupt state file is
    /// replaced from its backup; if the backup is unusable too, the store
    /// starts empty.
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::config(format!(
                        "Failed to create state directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let zones = Self::load_with_recovery(&path).await?;

        Ok(Self {
            path,
            zones: RwLock::new(zones),
            write_lock: Mutex::new(()),
        })
    }

    /// Path of the state file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load_with_recovery(path: &Path) -> Result<Zones> {
        let err = match Self::load(path).await {
            Ok(zones) => {
                tracing::debug!("Loaded state for {} zones from {}", zones.len(), path.display());
                return Ok(zones);
            }
            Err(LoadFailure::Unreadable(e)) => return Err(e),
            Err(LoadFailure::Corrupt(e)) => e,
        };

        tracing::warn!("State file appears corrupted: {}. Attempting recovery from backup.", err);

        let backup_path = Self::backup_path(path);
        if !backup_path.exists() {
            tracing::warn!("No backup file found. Starting with empty state.");
            return Ok(Zones::new());
        }

        match Self::load(&backup_path).await {
            Ok(zones) => {
                tracing::info!("Recovered state for {} zones from backup", zones.len());
                if let Err(e) = fs::copy(&backup_path, path).await {
                    tracing::error!("Failed to restore state file from backup: {}", e);
                }
                Ok(zones)
            }
            Err(LoadFailure::Unreadable(e)) | Err(LoadFailure::Corrupt(e)) => {
                tracing::error!("Backup also unusable: {}. Starting with empty state.", e);
                Ok(Zones::new())
            }
        }
    }

    async fn load(path: &Path) -> std::result::Result<Zones, LoadFailure> {
        if !path.exists() {
            tracing::debug!("State file does not exist: {}", path.display());
            return Ok(Zones::new());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            LoadFailure::Unreadable(Error::state_store(format!(
                "Failed to read state file {}: {}",
                path.display(),
                e
            )))
        })?;

        let state_file: StateFileFormat = serde_json::from_str(&content).map_err(|e| {
            LoadFailure::Corrupt(Error::state_store(format!(
                "Failed to parse state file {}: {}",
                path.display(),
                e
            )))
        })?;

        if state_file.version != STATE_FILE_VERSION {
            tracing::warn!(
                "State file version mismatch: expected {}, got {}. Attempting to load anyway.",
                STATE_FILE_VERSION,
                state_file.version
            );
        }

        Ok(state_file.zones)
    }

    /// Apply `change` to a copy of the map, write the copy to disk, then
    /// make it current
    ///
    /// If `change` or the write fails, neither the file nor the in-memory
    /// state changes.
    async fn mutate<T>(&self, change: impl FnOnce(&mut Zones) -> Result<T>) -> Result<T> {
        let _writer = self.write_lock.lock().await;
        let mut next = self.zones.read().await.clone();
        let value = change(&mut next)?;
        self.write(&next).await?;
        *self.zones.write().await = next;
        Ok(value)
    }

    async fn write(&self, zones: &Zones) -> Result<()> {
        let state_file = StateFileRef {
            version: STATE_FILE_VERSION,
            zones,
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
                    "Failed to write temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            file.sync_all().await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to sync temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists() {
            if let Err(e) = fs::copy(&self.path, Self::backup_path(&self.path)).await {
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

        tracing::trace!("State written to {}", self.path.display());
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
}

#[async_trait]
impl ZoneStateStore for FileStateStore {
    async fn get(&self, key: &ZoneKey) -> Result<Option<ZoneState>> {
        Ok(self.zones.read().await.get(key).cloned())
    }

    async fn record_success(
        &self,
        key: &ZoneKey,
        serial: Serial,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.mutate(|zones| {
            // Work on a copy so a refused advance leaves no trace
            let mut state = zones.get(key).cloned().unwrap_or_default();
            state.advance(key, serial, at)?;
            zones.insert(key.clone(), state);
            Ok(())
        })
        .await
    }

    async fn record_check(&self, key: &ZoneKey, at: DateTime<Utc>) -> Result<()> {
        self.mutate(|zones| {
            zones.entry(key.clone()).or_default().touch(at);
            Ok(())
        })
        .await
    }

    async fn record_failure(&self, key: &ZoneKey, at: DateTime<Utc>) -> Result<u32> {
        self.mutate(|zones| Ok(zones.entry(key.clone()).or_default().fail(at)))
            .await
    }

    async fn reset(&self, key: &ZoneKey) -> Result<()> {
        self.mutate(|zones| {
            if let Some(state) = zones.get_mut(key) {
                state.last_serial = None;
            }
            Ok(())
        })
        .await
    }

    async fn remove(&self, key: &ZoneKey) -> Result<()> {
        self.mutate(|zones| {
            zones.remove(key);
            Ok(())
        })
        .await
    }

    async fn list(&self) -> Result<Vec<(ZoneKey, ZoneState)>> {
        let zones = self.zones.read().await;
        Ok(zones.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    async fn flush(&self) -> Result<()> {
        let _writer = self.write_lock.lock().await;
        let zones = self.zones.read().await;
        self.write(&zones).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn key() -> ZoneKey {
        "example.com@192.0.2.1".parse().unwrap()
    }

    #[tokio::test]
    async fn test_file_store_persists_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = FileStateStore::new(&path).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());

        store.record_success(&key(), Serial::from(10), Utc::now()).await.unwrap();
        assert!(path.exists());

        let reopened = FileStateStore::new(&path).await.unwrap();
        let state = reopened.get(&key()).await.unwrap().unwrap();
        assert_eq!(state.last_serial, Some(Serial::from(10)));
    }

    #[tokio::test]
    async fn test_file_store_corruption_recovery() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = FileStateStore::new(&path).await.unwrap();
        store.record_success(&key(), Serial::from(10), Utc::now()).await.unwrap();
        // Second write copies the first into the backup
        store.record_success(&key(), Serial::from(11), Utc::now()).await.unwrap();

        let backup_path = FileStateStore::backup_path(&path);
        assert!(backup_path.exists(), "Backup file should exist after write");

        fs::write(&path, b"corrupted json data").await.unwrap();

        let recovered = FileStateStore::new(&path).await.unwrap();
        let state = recovered.get(&key()).await.unwrap().unwrap();
        assert_eq!(
            state.last_serial,
            Some(Serial::from(10)),
            "Backup should contain previous state, not latest"
        );
    }

    #[tokio::test]
    async fn test_refused_advance_is_not_written() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = FileStateStore::new(&path).await.unwrap();
        store.record_success(&key(), Serial::from(6), Utc::now()).await.unwrap();
        assert!(store.record_success(&key(), Serial::from(5), Utc::now()).await.is_err());

        let reopened = FileStateStore::new(&path).await.unwrap();
        assert_eq!(
            reopened.get(&key()).await.unwrap().unwrap().last_serial,
            Some(Serial::from(6))
        );
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memory_unchanged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = FileStateStore::new(&path).await.unwrap();
        store.record_success(&key(), Serial::from(10), Utc::now()).await.unwrap();

        // A directory where the temp file goes makes every write fail
        let blocker = dir.path().join("state.tmp");
        std::fs::create_dir(&blocker).unwrap();
        assert!(store.record_success(&key(), Serial::from(11), Utc::now()).await.is_err());
        assert!(store.remove(&key()).await.is_err());
        assert_eq!(
            store.get(&key()).await.unwrap().unwrap().last_serial,
            Some(Serial::from(10))
        );

        std::fs::remove_dir(&blocker).unwrap();
        store.record_success(&key(), Serial::from(11), Utc::now()).await.unwrap();
        let reopened = FileStateStore::new(&path).await.unwrap();
        assert_eq!(
            reopened.get(&key()).await.unwrap().unwrap().last_serial,
            Some(Serial::from(11))
        );
    }

    #[tokio::test]
    async fn test_concurrent_writers_leave_consistent_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = std::sync::Arc::new(FileStateStore::new(&path).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..10u32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let key: ZoneKey = format!("zone{}.example@192.0.2.1", i).parse().unwrap();
                store.record_success(&key, Serial::from(i), Utc::now()).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let reopened = FileStateStore::new(&path).await.unwrap();
        assert_eq!(reopened.list().await.unwrap().len(), 10);
    }
}
