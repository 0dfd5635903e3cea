// # Memory State Store
//
// In-memory implementation of ZoneStateStore.
//
// ## Crash Behavior
//
// - All state is lost on restart
// - The first check of every zone after a restart is a full transfer
//
// ## When to Use
//
// - Tests
// - Embedding, where the host program keeps its own record of serials

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::model::ZoneKey;
use crate::serial::Serial;
use crate::traits::state_store::{ZoneState, ZoneStateStore};

/// In-memory zone state store
///
/// # Example
///
/// ```rust,no_run
/// use ixfr_core::state::MemoryStateStore;
/// use ixfr_core::{Serial, ZoneKey, ZoneStateStore};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryStateStore::new();
///     let key: ZoneKey = "example.com@192.0.2.53".parse()?;
///
///     store.record_success(&key, Serial::from(11), chrono::Utc::now()).await?;
///     let state = store.get(&key).await?;
///     assert_eq!(state.and_then(|s| s.last_serial), Some(Serial::from(11)));
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<RwLock<HashMap<ZoneKey, ZoneState>>>,
}

impl MemoryStateStore {
    /// Create a new empty memory state store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of zones with state
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl ZoneStateStore for MemoryStateStore {
    async fn get(&self, key: &ZoneKey) -> Result<Option<ZoneState>> {
        Ok(self.inner.read().await.get(key).cloned())
    }

    async fn record_success(
        &self,
        key: &ZoneKey,
        serial: Serial,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut guard = self.inner.write().await;
        guard.entry(key.clone()).or_default().advance(key, serial, at)
    }

    async fn record_check(&self, key: &ZoneKey, at: DateTime<Utc>) -> Result<()> {
        let mut guard = self.inner.write().await;
        guard.entry(key.clone()).or_default().touch(at);
        Ok(())
    }

    async fn record_failure(&self, key: &ZoneKey, at: DateTime<Utc>) -> Result<u32> {
        let mut guard = self.inner.write().await;
        Ok(guard.entry(key.clone()).or_default().fail(at))
    }

    async fn reset(&self, key: &ZoneKey) -> Result<()> {
        let mut guard = self.inner.write().await;
        if let Some(state) = guard.get_mut(key) {
            state.last_serial = None;
        }
        Ok(())
    }

    async fn remove(&self, key: &ZoneKey) -> Result<()> {
        self.inner.write().await.remove(key);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(ZoneKey, ZoneState)>> {
        let guard = self.inner.read().await;
        Ok(guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    async fn flush(&self) -> Result<()> {
        // Nothing buffered
        Ok(())
    }
}
