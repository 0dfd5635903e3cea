// # Zone State Store Trait
//
// Defines the interface for per-zone state: the last known serial plus
// check bookkeeping.
//
// ## Purpose
//
// The stored serial is the baseline for the next IXFR request. It must only
// ever move forward under serial arithmetic, so the rule lives on
// `ZoneState::advance` and every store implementation goes through it.
//
// ## Implementations
//
// - `MemoryStateStore`: for tests and embedding
// - `FileStateStore`: JSON file with atomic writes and backup recovery
//
// ## Usage
//
// ```rust,ignore
// let store = MemoryStateStore::new();
// store.record_success(&key, Serial::from(11), Utc::now()).await?;
// let state = store.get(&key).await?;
// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::ZoneKey;
use crate::serial::{Serial, SerialRelation};

/// Runtime state of one watched zone
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneState {
    /// Last serial a transfer was completed for; absent before the first
    /// successful check or after a reset
    pub last_serial: Option<Serial>,
    /// Last completed check, changed or not
    pub last_checked: Option<DateTime<Utc>>,
    /// Last completed transfer
    pub last_transfer: Option<DateTime<Utc>>,
    /// Last failed check
    pub last_failure: Option<DateTime<Utc>>,
    /// Failed checks since the last success
    pub consecutive_failures: u32,
}

impl ZoneState {
    /// Move the baseline to `serial` after a completed transfer
    ///
    /// Fails with `SerialAnomaly` and leaves the state untouched unless
    /// `serial` is newer than (or equal to) the current baseline.
    pub fn advance(&mut self, key: &ZoneKey, serial: Serial, at: DateTime<Utc>) -> Result<()> {
        if let Some(known) = self.last_serial {
            match serial.compare(known) {
                SerialRelation::Newer | SerialRelation::Equal => {}
                SerialRelation::Older | SerialRelation::Ambiguous => {
                    return Err(Error::serial_anomaly(key.to_string(), known, serial));
                }
            }
        }
        self.last_serial = Some(serial);
        self.last_checked = Some(at);
        self.last_transfer = Some(at);
        self.consecutive_failures = 0;
        Ok(())
    }

    /// Note a successful check that found no change
    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.last_checked = Some(at);
        self.consecutive_failures = 0;
    }

    /// Note a failed check; the baseline is never changed here
    pub fn fail(&mut self, at: DateTime<Utc>) -> u32 {
        self.last_failure = Some(at);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_failures
    }
}

/// Trait for zone state store implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently for distinct keys. The
/// scheduler guarantees that at most one session touches a given key at a
/// time.
///
/// # Errors
///
/// Storage failures surface as `Error::StateStore`. `record_success` also
/// returns `Error::SerialAnomaly` when the serial would move backwards.
#[async_trait]
pub trait ZoneStateStore: Send + Sync {
    /// State for `key`, if any has been recorded
    async fn get(&self, key: &ZoneKey) -> Result<Option<ZoneState>>;

    /// Record a completed transfer that brought the zone to `serial`
    async fn record_success(&self, key: &ZoneKey, serial: Serial, at: DateTime<Utc>)
    -> Result<()>;

    /// Record a completed check that found the zone unchanged
    async fn record_check(&self, key: &ZoneKey, at: DateTime<Utc>) -> Result<()>;

    /// Record a failed check, returning the new consecutive-failure count
    async fn record_failure(&self, key: &ZoneKey, at: DateTime<Utc>) -> Result<u32>;

    /// Forget the baseline so the next check resyncs with a full transfer
    async fn reset(&self, key: &ZoneKey) -> Result<()>;

    /// Drop all state for `key`
    async fn remove(&self, key: &ZoneKey) -> Result<()>;

    /// Every key with its state
    async fn list(&self) -> Result<Vec<(ZoneKey, ZoneState)>>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<()>;
}
