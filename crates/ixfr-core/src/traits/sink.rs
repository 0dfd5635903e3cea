// # Delta Sink Trait
//
// Receives the outcome of every completed check.
//
// A session only records success in the state store after `emit` returns
// `Ok`, so a sink that fails makes the whole cycle fail and the same delta
// is produced again on the next attempt (at-least-once delivery).

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{ZoneDelta, ZoneFailure};

/// Destination for zone deltas and failure records
///
/// Implementations must accept concurrent calls from many zone tasks.
#[async_trait]
pub trait DeltaSink: Send + Sync {
    /// Deliver one delta
    async fn emit(&self, delta: &ZoneDelta) -> Result<()>;

    /// Deliver a failure record
    ///
    /// The default only logs it.
    async fn emit_failure(&self, failure: &ZoneFailure) -> Result<()> {
        tracing::warn!(
            zone = %failure.key,
            kind = failure.kind,
            consecutive_failures = failure.consecutive_failures,
            "Zone check failed: {}",
            failure.error
        );
        Ok(())
    }

    /// Push out anything buffered
    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Sink name for logging
    fn name(&self) -> &'static str;
}
