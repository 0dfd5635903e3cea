// # Tracing Sink
//
// Writes deltas to the process log through `tracing`. The daemon's default
// sink when no log file is configured.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::Result;
use crate::model::{TransferKind, ZoneDelta};
use crate::traits::DeltaSink;

/// Sink logging deltas as structured events
///
/// One `info` event per delta, one `debug` event per change.
#[derive(Debug, Clone, Default)]
pub struct TracingSink;

impl TracingSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DeltaSink for TracingSink {
    async fn emit(&self, delta: &ZoneDelta) -> Result<()> {
        let key = delta.key();
        match delta.kind {
            TransferKind::Unchanged => {
                info!(zone = %key, serial = %delta.new_serial, "No changes");
            }
            kind => {
                info!(
                    zone = %key,
                    old_serial = ?delta.old_serial.map(u32::from),
                    new_serial = %delta.new_serial,
                    kind = %kind,
                    changes = delta.changes.len(),
                    "Logged {} changes",
                    delta.changes.len()
                );
            }
        }
        for change in &delta.changes {
            let action = if change.is_remove() { "DEL" } else { "ADD" };
            debug!(zone = %key, "{} {} {}", change.serial, action, change.text());
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "tracing"
    }
}
