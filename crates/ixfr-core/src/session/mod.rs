//! One check-and-fetch cycle for one zone
//!
//! ```text
//! CheckingSOA ──► compare with known serial
//!                   ├─ equal ─────────────► Unchanged
//!                   ├─ older / ambiguous ─► Failed(SerialAnomaly)
//!                   ├─ none known ────────► AXFR ─┐
//!                   └─ newer ─────────────► IXFR ─┴► interpret ─► Emitting
//! ```
//!
//! Any failure increments the zone's failure counter and leaves its known
//! serial alone. On success the delta is handed to the sink first and the
//! new serial recorded only after the sink accepted it.

pub mod interpret;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{TransferKind, WatchedZone, ZoneDelta, ZoneFailure, ZoneKey};
use crate::serial::{Serial, SerialRelation};
use crate::traits::{DeltaSink, ZoneStateStore};
use crate::transport::Transport;
use crate::wire::{self, Message, Rcode, Rtype};

pub use interpret::{XfrInterpreter, XfrOutcome};

/// Settings shared by all sessions
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Limit on the SOA query, and on connecting for a transfer
    pub query_timeout: Duration,
    /// Hand unchanged cycles to the sink as empty deltas
    pub emit_unchanged: bool,
    /// Record types left out of deltas
    pub ignored_types: HashSet<Rtype>,
    /// EDNS buffer size advertised in SOA queries
    pub udp_payload_size: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(5),
            emit_unchanged: false,
            ignored_types: [Rtype::NSEC, Rtype::NSEC3, Rtype::RRSIG].into_iter().collect(),
            udp_payload_size: 1232,
        }
    }
}

/// Runs check cycles against shared transport, store and sink
#[derive(Clone)]
pub struct IxfrSession {
    transport: Arc<dyn Transport>,
    store: Arc<dyn ZoneStateStore>,
    sink: Arc<dyn DeltaSink>,
    config: Arc<SessionConfig>,
}

impl IxfrSession {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn ZoneStateStore>,
        sink: Arc<dyn DeltaSink>,
        config: SessionConfig,
    ) -> Self {
        Self {
            transport,
            store,
            sink,
            config: Arc::new(config),
        }
    }

    /// Run one cycle for `zone`
    ///
    /// Failures are recorded in the store and reported to the sink before
    /// being returned.
    pub async fn run(&self, zone: &WatchedZone) -> Result<ZoneDelta> {
        let key = zone.key();
        match self.check(zone, &key).await {
            Ok(delta) => Ok(delta),
            Err(err) => {
                let failures = match self.store.record_failure(&key, Utc::now()).await {
                    Ok(count) => count,
                    Err(e) => {
                        warn!(zone = %key, "Failed to record failure: {}", e);
                        0
                    }
                };
                if let Err(e) = self
                    .sink
                    .emit_failure(&ZoneFailure::new(key.clone(), &err, failures))
                    .await
                {
                    warn!(zone = %key, "Failed to deliver failure record: {}", e);
                }
                Err(err)
            }
        }
    }

    async fn check(&self, zone: &WatchedZone, key: &ZoneKey) -> Result<ZoneDelta> {
        let known = self.store.get(key).await?.and_then(|state| state.last_serial);
        let reported = self.query_serial(zone).await?;
        debug!(
            zone = %key,
            transport = self.transport.name(),
            reported = %reported,
            known = ?known.map(u32::from),
            "SOA checked"
        );

        let outcome = match known {
            None => {
                info!(zone = %key, serial = %reported, "No baseline, requesting full transfer");
                self.transfer(zone, None).await?
            }
            Some(known) => match reported.compare(known) {
                SerialRelation::Equal => return self.unchanged(zone, key, known).await,
                SerialRelation::Newer => self.transfer(zone, Some(known)).await?,
                SerialRelation::Older | SerialRelation::Ambiguous => {
                    return Err(Error::serial_anomaly(key.to_string(), known, reported));
                }
            },
        };

        if outcome.kind == TransferKind::Unchanged {
            debug!(zone = %key, "Server had no changes after all");
            return self.unchanged(zone, key, outcome.new_serial).await;
        }

        if let Some(known) = known {
            // Checked before the sink sees anything
            if !outcome.new_serial.is_newer_than(known) && outcome.new_serial != known {
                return Err(Error::serial_anomaly(key.to_string(), known, outcome.new_serial));
            }
        }

        let delta = ZoneDelta {
            zone: zone.zone.clone(),
            server: zone.server,
            old_serial: outcome.old_serial,
            new_serial: outcome.new_serial,
            changes: outcome.changes,
            kind: outcome.kind,
            observed_at: Utc::now(),
        };

        self.sink.emit(&delta).await?;
        self.store
            .record_success(key, delta.new_serial, delta.observed_at)
            .await?;

        info!(
            zone = %key,
            kind = %delta.kind,
            old_serial = ?delta.old_serial.map(u32::from),
            new_serial = %delta.new_serial,
            changes = delta.changes.len(),
            "Zone transfer logged"
        );
        Ok(delta)
    }

    async fn unchanged(&self, zone: &WatchedZone, key: &ZoneKey, serial: Serial) -> Result<ZoneDelta> {
        let delta = ZoneDelta {
            zone: zone.zone.clone(),
            server: zone.server,
            old_serial: Some(serial),
            new_serial: serial,
            changes: Vec::new(),
            kind: TransferKind::Unchanged,
            observed_at: Utc::now(),
        };
        if self.config.emit_unchanged {
            self.sink.emit(&delta).await?;
        }
        self.store.record_check(key, delta.observed_at).await?;
        debug!(zone = %key, serial = %serial, "No changes");
        Ok(delta)
    }

    /// Serial the server currently reports for the zone
    async fn query_serial(&self, zone: &WatchedZone) -> Result<Serial> {
        let request = wire::soa_query(&zone.zone).with_edns(self.config.udp_payload_size);
        let bytes = self
            .transport
            .query(zone.socket_addr(), &request.encode(), self.config.query_timeout)
            .await?;
        let response = wire::decode_message(&bytes)?;
        check_response(&request, &response)?;

        if response.rcode() != Rcode::NOERROR {
            return Err(Error::ServerRefused {
                zone: zone.zone.to_string(),
                rcode: response.rcode(),
            });
        }

        response
            .answers
            .iter()
            .filter(|record| record.name == zone.zone)
            .find_map(|record| record.data.as_soa())
            .map(|soa| soa.serial)
            .ok_or_else(|| Error::malformed(format!("no SOA for {} in answer", zone.zone)))
    }

    /// Fetch and interpret a transfer, bounded by the zone's transfer timeout
    async fn transfer(&self, zone: &WatchedZone, known: Option<Serial>) -> Result<XfrOutcome> {
        let request = match known {
            Some(serial) => wire::ixfr_query(&zone.zone, serial),
            None => wire::axfr_query(&zone.zone),
        };
        tokio::time::timeout(zone.transfer_timeout, self.fetch(zone, &request, known))
            .await
            .map_err(|_| {
                Error::timeout(format!(
                    "transfer of {} from {} exceeded {:?}",
                    zone.zone,
                    zone.socket_addr(),
                    zone.transfer_timeout
                ))
            })?
    }

    async fn fetch(
        &self,
        zone: &WatchedZone,
        request: &Message,
        known: Option<Serial>,
    ) -> Result<XfrOutcome> {
        let requested = request.qtype().unwrap_or(Rtype::AXFR);
        let mut stream = self
            .transport
            .open_transfer(zone.socket_addr(), &request.encode(), self.config.query_timeout)
            .await?;
        let mut interpreter = XfrInterpreter::new(
            zone.zone.clone(),
            requested,
            known,
            self.config.ignored_types.clone(),
        );

        while let Some(bytes) = stream.next_message().await? {
            let msg = wire::decode_message(&bytes)?;
            check_response(request, &msg)?;
            if interpreter.feed(&msg)? {
                break;
            }
        }
        interpreter.finish()
    }
}

/// A response must answer our query
fn check_response(request: &Message, response: &Message) -> Result<()> {
    if response.id() != request.id() {
        return Err(Error::malformed(format!(
            "response id {} does not match query id {}",
            response.id(),
            request.id()
        )));
    }
    if !response.header.qr {
        return Err(Error::malformed("response does not have the QR flag set"));
    }
    Ok(())
}
