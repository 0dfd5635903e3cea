//! Data model shared by the session, scheduler and sinks

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::serial::Serial;
use crate::wire::{Class, Name, RecordData, Rtype};

/// Default DNS port
pub const DEFAULT_PORT: u16 = 53;

/// Default time between checks of one zone
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(300);

/// Default limit on one complete transfer
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(30);

/// A zone to watch on one server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedZone {
    pub zone: Name,
    pub server: IpAddr,
    pub port: u16,
    pub poll_interval: Duration,
    pub transfer_timeout: Duration,
}

impl WatchedZone {
    /// Watch `zone` on `server` with default port, interval and timeout
    pub fn new(zone: Name, server: IpAddr) -> Self {
        Self {
            zone,
            server,
            port: DEFAULT_PORT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    /// Identity of this entry
    pub fn key(&self) -> ZoneKey {
        ZoneKey {
            zone: self.zone.clone(),
            server: self.server,
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server, self.port)
    }
}

/// Identity of a watched zone: (zone name, server)
///
/// Displays as `zone@server`, e.g. `example.com.@192.0.2.53`. Zone names
/// compare case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ZoneKey {
    pub zone: Name,
    pub server: IpAddr,
}

impl ZoneKey {
    pub fn new(zone: Name, server: IpAddr) -> Self {
        Self { zone, server }
    }
}

impl fmt::Display for ZoneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.zone, self.server)
    }
}

impl FromStr for ZoneKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (zone, server) = s
            .rsplit_once('@')
            .ok_or_else(|| Error::invalid_input(format!("zone key '{}' lacks '@server'", s)))?;
        let server = server
            .parse()
            .map_err(|_| Error::invalid_input(format!("bad server address in '{}'", s)))?;
        Ok(Self {
            zone: zone.parse()?,
            server,
        })
    }
}

impl Serialize for ZoneKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ZoneKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Whether a record was added or removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Add,
    Remove,
}

/// One record added to or removed from a zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceRecordChange {
    pub owner: Name,
    pub rtype: Rtype,
    pub class: Class,
    pub ttl: u32,
    pub rdata: RecordData,
    pub op: ChangeOp,
    /// Serial of the diff sequence this change belongs to
    pub serial: Serial,
}

impl ResourceRecordChange {
    pub fn is_remove(&self) -> bool {
        self.op == ChangeOp::Remove
    }

    /// Zone file line: `owner ttl class type rdata`
    pub fn text(&self) -> String {
        format!(
            "{} {} {} {} {}",
            self.owner, self.ttl, self.class, self.rtype, self.rdata
        )
    }
}

/// How a delta was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    Incremental,
    Full,
    Unchanged,
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransferKind::Incremental => "incremental",
            TransferKind::Full => "full",
            TransferKind::Unchanged => "unchanged",
        })
    }
}

/// Outcome of one completed check of a zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneDelta {
    pub zone: Name,
    pub server: IpAddr,
    /// Baseline the changes apply to; absent for full transfers
    pub old_serial: Option<Serial>,
    pub new_serial: Serial,
    /// In the order the server sent them
    pub changes: Vec<ResourceRecordChange>,
    pub kind: TransferKind,
    pub observed_at: DateTime<Utc>,
}

impl ZoneDelta {
    pub fn key(&self) -> ZoneKey {
        ZoneKey::new(self.zone.clone(), self.server)
    }

    pub fn added(&self) -> impl Iterator<Item = &ResourceRecordChange> {
        self.changes.iter().filter(|c| c.op == ChangeOp::Add)
    }

    pub fn removed(&self) -> impl Iterator<Item = &ResourceRecordChange> {
        self.changes.iter().filter(|c| c.op == ChangeOp::Remove)
    }
}

/// A failed check, surfaced to the sink so persistent failures are visible
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneFailure {
    pub key: ZoneKey,
    /// Short error label, see [`Error::kind`]
    pub kind: &'static str,
    pub error: String,
    pub consecutive_failures: u32,
    pub at: DateTime<Utc>,
}

impl ZoneFailure {
    pub fn new(key: ZoneKey, error: &Error, consecutive_failures: u32) -> Self {
        Self {
            key,
            kind: error.kind(),
            error: error.to_string(),
            consecutive_failures,
            at: Utc::now(),
        }
    }
}
