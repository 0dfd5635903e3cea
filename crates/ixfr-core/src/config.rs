//! Configuration types for the zone watcher
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::model::{DEFAULT_PORT, WatchedZone};
use crate::session::SessionConfig;
use crate::wire::{Name, Rtype};

/// Main watcher configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Zones to watch at startup
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,

    /// Scheduler and session settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// State store configuration
    #[serde(default)]
    pub state_store: StateStoreConfig,

    /// Where deltas go
    #[serde(default)]
    pub sink: SinkConfig,

    /// Also publish changes to an MQTT broker
    #[serde(default)]
    pub mqtt: Option<MqttConfig>,
}

impl WatchConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration
    ///
    /// An empty zone list is allowed: zones may arrive later through a
    /// dynamic watchlist.
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.scheduler.validate()?;
        self.state_store.validate()?;
        self.sink.validate()?;
        if let Some(mqtt) = &self.mqtt {
            mqtt.validate()?;
        }

        let mut seen = HashSet::new();
        for zone in &self.zones {
            let watched = zone.to_watched()?;
            if !seen.insert(watched.key()) {
                return Err(crate::Error::config(format!(
                    "Zone {} is configured twice",
                    watched.key()
                )));
            }
        }
        Ok(())
    }

    /// All configured zones as validated [`WatchedZone`]s
    pub fn watched_zones(&self) -> Result<Vec<WatchedZone>, crate::Error> {
        self.zones.iter().map(ZoneConfig::to_watched).collect()
    }
}

/// One zone on one server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneConfig {
    /// Zone apex, e.g. "example.com"
    pub zone: String,

    /// Authoritative server address
    pub server: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds between checks
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Limit on one complete transfer (in seconds)
    #[serde(default = "default_transfer_timeout_secs")]
    pub transfer_timeout_secs: u64,
}

impl ZoneConfig {
    /// Create a zone configuration with default port and timings
    pub fn new(zone: impl Into<String>, server: IpAddr) -> Self {
        Self {
            zone: zone.into(),
            server,
            port: default_port(),
            poll_interval_secs: default_poll_interval_secs(),
            transfer_timeout_secs: default_transfer_timeout_secs(),
        }
    }

    pub fn with_poll_interval_secs(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs;
        self
    }

    pub fn with_transfer_timeout_secs(mut self, secs: u64) -> Self {
        self.transfer_timeout_secs = secs;
        self
    }

    /// Validate and convert into a [`WatchedZone`]
    pub fn to_watched(&self) -> Result<WatchedZone, crate::Error> {
        let zone: Name = self
            .zone
            .parse()
            .map_err(|e| crate::Error::config(format!("Invalid zone name '{}': {}", self.zone, e)))?;
        if self.port == 0 {
            return Err(crate::Error::config(format!("Zone {}: port must be > 0", zone)));
        }
        if self.poll_interval_secs == 0 {
            return Err(crate::Error::config(format!(
                "Zone {}: poll interval must be > 0",
                zone
            )));
        }
        if self.transfer_timeout_secs == 0 {
            return Err(crate::Error::config(format!(
                "Zone {}: transfer timeout must be > 0",
                zone
            )));
        }
        Ok(WatchedZone::new(zone, self.server)
            .with_port(self.port)
            .with_poll_interval(Duration::from_secs(self.poll_interval_secs))
            .with_transfer_timeout(Duration::from_secs(self.transfer_timeout_secs)))
    }
}

/// Parses `zone@ip`, `zone@ipv4:port` or `zone@[ipv6]:port`
impl FromStr for ZoneConfig {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (zone, addr) = s
            .trim()
            .rsplit_once('@')
            .ok_or_else(|| crate::Error::config(format!("Zone entry '{}' lacks '@server'", s)))?;
        if zone.is_empty() {
            return Err(crate::Error::config(format!("Zone entry '{}' has no zone name", s)));
        }
        let (server, port) = match addr.parse::<SocketAddr>() {
            Ok(sock) => (sock.ip(), sock.port()),
            Err(_) => {
                let ip = addr.parse::<IpAddr>().map_err(|_| {
                    crate::Error::config(format!("Zone entry '{}' has an invalid server address", s))
                })?;
                (ip, DEFAULT_PORT)
            }
        };
        let mut config = ZoneConfig::new(zone, server);
        config.port = port;
        Ok(config)
    }
}

/// Scheduler and per-session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Poll intervals are varied by up to ± this fraction
    #[serde(default = "default_jitter_fraction")]
    pub jitter_fraction: f64,

    /// Upper bound on the retry delay after failures (in milliseconds)
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Limit on the SOA query and on connecting for a transfer (in milliseconds)
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// How long a cancelled zone task may take to stop before it is aborted
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,

    /// Emit empty deltas for cycles that found no change
    #[serde(default)]
    pub emit_unchanged: bool,

    /// Record types dropped from deltas
    #[serde(default = "default_ignored_types")]
    pub ignored_types: Vec<String>,

    /// Capacity of the scheduler event channel
    ///
    /// When full, new events are dropped (with a warning log).
    ///
    /// Default: 1000 events
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// EDNS UDP payload size advertised in SOA queries
    #[serde(default = "default_udp_payload_size")]
    pub udp_payload_size: u16,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            jitter_fraction: default_jitter_fraction(),
            max_backoff_ms: default_max_backoff_ms(),
            query_timeout_ms: default_query_timeout_ms(),
            cancel_grace_ms: default_cancel_grace_ms(),
            emit_unchanged: false,
            ignored_types: default_ignored_types(),
            event_channel_capacity: default_event_channel_capacity(),
            udp_payload_size: default_udp_payload_size(),
        }
    }
}

impl SchedulerConfig {
    /// Validate the scheduler configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return Err(crate::Error::config("Jitter fraction must be between 0 and 1"));
        }
        if self.max_backoff_ms == 0 {
            return Err(crate::Error::config("Maximum backoff must be > 0"));
        }
        if self.query_timeout_ms == 0 {
            return Err(crate::Error::config("Query timeout must be > 0"));
        }
        if self.cancel_grace_ms == 0 {
            return Err(crate::Error::config("Cancel grace period must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        if self.udp_payload_size < 512 {
            return Err(crate::Error::config("UDP payload size must be at least 512"));
        }
        self.ignored_rtypes()?;
        Ok(())
    }

    /// Parsed `ignored_types`
    pub fn ignored_rtypes(&self) -> Result<HashSet<Rtype>, crate::Error> {
        self.ignored_types
            .iter()
            .map(|t| {
                t.parse::<Rtype>()
                    .map_err(|_| crate::Error::config(format!("Unknown record type '{}'", t)))
            })
            .collect()
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    /// Settings handed to each session
    pub fn session_config(&self) -> Result<SessionConfig, crate::Error> {
        Ok(SessionConfig {
            query_timeout: Duration::from_millis(self.query_timeout_ms),
            emit_unchanged: self.emit_unchanged,
            ignored_types: self.ignored_rtypes()?,
            udp_payload_size: self.udp_payload_size,
        })
    }
}

/// State store configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateStoreConfig {
    /// File-based state store
    File {
        /// Path to the state file
        path: String,
    },

    /// In-memory state store (not persistent)
    #[default]
    Memory,
}

impl StateStoreConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            StateStoreConfig::File { path } if path.is_empty() => {
                Err(crate::Error::config("State file path cannot be empty"))
            }
            _ => Ok(()),
        }
    }
}

/// Delta sink configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkConfig {
    /// Structured log lines through `tracing`
    #[default]
    Tracing,

    /// JSON lines appended to a file
    JsonLines {
        /// Path to the log file
        path: String,
    },
}

impl SinkConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            SinkConfig::JsonLines { path } if path.is_empty() => {
                Err(crate::Error::config("Log file path cannot be empty"))
            }
            _ => Ok(()),
        }
    }
}

/// MQTT publishing of record changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker URL, `mqtt://host[:port]`
    pub url: String,

    /// Topic prefix; changes go to `<topic>/<zone>`
    #[serde(default = "default_mqtt_topic")]
    pub topic: String,

    #[serde(default = "default_mqtt_client_id")]
    pub client_id: String,

    /// How long `emit` may wait for room in the publish queue
    #[serde(default = "default_mqtt_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
}

impl MqttConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            topic: default_mqtt_topic(),
            client_id: default_mqtt_client_id(),
            publish_timeout_ms: default_mqtt_publish_timeout_ms(),
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), crate::Error> {
        crate::sink::mqtt::parse_broker_url(&self.url)?;
        if self.topic.trim_matches('/').is_empty() {
            return Err(crate::Error::config("MQTT topic cannot be empty"));
        }
        if self.client_id.is_empty() {
            return Err(crate::Error::config("MQTT client id cannot be empty"));
        }
        if self.publish_timeout_ms == 0 {
            return Err(crate::Error::config("MQTT publish timeout must be > 0"));
        }
        Ok(())
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_poll_interval_secs() -> u64 {
    300
}

fn default_transfer_timeout_secs() -> u64 {
    30
}

fn default_jitter_fraction() -> f64 {
    0.1
}

fn default_max_backoff_ms() -> u64 {
    3_600_000
}

fn default_query_timeout_ms() -> u64 {
    5_000
}

fn default_cancel_grace_ms() -> u64 {
    5_000
}

fn default_ignored_types() -> Vec<String> {
    vec!["NSEC".to_string(), "NSEC3".to_string(), "RRSIG".to_string()]
}

fn default_event_channel_capacity() -> usize {
    1000
}

fn default_udp_payload_size() -> u16 {
    1232
}

fn default_mqtt_topic() -> String {
    "ixfrlog".to_string()
}

fn default_mqtt_client_id() -> String {
    "ixfrd".to_string()
}

fn default_mqtt_publish_timeout_ms() -> u64 {
    5_000
}
