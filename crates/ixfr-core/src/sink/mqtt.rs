// # MQTT Sink
//
// Publishes every record change as one JSON message on
// `<topic>/<zone>` (zone without the trailing dot). The payload carries the
// same fields as a JSON-lines change line except `text`.
//
// rumqttc queues publishes and a background task drives the connection,
// reconnecting after errors. `emit` returns once the changes are queued; a
// queue that stays full past the publish timeout fails the cycle, so the
// delta is produced again on the next attempt.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MqttConfig;
use crate::error::{Error, Result};
use crate::model::{ResourceRecordChange, ZoneDelta};
use crate::traits::DeltaSink;
use crate::wire::Name;

pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Publishes waiting for the connection before `emit` blocks
const REQUEST_CAPACITY: usize = 256;
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Payload of one published change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedChange {
    pub serial: u32,
    pub deleted: bool,
    pub name: String,
    pub ttl: u32,
    pub rdclass: String,
    pub rdtype: String,
    pub rdata: String,
}

impl From<&ResourceRecordChange> for PublishedChange {
    fn from(change: &ResourceRecordChange) -> Self {
        Self {
            serial: change.serial.get(),
            deleted: change.is_remove(),
            name: change.owner.to_string(),
            ttl: change.ttl,
            rdclass: change.class.to_string(),
            rdtype: change.rtype.to_string(),
            rdata: change.rdata.to_string(),
        }
    }
}

/// Split `mqtt://host[:port]` (also `tcp://` or a bare `host[:port]`) into
/// host and port
pub fn parse_broker_url(url: &str) -> Result<(String, u16)> {
    let rest = match url.split_once("://") {
        Some(("mqtt" | "tcp", rest)) => rest,
        Some((scheme, _)) => {
            return Err(Error::config(format!(
                "MQTT URL '{}': unsupported scheme '{}'",
                url, scheme
            )));
        }
        None => url,
    };
    let rest = rest.trim_end_matches('/');

    let (host, port) = if let Some(v6) = rest.strip_prefix('[') {
        let (host, tail) = v6
            .split_once(']')
            .ok_or_else(|| Error::config(format!("MQTT URL '{}': unclosed '['", url)))?;
        match tail {
            "" => (host, None),
            _ => match tail.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None => return Err(Error::config(format!("MQTT URL '{}': bad port", url))),
            },
        }
    } else {
        match rest.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (rest, None),
        }
    };

    if host.is_empty() {
        return Err(Error::config(format!("MQTT URL '{}' has no host", url)));
    }
    let port = match port {
        Some(port) => port
            .parse()
            .map_err(|_| Error::config(format!("MQTT URL '{}': bad port '{}'", url, port)))?,
        None => DEFAULT_MQTT_PORT,
    };
    Ok((host.to_string(), port))
}

/// Sink publishing changes to an MQTT broker
pub struct MqttSink {
    client: AsyncClient,
    topic: String,
    publish_timeout: Duration,
    cancel: CancellationToken,
}

impl MqttSink {
    /// Start the connection to the broker named in `config`
    ///
    /// Must be called inside a tokio runtime. The broker does not have to be
    /// reachable yet; publishes queue until it is.
    pub fn connect(config: &MqttConfig) -> Result<Self> {
        let (host, port) = parse_broker_url(&config.url)?;
        let mut options = MqttOptions::new(config.client_id.clone(), host.clone(), port);
        options.set_keep_alive(KEEP_ALIVE);

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let cancel = CancellationToken::new();
        tokio::spawn(drive(eventloop, cancel.clone()));
        info!(broker = %host, port, topic = %config.topic, "Publishing changes to MQTT");

        Ok(Self {
            client,
            topic: config.topic.trim_end_matches('/').to_string(),
            publish_timeout: config.publish_timeout(),
            cancel,
        })
    }

    pub fn topic_for(&self, zone: &Name) -> String {
        format!("{}/{}", self.topic, zone.to_string().trim_end_matches('.'))
    }
}

impl Drop for MqttSink {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn drive(mut eventloop: EventLoop, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => info!("Connected to MQTT broker"),
                Ok(_) => {}
                Err(e) => {
                    warn!("MQTT connection error: {}, retrying in {:?}", e, RECONNECT_DELAY);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                    }
                }
            },
        }
    }
    debug!("MQTT connection task stopped");
}

#[async_trait]
impl DeltaSink for MqttSink {
    async fn emit(&self, delta: &ZoneDelta) -> Result<()> {
        if delta.changes.is_empty() {
            return Ok(());
        }
        let topic = self.topic_for(&delta.zone);
        for change in &delta.changes {
            let payload = serde_json::to_vec(&PublishedChange::from(change))?;
            tokio::time::timeout(
                self.publish_timeout,
                self.client.publish(topic.clone(), QoS::AtLeastOnce, false, payload),
            )
            .await
            .map_err(|_| Error::sink(format!("MQTT publish to {} timed out", topic)))?
            .map_err(|e| Error::sink(format!("MQTT publish to {} failed: {}", topic, e)))?;
        }
        debug!(topic = %topic, changes = delta.changes.len(), "Changes queued for MQTT");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mqtt"
    }
}
