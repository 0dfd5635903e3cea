// # Channel Sink
//
// Hands deltas to the embedding program over a bounded mpsc channel. When
// the channel is full `emit` waits, so a slow consumer slows the zone tasks
// down instead of losing deltas.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::model::{ZoneDelta, ZoneFailure};
use crate::traits::DeltaSink;

/// What a [`ChannelSink`] delivers
#[derive(Debug, Clone)]
pub enum SinkMessage {
    Delta(ZoneDelta),
    Failure(ZoneFailure),
}

/// Sink forwarding into an mpsc channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<SinkMessage>,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its channel
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SinkMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    async fn send(&self, msg: SinkMessage) -> Result<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| Error::sink("receiver dropped"))
    }
}

#[async_trait]
impl DeltaSink for ChannelSink {
    async fn emit(&self, delta: &ZoneDelta) -> Result<()> {
        self.send(SinkMessage::Delta(delta.clone())).await
    }

    async fn emit_failure(&self, failure: &ZoneFailure) -> Result<()> {
        self.send(SinkMessage::Failure(failure.clone())).await
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}
