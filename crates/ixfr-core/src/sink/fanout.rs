// # Fan-out Sink
//
// Delivers every delta to several sinks in order. A delta counts as
// delivered only when every sink accepted it; after a failure the next
// attempt repeats it to all of them, so the sinks before the failing one may
// see it twice.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{ZoneDelta, ZoneFailure};
use crate::traits::DeltaSink;

pub struct FanoutSink {
    sinks: Vec<Arc<dyn DeltaSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn DeltaSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl DeltaSink for FanoutSink {
    async fn emit(&self, delta: &ZoneDelta) -> Result<()> {
        for sink in &self.sinks {
            sink.emit(delta).await?;
        }
        Ok(())
    }

    /// Every sink gets the failure; the first error is returned
    async fn emit_failure(&self, failure: &ZoneFailure) -> Result<()> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.emit_failure(failure).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn flush(&self) -> Result<()> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.flush().await {
                tracing::warn!(sink = sink.name(), "Flush failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn name(&self) -> &'static str {
        "fanout"
    }
}
