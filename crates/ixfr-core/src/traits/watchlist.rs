// # Watchlist Trait
//
// The set of zones to watch is owned outside the core. The scheduler reads
// the initial set with `list()` and then follows `watch()` for changes.

use std::pin::Pin;

use async_trait::async_trait;
use tokio_stream::Stream;

use crate::error::Result;
use crate::model::{WatchedZone, ZoneKey};

/// A change to the watchlist
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchlistEvent {
    /// Start watching a zone
    Added(WatchedZone),
    /// Stop watching a zone
    Removed(ZoneKey),
    /// Change parameters (port, interval, timeout) of a watched zone
    Updated(WatchedZone),
}

/// Source of watched zones
#[async_trait]
pub trait Watchlist: Send + Sync {
    /// Current set of zones
    async fn list(&self) -> Result<Vec<WatchedZone>>;

    /// Stream of changes after the initial list
    ///
    /// The stream ending means no further changes will arrive; zones already
    /// being watched keep running.
    fn watch(&self) -> Pin<Box<dyn Stream<Item = WatchlistEvent> + Send + 'static>>;
}
