// # Watchlist Implementations
//
// - `StaticWatchlist`: a fixed set, typically built from configuration
// - `ChannelWatchlist`: a mutable set driven through a `WatchlistHandle`

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};
use tokio_stream::Stream;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::{Error, Result};
use crate::model::{WatchedZone, ZoneKey};
use crate::traits::{Watchlist, WatchlistEvent};

/// A watchlist that never changes
#[derive(Debug, Clone, Default)]
pub struct StaticWatchlist {
    zones: Vec<WatchedZone>,
}

impl StaticWatchlist {
    pub fn new(zones: Vec<WatchedZone>) -> Self {
        Self { zones }
    }
}

#[async_trait]
impl Watchlist for StaticWatchlist {
    async fn list(&self) -> Result<Vec<WatchedZone>> {
        Ok(self.zones.clone())
    }

    fn watch(&self) -> Pin<Box<dyn Stream<Item = WatchlistEvent> + Send + 'static>> {
        Box::pin(tokio_stream::empty())
    }
}

type Entries = Arc<RwLock<BTreeMap<String, WatchedZone>>>;

/// A watchlist changed at runtime through its [`WatchlistHandle`]
///
/// Only the first call to `watch()` receives events; later calls get an
/// empty stream.
#[derive(Debug)]
pub struct ChannelWatchlist {
    entries: Entries,
    events: Mutex<Option<mpsc::UnboundedReceiver<WatchlistEvent>>>,
}

/// Adds, removes and updates zones on a [`ChannelWatchlist`]
#[derive(Debug, Clone)]
pub struct WatchlistHandle {
    entries: Entries,
    tx: mpsc::UnboundedSender<WatchlistEvent>,
}

impl ChannelWatchlist {
    /// Create a watchlist seeded with `initial` and the handle that drives it
    pub fn new(initial: Vec<WatchedZone>) -> (Self, WatchlistHandle) {
        let entries: BTreeMap<String, WatchedZone> = initial
            .into_iter()
            .map(|zone| (entry_key(&zone.key()), zone))
            .collect();
        let entries = Arc::new(RwLock::new(entries));
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                entries: entries.clone(),
                events: Mutex::new(Some(rx)),
            },
            WatchlistHandle { entries, tx },
        )
    }
}

/// Map key: zone names compare case-insensitively
fn entry_key(key: &ZoneKey) -> String {
    key.to_string().to_ascii_lowercase()
}

#[async_trait]
impl Watchlist for ChannelWatchlist {
    async fn list(&self) -> Result<Vec<WatchedZone>> {
        Ok(self.entries.read().await.values().cloned().collect())
    }

    fn watch(&self) -> Pin<Box<dyn Stream<Item = WatchlistEvent> + Send + 'static>> {
        let rx = self.events.lock().ok().and_then(|mut slot| slot.take());
        match rx {
            Some(rx) => Box::pin(UnboundedReceiverStream::new(rx)),
            None => {
                tracing::warn!("Watchlist events already taken by another watcher");
                Box::pin(tokio_stream::empty())
            }
        }
    }
}

impl WatchlistHandle {
    // Each change is sent before it is applied, so a stopped consumer leaves
    // the list as it was. The write lock keeps events in list order.

    /// Start watching a zone
    ///
    /// Fails if the (zone, server) pair is already watched.
    pub async fn add(&self, zone: WatchedZone) -> Result<()> {
        let mut entries = self.entries.write().await;
        let key = entry_key(&zone.key());
        if entries.contains_key(&key) {
            return Err(Error::invalid_input(format!("{} is already watched", zone.key())));
        }
        self.send(WatchlistEvent::Added(zone.clone()))?;
        entries.insert(key, zone);
        Ok(())
    }

    /// Stop watching a zone; returns whether it was watched
    pub async fn remove(&self, key: &ZoneKey) -> Result<bool> {
        let mut entries = self.entries.write().await;
        let entry = entry_key(key);
        if !entries.contains_key(&entry) {
            return Ok(false);
        }
        self.send(WatchlistEvent::Removed(key.clone()))?;
        entries.remove(&entry);
        Ok(true)
    }

    /// Replace the parameters of a watched zone
    pub async fn update(&self, zone: WatchedZone) -> Result<()> {
        let mut entries = self.entries.write().await;
        let key = entry_key(&zone.key());
        if !entries.contains_key(&key) {
            return Err(Error::invalid_input(format!("{} is not watched", zone.key())));
        }
        self.send(WatchlistEvent::Updated(zone.clone()))?;
        entries.insert(key, zone);
        Ok(())
    }

    /// Current set of zones
    pub async fn list(&self) -> Vec<WatchedZone> {
        self.entries.read().await.values().cloned().collect()
    }

    fn send(&self, event: WatchlistEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| Error::Other("watchlist consumer has stopped".to_string()))
    }
}
