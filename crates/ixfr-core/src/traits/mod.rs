//! Core traits for the zone watcher
//!
//! Seams between the engine and its collaborators:
//!
//! - [`ZoneStateStore`]: per-zone baseline serial and check bookkeeping
//! - [`DeltaSink`]: where deltas and failure records go
//! - [`Watchlist`]: which zones to watch, and changes to that set

pub mod sink;
pub mod state_store;
pub mod watchlist;

pub use sink::DeltaSink;
pub use state_store::{ZoneState, ZoneStateStore};
pub use watchlist::{Watchlist, WatchlistEvent};
