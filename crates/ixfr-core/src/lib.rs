// # ixfr-core
//
// Core library for watching DNS zones through incremental zone transfers.
//
// ## Architecture Overview
//
// For every watched (zone, server) pair the library periodically asks the
// server for the zone's SOA serial, compares it with the last serial it saw,
// and when the zone moved on fetches the difference with IXFR (falling back
// to AXFR when the server cannot serve a diff). The resulting delta is handed
// to a sink; only then is the new serial recorded.
//
// - **Wire codec** (`wire`): DNS message encoding and decoding
// - **Serial** (`serial`): RFC 1982 serial number comparison
// - **Transport**: UDP/TCP exchange with an authoritative server
// - **IxfrSession**: one check-and-fetch cycle for one zone
// - **Scheduler**: one polling task per watched zone, with jitter and backoff
// - **ZoneStateStore**: last known serial per zone
// - **DeltaSink**: where zone deltas and failures go
// - **Watchlist**: the set of zones to watch, owned by the embedding program
//
// ## Design Principles
//
// 1. **Library-First**: The daemon is a thin wrapper; everything can be embedded
// 2. **Per-zone isolation**: A slow or failing zone never holds up another
// 3. **At-least-once delivery**: The serial only advances after the sink accepted the delta

pub mod backoff;
pub mod config;
pub mod error;
pub mod model;
pub mod report;
pub mod scheduler;
pub mod serial;
pub mod session;
pub mod sink;
pub mod state;
pub mod traits;
pub mod transport;
pub mod watchlist;
pub mod wire;

// Re-export core types for convenience
pub use config::{
    MqttConfig, SchedulerConfig, SinkConfig, StateStoreConfig, WatchConfig, ZoneConfig,
};
pub use error::{Error, Result};
pub use model::{
    ChangeOp, ResourceRecordChange, TransferKind, WatchedZone, ZoneDelta, ZoneFailure, ZoneKey,
};
pub use report::WatchReport;
pub use scheduler::{Scheduler, SchedulerEvent};
pub use serial::{Serial, SerialRelation};
pub use session::{IxfrSession, SessionConfig};
pub use sink::{ChannelSink, FanoutSink, JsonLinesSink, MqttSink, TracingSink};
pub use state::{FileStateStore, MemoryStateStore};
pub use traits::{DeltaSink, Watchlist, WatchlistEvent, ZoneState, ZoneStateStore};
pub use transport::{NetworkTransport, Transport, TransferStream};
pub use watchlist::{ChannelWatchlist, StaticWatchlist, WatchlistHandle};
