//! Per-zone polling scheduler
//!
//! The Scheduler is responsible for:
//! - Running one polling task per watched zone
//! - Following watchlist changes (add, remove, update)
//! - Backing off after failed checks
//! - Stopping tasks within a grace period and flushing state on shutdown
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐
//! │  Watchlist  │─── WatchlistEvent ───┐
//! └─────────────┘                      │
//!                                      ▼
//!                             ┌──────────────┐
//!                             │  Scheduler   │
//!                             └──────────────┘
//!                                      │ one task per zone
//!              ┌───────────────────────┼───────────────────────┐
//!              ▼                       ▼                       ▼
//!      ┌──────────────┐        ┌──────────────┐        ┌──────────────┐
//!      │ IxfrSession  │        │ IxfrSession  │        │ IxfrSession  │
//!      └──────────────┘        └──────────────┘        └──────────────┘
//!              │                       │                       │
//!              └──────── ZoneStateStore / DeltaSink ───────────┘
//! ```
//!
//! ## Ordering
//!
//! Each zone task runs its sessions one after another, so two checks of the
//! same zone never overlap. Before a zone's task is replaced (on update) the
//! old one has fully stopped. Zones never wait on each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::{Backoff, initial_delay, with_jitter};
use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::model::{TransferKind, WatchedZone, ZoneKey};
use crate::serial::Serial;
use crate::session::IxfrSession;
use crate::traits::{DeltaSink, Watchlist, WatchlistEvent, ZoneStateStore};
use crate::transport::Transport;

/// Events emitted by the Scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// Scheduler started with the initial watchlist
    Started {
        zones_count: usize,
    },

    /// A zone task was started
    ZoneAdded {
        key: ZoneKey,
    },

    /// A zone task was stopped and its state discarded
    ZoneRemoved {
        key: ZoneKey,
    },

    /// A check completed and its delta (if any) was delivered
    CheckSucceeded {
        key: ZoneKey,
        kind: TransferKind,
        serial: Serial,
        changes: usize,
    },

    /// A check failed; the zone is retried after `retry_in`
    CheckFailed {
        key: ZoneKey,
        error: String,
        consecutive_failures: u32,
        retry_in: Duration,
    },

    /// Scheduler stopped
    Stopped {
        reason: String,
    },
}

/// Running task for one zone
struct ZoneTask {
    zone: WatchedZone,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Per-zone polling scheduler
///
/// ## Lifecycle
///
/// 1. Create with [`Scheduler::new()`]
/// 2. Start with [`Scheduler::run()`]
/// 3. Scheduler runs until a shutdown signal is received
/// 4. All zone tasks are stopped, then the state store and sink flushed
pub struct Scheduler {
    watchlist: Box<dyn Watchlist>,
    session: IxfrSession,
    store: Arc<dyn ZoneStateStore>,
    sink: Arc<dyn DeltaSink>,
    jitter_fraction: f64,
    max_backoff: Duration,
    cancel_grace: Duration,
    event_tx: mpsc::Sender<SchedulerEvent>,
}

impl Scheduler {
    /// Create a new scheduler
    ///
    /// # Returns
    ///
    /// A tuple of (scheduler, event_receiver) where event_receiver yields
    /// scheduler events
    pub fn new(
        watchlist: Box<dyn Watchlist>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn ZoneStateStore>,
        sink: Arc<dyn DeltaSink>,
        config: SchedulerConfig,
    ) -> Result<(Self, mpsc::Receiver<SchedulerEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.event_channel_capacity);
        let session = IxfrSession::new(
            transport,
            Arc::clone(&store),
            Arc::clone(&sink),
            config.session_config()?,
        );

        let scheduler = Self {
            watchlist,
            session,
            store,
            sink,
            jitter_fraction: config.jitter_fraction,
            max_backoff: config.max_backoff(),
            cancel_grace: config.cancel_grace(),
            event_tx: tx,
        };

        Ok((scheduler, rx))
    }

    /// Run until SIGINT
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Clean shutdown
    /// - `Err(Error)`: The watchlist could not be read, or flushing failed
    pub async fn run(&self) -> Result<()> {
        self.run_internal(None).await
    }

    /// Run until `shutdown_rx` fires (or its sender is dropped)
    ///
    /// With `None` this behaves like [`Scheduler::run`].
    pub async fn run_with_shutdown(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        self.run_internal(shutdown_rx).await
    }

    async fn run_internal(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        let initial = self.watchlist.list().await?;
        let mut events = self.watchlist.watch();
        let mut tasks: HashMap<ZoneKey, ZoneTask> = HashMap::new();

        for zone in initial {
            let key = zone.key();
            if tasks.contains_key(&key) {
                warn!(zone = %key, "Zone listed twice, ignoring duplicate");
                continue;
            }
            tasks.insert(key.clone(), self.spawn_zone(zone));
            self.emit_event(SchedulerEvent::ZoneAdded { key });
        }

        info!(sink = self.sink.name(), "Scheduler started with {} zones", tasks.len());
        self.emit_event(SchedulerEvent::Started {
            zones_count: tasks.len(),
        });

        let shutdown = async move {
            match shutdown_rx {
                Some(rx) => {
                    let _ = rx.await;
                }
                None => {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        warn!("Failed to listen for shutdown signal: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
        };
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }

                Some(event) = events.next() => {
                    self.handle_watchlist_event(&mut tasks, event).await;
                }
            }
        }

        self.stop_all(tasks).await;

        let store_result = self.store.flush().await;
        let sink_result = self.sink.flush().await;
        self.emit_event(SchedulerEvent::Stopped {
            reason: "Shutdown signal".to_string(),
        });
        store_result?;
        sink_result?;
        info!("State flushed, scheduler stopped");

        Ok(())
    }

    async fn handle_watchlist_event(
        &self,
        tasks: &mut HashMap<ZoneKey, ZoneTask>,
        event: WatchlistEvent,
    ) {
        match event {
            WatchlistEvent::Added(zone) | WatchlistEvent::Updated(zone) => {
                let key = zone.key();
                match tasks.remove(&key) {
                    Some(task) if task.zone == zone => {
                        debug!(zone = %key, "Zone already watched with the same settings");
                        tasks.insert(key, task);
                    }
                    Some(task) => {
                        info!(zone = %key, "Zone settings changed, restarting its task");
                        self.stop_task(&key, task).await;
                        tasks.insert(key, self.spawn_zone(zone));
                    }
                    None => {
                        info!(zone = %key, "Watching zone");
                        tasks.insert(key.clone(), self.spawn_zone(zone));
                        self.emit_event(SchedulerEvent::ZoneAdded { key });
                    }
                }
            }
            WatchlistEvent::Removed(key) => {
                let Some(task) = tasks.remove(&key) else {
                    debug!(zone = %key, "Removed zone was not being watched");
                    return;
                };
                self.stop_task(&key, task).await;
                if let Err(e) = self.store.remove(&key).await {
                    warn!(zone = %key, "Failed to discard zone state: {}", e);
                }
                info!(zone = %key, "Stopped watching zone");
                self.emit_event(SchedulerEvent::ZoneRemoved { key });
            }
        }
    }

    fn spawn_zone(&self, zone: WatchedZone) -> ZoneTask {
        let cancel = CancellationToken::new();
        let poller = ZonePoller {
            zone: zone.clone(),
            session: self.session.clone(),
            backoff: Backoff::new(zone.poll_interval, self.max_backoff),
            jitter_fraction: self.jitter_fraction,
            event_tx: self.event_tx.clone(),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(poller.run());
        ZoneTask {
            zone,
            cancel,
            handle,
        }
    }

    /// Cancel one task and wait for it to finish
    async fn stop_task(&self, key: &ZoneKey, task: ZoneTask) {
        task.cancel.cancel();
        join_or_abort(key, task.handle, Instant::now() + self.cancel_grace).await;
    }

    /// Cancel every task, then wait for all of them under one deadline
    async fn stop_all(&self, tasks: HashMap<ZoneKey, ZoneTask>) {
        for task in tasks.values() {
            task.cancel.cancel();
        }
        let deadline = Instant::now() + self.cancel_grace;
        for (key, task) in tasks {
            join_or_abort(&key, task.handle, deadline).await;
        }
    }

    /// Emit a scheduler event
    fn emit_event(&self, event: SchedulerEvent) {
        emit_event(&self.event_tx, event);
    }
}

async fn join_or_abort(key: &ZoneKey, mut handle: JoinHandle<()>, deadline: Instant) {
    if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
        warn!(zone = %key, "Zone task did not stop within the grace period, aborting");
        handle.abort();
        let _ = handle.await;
    }
}

fn emit_event(tx: &mpsc::Sender<SchedulerEvent>, event: SchedulerEvent) {
    // Channel is full: event processing is slower than event generation
    if tx.try_send(event).is_err() {
        warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
    }
}

/// The polling loop of one zone
struct ZonePoller {
    zone: WatchedZone,
    session: IxfrSession,
    backoff: Backoff,
    jitter_fraction: f64,
    event_tx: mpsc::Sender<SchedulerEvent>,
    cancel: CancellationToken,
}

impl ZonePoller {
    async fn run(mut self) {
        let key = self.zone.key();
        let mut delay = initial_delay(self.zone.poll_interval, self.jitter_fraction);
        debug!(zone = %key, "First check in {:?}", delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            // Dropping an in-flight session releases its connection
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = self.session.run(&self.zone) => result,
            };

            delay = match result {
                Ok(delta) => {
                    self.backoff.reset();
                    emit_event(
                        &self.event_tx,
                        SchedulerEvent::CheckSucceeded {
                            key: key.clone(),
                            kind: delta.kind,
                            serial: delta.new_serial,
                            changes: delta.changes.len(),
                        },
                    );
                    with_jitter(self.zone.poll_interval, self.jitter_fraction)
                }
                Err(e) => {
                    let retry_in =
                        with_jitter(self.backoff.fail(), self.jitter_fraction).min(self.backoff.max());
                    warn!(
                        zone = %key,
                        failures = self.backoff.failures(),
                        "Check failed, retrying in {:?}: {}",
                        retry_in,
                        e
                    );
                    emit_event(
                        &self.event_tx,
                        SchedulerEvent::CheckFailed {
                            key: key.clone(),
                            error: e.to_string(),
                            consecutive_failures: self.backoff.failures(),
                            retry_in,
                        },
                    );
                    retry_in
                }
            };
        }

        debug!(zone = %key, "Zone task stopped");
    }
}
