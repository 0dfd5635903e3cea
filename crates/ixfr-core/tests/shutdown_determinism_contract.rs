//! Contract Test: Shutdown Determinism
//!
//! This test verifies that shutdown is deterministic and complete.
//!
//! Constraints verified:
//! - Scheduler terminates on shutdown signal
//! - All zone tasks exit, including ones stuck on the network
//! - Network resources held by cancelled checks are released
//! - State store and sink are flushed before exit
//!
//! If this test fails, someone has added:
//! - Detached background tasks
//! - Tasks that ignore cancellation
//! - Blocking operations in shutdown path

mod common;

use common::*;
use ixfr_core::{Scheduler, SchedulerEvent, StaticWatchlist};
use std::sync::Arc;
use std::time::Duration;

fn idle_scheduler(
    store: Arc<MockStateStore>,
    sink: Arc<RecordingSink>,
) -> (Scheduler, tokio::sync::mpsc::Receiver<SchedulerEvent>) {
    let server = Arc::new(FakeAuthority::new());
    server.add_zone("example.com", 1, vec![]);
    let watchlist = StaticWatchlist::new(vec![watched("example.com", 60_000)]);
    Scheduler::new(Box::new(watchlist), server, store, sink, fast_config())
        .expect("scheduler construction succeeds")
}

#[tokio::test]
async fn shutdown_signal_terminates_scheduler() {
    let (scheduler, _events) = idle_scheduler(
        Arc::new(MockStateStore::new()),
        Arc::new(RecordingSink::new()),
    );
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    let handle = tokio::spawn(async move { scheduler.run_with_shutdown(Some(shutdown_rx)).await });

    // Wait for startup
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(shutdown_tx.send(()).is_ok(), "shutdown signal send succeeds");

    let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
    assert!(result.is_ok(), "Scheduler should terminate within 5 seconds");

    let run_result = result.unwrap().unwrap();
    assert!(
        run_result.is_ok(),
        "Scheduler should shut down successfully: {:?}",
        run_result
    );
}

#[tokio::test]
async fn shutdown_flushes_state_and_sink() {
    let store = Arc::new(MockStateStore::new());
    let sink = Arc::new(RecordingSink::new());
    let (scheduler, _events) = idle_scheduler(store.clone(), sink.clone());
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    let handle = tokio::spawn(async move { scheduler.run_with_shutdown(Some(shutdown_rx)).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(store.flush_call_count(), 0, "flushed before shutdown");
    shutdown_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();

    assert_eq!(store.flush_call_count(), 1);
    assert_eq!(sink.flush_count(), 1);
}

#[tokio::test]
async fn dropped_shutdown_sender_also_stops() {
    let (scheduler, _events) = idle_scheduler(
        Arc::new(MockStateStore::new()),
        Arc::new(RecordingSink::new()),
    );
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let handle = tokio::spawn(async move { scheduler.run_with_shutdown(Some(shutdown_rx)).await });

    drop(shutdown_tx);
    let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
    assert!(result.is_ok(), "Scheduler kept running without a shutdown sender");
}

#[tokio::test]
async fn stuck_checks_are_cancelled_within_grace() {
    let transport = Arc::new(StalledTransport::new());
    let watchlist = StaticWatchlist::new(vec![
        watched("a.example", 20),
        watched("b.example", 20),
        watched("c.example", 20),
    ]);
    let (scheduler, _events) = Scheduler::new(
        Box::new(watchlist),
        transport.clone(),
        Arc::new(MockStateStore::new()),
        Arc::new(RecordingSink::new()),
        fast_config(),
    )
    .unwrap();

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let handle = tokio::spawn(async move { scheduler.run_with_shutdown(Some(shutdown_rx)).await });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while transport.active() < 3 {
        assert!(tokio::time::Instant::now() < deadline, "checks never started");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let started = tokio::time::Instant::now();
    shutdown_tx.send(()).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
    assert!(result.is_ok(), "Scheduler did not stop with stuck checks");
    result.unwrap().unwrap().unwrap();

    // fast_config() allows 200ms of grace
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(transport.active(), 0, "cancelled checks still hold the transport");
    assert_eq!(transport.calls(), 3, "a zone was checked twice at once");
}

#[tokio::test]
async fn lifecycle_events_bracket_the_run() {
    let (scheduler, mut events) = idle_scheduler(
        Arc::new(MockStateStore::new()),
        Arc::new(RecordingSink::new()),
    );
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let handle = tokio::spawn(async move { scheduler.run_with_shutdown(Some(shutdown_rx)).await });

    let started = wait_for_event(&mut events, Duration::from_secs(3), |e| {
        matches!(e, SchedulerEvent::Started { .. })
    })
    .await;
    assert_eq!(started, Some(SchedulerEvent::Started { zones_count: 1 }));

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();

    let mut last = None;
    while let Ok(event) = events.try_recv() {
        last = Some(event);
    }
    assert!(
        matches!(last, Some(SchedulerEvent::Stopped { .. })),
        "last event was {:?}",
        last
    );
}
