//! Test doubles and common utilities for contract tests
//!
//! The central double is [`FakeAuthority`], a scripted authoritative server
//! behind the [`Transport`] trait. It keeps a serial history per zone and
//! answers SOA, IXFR and AXFR requests from it the way a real server would.

#![allow(dead_code)]

use async_trait::async_trait;
use ixfr_core::config::SchedulerConfig;
use ixfr_core::error::{Error, Result};
use ixfr_core::model::{WatchedZone, ZoneDelta, ZoneFailure, ZoneKey};
use ixfr_core::serial::Serial;
use ixfr_core::session::{IxfrSession, SessionConfig};
use ixfr_core::state::MemoryStateStore;
use ixfr_core::traits::{DeltaSink, ZoneState, ZoneStateStore};
use ixfr_core::transport::{TransferStream, Transport};
use ixfr_core::wire::{Class, Message, Name, Rcode, Record, RecordData, Rtype, Soa};
use ixfr_core::SchedulerEvent;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Server address used by watched zones in tests
pub const SERVER: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 53));

pub fn name(s: &str) -> Name {
    s.parse().expect("valid name")
}

pub fn soa_record(zone: &Name, serial: u32) -> Record {
    Record::new(
        zone.clone(),
        Class::IN,
        3600,
        RecordData::Soa(Soa {
            mname: name(&format!("ns1.{}", zone)),
            rname: name(&format!("hostmaster.{}", zone)),
            serial: Serial::from(serial),
            refresh: 3600,
            retry: 600,
            expire: 86400,
            minimum: 300,
        }),
    )
}

pub fn a_record(owner: &str, ip: [u8; 4]) -> Record {
    Record::new(name(owner), Class::IN, 300, RecordData::A(Ipv4Addr::from(ip)))
}

pub fn rrsig_record(owner: &str) -> Record {
    Record::new(
        name(owner),
        Class::IN,
        300,
        RecordData::Other {
            rtype: Rtype::RRSIG,
            data: bytes::Bytes::from_static(&[0, 1, 2, 3]),
        },
    )
}

/// A watched zone on [`SERVER`] with a short interval
pub fn watched(zone: &str, poll_ms: u64) -> WatchedZone {
    WatchedZone::new(name(zone), SERVER)
        .with_poll_interval(Duration::from_millis(poll_ms))
        .with_transfer_timeout(Duration::from_millis(500))
}

/// Scheduler settings for fast, deterministic tests
pub fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        jitter_fraction: 0.0,
        max_backoff_ms: 400,
        query_timeout_ms: 200,
        cancel_grace_ms: 200,
        event_channel_capacity: 1000,
        ..SchedulerConfig::default()
    }
}

pub fn session_config(emit_unchanged: bool) -> SessionConfig {
    SessionConfig {
        query_timeout: Duration::from_millis(200),
        emit_unchanged,
        ..SessionConfig::default()
    }
}

pub fn new_session(
    transport: Arc<dyn Transport>,
    store: Arc<dyn ZoneStateStore>,
    sink: Arc<dyn DeltaSink>,
    emit_unchanged: bool,
) -> IxfrSession {
    IxfrSession::new(transport, store, sink, session_config(emit_unchanged))
}

/// Wait for the first scheduler event matching `pred`
pub async fn wait_for_event<F>(
    rx: &mut mpsc::Receiver<SchedulerEvent>,
    timeout: Duration,
    mut pred: F,
) -> Option<SchedulerEvent>
where
    F: FnMut(&SchedulerEvent) -> bool,
{
    tokio::time::timeout(timeout, async {
        while let Some(event) = rx.recv().await {
            if pred(&event) {
                return Some(event);
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}

//------------ FakeAuthority ---------------------------------------------------

struct Diff {
    from: u32,
    to: u32,
    removed: Vec<Record>,
    added: Vec<Record>,
}

struct ZoneData {
    serial: u32,
    records: Vec<Record>,
    diffs: Vec<Diff>,
}

struct Options {
    ixfr_supported: bool,
    soa_rcode: Rcode,
    transfer_rcode: Rcode,
    query_delay: Duration,
    stall_transfers: bool,
    records_per_message: usize,
    opening_soa_alone: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            ixfr_supported: true,
            soa_rcode: Rcode::NOERROR,
            transfer_rcode: Rcode::NOERROR,
            query_delay: Duration::ZERO,
            stall_transfers: false,
            records_per_message: 100,
            opening_soa_alone: false,
        }
    }
}

#[derive(Default)]
struct Counters {
    soa_queries: AtomicUsize,
    transfers: Mutex<Vec<(Name, Rtype)>>,
    open_streams: AtomicUsize,
    in_flight: Mutex<HashMap<Name, usize>>,
    max_same_zone: AtomicUsize,
    total_in_flight: AtomicUsize,
    max_total: AtomicUsize,
}

/// Counts a query as in flight until dropped
struct InFlight {
    counters: Arc<Counters>,
    zone: Name,
}

impl InFlight {
    fn enter(counters: &Arc<Counters>, zone: &Name) -> Self {
        {
            let mut map = counters.in_flight.lock().unwrap();
            let n = map.entry(zone.clone()).or_insert(0);
            *n += 1;
            counters.max_same_zone.fetch_max(*n, Ordering::SeqCst);
        }
        let total = counters.total_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.max_total.fetch_max(total, Ordering::SeqCst);
        Self {
            counters: Arc::clone(counters),
            zone: zone.clone(),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Some(n) = self.counters.in_flight.lock().unwrap().get_mut(&self.zone) {
            *n -= 1;
        }
        self.counters.total_in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Scripted authoritative server
#[derive(Default)]
pub struct FakeAuthority {
    zones: Mutex<HashMap<Name, ZoneData>>,
    options: Mutex<Options>,
    counters: Arc<Counters>,
}

impl FakeAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `zone` at `serial` with the given records (SOA excluded)
    pub fn add_zone(&self, zone: &str, serial: u32, records: Vec<Record>) {
        self.zones.lock().unwrap().insert(
            name(zone),
            ZoneData {
                serial,
                records,
                diffs: Vec::new(),
            },
        );
    }

    /// Apply a change and bump the serial by one, keeping the diff for IXFR
    pub fn commit(&self, zone: &str, removed: Vec<Record>, added: Vec<Record>) -> u32 {
        let mut zones = self.zones.lock().unwrap();
        let data = zones.get_mut(&name(zone)).expect("zone served");
        let from = data.serial;
        let to = from.wrapping_add(1);
        data.records.retain(|r| !removed.contains(r));
        data.records.extend(added.iter().cloned());
        data.diffs.push(Diff {
            from,
            to,
            removed,
            added,
        });
        data.serial = to;
        to
    }

    /// Change the serial without a diff (e.g. a zone restored from backup)
    pub fn set_serial(&self, zone: &str, serial: u32) {
        let mut zones = self.zones.lock().unwrap();
        zones.get_mut(&name(zone)).expect("zone served").serial = serial;
    }

    pub fn set_ixfr_supported(&self, supported: bool) {
        self.options.lock().unwrap().ixfr_supported = supported;
    }

    pub fn set_soa_rcode(&self, rcode: Rcode) {
        self.options.lock().unwrap().soa_rcode = rcode;
    }

    pub fn set_transfer_rcode(&self, rcode: Rcode) {
        self.options.lock().unwrap().transfer_rcode = rcode;
    }

    pub fn set_query_delay(&self, delay: Duration) {
        self.options.lock().unwrap().query_delay = delay;
    }

    pub fn set_stall_transfers(&self, stall: bool) {
        self.options.lock().unwrap().stall_transfers = stall;
    }

    pub fn set_records_per_message(&self, n: usize) {
        self.options.lock().unwrap().records_per_message = n.max(1);
    }

    /// Send the first SOA of every transfer in a message of its own
    pub fn set_opening_soa_alone(&self, alone: bool) {
        self.options.lock().unwrap().opening_soa_alone = alone;
    }

    pub fn soa_queries(&self) -> usize {
        self.counters.soa_queries.load(Ordering::SeqCst)
    }

    /// Transfer types requested so far, in order
    pub fn transfers(&self) -> Vec<Rtype> {
        self.counters
            .transfers
            .lock()
            .unwrap()
            .iter()
            .map(|(_, t)| *t)
            .collect()
    }

    pub fn transfers_for(&self, zone: &str) -> usize {
        let zone = name(zone);
        self.counters
            .transfers
            .lock()
            .unwrap()
            .iter()
            .filter(|(z, _)| *z == zone)
            .count()
    }

    /// Transfer streams handed out and not yet dropped
    pub fn open_streams(&self) -> usize {
        self.counters.open_streams.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous queries seen for any one zone
    pub fn max_same_zone_in_flight(&self) -> usize {
        self.counters.max_same_zone.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous queries across all zones
    pub fn max_total_in_flight(&self) -> usize {
        self.counters.max_total.load(Ordering::SeqCst)
    }

    fn transfer_records(&self, zone: &Name, request: &Message) -> Vec<Record> {
        let zones = self.zones.lock().unwrap();
        let Some(data) = zones.get(zone) else {
            return Vec::new();
        };
        let current = soa_record(zone, data.serial);
        let axfr = || {
            let mut records = vec![current.clone()];
            records.extend(data.records.iter().cloned());
            records.push(current.clone());
            records
        };

        if request.qtype() != Some(Rtype::IXFR) {
            return axfr();
        }
        let Some(known) = request
            .authority
            .first()
            .and_then(|r| r.data.as_soa())
            .map(|soa| soa.serial.get())
        else {
            return axfr();
        };
        if known == data.serial {
            return vec![current];
        }
        if !self.options.lock().unwrap().ixfr_supported {
            return axfr();
        }

        let Some(start) = data.diffs.iter().position(|d| d.from == known) else {
            return axfr();
        };
        let mut records = vec![current.clone()];
        for diff in &data.diffs[start..] {
            records.push(soa_record(zone, diff.from));
            records.extend(diff.removed.iter().cloned());
            records.push(soa_record(zone, diff.to));
            records.extend(diff.added.iter().cloned());
        }
        records.push(current);
        records
    }
}

#[async_trait]
impl Transport for FakeAuthority {
    async fn query(&self, _server: SocketAddr, request: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        let request = Message::decode(request)?;
        let zone = request.questions[0].name.clone();
        self.counters.soa_queries.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight::enter(&self.counters, &zone);

        let (delay, rcode) = {
            let options = self.options.lock().unwrap();
            (options.query_delay, options.soa_rcode)
        };
        if delay > timeout {
            tokio::time::sleep(timeout).await;
            return Err(Error::timeout("fake server did not answer"));
        }
        tokio::time::sleep(delay).await;

        let mut response = Message::response_to(&request);
        let serial = self.zones.lock().unwrap().get(&zone).map(|d| d.serial);
        match (rcode, serial) {
            (Rcode::NOERROR, Some(serial)) => response.answers.push(soa_record(&zone, serial)),
            (Rcode::NOERROR, None) => response.header.rcode = Rcode::NOTAUTH,
            (rcode, _) => response.header.rcode = rcode,
        }
        Ok(response.encode())
    }

    async fn open_transfer(
        &self,
        _server: SocketAddr,
        request: &[u8],
        _timeout: Duration,
    ) -> Result<Box<dyn TransferStream>> {
        let request = Message::decode(request)?;
        let zone = request.questions[0].name.clone();
        let qtype = request.qtype().unwrap_or(Rtype::AXFR);
        self.counters
            .transfers
            .lock()
            .unwrap()
            .push((zone.clone(), qtype));

        let guard = StreamGuard::new(&self.counters);
        let (stall, rcode, per_message, soa_alone) = {
            let options = self.options.lock().unwrap();
            (
                options.stall_transfers,
                options.transfer_rcode,
                options.records_per_message,
                options.opening_soa_alone,
            )
        };
        if stall {
            return Ok(Box::new(StalledStream { _guard: Some(guard) }));
        }

        let mut messages = VecDeque::new();
        if rcode != Rcode::NOERROR {
            let mut response = Message::response_to(&request);
            response.header.rcode = rcode;
            messages.push_back(response.encode());
        } else {
            let records = self.transfer_records(&zone, &request);
            let (first, rest) = if soa_alone && records.len() > 1 {
                records.split_at(1)
            } else {
                (&records[..0], &records[..])
            };
            let chunks = std::iter::once(first)
                .filter(|chunk| !chunk.is_empty())
                .chain(rest.chunks(per_message));
            for chunk in chunks {
                let mut response = Message::response_to(&request);
                response.answers = chunk.to_vec();
                messages.push_back(response.encode());
            }
        }
        Ok(Box::new(ScriptedStream {
            messages,
            _guard: guard,
        }))
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Counts an open transfer stream until dropped
struct StreamGuard(Arc<Counters>);

impl StreamGuard {
    fn new(counters: &Arc<Counters>) -> Self {
        counters.open_streams.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counters))
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.0.open_streams.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ScriptedStream {
    messages: VecDeque<Vec<u8>>,
    _guard: StreamGuard,
}

#[async_trait]
impl TransferStream for ScriptedStream {
    async fn next_message(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.messages.pop_front())
    }
}

/// A stream whose next message never arrives
pub struct StalledStream {
    _guard: Option<StreamGuard>,
}

#[async_trait]
impl TransferStream for StalledStream {
    async fn next_message(&mut self) -> Result<Option<Vec<u8>>> {
        std::future::pending().await
    }
}

//------------ Other transports -----------------------------------------------

/// A transport whose server refuses every connection
#[derive(Default)]
pub struct FailingTransport {
    calls: AtomicUsize,
}

impl FailingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FailingTransport {
    async fn query(&self, server: SocketAddr, _request: &[u8], _timeout: Duration) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::ConnectionRefused(format!("{} refused", server)))
    }

    async fn open_transfer(
        &self,
        server: SocketAddr,
        _request: &[u8],
        _timeout: Duration,
    ) -> Result<Box<dyn TransferStream>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::ConnectionRefused(format!("{} refused", server)))
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

/// A transport that never answers and ignores timeouts
///
/// Only cancellation ends its calls.
#[derive(Default)]
pub struct StalledTransport {
    active: Arc<AtomicUsize>,
    calls: AtomicUsize,
}

struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl StalledTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls currently waiting
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for StalledTransport {
    async fn query(&self, _server: SocketAddr, _request: &[u8], _timeout: Duration) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_add(1, Ordering::SeqCst);
        let _guard = ActiveGuard(Arc::clone(&self.active));
        std::future::pending().await
    }

    async fn open_transfer(
        &self,
        _server: SocketAddr,
        _request: &[u8],
        _timeout: Duration,
    ) -> Result<Box<dyn TransferStream>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_add(1, Ordering::SeqCst);
        let _guard = ActiveGuard(Arc::clone(&self.active));
        std::future::pending().await
    }

    fn name(&self) -> &'static str {
        "stalled"
    }
}

//------------ State store and sink -------------------------------------------

/// A state store that counts calls, backed by [`MemoryStateStore`]
#[derive(Default)]
pub struct MockStateStore {
    inner: MemoryStateStore,
    get_calls: AtomicUsize,
    success_calls: AtomicUsize,
    failure_calls: AtomicUsize,
    flush_calls: AtomicUsize,
}

impl MockStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_call_count(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn success_call_count(&self) -> usize {
        self.success_calls.load(Ordering::SeqCst)
    }

    pub fn failure_call_count(&self) -> usize {
        self.failure_calls.load(Ordering::SeqCst)
    }

    pub fn flush_call_count(&self) -> usize {
        self.flush_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ZoneStateStore for MockStateStore {
    async fn get(&self, key: &ZoneKey) -> Result<Option<ZoneState>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn record_success(&self, key: &ZoneKey, serial: Serial, at: DateTime<Utc>) -> Result<()> {
        self.success_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.record_success(key, serial, at).await
    }

    async fn record_check(&self, key: &ZoneKey, at: DateTime<Utc>) -> Result<()> {
        self.inner.record_check(key, at).await
    }

    async fn record_failure(&self, key: &ZoneKey, at: DateTime<Utc>) -> Result<u32> {
        self.failure_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.record_failure(key, at).await
    }

    async fn reset(&self, key: &ZoneKey) -> Result<()> {
        self.inner.reset(key).await
    }

    async fn remove(&self, key: &ZoneKey) -> Result<()> {
        self.inner.remove(key).await
    }

    async fn list(&self) -> Result<Vec<(ZoneKey, ZoneState)>> {
        self.inner.list().await
    }

    async fn flush(&self) -> Result<()> {
        self.flush_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A sink that keeps everything it receives and can be told to fail
#[derive(Default)]
pub struct RecordingSink {
    deltas: Mutex<Vec<ZoneDelta>>,
    failures: Mutex<Vec<ZoneFailure>>,
    fail: AtomicBool,
    flushes: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deltas(&self) -> Vec<ZoneDelta> {
        self.deltas.lock().unwrap().clone()
    }

    pub fn failures(&self) -> Vec<ZoneFailure> {
        self.failures.lock().unwrap().clone()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeltaSink for RecordingSink {
    async fn emit(&self, delta: &ZoneDelta) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::sink("disk full"));
        }
        self.deltas.lock().unwrap().push(delta.clone());
        Ok(())
    }

    async fn emit_failure(&self, failure: &ZoneFailure) -> Result<()> {
        self.failures.lock().unwrap().push(failure.clone());
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}
