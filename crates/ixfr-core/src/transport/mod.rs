// # Transport
//
// Moves raw DNS messages between the watcher and an authoritative server.
//
// Two kinds of exchange:
// - `query`: one request, one response. SOA checks go over UDP and are
//   retried once over TCP when the answer comes back truncated.
// - `open_transfer`: IXFR/AXFR requests always go over TCP. The returned
//   stream yields the length-prefixed response messages one at a time; the
//   caller decides when the transfer is complete and drops the stream, which
//   closes the connection.
//
// Connections are owned by the value returned from each call, so every exit
// path (success, decode error, timeout, cancellation) releases them.

pub mod net;

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use net::{FramedReader, NetworkTransport};

/// Sends DNS messages to a server
#[async_trait]
pub trait Transport: Send + Sync {
    /// Single request/response exchange
    ///
    /// # Errors
    ///
    /// - `Timeout` if no matching response arrives within `timeout`
    /// - `ConnectionRefused` / `Network` for transport failures
    async fn query(&self, server: SocketAddr, request: &[u8], timeout: Duration)
    -> Result<Vec<u8>>;

    /// Send a zone transfer request over a reliable stream
    ///
    /// `timeout` bounds connecting and sending the request; bounding the
    /// whole transfer is up to the caller.
    async fn open_transfer(
        &self,
        server: SocketAddr,
        request: &[u8],
        timeout: Duration,
    ) -> Result<Box<dyn TransferStream>>;

    /// Transport name for logging
    fn name(&self) -> &'static str;
}

/// Response messages of one zone transfer
#[async_trait]
pub trait TransferStream: Send {
    /// Next complete response message
    ///
    /// Returns `Ok(None)` when the server closed the stream cleanly between
    /// messages. A stream cut inside a message is `MalformedMessage`.
    async fn next_message(&mut self) -> Result<Option<Vec<u8>>>;
}
