//! UDP/TCP transport over tokio sockets

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, trace};

use super::{TransferStream, Transport};
use crate::error::{Error, Result};
use crate::wire::HEADER_LEN;

/// Receive buffer used when no EDNS size is configured
pub const DEFAULT_UDP_PAYLOAD_SIZE: u16 = 1232;

/// Truncation bit in the second flags byte
const TC_BIT: u8 = 0x02;

/// Transport over real sockets
///
/// Every call opens its own socket or connection and closes it when the call
/// (or the returned transfer stream) is done.
#[derive(Debug, Clone)]
pub struct NetworkTransport {
    udp_payload_size: u16,
}

impl NetworkTransport {
    pub fn new() -> Self {
        Self {
            udp_payload_size: DEFAULT_UDP_PAYLOAD_SIZE,
        }
    }

    /// Size of the UDP receive buffer; should match the EDNS size advertised
    /// in queries
    pub fn with_udp_payload_size(mut self, size: u16) -> Self {
        self.udp_payload_size = size.max(512);
        self
    }

    async fn udp_exchange(&self, server: SocketAddr, request: &[u8]) -> Result<Vec<u8>> {
        let local: SocketAddr = if server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(server).await?;
        socket.send(request).await?;
        trace!(server = %server, bytes = request.len(), "UDP query sent");

        let mut buf = vec![0u8; self.udp_payload_size as usize];
        loop {
            let len = socket.recv(&mut buf).await?;
            let response = &buf[..len];
            // Stray or spoofed datagrams do not end the exchange
            if len < HEADER_LEN || response[..2] != request[..2] {
                debug!(server = %server, bytes = len, "Ignoring UDP datagram with mismatched id");
                continue;
            }
            return Ok(response.to_vec());
        }
    }

    async fn tcp_connect(server: SocketAddr, request: &[u8]) -> Result<TcpStream> {
        let len = u16::try_from(request.len())
            .map_err(|_| Error::invalid_input("request too large for TCP framing"))?;
        let mut stream = TcpStream::connect(server).await?;
        stream.set_nodelay(true)?;

        let mut framed = Vec::with_capacity(2 + request.len());
        framed.extend_from_slice(&len.to_be_bytes());
        framed.extend_from_slice(request);
        stream.write_all(&framed).await?;
        stream.flush().await?;
        Ok(stream)
    }

    async fn tcp_exchange(server: SocketAddr, request: &[u8]) -> Result<Vec<u8>> {
        let stream = Self::tcp_connect(server, request).await?;
        let mut reader = FramedReader::new(stream);
        reader.next_message().await?.ok_or_else(|| {
            Error::malformed(format!("{} closed the connection without answering", server))
        })
    }
}

impl Default for NetworkTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for NetworkTransport {
    async fn query(
        &self,
        server: SocketAddr,
        request: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        if request.len() < HEADER_LEN {
            return Err(Error::invalid_input("query shorter than a DNS header"));
        }

        let response = tokio::time::timeout(timeout, self.udp_exchange(server, request))
            .await
            .map_err(|_| Error::timeout(format!("no UDP response from {} in {:?}", server, timeout)))??;

        if response[2] & TC_BIT == 0 {
            return Ok(response);
        }

        debug!(server = %server, "UDP response truncated, retrying over TCP");
        tokio::time::timeout(timeout, Self::tcp_exchange(server, request))
            .await
            .map_err(|_| Error::timeout(format!("no TCP response from {} in {:?}", server, timeout)))?
    }

    async fn open_transfer(
        &self,
        server: SocketAddr,
        request: &[u8],
        timeout: Duration,
    ) -> Result<Box<dyn TransferStream>> {
        let stream = tokio::time::timeout(timeout, Self::tcp_connect(server, request))
            .await
            .map_err(|_| Error::timeout(format!("connecting to {} took over {:?}", server, timeout)))??;
        trace!(server = %server, "Transfer request sent");
        Ok(Box::new(FramedReader::new(stream)))
    }

    fn name(&self) -> &'static str {
        "network"
    }
}

/// Reads 2-byte length-prefixed DNS messages from a byte stream
#[derive(Debug)]
pub struct FramedReader<R> {
    inner: R,
}

impl<R> FramedReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let mut len_buf = [0u8; 2];
        // Zero bytes before a frame starts is a clean close
        if self.inner.read(&mut len_buf[..1]).await? == 0 {
            return Ok(None);
        }
        self.inner
            .read_exact(&mut len_buf[1..])
            .await
            .map_err(truncated)?;

        let len = u16::from_be_bytes(len_buf) as usize;
        if len == 0 {
            return Err(Error::malformed("zero-length message in stream"));
        }
        let mut msg = vec![0u8; len];
        self.inner.read_exact(&mut msg).await.map_err(truncated)?;
        Ok(Some(msg))
    }
}

fn truncated(err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::malformed("stream closed in the middle of a message")
    } else {
        Error::from(err)
    }
}

#[async_trait]
impl<R> TransferStream for FramedReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn next_message(&mut self) -> Result<Option<Vec<u8>>> {
        self.read_frame().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(msg: &[u8]) -> Vec<u8> {
        let mut out = (msg.len() as u16).to_be_bytes().to_vec();
        out.extend_from_slice(msg);
        out
    }

    #[tokio::test]
    async fn reads_frames_until_clean_close() {
        let mut data = frame(b"first message");
        data.extend(frame(b"second"));
        let mut reader = FramedReader::new(&data[..]);

        assert_eq!(reader.next_message().await.unwrap().unwrap(), b"first message");
        assert_eq!(reader.next_message().await.unwrap().unwrap(), b"second");
        assert!(reader.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn frames_split_across_reads() {
        let data = frame(b"split message");
        let mock = tokio_test::io::Builder::new()
            .read(&data[..1])
            .read(&data[1..5])
            .read(&data[5..])
            .build();
        let mut reader = FramedReader::new(mock);

        assert_eq!(reader.next_message().await.unwrap().unwrap(), b"split message");
        assert!(reader.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cut_inside_a_frame_is_malformed() {
        let data = frame(b"complete message");
        let mut reader = FramedReader::new(&data[..data.len() - 4]);
        assert!(matches!(
            reader.next_message().await,
            Err(Error::MalformedMessage(_))
        ));

        // Only half of the length prefix
        let mut reader = FramedReader::new(&[0x00u8][..]);
        assert!(matches!(
            reader.next_message().await,
            Err(Error::MalformedMessage(_))
        ));
    }

    #[tokio::test]
    async fn zero_length_frame_is_malformed() {
        let mut reader = FramedReader::new(&[0u8, 0][..]);
        assert!(reader.next_message().await.is_err());
    }
}
