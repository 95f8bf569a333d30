//! TCP Transport
//!
//! Length-prefixed framing over a TCP stream: a 4-byte big-endian length
//! followed by exactly that many payload bytes. The read and write halves
//! are locked independently so a slow reader never blocks senders.

use crate::connection::{
    generate_connection_id, idle_expired, ActivityClock, CloseSignal, Connection,
    ConnectionCounters, ConnectionId, ConnectionStats,
};
use crate::{Endpoint, Result, TransportError, TransportPolicy};
use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use std::fmt;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Size of the big-endian length prefix
pub const LENGTH_PREFIX_SIZE: usize = 4;

struct ReadState {
    half: OwnedReadHalf,
    buffer: BytesMut,
}

struct WriteState {
    half: OwnedWriteHalf,
    /// Reusable write buffer so prefix and payload go out in one call
    buffer: BytesMut,
}

/// Framed TCP connection
pub struct TcpConnection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    policy: TransportPolicy,
    reader: Mutex<ReadState>,
    writer: Mutex<WriteState>,
    closed: CloseSignal,
    clock: ActivityClock,
    counters: ConnectionCounters,
}

impl fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpConnection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("open", &!self.closed.is_closed())
            .finish()
    }
}

impl TcpConnection {
    pub(crate) fn new(stream: TcpStream, peer_addr: SocketAddr, policy: TransportPolicy) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }
        let (read_half, write_half) = stream.into_split();
        let clock = ActivityClock::new();
        clock.touch();

        Self {
            id: generate_connection_id(),
            peer_addr,
            policy,
            reader: Mutex::new(ReadState {
                half: read_half,
                buffer: BytesMut::with_capacity(64 * 1024),
            }),
            writer: Mutex::new(WriteState {
                half: write_half,
                buffer: BytesMut::with_capacity(64 * 1024),
            }),
            closed: CloseSignal::new(),
            clock,
            counters: ConnectionCounters::default(),
        }
    }

    /// Connect to a `tcp://` endpoint within the policy's connect timeout
    pub async fn connect(endpoint: &Endpoint, policy: &TransportPolicy) -> Result<Self> {
        let address = endpoint.socket_address();
        info!("Connecting to TCP peer at {}", address);

        let stream = tokio::time::timeout(policy.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| {
                TransportError::timeout("TCP connect", policy.connect_timeout.as_millis() as u64)
            })?
            .map_err(|e| {
                TransportError::connection_with_source("Failed to connect to TCP peer", endpoint.to_string(), e)
            })?;

        let peer_addr = stream.peer_addr().map_err(|e| {
            TransportError::connection_with_source("Failed to get peer address", endpoint.to_string(), e)
        })?;

        debug!(peer = %peer_addr, "TCP connection established");
        Ok(Self::new(stream, peer_addr, policy.clone()))
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Split one complete frame off the front of the buffer if present
    fn take_frame(&self, buffer: &mut BytesMut) -> Result<Option<Bytes>> {
        if buffer.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        prefix.copy_from_slice(&buffer[..LENGTH_PREFIX_SIZE]);
        let frame_len = u32::from_be_bytes(prefix) as usize;

        if frame_len > self.policy.max_frame_size {
            return Err(TransportError::protocol(format!(
                "Frame size {} exceeds maximum {}",
                frame_len, self.policy.max_frame_size
            )));
        }
        if buffer.len() < LENGTH_PREFIX_SIZE + frame_len {
            buffer.reserve(LENGTH_PREFIX_SIZE + frame_len - buffer.len());
            return Ok(None);
        }

        buffer.advance(LENGTH_PREFIX_SIZE);
        Ok(Some(buffer.split_to(frame_len).freeze()))
    }

    async fn write_frame(&self, state: &mut WriteState, message: &[u8]) -> std::io::Result<()> {
        state.buffer.clear();
        state
            .buffer
            .extend_from_slice(&(message.len() as u32).to_be_bytes());
        state.buffer.extend_from_slice(message);
        state.half.write_all(&state.buffer).await?;
        state.half.flush().await
    }

    fn fail(&self, reason: &str) {
        self.counters.record_error();
        self.closed.fail(reason);
    }
}

#[async_trait]
impl Connection for TcpConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer(&self) -> String {
        format!("tcp://{}", self.peer_addr)
    }

    async fn send(&self, message: Bytes) -> Result<()> {
        if self.closed.is_closed() {
            return Err(TransportError::send("connection closed"));
        }
        if message.len() > self.policy.max_frame_size {
            return Err(TransportError::protocol(format!(
                "Frame size {} exceeds maximum {}",
                message.len(),
                self.policy.max_frame_size
            )));
        }

        let mut writer = self.writer.lock().await;
        match tokio::time::timeout(self.policy.write_timeout, self.write_frame(&mut writer, &message)).await {
            Ok(Ok(())) => {
                self.counters.record_send(LENGTH_PREFIX_SIZE + message.len());
                self.clock.touch();
                debug!(peer = %self.peer_addr, bytes = message.len(), "Sent frame over TCP");
                Ok(())
            }
            Ok(Err(e)) => {
                let reason = format!("write to {} failed: {}", self.peer_addr, e);
                self.fail(&reason);
                Err(TransportError::send(reason))
            }
            Err(_) => {
                warn!(peer = %self.peer_addr, "TCP writer stalled, closing connection");
                let reason = format!(
                    "write to {} stalled for {}ms",
                    self.peer_addr,
                    self.policy.write_timeout.as_millis()
                );
                self.fail(&reason);
                let _ = writer.half.shutdown().await;
                Err(TransportError::send(reason))
            }
        }
    }

    async fn receive(&self) -> Result<Option<Bytes>> {
        let mut reader = self.reader.lock().await;
        let ReadState { half, buffer } = &mut *reader;

        loop {
            if let Some(frame) = self.take_frame(buffer)? {
                self.counters.record_receive(LENGTH_PREFIX_SIZE + frame.len());
                self.clock.touch();
                return Ok(Some(frame));
            }
            if self.closed.is_closed() {
                return self.closed.finished();
            }

            tokio::select! {
                read = half.read_buf(buffer) => match read {
                    Ok(0) => {
                        self.closed.close();
                        if buffer.is_empty() {
                            debug!(peer = %self.peer_addr, "TCP peer closed connection");
                            return Ok(None);
                        }
                        self.counters.record_error();
                        return Err(TransportError::protocol(format!(
                            "connection closed mid-frame with {} bytes buffered",
                            buffer.len()
                        )));
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        self.fail(&format!("read from {} failed: {}", self.peer_addr, e));
                        return Err(TransportError::io("TCP read failed", e));
                    }
                },
                _ = idle_expired(&self.clock, self.policy.idle_timeout) => {
                    let idle_ms = self
                        .policy
                        .idle_timeout
                        .map(|d| d.as_millis() as u64)
                        .unwrap_or_default();
                    warn!(peer = %self.peer_addr, idle_ms, "Closing idle TCP connection");
                    self.close().await;
                    return Err(TransportError::timeout("idle", idle_ms));
                }
                _ = self.closed.closed() => return self.closed.finished(),
            }
        }
    }

    async fn close(&self) {
        if self.closed.close() {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.half.shutdown().await {
                debug!("Error shutting down TCP connection: {}", e);
            }
            info!("Closed TCP connection to {}", self.peer_addr);
        }
    }

    fn is_open(&self) -> bool {
        !self.closed.is_closed()
    }

    fn stats(&self) -> ConnectionStats {
        self.counters.snapshot(&self.clock)
    }
}

/// Accepts framed TCP connections
pub struct TcpAcceptor {
    listener: TcpListener,
    endpoint: Endpoint,
    policy: TransportPolicy,
}

impl TcpAcceptor {
    pub async fn bind(endpoint: &Endpoint, policy: &TransportPolicy) -> Result<Self> {
        let listener = TcpListener::bind(endpoint.socket_address())
            .await
            .map_err(|e| {
                TransportError::connection_with_source("Failed to bind TCP listener", endpoint.to_string(), e)
            })?;
        let local = listener.local_addr()?;
        let endpoint = endpoint.with_port(local.port());
        info!("TCP server listening on {}", endpoint);

        Ok(Self {
            listener,
            endpoint,
            policy: policy.clone(),
        })
    }

    pub async fn accept(&self) -> Result<TcpConnection> {
        let (stream, peer_addr) = self.listener.accept().await.map_err(|e| {
            TransportError::connection_with_source("Failed to accept TCP connection", self.endpoint.to_string(), e)
        })?;
        debug!("Accepted TCP connection from {}", peer_addr);
        Ok(TcpConnection::new(stream, peer_addr, self.policy.clone()))
    }

    /// Bound endpoint, with the real port when bound to port 0
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}
