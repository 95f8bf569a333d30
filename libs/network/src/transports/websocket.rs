//! WebSocket Transport
//!
//! Each binary WebSocket message carries exactly one frame, so no extra
//! length prefix is needed. Control frames are handled by tungstenite;
//! text messages are not part of the protocol and are rejected.

use crate::connection::{
    generate_connection_id, idle_expired, ActivityClock, CloseSignal, Connection,
    ConnectionCounters, ConnectionId, ConnectionStats,
};
use crate::{Endpoint, Result, TransportError, TransportPolicy};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Client side stream type
pub type ClientWsConnection = WsConnection<MaybeTlsStream<TcpStream>>;
/// Server side stream type
pub type ServerWsConnection = WsConnection<TcpStream>;

/// Message-per-frame WebSocket connection
pub struct WsConnection<S> {
    id: ConnectionId,
    peer: String,
    policy: TransportPolicy,
    sink: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    stream: Mutex<SplitStream<WebSocketStream<S>>>,
    closed: CloseSignal,
    clock: ActivityClock,
    counters: ConnectionCounters,
}

impl<S> fmt::Debug for WsConnection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsConnection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("open", &!self.closed.is_closed())
            .finish()
    }
}

impl<S> WsConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn new(socket: WebSocketStream<S>, peer: String, policy: TransportPolicy) -> Self {
        let (sink, stream) = socket.split();
        let clock = ActivityClock::new();
        clock.touch();
        Self {
            id: generate_connection_id(),
            peer,
            policy,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed: CloseSignal::new(),
            clock,
            counters: ConnectionCounters::default(),
        }
    }

    fn fail(&self, reason: &str) {
        self.counters.record_error();
        self.closed.fail(reason);
    }
}

impl WsConnection<MaybeTlsStream<TcpStream>> {
    /// Open a client connection to a `ws://` endpoint
    pub async fn connect(endpoint: &Endpoint, policy: &TransportPolicy) -> Result<Self> {
        let url = endpoint.to_string();
        info!("Connecting to WebSocket peer at {}", url);

        let (socket, _response) =
            tokio::time::timeout(policy.connect_timeout, tokio_tungstenite::connect_async(url.as_str()))
                .await
                .map_err(|_| {
                    TransportError::timeout("WebSocket connect", policy.connect_timeout.as_millis() as u64)
                })?
                .map_err(|e| TransportError::connection_with_source("WebSocket handshake failed", url.clone(), e))?;

        Ok(Self::new(socket, url, policy.clone()))
    }
}

#[async_trait]
impl<S> Connection for WsConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer(&self) -> String {
        self.peer.clone()
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

        let len = message.len();
        let mut sink = self.sink.lock().await;
        match tokio::time::timeout(self.policy.write_timeout, sink.send(Message::Binary(message.to_vec()))).await {
            Ok(Ok(())) => {
                self.counters.record_send(len);
                self.clock.touch();
                Ok(())
            }
            Ok(Err(e)) => {
                let reason = format!("write to {} failed: {}", self.peer, e);
                self.fail(&reason);
                Err(TransportError::send(reason))
            }
            Err(_) => {
                warn!(peer = %self.peer, "WebSocket writer stalled, closing connection");
                let reason = format!(
                    "write to {} stalled for {}ms",
                    self.peer,
                    self.policy.write_timeout.as_millis()
                );
                self.fail(&reason);
                Err(TransportError::send(reason))
            }
        }
    }

    async fn receive(&self) -> Result<Option<Bytes>> {
        let mut stream = self.stream.lock().await;

        loop {
            if self.closed.is_closed() {
                return self.closed.finished();
            }

            let next = tokio::select! {
                next = stream.next() => next,
                _ = idle_expired(&self.clock, self.policy.idle_timeout) => {
                    let idle_ms = self
                        .policy
                        .idle_timeout
                        .map(|d| d.as_millis() as u64)
                        .unwrap_or_default();
                    warn!(peer = %self.peer, idle_ms, "Closing idle WebSocket connection");
                    drop(stream);
                    self.close().await;
                    return Err(TransportError::timeout("idle", idle_ms));
                }
                _ = self.closed.closed() => return self.closed.finished(),
            };

            match next {
                Some(Ok(Message::Binary(data))) => {
                    if data.len() > self.policy.max_frame_size {
                        self.fail(&format!("oversized frame from {}", self.peer));
                        return Err(TransportError::protocol(format!(
                            "Frame size {} exceeds maximum {}",
                            data.len(),
                            self.policy.max_frame_size
                        )));
                    }
                    self.counters.record_receive(data.len());
                    self.clock.touch();
                    return Ok(Some(Bytes::from(data)));
                }
                Some(Ok(Message::Text(text))) => {
                    warn!(peer = %self.peer, len = text.len(), "Rejecting text WebSocket message");
                    self.counters.record_error();
                    return Err(TransportError::protocol("text frames are not supported"));
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // tungstenite queues the pong reply itself
                    self.clock.touch();
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    debug!(peer = %self.peer, ?frame, "WebSocket peer closed connection");
                    self.closed.close();
                    return Ok(None);
                }
                Some(Err(WsError::ConnectionClosed)) | Some(Err(WsError::AlreadyClosed)) | None => {
                    self.closed.close();
                    return Ok(None);
                }
                Some(Err(WsError::Io(e))) => {
                    self.fail(&format!("read from {} failed: {}", self.peer, e));
                    return Err(TransportError::io("WebSocket read failed", e));
                }
                Some(Err(e)) => {
                    self.fail(&format!("WebSocket error from {}: {}", self.peer, e));
                    return Err(TransportError::protocol(format!("WebSocket error: {}", e)));
                }
            }
        }
    }

    async fn close(&self) {
        if self.closed.close() {
            let mut sink = self.sink.lock().await;
            let closing = tokio::time::timeout(self.policy.write_timeout, sink.close()).await;
            if let Ok(Err(e)) = closing {
                debug!("Error closing WebSocket connection: {}", e);
            }
            info!("Closed WebSocket connection to {}", self.peer);
        }
    }

    fn is_open(&self) -> bool {
        !self.closed.is_closed()
    }

    fn stats(&self) -> ConnectionStats {
        self.counters.snapshot(&self.clock)
    }
}

/// Accepts WebSocket upgrades on a TCP listener
pub struct WsAcceptor {
    listener: TcpListener,
    endpoint: Endpoint,
    policy: TransportPolicy,
}

impl WsAcceptor {
    pub async fn bind(endpoint: &Endpoint, policy: &TransportPolicy) -> Result<Self> {
        let listener = TcpListener::bind(endpoint.socket_address())
            .await
            .map_err(|e| {
                TransportError::connection_with_source("Failed to bind WebSocket listener", endpoint.to_string(), e)
            })?;
        let local = listener.local_addr()?;
        let endpoint = endpoint.with_port(local.port());
        info!("WebSocket server listening on {}", endpoint);

        Ok(Self {
            listener,
            endpoint,
            policy: policy.clone(),
        })
    }

    pub async fn accept(&self) -> Result<ServerWsConnection> {
        let (stream, peer_addr) = self.listener.accept().await.map_err(|e| {
            TransportError::connection_with_source("Failed to accept TCP connection", self.endpoint.to_string(), e)
        })?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }

        let socket = tokio::time::timeout(self.policy.connect_timeout, tokio_tungstenite::accept_async(stream))
            .await
            .map_err(|_| {
                TransportError::timeout("WebSocket handshake", self.policy.connect_timeout.as_millis() as u64)
            })?
            .map_err(|e| {
                TransportError::connection_with_source("WebSocket handshake failed", peer_addr.to_string(), e)
            })?;

        debug!("Accepted WebSocket connection from {}", peer_addr);
        Ok(WsConnection::new(socket, format!("ws://{}", peer_addr), self.policy.clone()))
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}
