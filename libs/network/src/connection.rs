//! Connection abstraction
//!
//! A [`Connection`] is a bidirectional, ordered, reliable channel of whole
//! messages. Implementations hide whether the bytes travel over a framed
//! TCP stream, a WebSocket, or an in-process channel.

use crate::error::{Result, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier
pub type ConnectionId = u64;

/// Generate a unique connection ID
pub fn generate_connection_id() -> ConnectionId {
    CONNECTION_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Message-oriented connection between two peers
#[async_trait]
pub trait Connection: Send + Sync + fmt::Debug {
    fn id(&self) -> ConnectionId;

    /// Human readable peer description for logs
    fn peer(&self) -> String;

    /// Send one message. Fails with `Send` on a closed, broken or stalled
    /// connection; never retried internally.
    async fn send(&self, message: Bytes) -> Result<()>;

    /// Next message, `None` after a clean close. A connection failed by a
    /// broken read or write keeps returning that failure instead.
    async fn receive(&self) -> Result<Option<Bytes>>;

    /// Close both directions. Idempotent.
    async fn close(&self);

    fn is_open(&self) -> bool;

    fn stats(&self) -> ConnectionStats;
}

/// Shared handle used by servers and clients
pub type SharedConnection = Arc<dyn Connection>;

/// Lazy sequence of received messages.
///
/// Ends on clean close; on abnormal close yields the error once and ends.
pub fn incoming(connection: SharedConnection) -> impl Stream<Item = Result<Bytes>> + Send {
    futures::stream::unfold(Some(connection), |state| async move {
        let connection = state?;
        match connection.receive().await {
            Ok(Some(message)) => Some((Ok(message), Some(connection))),
            Ok(None) => None,
            Err(e) => Some((Err(e), None)),
        }
    })
}

/// Last-activity clock shared by the read and write halves
#[derive(Debug)]
pub struct ActivityClock {
    origin: Instant,
    last_ms: AtomicU64,
}

impl ActivityClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    pub fn touch(&self) {
        let now = self.origin.elapsed().as_millis() as u64;
        self.last_ms.store(now, Ordering::Relaxed);
    }

    pub fn idle_for(&self) -> Duration {
        let now = self.origin.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(self.last_ms.load(Ordering::Relaxed)))
    }

    /// Instant at which the connection becomes idle given no further traffic
    pub fn idle_deadline(&self, idle: Duration) -> tokio::time::Instant {
        let last = self.origin + Duration::from_millis(self.last_ms.load(Ordering::Relaxed));
        tokio::time::Instant::from_std(last + idle)
    }

    pub fn connected_for(&self) -> Duration {
        self.origin.elapsed()
    }
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves once the clock shows no traffic for `idle`. Never resolves when
/// no idle timeout is configured.
pub async fn idle_expired(clock: &ActivityClock, idle: Option<Duration>) {
    let Some(idle) = idle else {
        return futures::future::pending().await;
    };
    loop {
        let deadline = clock.idle_deadline(idle);
        if deadline <= tokio::time::Instant::now() {
            return;
        }
        tokio::time::sleep_until(deadline).await;
    }
}

/// One-shot close flag observable from any task
#[derive(Debug)]
pub struct CloseSignal {
    tx: tokio::sync::watch::Sender<bool>,
    failure: OnceLock<String>,
}

impl CloseSignal {
    pub fn new() -> Self {
        let (tx, _rx) = tokio::sync::watch::channel(false);
        Self {
            tx,
            failure: OnceLock::new(),
        }
    }

    /// Closes with a recorded cause; a no-op once already closed
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        if self.is_closed() {
            return false;
        }
        // Recorded first so readers woken by the close see it
        let _ = self.failure.set(reason.into());
        self.close()
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.get().map(String::as_str)
    }

    /// What `receive` reports once closed: end of stream after a clean
    /// close, the recorded failure otherwise
    pub fn finished<T>(&self) -> Result<Option<T>> {
        match self.failure() {
            Some(reason) => Err(TransportError::send(reason)),
            None => Ok(None),
        }
    }

    /// Marks the signal closed; true only for the first caller
    pub fn close(&self) -> bool {
        self.tx.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn closed(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock-free per-connection counters
#[derive(Debug, Default)]
pub struct ConnectionCounters {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    errors: AtomicU64,
}

impl ConnectionCounters {
    #[inline]
    pub fn record_send(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_receive(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, clock: &ActivityClock) -> ConnectionStats {
        ConnectionStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            connected_for: clock.connected_for(),
            idle_for: clock.idle_for(),
        }
    }
}

/// Connection statistics
#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub errors: u64,
    pub connected_for: Duration,
    pub idle_for: Duration,
}
