//! In-process connection pairs backed by bounded channels

use crate::connection::{
    generate_connection_id, idle_expired, ActivityClock, CloseSignal, Connection,
    ConnectionCounters, ConnectionId, ConnectionStats,
};
use crate::{Result, TransportError, TransportPolicy};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// One side of an in-memory connection
pub struct MemoryConnection {
    id: ConnectionId,
    name: String,
    policy: TransportPolicy,
    tx: Mutex<Option<mpsc::Sender<Bytes>>>,
    rx: Mutex<mpsc::Receiver<Bytes>>,
    closed: CloseSignal,
    clock: ActivityClock,
    counters: ConnectionCounters,
}

impl fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

impl MemoryConnection {
    /// Create two connected ends
    pub fn pair(policy: &TransportPolicy) -> (Arc<MemoryConnection>, Arc<MemoryConnection>) {
        let (a_tx, b_rx) = mpsc::channel(policy.channel_capacity.max(1));
        let (b_tx, a_rx) = mpsc::channel(policy.channel_capacity.max(1));
        let a = Self::new("memory-a", a_tx, a_rx, policy.clone());
        let b = Self::new("memory-b", b_tx, b_rx, policy.clone());
        (Arc::new(a), Arc::new(b))
    }

    fn new(name: &str, tx: mpsc::Sender<Bytes>, rx: mpsc::Receiver<Bytes>, policy: TransportPolicy) -> Self {
        let clock = ActivityClock::new();
        clock.touch();
        Self {
            id: generate_connection_id(),
            name: name.to_string(),
            policy,
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(rx),
            closed: CloseSignal::new(),
            clock,
            counters: ConnectionCounters::default(),
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer(&self) -> String {
        self.name.clone()
    }

    async fn send(&self, message: Bytes) -> Result<()> {
        if message.len() > self.policy.max_frame_size {
            return Err(TransportError::protocol(format!(
                "Frame size {} exceeds maximum {}",
                message.len(),
                self.policy.max_frame_size
            )));
        }
        let tx = self.tx.lock().await;
        let Some(tx) = tx.as_ref() else {
            return Err(TransportError::send("connection closed"));
        };

        let len = message.len();
        match tokio::time::timeout(self.policy.write_timeout, tx.send(message)).await {
            Ok(Ok(())) => {
                self.counters.record_send(len);
                self.clock.touch();
                Ok(())
            }
            Ok(Err(_)) => {
                self.counters.record_error();
                Err(TransportError::send("peer dropped"))
            }
            Err(_) => {
                self.counters.record_error();
                self.closed.close();
                Err(TransportError::send("peer stalled"))
            }
        }
    }

    async fn receive(&self) -> Result<Option<Bytes>> {
        let mut rx = self.rx.lock().await;
        if self.closed.is_closed() {
            return Ok(None);
        }
        tokio::select! {
            message = rx.recv() => {
                if let Some(message) = &message {
                    self.counters.record_receive(message.len());
                    self.clock.touch();
                } else {
                    self.closed.close();
                }
                Ok(message)
            }
            _ = idle_expired(&self.clock, self.policy.idle_timeout) => {
                drop(rx);
                self.close().await;
                Err(TransportError::timeout(
                    "idle",
                    self.policy.idle_timeout.map(|d| d.as_millis() as u64).unwrap_or_default(),
                ))
            }
            _ = self.closed.closed() => Ok(None),
        }
    }

    async fn close(&self) {
        self.closed.close();
        // Dropping our sender ends the peer's receive cleanly
        self.tx.lock().await.take();
        self.rx.lock().await.close();
    }

    fn is_open(&self) -> bool {
        !self.closed.is_closed()
    }

    fn stats(&self) -> ConnectionStats {
        self.counters.snapshot(&self.clock)
    }
}
