//! Stream sessions
//!
//! A session tracks one subscriber's view of one observable target:
//! sequence counter, filter, last delivered value, replay buffer and the
//! outlet currently attached to it (if any).

use crate::buffer::{BufferEntry, StreamBuffer};
use crate::delta::encode_update;
use crate::filter::admits;
use crate::settings::StreamSettings;
use crate::StreamResult;
use codec::{
    current_timestamp_ns, encode_value, ActorId, Envelope, StreamDataEnvelope, StreamFilter, StreamId,
};
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Identifies the connection an outlet writes to
pub type OutletId = u64;

/// Bounded sink for envelopes headed to one connection
#[derive(Debug, Clone)]
pub struct StreamOutlet {
    id: OutletId,
    tx: mpsc::Sender<Envelope>,
}

impl StreamOutlet {
    pub fn new(id: OutletId, tx: mpsc::Sender<Envelope>) -> Self {
        Self { id, tx }
    }

    /// Outlet plus the receiving end, sized for `capacity` envelopes
    pub fn channel(id: OutletId, capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(id, tx), rx)
    }

    pub fn id(&self) -> OutletId {
        self.id
    }

    /// Never waits. A full or closed outlet is reported to the caller,
    /// which suspends the session instead of queueing.
    pub fn offer(&self, envelope: Envelope) -> Result<(), OutletFull> {
        self.tx.try_send(envelope).map_err(|e| match e {
            TrySendError::Full(_) => OutletFull::Full,
            TrySendError::Closed(_) => OutletFull::Closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutletFull {
    Full,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    /// Subscriber gone; updates are still buffered for replay
    Suspended,
    /// Terminal
    Expired,
}

/// Result of offering a value to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Assigned a sequence number and pushed to the outlet
    Sent { sequence: u64, is_delta: bool },
    /// Assigned a sequence number and buffered; no outlet attached
    Buffered { sequence: u64 },
    /// Rejected by the filter; no sequence consumed
    Filtered,
    /// Session is expired
    Dropped,
}

#[derive(Debug)]
pub struct StreamSession {
    pub(crate) stream_id: StreamId,
    pub(crate) actor_id: ActorId,
    pub(crate) target: String,
    pub(crate) filter: StreamFilter,
    pub(crate) created_at: Instant,
    pub(crate) state: SessionState,
    pub(crate) suspended_at: Option<Instant>,
    pub(crate) last_sequence: u64,
    last_value: Option<Value>,
    last_encoded: Option<Vec<u8>>,
    pub(crate) buffer: StreamBuffer,
    pub(crate) outlet: Option<StreamOutlet>,
}

impl StreamSession {
    pub(crate) fn new(
        stream_id: StreamId,
        actor_id: ActorId,
        target: String,
        filter: StreamFilter,
        outlet: StreamOutlet,
        settings: &StreamSettings,
    ) -> Self {
        Self {
            stream_id,
            actor_id,
            target,
            filter,
            created_at: Instant::now(),
            state: SessionState::Active,
            suspended_at: None,
            last_sequence: 0,
            last_value: None,
            last_encoded: None,
            buffer: StreamBuffer::new(settings.buffer_capacity, settings.buffer_ttl),
            outlet: Some(outlet),
        }
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    pub fn actor_id(&self) -> &ActorId {
        &self.actor_id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Offer a new value, applying filter and delta encoding
    pub(crate) fn deliver(&mut self, value: &Value, settings: &StreamSettings) -> StreamResult<Delivery> {
        if self.state == SessionState::Expired {
            return Ok(Delivery::Dropped);
        }
        let full = encode_value(value)?;
        if !admits(&self.filter, value, &full, self.last_encoded.as_deref()) {
            return Ok(Delivery::Filtered);
        }
        self.append(value, full, settings.delta_enabled)
    }

    /// Deliver a full snapshot as sequence 1, discarding history
    pub(crate) fn restart(&mut self, snapshot: &Value) -> StreamResult<Delivery> {
        self.buffer.clear();
        self.last_sequence = 0;
        self.last_value = None;
        self.last_encoded = None;
        let full = encode_value(snapshot)?;
        self.append(snapshot, full, false)
    }

    fn append(&mut self, value: &Value, full: Vec<u8>, delta_enabled: bool) -> StreamResult<Delivery> {
        let update = encode_update(self.last_value.as_ref(), value, full.clone(), delta_enabled)?;
        let sequence = self.last_sequence + 1;
        let entry = BufferEntry::new(sequence, update.data, current_timestamp_ns(), update.is_delta);

        self.last_sequence = sequence;
        self.last_value = Some(value.clone());
        self.last_encoded = Some(full);
        self.buffer.push(entry.clone());

        if self.state != SessionState::Active {
            return Ok(Delivery::Buffered { sequence });
        }
        if self.push(&entry) {
            Ok(Delivery::Sent {
                sequence,
                is_delta: entry.is_delta,
            })
        } else {
            Ok(Delivery::Buffered { sequence })
        }
    }

    /// Push a buffered entry to the outlet; suspends on a full or closed
    /// outlet and returns false.
    pub(crate) fn push(&mut self, entry: &BufferEntry) -> bool {
        let Some(outlet) = &self.outlet else {
            return false;
        };
        let envelope = Envelope::StreamData(StreamDataEnvelope {
            stream_id: self.stream_id.clone(),
            sequence: entry.sequence,
            data: entry.data.clone(),
            timestamp_ns: entry.timestamp_ns,
            is_delta: entry.is_delta,
        });
        match outlet.offer(envelope) {
            Ok(()) => true,
            Err(reason) => {
                warn!(
                    stream_id = %self.stream_id,
                    sequence = entry.sequence,
                    ?reason,
                    "Outlet cannot accept update, suspending session"
                );
                self.suspend();
                false
            }
        }
    }

    /// Send an envelope other than stream data, best-effort
    pub(crate) fn offer(&self, envelope: Envelope) -> bool {
        self.outlet
            .as_ref()
            .is_some_and(|outlet| outlet.offer(envelope).is_ok())
    }

    pub(crate) fn suspend(&mut self) {
        if self.state == SessionState::Active {
            debug!(stream_id = %self.stream_id, last_sequence = self.last_sequence, "Session suspended");
            self.state = SessionState::Suspended;
            self.suspended_at = Some(Instant::now());
        }
        self.outlet = None;
    }

    pub(crate) fn attach(&mut self, outlet: StreamOutlet) {
        self.outlet = Some(outlet);
        self.state = SessionState::Active;
        self.suspended_at = None;
    }

    pub(crate) fn expire(&mut self) {
        self.state = SessionState::Expired;
        self.outlet = None;
        self.buffer.clear();
    }

    pub(crate) fn is_expired_at(&self, now: Instant, ttl: Duration) -> bool {
        match (self.state, self.suspended_at) {
            (SessionState::Expired, _) => true,
            (SessionState::Suspended, Some(since)) => now.duration_since(since) > ttl,
            _ => false,
        }
    }
}
