//! Client side of an actor-state stream

use crate::error::{ClientError, Result};
use crate::manager::ConnectionManager;
use codec::{ActorId, CodecError, StreamId};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One received value, already patched when the server sent a delta
#[derive(Debug, Clone, PartialEq)]
pub struct StreamUpdate {
    pub sequence: u64,
    pub value: Value,
    /// Sequence 1 after earlier data: the server restarted the stream with
    /// a fresh snapshot and intermediate states were collapsed into it
    pub is_reset: bool,
    pub timestamp_ns: u64,
}

impl StreamUpdate {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.value.clone())
            .map_err(|e| ClientError::Codec(CodecError::decoding(std::any::type_name::<T>(), e)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Update(StreamUpdate),
    /// Server closed the stream, e.g. the actor was deregistered
    Ended { reason: String },
    /// Stream failed on the server, or the client gave up reconnecting
    Failed { message: String },
}

/// Final event the manager could not queue because the channel was full.
/// Read once the queued updates are drained.
pub(crate) type TerminalSlot = Arc<Mutex<Option<StreamEvent>>>;

/// Handle returned by a successful subscribe
///
/// Updates survive reconnects: the manager resumes the stream from the last
/// received sequence and keeps feeding this handle. A handle that falls
/// more than `ClientOptions::stream_buffer` updates behind is failed with
/// [`SUBSCRIBER_LAGGED`](crate::SUBSCRIBER_LAGGED).
#[derive(Debug)]
pub struct Subscription {
    stream_id: StreamId,
    actor_id: ActorId,
    target: String,
    events: mpsc::Receiver<StreamEvent>,
    terminal: TerminalSlot,
    manager: ConnectionManager,
    closed: Option<String>,
}

impl Subscription {
    pub(crate) fn new(
        stream_id: StreamId,
        actor_id: ActorId,
        target: String,
        events: mpsc::Receiver<StreamEvent>,
        terminal: TerminalSlot,
        manager: ConnectionManager,
    ) -> Self {
        Self {
            stream_id,
            actor_id,
            target,
            events,
            terminal,
            manager,
            closed: None,
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

    /// Why the stream stopped, once it has
    pub fn closed_reason(&self) -> Option<&str> {
        self.closed.as_deref()
    }

    /// Next event, `None` after the stream ended and was drained
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        let event = match self.events.recv().await {
            Some(event) => event,
            None => self.terminal.lock().take()?,
        };
        match &event {
            StreamEvent::Ended { reason } => self.closed = Some(reason.clone()),
            StreamEvent::Failed { message } => self.closed = Some(message.clone()),
            StreamEvent::Update(_) => {}
        }
        Some(event)
    }

    /// Next update, `None` once the stream is over
    pub async fn next(&mut self) -> Option<StreamUpdate> {
        match self.next_event().await? {
            StreamEvent::Update(update) => Some(update),
            StreamEvent::Ended { .. } | StreamEvent::Failed { .. } => None,
        }
    }

    pub async fn next_value<T: DeserializeOwned>(&mut self) -> Option<Result<T>> {
        self.next().await.map(|update| update.decode())
    }

    /// Stop the stream on the server and forget it locally
    pub async fn unsubscribe(self) -> Result<()> {
        self.manager.unsubscribe(&self.stream_id).await
    }
}
