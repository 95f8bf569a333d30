//! Connection manager
//!
//! Owns at most one live connection to a node and multiplexes calls and
//! streams over it.
//!
//! ```text
//! Disconnected ─► Connecting ─► Connected ─┬─► Disconnected   (disconnect())
//!                                          └─► Reconnecting ─┬─► Connected
//!                                                            └─► Failed
//! ```
//!
//! - Calls are matched to responses by call id; each waits at most
//!   `call_timeout`. Invocations are never retried.
//! - Every stream keeps a checkpoint (last received sequence) and the last
//!   full value. After a reconnect each known stream is resumed from its
//!   checkpoint.
//! - Losing the connection fails pending calls with `ConnectionClosed`.

use crate::connector::{Connector, EndpointConnector};
use crate::error::{ClientError, Result};
use crate::options::ClientOptions;
use crate::proxy::ActorProxy;
use crate::subscription::{StreamEvent, StreamUpdate, Subscription, TerminalSlot};
use codec::{
    decode_document, ActorId, Arguments, CallId, CallResult, Envelope, InvocationEnvelope,
    StreamDataEnvelope, StreamEndEnvelope, StreamFilter, StreamResumeEnvelope,
    StreamSubscribeEnvelope, EXISTS_TARGET,
};
use futures::StreamExt;
use network::{incoming, Endpoint, SharedConnection};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// Reason sent to the server when a client drops a stream
pub const UNSUBSCRIBED: &str = "unsubscribed";

/// Failure reported to a subscription whose event queue overflowed
pub const SUBSCRIBER_LAGGED: &str = "subscriber fell behind";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Reconnect attempts exhausted. Terminal.
    Failed,
}

impl ConnectionState {
    fn is_transitional(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Reconnecting { .. })
    }
}

enum Waiter {
    Call(oneshot::Sender<Result<CallResult>>),
    Subscribe {
        reply: oneshot::Sender<Result<codec::StreamId>>,
        actor_id: ActorId,
        target: String,
        events: mpsc::Sender<StreamEvent>,
        terminal: TerminalSlot,
    },
}

impl Waiter {
    fn fail(self, err: ClientError) {
        match self {
            Waiter::Call(reply) => {
                let _ = reply.send(Err(err));
            }
            Waiter::Subscribe { reply, .. } => {
                let _ = reply.send(Err(err));
            }
        }
    }
}

struct TrackedStream {
    actor_id: ActorId,
    target: String,
    checkpoint: u64,
    last_value: Option<Value>,
    events: mpsc::Sender<StreamEvent>,
    terminal: TerminalSlot,
}

impl TrackedStream {
    /// Hand over the stream's final event, parking it in the terminal slot
    /// when the queue has no room
    fn finish(self, event: StreamEvent) {
        if let Err(TrySendError::Full(event)) = self.events.try_send(event) {
            *self.terminal.lock() = Some(event);
        }
    }
}

struct Link {
    connection: SharedConnection,
    generation: u64,
}

struct Shared {
    connector: Arc<dyn Connector>,
    options: ClientOptions,
    state: watch::Sender<ConnectionState>,
    link: Mutex<Option<Link>>,
    generation: AtomicU64,
    waiters: Mutex<HashMap<CallId, Waiter>>,
    streams: Mutex<HashMap<codec::StreamId, TrackedStream>>,
    /// Set by `disconnect()`; suppresses automatic reconnection
    closing: AtomicBool,
    reconnects: AtomicU64,
}

/// Cheap to clone; clones share the connection
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("target", &self.shared.connector.describe())
            .field("state", &self.state())
            .finish()
    }
}

impl ConnectionManager {
    /// Manager for a TCP or WebSocket endpoint. Nothing is connected until
    /// `connect()` or the first call.
    pub fn new(endpoint: Endpoint, options: ClientOptions) -> Self {
        let connector = EndpointConnector::new(endpoint, options.transport.clone());
        Self::with_connector(Arc::new(connector), options)
    }

    pub fn with_connector(connector: Arc<dyn Connector>, options: ClientOptions) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                connector,
                options,
                state,
                link: Mutex::new(None),
                generation: AtomicU64::new(0),
                waiters: Mutex::new(HashMap::new()),
                streams: Mutex::new(HashMap::new()),
                closing: AtomicBool::new(false),
                reconnects: AtomicU64::new(0),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Receiver notified on every state transition
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn options(&self) -> &ClientOptions {
        &self.shared.options
    }

    /// Successful automatic reconnections so far
    pub fn reconnect_count(&self) -> u64 {
        self.shared.reconnects.load(Ordering::Relaxed)
    }

    /// Streams currently tracked, including ones waiting for a reconnect
    pub fn stream_count(&self) -> usize {
        self.shared.streams.lock().len()
    }

    /// Last received sequence of a tracked stream
    pub fn checkpoint(&self, stream_id: &codec::StreamId) -> Option<u64> {
        self.shared.streams.lock().get(stream_id).map(|s| s.checkpoint)
    }

    /// Connect, retrying per the reconnect policy. Resumes any streams kept
    /// from an earlier connection.
    pub async fn connect(&self) -> Result<()> {
        let claimed = self.shared.state.send_if_modified(|state| match state {
            ConnectionState::Disconnected => {
                *state = ConnectionState::Connecting;
                true
            }
            _ => false,
        });
        if !claimed {
            return match self.settled().await {
                ConnectionState::Connected => Ok(()),
                _ => Err(self.unavailable()),
            };
        }
        self.shared.closing.store(false, Ordering::SeqCst);

        let policy = &self.shared.options.reconnect;
        let attempts = policy.attempts();
        let endpoint = self.shared.connector.describe();
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            debug!(endpoint = %endpoint, attempt, attempts, "Connecting");
            match self.shared.connector.connect().await {
                Ok(connection) => {
                    Shared::install(&self.shared, connection).await;
                    info!(endpoint = %endpoint, attempt, "Connected");
                    return Ok(());
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < attempts {
                        let delay = policy.delay_for(attempt);
                        warn!(endpoint = %endpoint, attempt, error = %e, ?delay, "Connection attempt failed, retrying");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        error!(endpoint = %endpoint, attempts, error = %last_error, "Giving up connecting");
        self.shared.state.send_replace(ConnectionState::Disconnected);
        Err(ClientError::ConnectionFailed {
            endpoint,
            attempts,
            message: last_error,
        })
    }

    /// Close the connection without reconnecting. Pending calls fail with
    /// `ConnectionClosed`; streams are kept and resumed by a later
    /// `connect()`.
    pub async fn disconnect(&self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        let link = self.shared.link.lock().take();
        self.shared.state.send_replace(ConnectionState::Disconnected);
        self.shared.fail_waiters();
        if let Some(link) = link {
            link.connection.close().await;
        }
        info!(endpoint = %self.shared.connector.describe(), "Disconnected");
    }

    /// Lazy proxy; no round trip
    pub fn resolve(&self, actor_id: impl Into<ActorId>) -> ActorProxy {
        ActorProxy::new(actor_id.into(), self.clone())
    }

    /// Proxy for an actor confirmed to exist on the node
    pub async fn resolve_checked(&self, actor_id: impl Into<ActorId>) -> Result<ActorProxy> {
        let proxy = self.resolve(actor_id);
        let envelope = InvocationEnvelope::new(proxy.id().clone(), EXISTS_TARGET, Arguments::empty());
        match self.invoke(envelope).await? {
            CallResult::Error(descriptor) => Err(ClientError::from_descriptor(descriptor)),
            CallResult::Value(_) | CallResult::Void => Ok(proxy),
        }
    }

    /// Send one invocation and wait for its response
    pub async fn invoke(&self, envelope: InvocationEnvelope) -> Result<CallResult> {
        self.ensure_connected().await?;

        let call_id = envelope.call_id.clone();
        let (reply, response) = oneshot::channel();
        self.shared.waiters.lock().insert(call_id.clone(), Waiter::Call(reply));

        if let Err(e) = self.shared.send(&Envelope::Invocation(envelope)).await {
            self.shared.waiters.lock().remove(&call_id);
            return Err(e);
        }

        let timeout = self.shared.options.call_timeout;
        match tokio::time::timeout(timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => {
                self.shared.waiters.lock().remove(&call_id);
                debug!(call_id = %call_id, "Call timed out");
                Err(ClientError::Timeout {
                    call_id,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Open a stream on an actor property
    pub async fn subscribe(
        &self,
        actor_id: ActorId,
        target: impl Into<String>,
        filter: StreamFilter,
        metadata: BTreeMap<String, String>,
    ) -> Result<Subscription> {
        self.ensure_connected().await?;

        let target = target.into();
        let call_id = CallId::new();
        let (reply, started) = oneshot::channel();
        let (events_tx, events_rx) = mpsc::channel(self.shared.options.stream_buffer.max(1));
        let terminal = TerminalSlot::default();
        self.shared.waiters.lock().insert(
            call_id.clone(),
            Waiter::Subscribe {
                reply,
                actor_id: actor_id.clone(),
                target: target.clone(),
                events: events_tx,
                terminal: terminal.clone(),
            },
        );

        let envelope = Envelope::StreamSubscribe(StreamSubscribeEnvelope {
            call_id: call_id.clone(),
            actor_id: actor_id.clone(),
            target: target.clone(),
            filter,
            metadata,
        });
        if let Err(e) = self.shared.send(&envelope).await {
            self.shared.waiters.lock().remove(&call_id);
            return Err(e);
        }

        let timeout = self.shared.options.call_timeout;
        let stream_id = match tokio::time::timeout(timeout, started).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(ClientError::ConnectionClosed),
            Err(_) => {
                self.shared.waiters.lock().remove(&call_id);
                return Err(ClientError::Timeout {
                    call_id,
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };

        debug!(stream_id = %stream_id, actor_id = %actor_id, property = %target, "Subscribed");
        Ok(Subscription::new(stream_id, actor_id, target, events_rx, terminal, self.clone()))
    }

    /// Forget a stream and ask the server to end it
    pub async fn unsubscribe(&self, stream_id: &codec::StreamId) -> Result<()> {
        if self.shared.streams.lock().remove(stream_id).is_none() {
            return Ok(());
        }
        if self.state() != ConnectionState::Connected {
            return Ok(());
        }
        self.shared
            .send(&Envelope::StreamEnd(StreamEndEnvelope {
                stream_id: stream_id.clone(),
                reason: UNSUBSCRIBED.to_string(),
            }))
            .await
    }

    async fn ensure_connected(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Disconnected if !self.shared.closing.load(Ordering::SeqCst) => {
                self.connect().await
            }
            ConnectionState::Connecting => match self.settled().await {
                ConnectionState::Connected => Ok(()),
                _ => Err(self.unavailable()),
            },
            _ => Err(self.unavailable()),
        }
    }

    /// Wait until no connection attempt is in progress
    async fn settled(&self) -> ConnectionState {
        let mut states = self.shared.state.subscribe();
        let settled = match states.wait_for(|state| !state.is_transitional()).await {
            Ok(state) => *state,
            Err(_) => ConnectionState::Failed,
        };
        settled
    }

    fn unavailable(&self) -> ClientError {
        match self.state() {
            ConnectionState::Failed => ClientError::ConnectionFailed {
                endpoint: self.shared.connector.describe(),
                attempts: self.shared.options.reconnect.attempts(),
                message: "reconnect attempts exhausted".to_string(),
            },
            _ => ClientError::ConnectionClosed,
        }
    }
}

impl Shared {
    fn current(&self) -> Option<SharedConnection> {
        self.link.lock().as_ref().map(|link| link.connection.clone())
    }

    async fn send(&self, envelope: &Envelope) -> Result<()> {
        let connection = self.current().ok_or(ClientError::ConnectionClosed)?;
        let frame = codec::encode(envelope)?;
        connection.send(frame).await.map_err(ClientError::Transport)
    }

    /// Make `connection` current, start its reader and resume known streams
    async fn install(shared: &Arc<Shared>, connection: SharedConnection) {
        let generation = shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *shared.link.lock() = Some(Link {
            connection: connection.clone(),
            generation,
        });
        shared.state.send_replace(ConnectionState::Connected);
        tokio::spawn(read_loop(shared.clone(), connection, generation));

        let resumes: Vec<Envelope> = shared
            .streams
            .lock()
            .iter()
            .map(|(stream_id, stream)| {
                Envelope::StreamResume(StreamResumeEnvelope {
                    stream_id: stream_id.clone(),
                    last_sequence: stream.checkpoint,
                    actor_id: stream.actor_id.clone(),
                    target: stream.target.clone(),
                })
            })
            .collect();
        for resume in resumes {
            if let Err(e) = shared.send(&resume).await {
                warn!(error = %e, "Failed to resume stream");
                break;
            }
            if let Some(stream_id) = resume.stream_id() {
                debug!(stream_id = %stream_id, "Resume requested");
            }
        }
    }

    fn fail_waiters(&self) {
        let waiters: Vec<Waiter> = self.waiters.lock().drain().map(|(_, waiter)| waiter).collect();
        for waiter in waiters {
            waiter.fail(ClientError::ConnectionClosed);
        }
    }

    fn connection_lost(shared: &Arc<Shared>, generation: u64, reason: &str) {
        {
            let mut link = shared.link.lock();
            match link.as_ref() {
                Some(current) if current.generation == generation => *link = None,
                // Replaced or closed by disconnect()
                _ => return,
            }
        }
        shared.fail_waiters();
        if shared.closing.load(Ordering::SeqCst) {
            return;
        }
        warn!(endpoint = %shared.connector.describe(), reason, "Connection lost, reconnecting");
        tokio::spawn(reconnect(shared.clone()));
    }

    fn handle(shared: &Arc<Shared>, envelope: Envelope) {
        match envelope {
            Envelope::Response(response) => {
                let waiter = shared.waiters.lock().remove(&response.call_id);
                match waiter {
                    Some(Waiter::Call(reply)) => {
                        let _ = reply.send(Ok(response.result));
                    }
                    Some(Waiter::Subscribe { reply, .. }) => {
                        let err = match response.result {
                            CallResult::Error(descriptor) => ClientError::from_descriptor(descriptor),
                            other => ClientError::protocol(format!(
                                "subscribe answered with {:?}",
                                other
                            )),
                        };
                        let _ = reply.send(Err(err));
                    }
                    None => debug!(call_id = %response.call_id, "Response for unknown or expired call"),
                }
            }
            Envelope::StreamStart(start) => {
                let waiter = shared.waiters.lock().remove(&start.call_id);
                match waiter {
                    Some(Waiter::Subscribe {
                        reply,
                        actor_id,
                        target,
                        events,
                        terminal,
                    }) => {
                        shared.streams.lock().insert(
                            start.stream_id.clone(),
                            TrackedStream {
                                actor_id,
                                target,
                                checkpoint: 0,
                                last_value: None,
                                events,
                                terminal,
                            },
                        );
                        if reply.send(Ok(start.stream_id.clone())).is_err() {
                            shared.streams.lock().remove(&start.stream_id);
                            Shared::end_remote(shared, start.stream_id);
                        }
                    }
                    Some(Waiter::Call(reply)) => {
                        let _ = reply.send(Err(ClientError::protocol("call answered with StreamStart")));
                    }
                    None => {
                        // Subscriber timed out before the server answered
                        debug!(stream_id = %start.stream_id, "Stream start for abandoned subscribe");
                        Shared::end_remote(shared, start.stream_id);
                    }
                }
            }
            Envelope::StreamData(data) => Shared::deliver(shared, data),
            Envelope::StreamEnd(end) => {
                if let Some(stream) = shared.streams.lock().remove(&end.stream_id) {
                    debug!(stream_id = %end.stream_id, reason = %end.reason, "Stream ended by server");
                    stream.finish(StreamEvent::Ended { reason: end.reason });
                }
            }
            Envelope::StreamError(failure) => {
                if let Some(stream) = shared.streams.lock().remove(&failure.stream_id) {
                    warn!(stream_id = %failure.stream_id, error = %failure.error_message, "Stream failed");
                    stream.finish(StreamEvent::Failed {
                        message: failure.error_message,
                    });
                }
            }
            other => warn!(kind = other.kind().name(), "Unexpected envelope from server"),
        }
    }

    /// Apply one data envelope to its stream: drop replay duplicates, patch
    /// deltas onto the last full value, advance the checkpoint
    fn deliver(shared: &Arc<Shared>, data: StreamDataEnvelope) {
        let mut tracked = shared.streams.lock();
        let Some(stream) = tracked.get_mut(&data.stream_id) else {
            debug!(stream_id = %data.stream_id, "Data for unknown stream");
            return;
        };

        let restart = data.sequence == 1;
        if !restart && data.sequence <= stream.checkpoint {
            debug!(stream_id = %data.stream_id, sequence = data.sequence, "Duplicate stream data dropped");
            return;
        }
        if !restart && data.sequence > stream.checkpoint + 1 {
            warn!(
                stream_id = %data.stream_id,
                checkpoint = stream.checkpoint,
                sequence = data.sequence,
                "Gap in stream sequence"
            );
        }

        let decoded = match decode_document(&data.data) {
            Ok(value) => value,
            Err(e) => {
                warn!(stream_id = %data.stream_id, error = %e, "Undecodable stream data dropped");
                return;
            }
        };
        let value = match (data.is_delta, stream.last_value.take()) {
            (true, Some(mut base)) => {
                streams::apply_delta(&mut base, &decoded);
                base
            }
            (true, None) => {
                warn!(stream_id = %data.stream_id, "Delta without a base value");
                decoded
            }
            (false, _) => decoded,
        };

        let update = StreamUpdate {
            sequence: data.sequence,
            value: value.clone(),
            is_reset: restart && stream.checkpoint > 0,
            timestamp_ns: data.timestamp_ns,
        };
        stream.last_value = Some(value);
        stream.checkpoint = data.sequence;

        match stream.events.try_send(StreamEvent::Update(update)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(
                    stream_id = %data.stream_id,
                    sequence = data.sequence,
                    capacity = shared.options.stream_buffer,
                    "Subscriber not keeping up, dropping stream"
                );
                if let Some(stream) = tracked.remove(&data.stream_id) {
                    stream.finish(StreamEvent::Failed {
                        message: SUBSCRIBER_LAGGED.to_string(),
                    });
                }
                drop(tracked);
                Shared::end_remote(shared, data.stream_id);
            }
            Err(TrySendError::Closed(_)) => {
                // Subscription handle dropped
                tracked.remove(&data.stream_id);
                drop(tracked);
                Shared::end_remote(shared, data.stream_id);
            }
        }
    }

    /// Tell the server to drop a stream nobody listens to
    fn end_remote(shared: &Arc<Shared>, stream_id: codec::StreamId) {
        let shared = shared.clone();
        tokio::spawn(async move {
            let end = Envelope::StreamEnd(StreamEndEnvelope {
                stream_id,
                reason: UNSUBSCRIBED.to_string(),
            });
            if let Err(e) = shared.send(&end).await {
                debug!(error = %e, "Could not end abandoned stream");
            }
        });
    }
}

async fn read_loop(shared: Arc<Shared>, connection: SharedConnection, generation: u64) {
    let mut frames = Box::pin(incoming(connection));
    let reason = loop {
        match frames.next().await {
            Some(Ok(frame)) => match codec::decode(&frame) {
                Ok(envelope) => Shared::handle(&shared, envelope),
                Err(e) => warn!(error = %e, "Dropping undecodable frame"),
            },
            Some(Err(e)) => break e.to_string(),
            None => break "closed by peer".to_string(),
        }
    };
    Shared::connection_lost(&shared, generation, &reason);
}

async fn reconnect(shared: Arc<Shared>) {
    let policy = shared.options.reconnect.clone();
    let attempts = policy.attempts();
    let endpoint = shared.connector.describe();

    for attempt in 1..=attempts {
        if shared.closing.load(Ordering::SeqCst) {
            return;
        }
        shared.state.send_replace(ConnectionState::Reconnecting { attempt });
        tokio::time::sleep(policy.delay_for(attempt)).await;
        if shared.closing.load(Ordering::SeqCst) {
            return;
        }

        match shared.connector.connect().await {
            Ok(connection) => {
                if shared.closing.load(Ordering::SeqCst) {
                    connection.close().await;
                    return;
                }
                shared.reconnects.fetch_add(1, Ordering::Relaxed);
                Shared::install(&shared, connection).await;
                info!(endpoint = %endpoint, attempt, "Reconnected");
                return;
            }
            Err(e) => warn!(endpoint = %endpoint, attempt, attempts, error = %e, "Reconnect attempt failed"),
        }
    }

    error!(endpoint = %endpoint, attempts, "Reconnect attempts exhausted");
    shared.state.send_replace(ConnectionState::Failed);
    let streams: Vec<TrackedStream> = shared.streams.lock().drain().map(|(_, s)| s).collect();
    for stream in streams {
        stream.finish(StreamEvent::Failed {
            message: "connection failed".to_string(),
        });
    }
}
