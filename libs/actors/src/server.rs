//! Connection server
//!
//! One reader loop and one writer task per connection. The reader decodes
//! envelopes and hands calls to the engine in arrival order; responses and
//! stream traffic share the writer. Stream traffic goes through the
//! connection's bounded outlet, so a stalled peer suspends its sessions
//! instead of growing a queue.

use crate::cell::DispatchError;
use crate::engine::{CallContext, InvocationEngine};
use crate::Result;
use codec::{
    CallId, Envelope, ErrorDescriptor, InvocationResponse, StreamErrorEnvelope, StreamId,
    StreamResumeEnvelope, StreamSubscribeEnvelope,
};
use futures::StreamExt;
use network::{incoming, Listener, SharedConnection, TransportError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use streams::{StreamOutlet, StreamRegistry, SubscribeRequest};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const RESPONSE_CHANNEL_CAPACITY: usize = 1024;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

pub struct ActorServer {
    engine: Arc<InvocationEngine>,
    streams: Arc<StreamRegistry>,
}

impl ActorServer {
    pub fn new(engine: Arc<InvocationEngine>) -> Self {
        let streams = engine.registry().streams().clone();
        Self { engine, streams }
    }

    pub fn engine(&self) -> &Arc<InvocationEngine> {
        &self.engine
    }

    /// Accept connections until the listener is misconfigured. A failed
    /// handshake only loses that connection.
    pub async fn serve(self: Arc<Self>, listener: Box<dyn Listener>) -> Result<()> {
        info!(endpoint = %listener.endpoint(), "Actor server listening");
        loop {
            match listener.accept().await {
                Ok(connection) => {
                    self.spawn_connection(connection);
                }
                Err(e @ TransportError::Configuration { .. }) => return Err(e.into()),
                Err(e) => {
                    warn!(endpoint = %listener.endpoint(), error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    pub fn spawn_connection(self: &Arc<Self>, connection: SharedConnection) -> JoinHandle<()> {
        let server = Arc::clone(self);
        tokio::spawn(async move { server.handle_connection(connection).await })
    }

    /// Serve one connection until the peer goes away
    pub async fn handle_connection(self: Arc<Self>, connection: SharedConnection) {
        let connected_at = Instant::now();
        let ctx = CallContext::remote(connection.peer(), connection.id());
        info!(connection_id = connection.id(), peer = %connection.peer(), "Connection accepted");

        let (outlet, stream_rx) =
            StreamOutlet::channel(connection.id(), self.streams.settings().outlet_capacity);
        let (response_tx, response_rx) = mpsc::channel(RESPONSE_CHANNEL_CAPACITY);
        let writer = tokio::spawn(write_loop(connection.clone(), response_rx, stream_rx));

        let mut frames = Box::pin(incoming(connection.clone()));
        let mut received: u64 = 0;
        while let Some(frame) = frames.next().await {
            let bytes = match frame {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(connection_id = connection.id(), error = %e, "Connection failed");
                    break;
                }
            };
            received += 1;

            let envelope = match codec::decode(&bytes) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(
                        connection_id = connection.id(),
                        error = %e,
                        frame_len = bytes.len(),
                        "Dropping undecodable frame"
                    );
                    continue;
                }
            };

            match envelope {
                Envelope::Invocation(invocation) => {
                    let pending = self.engine.submit(invocation, &ctx).await;
                    let engine = self.engine.clone();
                    let responses = response_tx.clone();
                    tokio::spawn(async move {
                        let response = engine.complete(pending).await;
                        let _ = responses.send(Envelope::Response(response)).await;
                    });
                }
                Envelope::StreamSubscribe(subscribe) => {
                    self.subscribe(subscribe, &ctx, &outlet, &response_tx).await;
                }
                Envelope::StreamResume(resume) => {
                    self.resume(resume, &outlet).await;
                }
                Envelope::StreamEnd(end) => {
                    self.streams.unsubscribe(&end.stream_id);
                }
                other => {
                    debug!(
                        connection_id = connection.id(),
                        kind = other.kind().name(),
                        "Ignoring envelope not meant for a server"
                    );
                }
            }
        }

        let suspended = self.streams.suspend_outlet(connection.id());
        connection.close().await;
        writer.abort();
        info!(
            connection_id = connection.id(),
            peer = %connection.peer(),
            received,
            suspended_streams = suspended,
            connected_ms = connected_at.elapsed().as_millis() as u64,
            "Connection closed"
        );
    }

    async fn subscribe(
        &self,
        subscribe: StreamSubscribeEnvelope,
        ctx: &CallContext,
        outlet: &StreamOutlet,
        responses: &mpsc::Sender<Envelope>,
    ) {
        let admitted = self.engine.admit_subscription(&subscribe, ctx).await;
        let StreamSubscribeEnvelope {
            call_id,
            actor_id,
            target,
            filter,
            ..
        } = subscribe;
        let reply = Rejection {
            call_id: call_id.clone(),
            responses: responses.clone(),
        };

        if let Err(descriptor) = admitted {
            return reply.send(descriptor).await;
        }
        let Some(handle) = self.engine.registry().lookup(&actor_id) else {
            return reply.send(ErrorDescriptor::unknown_actor(actor_id)).await;
        };

        let streams = self.streams.clone();
        let outlet = outlet.clone();
        let request = SubscribeRequest {
            call_id,
            actor_id: actor_id.clone(),
            target: target.clone(),
            filter,
        };
        let (opened_tx, opened_rx) = oneshot::channel();
        let queued = handle
            .observe(
                &target,
                Box::new(move |snapshot| {
                    let _ = opened_tx.send(streams.subscribe(request, &snapshot, outlet));
                }),
            )
            .await;

        let done = match queued {
            Ok(done) => done,
            Err(DispatchError::UnknownTarget) => {
                return reply.send(ErrorDescriptor::unknown_target(actor_id, target)).await;
            }
            Err(DispatchError::Stopped) => {
                return reply.send(ErrorDescriptor::unknown_actor(actor_id)).await;
            }
        };

        // The snapshot is read behind any queued calls; wait off the reader
        tokio::spawn(async move {
            let descriptor = match done.await {
                Ok(Ok(())) => match opened_rx.await {
                    Ok(Ok(_)) => return,
                    Ok(Err(e)) => ErrorDescriptor::Encoding { message: e.to_string() },
                    Err(_) => ErrorDescriptor::Internal {
                        message: "subscription dropped".to_string(),
                    },
                },
                Ok(Err(e)) => e.into_descriptor(),
                Err(_) => ErrorDescriptor::unknown_actor(actor_id),
            };
            reply.send(descriptor).await;
        });
    }

    async fn resume(&self, resume: StreamResumeEnvelope, outlet: &StreamOutlet) {
        let stream_id = resume.stream_id.clone();
        let Some(handle) = self.engine.registry().lookup(&resume.actor_id) else {
            return stream_error(outlet, stream_id, format!("unknown actor '{}'", resume.actor_id));
        };

        let streams = self.streams.clone();
        let resume_outlet = outlet.clone();
        let target = resume.target.clone();
        let queued = handle
            .observe(
                &target,
                Box::new(move |snapshot| match streams.resume(&resume, &snapshot, resume_outlet) {
                    Ok(outcome) => {
                        debug!(stream_id = %resume.stream_id, outcome = ?outcome, "Stream resumed");
                    }
                    Err(e) => {
                        warn!(stream_id = %resume.stream_id, error = %e, "Stream resume failed");
                    }
                }),
            )
            .await;

        if queued.is_err() {
            stream_error(outlet, stream_id, format!("unknown target '{}'", target));
        }
    }
}

/// Refuses a subscription through the response channel, under its call id
struct Rejection {
    call_id: CallId,
    responses: mpsc::Sender<Envelope>,
}

impl Rejection {
    async fn send(self, descriptor: ErrorDescriptor) {
        let response = InvocationResponse::error(self.call_id, descriptor);
        let _ = self.responses.send(Envelope::Response(response)).await;
    }
}

fn stream_error(outlet: &StreamOutlet, stream_id: StreamId, error_message: String) {
    let _ = outlet.offer(Envelope::StreamError(StreamErrorEnvelope {
        stream_id,
        error_message,
    }));
}

async fn write_loop(
    connection: SharedConnection,
    mut responses: mpsc::Receiver<Envelope>,
    mut stream_traffic: mpsc::Receiver<Envelope>,
) {
    loop {
        let envelope = tokio::select! {
            biased;
            Some(envelope) = responses.recv() => envelope,
            Some(envelope) = stream_traffic.recv() => envelope,
            else => break,
        };

        let bytes = match codec::encode(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    connection_id = connection.id(),
                    kind = envelope.kind().name(),
                    error = %e,
                    "Failed to encode envelope"
                );
                continue;
            }
        };
        if let Err(e) = connection.send(bytes).await {
            debug!(connection_id = connection.id(), error = %e, "Writer stopping");
            break;
        }
    }
}
