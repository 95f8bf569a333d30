//! Invocation Engine
//!
//! Turns an [`InvocationEnvelope`] into exactly one [`InvocationResponse`].
//! Nothing escapes `process` as an error: decode failures, unknown
//! targets, hook rejections and application failures all become error
//! descriptors under the caller's call id.

use crate::cell::{DispatchError, PendingReply};
use crate::dispatch::Reply;
use crate::hooks::{Action, CallRequest, HookChain, Principal};
use crate::observer::{CallRecord, InvocationObserver};
use crate::registry::ActorRegistry;
use codec::{
    Arguments, CallId, CallResult, ErrorDescriptor, InvocationEnvelope, InvocationResponse,
    StreamSubscribeEnvelope, EXISTS_TARGET,
};
use network::ConnectionId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::warn;

/// Where a call came from
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub peer: Option<String>,
    pub connection_id: Option<ConnectionId>,
}

impl CallContext {
    /// In-process caller
    pub fn local() -> Self {
        Self::default()
    }

    pub fn remote(peer: impl Into<String>, connection_id: ConnectionId) -> Self {
        Self {
            peer: Some(peer.into()),
            connection_id: Some(connection_id),
        }
    }
}

/// Engine-wide counters
#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub calls_processed: AtomicU64,
    pub calls_failed: AtomicU64,
    pub calls_rejected: AtomicU64,
    pub total_processing_time_ns: AtomicU64,
}

impl EngineMetrics {
    pub fn record_call(&self, result: &CallResult, duration: Duration) {
        self.calls_processed.fetch_add(1, Ordering::Relaxed);
        self.total_processing_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
        if let Some(descriptor) = result.error() {
            if descriptor.is_rejection() {
                self.calls_rejected.fetch_add(1, Ordering::Relaxed);
            } else {
                self.calls_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn avg_processing_time_ns(&self) -> f64 {
        let count = self.calls_processed.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        self.total_processing_time_ns.load(Ordering::Relaxed) as f64 / count as f64
    }
}

pub struct InvocationEngine {
    registry: Arc<ActorRegistry>,
    hooks: HookChain,
    observers: Vec<Arc<dyn InvocationObserver>>,
    metrics: EngineMetrics,
}

impl InvocationEngine {
    pub fn new(registry: Arc<ActorRegistry>) -> Self {
        Self {
            registry,
            hooks: HookChain::default(),
            observers: Vec::new(),
            metrics: EngineMetrics::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: HookChain) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn InvocationObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn registry(&self) -> &Arc<ActorRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Run one call to completion
    pub async fn process(&self, envelope: InvocationEnvelope, ctx: &CallContext) -> InvocationResponse {
        let pending = self.submit(envelope, ctx).await;
        self.complete(pending).await
    }

    /// Run the hooks and queue the call in the actor's mailbox. Calls
    /// submitted one after another reach the mailbox in the same order.
    pub async fn submit(&self, envelope: InvocationEnvelope, ctx: &CallContext) -> PendingCall {
        let started = Instant::now();
        for observer in &self.observers {
            if let Err(e) = observer.on_start(&envelope.call_id, &envelope.actor_id, &envelope.target) {
                warn!(call_id = %envelope.call_id, error = %e, "Invocation observer failed");
            }
        }

        let outcome = match self.enqueue(&envelope, ctx).await {
            Ok(reply) => Outcome::Queued(reply),
            Err(descriptor) => Outcome::Done(CallResult::Error(descriptor)),
        };
        PendingCall {
            envelope,
            started,
            outcome,
        }
    }

    /// Wait for a submitted call and build its response
    pub async fn complete(&self, pending: PendingCall) -> InvocationResponse {
        let PendingCall {
            envelope,
            started,
            outcome,
        } = pending;

        let result = match outcome {
            Outcome::Done(result) => result,
            Outcome::Queued(reply) => match reply.await {
                Ok(Ok(Reply::Value(bytes))) => CallResult::Value(bytes),
                Ok(Ok(Reply::Void)) => CallResult::Void,
                Ok(Err(e)) => CallResult::Error(e.into_descriptor()),
                // Mailbox dropped the job: the actor was deregistered
                Err(_) => CallResult::Error(ErrorDescriptor::unknown_actor(envelope.actor_id.clone())),
            },
        };

        let duration = started.elapsed();
        self.metrics.record_call(&result, duration);
        let record = CallRecord {
            call_id: &envelope.call_id,
            actor_id: &envelope.actor_id,
            target: &envelope.target,
            result: &result,
            duration,
        };
        for observer in &self.observers {
            if let Err(e) = observer.on_finish(&record) {
                warn!(call_id = %envelope.call_id, error = %e, "Invocation observer failed");
            }
        }

        InvocationResponse {
            call_id: envelope.call_id,
            result,
        }
    }

    /// Run the pre-dispatch hooks for a subscription request
    pub async fn admit_subscription(
        &self,
        envelope: &StreamSubscribeEnvelope,
        ctx: &CallContext,
    ) -> Result<Principal, ErrorDescriptor> {
        let request = CallRequest {
            actor_id: &envelope.actor_id,
            target: &envelope.target,
            action: Action::Subscribe,
            metadata: &envelope.metadata,
            payload_size: 0,
            peer: ctx.peer.as_deref(),
        };
        self.hooks.check(&request).await
    }

    async fn enqueue(
        &self,
        envelope: &InvocationEnvelope,
        ctx: &CallContext,
    ) -> Result<PendingReply, ErrorDescriptor> {
        let payload_size: usize = envelope.arguments.iter().map(Vec::len).sum();
        let request = CallRequest {
            actor_id: &envelope.actor_id,
            target: &envelope.target,
            action: Action::Invoke,
            metadata: &envelope.metadata,
            payload_size,
            peer: ctx.peer.as_deref(),
        };
        self.hooks.check(&request).await?;

        if envelope.target == EXISTS_TARGET {
            return if self.registry.contains(&envelope.actor_id) {
                let (tx, rx) = oneshot::channel();
                let _ = tx.send(Ok(Reply::Void));
                Ok(rx)
            } else {
                Err(ErrorDescriptor::unknown_actor(envelope.actor_id.clone()))
            };
        }

        let handle = self
            .registry
            .lookup(&envelope.actor_id)
            .ok_or_else(|| ErrorDescriptor::unknown_actor(envelope.actor_id.clone()))?;

        let target = dispatch_key(&envelope.target, &envelope.generic_substitutions)
            .filter(|key| handle.has_target(key))
            .unwrap_or_else(|| envelope.target.clone());

        let arguments = Arguments::from_raw(envelope.arguments.clone());
        handle.dispatch(&target, arguments).await.map_err(|e| match e {
            DispatchError::UnknownTarget => {
                ErrorDescriptor::unknown_target(envelope.actor_id.clone(), envelope.target.clone())
            }
            DispatchError::Stopped => ErrorDescriptor::unknown_actor(envelope.actor_id.clone()),
        })
    }
}

/// A call that has passed the hooks and is waiting in a mailbox, or that
/// already has its final result
pub struct PendingCall {
    envelope: InvocationEnvelope,
    started: Instant,
    outcome: Outcome,
}

enum Outcome {
    Queued(PendingReply),
    Done(CallResult),
}

impl PendingCall {
    pub fn call_id(&self) -> &CallId {
        &self.envelope.call_id
    }
}

/// Specialised table key for generic calls, e.g. `echo(_:)<Int>`
fn dispatch_key(target: &str, substitutions: &[String]) -> Option<String> {
    if substitutions.is_empty() {
        None
    } else {
        Some(format!("{}<{}>", target, substitutions.join(",")))
    }
}
