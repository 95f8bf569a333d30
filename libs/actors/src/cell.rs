//! Mailbox task owning one actor instance
//!
//! Every interaction with an actor, including snapshot reads for new
//! subscriptions, is a job in its FIFO mailbox. A job runs to completion
//! before the next is taken, so a snapshot can never interleave with an
//! emission from a running method.

use crate::actor::{Actor, ActorContext};
use crate::dispatch::{MethodError, MethodTable, Reply};
use async_trait::async_trait;
use codec::{ActorId, Arguments};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

type JobFn<A> = Box<dyn for<'a> FnOnce(&'a mut A) -> BoxFuture<'a, ()> + Send>;

enum Job<A> {
    Run(JobFn<A>),
    Stop(oneshot::Sender<()>),
}

fn job<A, F>(f: F) -> Job<A>
where
    F: for<'a> FnOnce(&'a mut A) -> BoxFuture<'a, ()> + Send + 'static,
{
    Job::Run(Box::new(f))
}

/// Callback receiving a property snapshot inside the mailbox
pub type SnapshotFn = Box<dyn FnOnce(Value) + Send>;

/// Outcome of a queued method call
pub type PendingReply = oneshot::Receiver<Result<Reply, MethodError>>;

/// Completion of a queued property read
pub type PendingSnapshot = oneshot::Receiver<Result<(), MethodError>>;

/// Failure to hand a call to an actor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    UnknownTarget,
    /// Mailbox closed before the job ran
    Stopped,
}

/// Type-erased handle to a running actor
#[async_trait]
pub trait ActorHandle: Send + Sync {
    fn id(&self) -> &ActorId;

    fn type_name(&self) -> &'static str;

    fn has_target(&self, target: &str) -> bool;

    fn has_property(&self, name: &str) -> bool;

    /// Queue a method call; the receiver yields its outcome
    async fn dispatch(&self, target: &str, args: Arguments) -> Result<PendingReply, DispatchError>;

    /// Queue a method call and wait for its outcome
    async fn invoke(
        &self,
        target: &str,
        args: Arguments,
    ) -> Result<Result<Reply, MethodError>, DispatchError> {
        let pending = self.dispatch(target, args).await?;
        pending.await.map_err(|_| DispatchError::Stopped)
    }

    /// Queue a read of `property`; `then` receives the value inside the
    /// mailbox, before any later job runs
    async fn observe(&self, property: &str, then: SnapshotFn) -> Result<PendingSnapshot, DispatchError>;

    /// Drain queued jobs, run the stop hook and end the task
    async fn stop(&self);
}

pub(crate) struct ActorCell<A: Actor> {
    id: ActorId,
    table: Arc<MethodTable<A>>,
    tx: mpsc::Sender<Job<A>>,
}

impl<A: Actor> ActorCell<A> {
    /// Spawn the mailbox task for an already started actor
    pub(crate) fn spawn(actor: A, ctx: ActorContext, table: Arc<MethodTable<A>>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = ctx.actor_id().clone();
        tokio::spawn(MailboxTask { actor, ctx, rx }.run());
        Self { id, table, tx }
    }

    async fn enqueue(&self, job: Job<A>) -> Result<(), DispatchError> {
        self.tx.send(job).await.map_err(|_| DispatchError::Stopped)
    }
}

#[async_trait]
impl<A: Actor> ActorHandle for ActorCell<A> {
    fn id(&self) -> &ActorId {
        &self.id
    }

    fn type_name(&self) -> &'static str {
        A::type_name()
    }

    fn has_target(&self, target: &str) -> bool {
        self.table.has_method(target)
    }

    fn has_property(&self, name: &str) -> bool {
        self.table.has_property(name)
    }

    async fn dispatch(&self, target: &str, args: Arguments) -> Result<PendingReply, DispatchError> {
        let handler = self.table.handler(target).ok_or(DispatchError::UnknownTarget)?;
        let (reply_tx, reply_rx) = oneshot::channel();

        self.enqueue(job(move |actor: &mut A| {
            Box::pin(async move {
                let outcome = AssertUnwindSafe(handler(actor, args))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(MethodError::Internal("method panicked".to_string())));
                let _ = reply_tx.send(outcome);
            })
        }))
        .await?;

        Ok(reply_rx)
    }

    async fn observe(&self, property: &str, then: SnapshotFn) -> Result<PendingSnapshot, DispatchError> {
        let reader = self.table.reader(property).ok_or(DispatchError::UnknownTarget)?;
        let (done_tx, done_rx) = oneshot::channel();

        self.enqueue(job(move |actor: &mut A| {
            Box::pin(async move {
                let outcome = reader(&*actor).map(then);
                let _ = done_tx.send(outcome);
            })
        }))
        .await?;

        Ok(done_rx)
    }

    async fn stop(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Job::Stop(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }
}

struct MailboxTask<A: Actor> {
    actor: A,
    ctx: ActorContext,
    rx: mpsc::Receiver<Job<A>>,
}

impl<A: Actor> MailboxTask<A> {
    async fn run(mut self) {
        let task_start = Instant::now();
        let actor_id = self.ctx.actor_id().clone();
        debug!(actor_id = %actor_id, actor_type = A::type_name(), "Mailbox task running");

        let mut processed: u64 = 0;
        let mut stopped_by = None;
        while let Some(next) = self.rx.recv().await {
            match next {
                Job::Run(work) => {
                    work(&mut self.actor).await;
                    processed += 1;
                }
                Job::Stop(done) => {
                    stopped_by = Some(done);
                    break;
                }
            }
        }

        // Jobs queued behind the stop request are dropped; their callers
        // observe a closed mailbox.
        self.rx.close();

        if let Err(e) = self.actor.on_stop(&self.ctx).await {
            error!(
                actor_id = %actor_id,
                error = %e,
                error_category = e.category(),
                "Actor stop hook failed"
            );
        }

        info!(
            actor_id = %actor_id,
            processed,
            uptime_ms = task_start.elapsed().as_millis() as u64,
            "Actor stopped"
        );

        match stopped_by {
            Some(done) => {
                let _ = done.send(());
            }
            None => warn!(actor_id = %actor_id, "Mailbox closed without stop request"),
        }
    }
}
