//! Invocation observers
//!
//! Observers are best-effort: the engine notifies them at the start and
//! finish of every call and never lets one fail the call.

use codec::{ActorId, CallId, CallResult};
use std::time::Duration;
use tracing::{debug, warn};

/// Summary of one processed call
#[derive(Debug, Clone)]
pub struct CallRecord<'a> {
    pub call_id: &'a CallId,
    pub actor_id: &'a ActorId,
    pub target: &'a str,
    pub result: &'a CallResult,
    pub duration: Duration,
}

pub trait InvocationObserver: Send + Sync {
    fn on_start(&self, _call_id: &CallId, _actor_id: &ActorId, _target: &str) -> Result<(), String> {
        Ok(())
    }

    fn on_finish(&self, record: &CallRecord<'_>) -> Result<(), String>;
}

/// Logs every call through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl InvocationObserver for TracingObserver {
    fn on_start(&self, call_id: &CallId, actor_id: &ActorId, target: &str) -> Result<(), String> {
        debug!(call_id = %call_id, actor_id = %actor_id, target, "Invocation started");
        Ok(())
    }

    fn on_finish(&self, record: &CallRecord<'_>) -> Result<(), String> {
        match record.result.error() {
            None => debug!(
                call_id = %record.call_id,
                actor_id = %record.actor_id,
                target = record.target,
                duration_us = record.duration.as_micros() as u64,
                "Invocation completed"
            ),
            Some(descriptor) => warn!(
                call_id = %record.call_id,
                actor_id = %record.actor_id,
                target = record.target,
                error_category = descriptor.category(),
                error = %descriptor,
                duration_us = record.duration.as_micros() as u64,
                "Invocation failed"
            ),
        }
        Ok(())
    }
}
