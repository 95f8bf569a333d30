//! Observable actor state
//!
//! [`Observed`] wraps a field so that every `set` stores the new value and
//! then explicitly calls `notify` on its [`Emitter`]. There is no implicit
//! interception: a mutation that bypasses `set`/`update` is not streamed.

use crate::registry::StreamRegistry;
use crate::{StreamError, StreamResult};
use codec::ActorId;
use serde::Serialize;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tracing::warn;

/// Publishes values of one (actor, target) pair to the stream registry
#[derive(Clone)]
pub struct Emitter {
    registry: Arc<StreamRegistry>,
    actor_id: ActorId,
    target: String,
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("actor_id", &self.actor_id)
            .field("target", &self.target)
            .finish()
    }
}

impl Emitter {
    pub fn new(registry: Arc<StreamRegistry>, actor_id: ActorId, target: impl Into<String>) -> Self {
        Self {
            registry,
            actor_id,
            target: target.into(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Returns the number of sessions that accepted the value
    pub fn notify<T: Serialize + ?Sized>(&self, value: &T) -> StreamResult<usize> {
        let value = serde_json::to_value(value).map_err(|e| StreamError::Encoding {
            message: e.to_string(),
        })?;
        Ok(self.registry.emit(&self.actor_id, &self.target, &value))
    }
}

/// A field whose changes are pushed to subscribers
pub struct Observed<T> {
    value: T,
    emitter: Option<Emitter>,
}

impl<T: Serialize> Observed<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            emitter: None,
        }
    }

    /// Attach the emitter, typically from the actor's start hook
    pub fn bind(&mut self, emitter: Emitter) {
        self.emitter = Some(emitter);
    }

    pub fn is_bound(&self) -> bool {
        self.emitter.is_some()
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    /// Store `value`, then notify subscribers
    pub fn set(&mut self, value: T) {
        self.value = value;
        self.notify();
    }

    /// Mutate in place, then notify subscribers
    pub fn update<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> R {
        let result = f(&mut self.value);
        self.notify();
        result
    }

    /// Push the current value. Unbound fields are silently skipped;
    /// encoding failures are logged and never reach the caller.
    pub fn notify(&self) {
        let Some(emitter) = &self.emitter else {
            return;
        };
        if let Err(e) = emitter.notify(&self.value) {
            warn!(target_name = %emitter.target(), error = %e, "Failed to stream observed value");
        }
    }
}

impl<T> Deref for Observed<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for Observed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observed")
            .field("value", &self.value)
            .field("bound", &self.emitter.is_some())
            .finish()
    }
}

impl<T: Serialize + Default> Default for Observed<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
