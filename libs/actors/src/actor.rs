//! Actor behaviour and lifecycle context

use crate::dispatch::MethodTable;
use crate::store::StateStore;
use crate::{ActorError, Result};
use async_trait::async_trait;
use codec::ActorId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use streams::{Emitter, StreamRegistry};

/// A stateful, single-threaded unit addressed by an [`ActorId`]
///
/// The runtime owns the instance inside a mailbox task; methods run one at
/// a time, in arrival order, each to completion.
#[async_trait]
pub trait Actor: Send + Sized + 'static {
    /// Type tag used for persistence keys and logs
    fn type_name() -> &'static str;

    /// Callable surface, built once when the actor is exposed
    fn methods() -> MethodTable<Self>;

    /// Runs before the actor accepts calls; binding observed fields to
    /// [`ActorContext::emitter`] and loading persisted state belong here.
    async fn on_start(&mut self, _ctx: &ActorContext) -> Result<()> {
        Ok(())
    }

    /// Runs after deregistration, once queued calls have drained
    async fn on_stop(&mut self, _ctx: &ActorContext) -> Result<()> {
        Ok(())
    }
}

/// Runtime services handed to lifecycle hooks
#[derive(Clone)]
pub struct ActorContext {
    actor_id: ActorId,
    type_name: &'static str,
    streams: Arc<StreamRegistry>,
    store: Option<Arc<dyn StateStore>>,
}

impl ActorContext {
    pub(crate) fn new(
        actor_id: ActorId,
        type_name: &'static str,
        streams: Arc<StreamRegistry>,
        store: Option<Arc<dyn StateStore>>,
    ) -> Self {
        Self {
            actor_id,
            type_name,
            streams,
            store,
        }
    }

    pub fn actor_id(&self) -> &ActorId {
        &self.actor_id
    }

    /// Emitter publishing values of `target` on this actor
    pub fn emitter(&self, target: impl Into<String>) -> Emitter {
        Emitter::new(self.streams.clone(), self.actor_id.clone(), target)
    }

    pub fn has_state_store(&self) -> bool {
        self.store.is_some()
    }

    /// Persisted state for this actor, `None` without a store or record
    pub async fn load_state<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        match store.load(&self.actor_id, self.type_name).await? {
            Some(bytes) => codec::decode_value(&bytes)
                .map(Some)
                .map_err(ActorError::persistence),
            None => Ok(None),
        }
    }

    pub async fn save_state<T: Serialize + Sync>(&self, state: &T) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let bytes = codec::encode_value(state).map_err(ActorError::persistence)?;
        store.save(&self.actor_id, self.type_name, bytes).await
    }

    pub async fn delete_state(&self) -> Result<()> {
        match &self.store {
            Some(store) => store.delete(&self.actor_id, self.type_name).await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for ActorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorContext")
            .field("actor_id", &self.actor_id)
            .field("type_name", &self.type_name)
            .field("persistent", &self.store.is_some())
            .finish()
    }
}
