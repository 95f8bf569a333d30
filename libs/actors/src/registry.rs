//! Actor Registry
//!
//! Exclusive owner of the ActorId → running actor binding. The map lock is
//! never held across a lifecycle hook or a mailbox send.

use crate::actor::{Actor, ActorContext};
use crate::cell::{ActorCell, ActorHandle};
use crate::store::StateStore;
use crate::{ActorError, Result};
use codec::ActorId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use streams::{StreamRegistry, ACTOR_DEREGISTERED};
use tracing::{debug, info};

pub const DEFAULT_MAILBOX_CAPACITY: usize = 1024;

pub struct ActorRegistry {
    actors: RwLock<HashMap<ActorId, Arc<dyn ActorHandle>>>,
    streams: Arc<StreamRegistry>,
    store: Option<Arc<dyn StateStore>>,
    mailbox_capacity: usize,
}

impl ActorRegistry {
    pub fn new(streams: Arc<StreamRegistry>) -> Self {
        Self {
            actors: RwLock::new(HashMap::new()),
            streams,
            store: None,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }

    pub fn with_state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    pub fn streams(&self) -> &Arc<StreamRegistry> {
        &self.streams
    }

    /// Bind `actor` to `id`, run its start hook and begin accepting calls
    ///
    /// An id that is already bound fails with `DuplicateIdentifier` and
    /// leaves the existing binding untouched.
    pub async fn expose<A: Actor>(&self, mut actor: A, id: impl Into<ActorId>) -> Result<()> {
        let id = id.into();
        if id.is_empty() {
            return Err(ActorError::EmptyIdentifier);
        }
        if self.contains(&id) {
            return Err(ActorError::DuplicateIdentifier { actor_id: id });
        }

        let ctx = ActorContext::new(id.clone(), A::type_name(), self.streams.clone(), self.store.clone());
        actor
            .on_start(&ctx)
            .await
            .map_err(|e| ActorError::lifecycle(&id, e))?;

        let table = Arc::new(A::methods());
        let method_count = table.targets().len();

        let mut actors = self.actors.write();
        // Another expose may have won while the start hook ran
        if actors.contains_key(&id) {
            return Err(ActorError::DuplicateIdentifier { actor_id: id });
        }
        let cell = ActorCell::spawn(actor, ctx, table, self.mailbox_capacity);
        actors.insert(id.clone(), Arc::new(cell));
        drop(actors);

        info!(
            actor_id = %id,
            actor_type = A::type_name(),
            methods = method_count,
            "Actor exposed"
        );
        Ok(())
    }

    /// Remove the binding, end its streams and stop the actor once its
    /// queued calls have completed
    pub async fn deregister(&self, id: &ActorId) -> Result<()> {
        let handle = self
            .actors
            .write()
            .remove(id)
            .ok_or_else(|| ActorError::UnknownActor { actor_id: id.clone() })?;

        let ended = self.streams.end_actor(id, ACTOR_DEREGISTERED);
        debug!(actor_id = %id, streams_ended = ended, "Ending streams of deregistered actor");

        handle.stop().await;
        // Subscribe and resume jobs queued ahead of the stop opened sessions
        // after the first pass
        let late = self.streams.end_actor(id, ACTOR_DEREGISTERED);
        info!(actor_id = %id, streams_ended = ended + late, "Actor deregistered");
        Ok(())
    }

    pub fn lookup(&self, id: &ActorId) -> Option<Arc<dyn ActorHandle>> {
        self.actors.read().get(id).cloned()
    }

    pub fn contains(&self, id: &ActorId) -> bool {
        self.actors.read().contains_key(id)
    }

    /// Bound identifiers, sorted
    pub fn list(&self) -> Vec<ActorId> {
        let mut ids: Vec<ActorId> = self.actors.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.actors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.read().is_empty()
    }

    /// Deregister every actor
    pub async fn shutdown(&self) {
        for id in self.list() {
            let _ = self.deregister(&id).await;
        }
    }
}

impl fmt::Debug for ActorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorRegistry")
            .field("actors", &self.len())
            .field("persistent", &self.store.is_some())
            .finish()
    }
}
