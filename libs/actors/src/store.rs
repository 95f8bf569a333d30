//! Persistence collaborator
//!
//! The runtime never persists on its own; actors call into a
//! [`StateStore`] from their lifecycle hooks through `ActorContext`.

use crate::Result;
use async_trait::async_trait;
use codec::ActorId;
use dashmap::DashMap;

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, actor_id: &ActorId, type_name: &str) -> Result<Option<Vec<u8>>>;

    async fn save(&self, actor_id: &ActorId, type_name: &str, state: Vec<u8>) -> Result<()>;

    async fn delete(&self, actor_id: &ActorId, type_name: &str) -> Result<()>;
}

/// Process-local store, lost on exit
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: DashMap<(ActorId, String), Vec<u8>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, actor_id: &ActorId, type_name: &str) -> Result<Option<Vec<u8>>> {
        let key = (actor_id.clone(), type_name.to_string());
        Ok(self.records.get(&key).map(|entry| entry.value().clone()))
    }

    async fn save(&self, actor_id: &ActorId, type_name: &str, state: Vec<u8>) -> Result<()> {
        self.records
            .insert((actor_id.clone(), type_name.to_string()), state);
        Ok(())
    }

    async fn delete(&self, actor_id: &ActorId, type_name: &str) -> Result<()> {
        self.records.remove(&(actor_id.clone(), type_name.to_string()));
        Ok(())
    }
}
