//! Service discovery collaborator
//!
//! Maps actor ids to the endpoint of the node hosting them. Registrations
//! carry a TTL; an expired registration resolves to nothing.

use crate::Result;
use async_trait::async_trait;
use codec::ActorId;
use dashmap::DashMap;
use network::Endpoint;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::debug;

#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    async fn register(
        &self,
        actor_id: &ActorId,
        endpoint: Endpoint,
        metadata: BTreeMap<String, String>,
        ttl: Duration,
    ) -> Result<()>;

    async fn resolve(&self, actor_id: &ActorId) -> Result<Option<Endpoint>>;

    async fn deregister(&self, actor_id: &ActorId) -> Result<()>;
}

#[derive(Debug, Clone)]
struct Registration {
    endpoint: Endpoint,
    metadata: BTreeMap<String, String>,
    expires_at: Instant,
}

/// Process-local registry, useful for tests and single-host deployments
#[derive(Debug, Default)]
pub struct MemoryDiscovery {
    registrations: DashMap<ActorId, Registration>,
}

impl MemoryDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata of a live registration
    pub fn metadata(&self, actor_id: &ActorId) -> Option<BTreeMap<String, String>> {
        self.registrations
            .get(actor_id)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.metadata.clone())
    }

    /// Drop expired registrations, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.registrations.len();
        self.registrations.retain(|_, registration| registration.expires_at > now);
        before - self.registrations.len()
    }
}

#[async_trait]
impl ServiceDiscovery for MemoryDiscovery {
    async fn register(
        &self,
        actor_id: &ActorId,
        endpoint: Endpoint,
        metadata: BTreeMap<String, String>,
        ttl: Duration,
    ) -> Result<()> {
        debug!(actor_id = %actor_id, endpoint = %endpoint, ttl_ms = ttl.as_millis() as u64, "Registering actor");
        self.registrations.insert(
            actor_id.clone(),
            Registration {
                endpoint,
                metadata,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn resolve(&self, actor_id: &ActorId) -> Result<Option<Endpoint>> {
        let now = Instant::now();
        let live = self
            .registrations
            .get(actor_id)
            .map(|entry| (entry.expires_at > now).then(|| entry.endpoint.clone()));
        match live {
            Some(Some(endpoint)) => Ok(Some(endpoint)),
            Some(None) => {
                self.registrations.remove(actor_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn deregister(&self, actor_id: &ActorId) -> Result<()> {
        self.registrations.remove(actor_id);
        Ok(())
    }
}
