//! Discovery-backed actor resolution
//!
//! Looks up the node hosting an actor and hands out proxies that share one
//! connection manager per endpoint.

use crate::error::{ClientError, Result};
use crate::manager::ConnectionManager;
use crate::options::ClientOptions;
use crate::proxy::ActorProxy;
use actors::ServiceDiscovery;
use codec::ActorId;
use network::Endpoint;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub struct Resolver {
    discovery: Arc<dyn ServiceDiscovery>,
    options: ClientOptions,
    managers: Mutex<HashMap<Endpoint, ConnectionManager>>,
}

impl Resolver {
    pub fn new(discovery: Arc<dyn ServiceDiscovery>, options: ClientOptions) -> Self {
        Self {
            discovery,
            options,
            managers: Mutex::new(HashMap::new()),
        }
    }

    /// Proxy for `actor_id` on whichever node discovery names.
    /// `UnknownActor` when there is no live registration.
    pub async fn resolve(&self, actor_id: impl Into<ActorId>) -> Result<ActorProxy> {
        let actor_id = actor_id.into();
        let endpoint = self
            .discovery
            .resolve(&actor_id)
            .await
            .map_err(|e| ClientError::Discovery {
                message: e.to_string(),
            })?
            .ok_or_else(|| ClientError::UnknownActor {
                actor_id: actor_id.clone(),
            })?;
        debug!(actor_id = %actor_id, endpoint = %endpoint, "Resolved actor");
        Ok(self.manager_for(&endpoint).resolve(actor_id))
    }

    /// Shared manager for `endpoint`, created unconnected on first use
    pub fn manager_for(&self, endpoint: &Endpoint) -> ConnectionManager {
        self.managers
            .lock()
            .entry(endpoint.clone())
            .or_insert_with(|| ConnectionManager::new(endpoint.clone(), self.options.clone()))
            .clone()
    }

    pub fn manager_count(&self) -> usize {
        self.managers.lock().len()
    }

    /// Disconnect every manager
    pub async fn shutdown(&self) {
        let managers: Vec<ConnectionManager> = self.managers.lock().drain().map(|(_, m)| m).collect();
        for manager in managers {
            manager.disconnect().await;
        }
    }
}
