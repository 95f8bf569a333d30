//! # Actor Node
//!
//! Assembles a node from [`RuntimeConfig`]: stream registry and reaper,
//! actor registry with an in-memory state store, invocation engine with the
//! configured pre-dispatch hooks, and one connection server per listen
//! endpoint.

pub mod demo;

use actors::{
    ActorRegistry, ActorServer, AllowListAuthorizer, HookChain, InvocationEngine, MemoryStateStore,
    SizeLimitValidator, TokenAuthenticator, TokenBucketLimiter, TracingObserver,
};
use anyhow::{Context, Result};
use network::Endpoint;
use runtime_config::{RuntimeConfig, SecurityConfig};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use streams::StreamRegistry;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Hooks enabled by the security section. Size validation is always on;
/// the others switch on when configured.
pub fn build_hooks(security: &SecurityConfig) -> HookChain {
    let mut hooks = HookChain::new().with_validator(Arc::new(SizeLimitValidator::new(
        security.max_payload_bytes,
    )));

    if !security.tokens.is_empty() {
        hooks = hooks.with_authenticator(Arc::new(TokenAuthenticator::new(
            security
                .tokens
                .iter()
                .map(|(token, principal)| (token.clone(), principal.clone())),
        )));
    }

    if !security.allow.is_empty() {
        let authorizer = security
            .allow
            .iter()
            .fold(AllowListAuthorizer::new(), |authorizer, (principal, actors)| {
                authorizer.allow(principal.clone(), actors.iter().cloned())
            });
        hooks = hooks.with_authorizer(Arc::new(authorizer));
    }

    if security.rate_limit_per_sec > 0 {
        hooks = hooks.with_rate_limiter(Arc::new(TokenBucketLimiter::new(
            security.rate_limit_per_sec,
            security.rate_limit_burst,
        )));
    }

    hooks
}

/// A running node
pub struct Node {
    name: String,
    registry: Arc<ActorRegistry>,
    server: Arc<ActorServer>,
    endpoints: Vec<Endpoint>,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Bind every listen endpoint and start serving. Fails if any endpoint
    /// cannot be bound.
    pub async fn start(config: &RuntimeConfig) -> Result<Self> {
        let streams = Arc::new(StreamRegistry::new(config.stream_settings()));
        let registry = Arc::new(
            ActorRegistry::new(streams.clone()).with_state_store(Arc::new(MemoryStateStore::new())),
        );
        let engine = InvocationEngine::new(registry.clone())
            .with_hooks(build_hooks(&config.security))
            .with_observer(Arc::new(TracingObserver));
        let server = Arc::new(ActorServer::new(Arc::new(engine)));

        let mut tasks = vec![streams.spawn_reaper()];
        let mut endpoints = Vec::new();
        let policy = config.transport_policy();

        for endpoint in config.listen_endpoints()? {
            let listener = network::bind(&endpoint, &policy)
                .await
                .with_context(|| format!("Failed to bind {}", endpoint))?;
            let bound = listener.endpoint().clone();
            endpoints.push(bound.clone());

            let server = server.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = server.serve(listener).await {
                    error!(endpoint = %bound, error = %e, "Server stopped");
                }
            }));
        }

        info!(node = %config.node.name, endpoints = ?endpoints, "Node started");
        Ok(Self {
            name: config.node.name.clone(),
            registry,
            server,
            endpoints,
            tasks,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &Arc<ActorRegistry> {
        &self.registry
    }

    /// Bound endpoints, with real ports when configured with port 0
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Stop accepting connections and deregister every actor
    pub async fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        self.registry.shutdown().await;

        let metrics = self.server.engine().metrics();
        info!(
            node = %self.name,
            calls_processed = metrics.calls_processed.load(Ordering::Relaxed),
            calls_failed = metrics.calls_failed.load(Ordering::Relaxed),
            calls_rejected = metrics.calls_rejected.load(Ordering::Relaxed),
            avg_processing_ns = metrics.avg_processing_time_ns(),
            "Node stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_default_security_only_validates() {
        let hooks = build_hooks(&SecurityConfig::default());
        assert!(!hooks.is_empty());
        assert_eq!(
            format!("{:?}", hooks),
            "HookChain { validator: true, authenticator: false, authorizer: false, rate_limiter: false }"
        );
    }

    #[test]
    fn test_configured_security_enables_every_hook() {
        let security = SecurityConfig {
            tokens: BTreeMap::from([("t0k".to_string(), "alice".to_string())]),
            allow: BTreeMap::from([("alice".to_string(), vec!["counter".to_string()])]),
            rate_limit_per_sec: 10,
            rate_limit_burst: 20,
            ..SecurityConfig::default()
        };
        let hooks = build_hooks(&security);
        assert_eq!(
            format!("{:?}", hooks),
            "HookChain { validator: true, authenticator: true, authorizer: true, rate_limiter: true }"
        );
    }
}
