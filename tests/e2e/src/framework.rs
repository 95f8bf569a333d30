//! Node and client harness for end-to-end scenarios

use crate::fixtures::SeveringConnector;
use actor_node::Node;
use actors::ActorRegistry;
use anyhow::{Context, Result};
use client::{ClientOptions, ConnectionManager, ReconnectPolicy};
use network::{Endpoint, TransportKind};
use runtime_config::RuntimeConfig;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Upper bound on any single awaited step
pub const STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// Await `future`, failing the scenario instead of hanging it
pub async fn within<F: Future>(future: F) -> Result<F::Output> {
    tokio::time::timeout(STEP_TIMEOUT, future)
        .await
        .context("scenario step timed out")
}

/// Client options with short backoff so reconnect scenarios stay fast
pub fn test_options() -> ClientOptions {
    ClientOptions::default()
        .with_call_timeout(Duration::from_secs(5))
        .with_reconnect(ReconnectPolicy {
            initial_delay: Duration::from_millis(20),
            multiplier: 2.0,
            max_delay: Duration::from_millis(200),
            max_attempts: 10,
        })
}

/// Loopback listen endpoint on an ephemeral port
pub fn loopback(kind: TransportKind) -> Endpoint {
    match kind {
        TransportKind::Tcp => Endpoint::tcp("127.0.0.1", 0),
        TransportKind::WebSocket => Endpoint::websocket("127.0.0.1", 0, "/actors"),
    }
}

/// A node listening on one loopback endpoint
pub struct TestNode {
    node: Node,
    config: RuntimeConfig,
}

impl TestNode {
    pub async fn start(kind: TransportKind) -> Result<Self> {
        let mut config = RuntimeConfig::default();
        config.node.name = format!("e2e-{}", kind);
        config.node.listen = vec![loopback(kind).to_string()];
        Self::start_with(config).await
    }

    pub async fn start_with(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        let node = Node::start(&config).await?;
        info!(endpoints = ?node.endpoints(), "Test node up");
        Ok(Self { node, config })
    }

    pub fn endpoint(&self) -> Result<Endpoint> {
        self.node
            .endpoints()
            .first()
            .cloned()
            .context("node has no listen endpoint")
    }

    pub fn registry(&self) -> &Arc<ActorRegistry> {
        self.node.registry()
    }

    /// Unconnected client for this node
    pub fn client(&self) -> Result<ConnectionManager> {
        Ok(ConnectionManager::new(self.endpoint()?, self.client_options()))
    }

    /// Client whose connection the test can cut
    pub fn severable_client(
        &self,
        options: ClientOptions,
    ) -> Result<(ConnectionManager, Arc<SeveringConnector>)> {
        let connector = Arc::new(SeveringConnector::new(self.endpoint()?, options.transport.clone()));
        let manager = ConnectionManager::with_connector(connector.clone(), options);
        Ok((manager, connector))
    }

    fn client_options(&self) -> ClientOptions {
        ClientOptions {
            transport: self.config.transport_policy(),
            ..test_options()
        }
    }

    pub async fn shutdown(self) {
        self.node.shutdown().await;
    }
}
