//! How a connection manager obtains a fresh connection

use async_trait::async_trait;
use network::{Endpoint, SharedConnection, TransportFactory, TransportPolicy};

/// Opens one connection per call. Called again for every reconnect attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> network::Result<SharedConnection>;

    /// Target description for logs and errors
    fn describe(&self) -> String;
}

/// Connects to a TCP or WebSocket endpoint
#[derive(Debug, Clone)]
pub struct EndpointConnector {
    endpoint: Endpoint,
    policy: TransportPolicy,
}

impl EndpointConnector {
    pub fn new(endpoint: Endpoint, policy: TransportPolicy) -> Self {
        Self { endpoint, policy }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

#[async_trait]
impl Connector for EndpointConnector {
    async fn connect(&self) -> network::Result<SharedConnection> {
        TransportFactory::connect(&self.endpoint, &self.policy).await
    }

    fn describe(&self) -> String {
        self.endpoint.to_string()
    }
}
