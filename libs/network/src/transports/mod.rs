//! Unified Transport Layer
//!
//! Every transport produces the same [`Connection`] abstraction. Callers
//! pick a transport through an [`Endpoint`] and never see the concrete type.

use crate::connection::SharedConnection;
use crate::endpoint::TransportKind;
use crate::{Endpoint, Result, TransportPolicy};
use async_trait::async_trait;
use std::sync::Arc;

pub mod memory;
pub mod tcp;
pub mod websocket;

pub use memory::MemoryConnection;
pub use tcp::{TcpAcceptor, TcpConnection, LENGTH_PREFIX_SIZE};
pub use websocket::{ClientWsConnection, ServerWsConnection, WsAcceptor, WsConnection};

/// Server side of a transport
#[async_trait]
pub trait Listener: Send + Sync {
    /// Wait for the next inbound connection
    async fn accept(&self) -> Result<SharedConnection>;

    /// Bound endpoint, with the real port when bound to port 0
    fn endpoint(&self) -> &Endpoint;
}

#[async_trait]
impl Listener for TcpAcceptor {
    async fn accept(&self) -> Result<SharedConnection> {
        Ok(Arc::new(TcpAcceptor::accept(self).await?))
    }

    fn endpoint(&self) -> &Endpoint {
        TcpAcceptor::endpoint(self)
    }
}

#[async_trait]
impl Listener for WsAcceptor {
    async fn accept(&self) -> Result<SharedConnection> {
        Ok(Arc::new(WsAcceptor::accept(self).await?))
    }

    fn endpoint(&self) -> &Endpoint {
        WsAcceptor::endpoint(self)
    }
}

/// Transport factory for creating connections and listeners
pub struct TransportFactory;

impl TransportFactory {
    /// Open a client connection to `endpoint`
    pub async fn connect(endpoint: &Endpoint, policy: &TransportPolicy) -> Result<SharedConnection> {
        match endpoint.kind() {
            TransportKind::Tcp => Ok(Arc::new(TcpConnection::connect(endpoint, policy).await?)),
            TransportKind::WebSocket => Ok(Arc::new(WsConnection::connect(endpoint, policy).await?)),
        }
    }

    /// Bind a listener on `endpoint`
    pub async fn bind(endpoint: &Endpoint, policy: &TransportPolicy) -> Result<Box<dyn Listener>> {
        match endpoint.kind() {
            TransportKind::Tcp => Ok(Box::new(TcpAcceptor::bind(endpoint, policy).await?)),
            TransportKind::WebSocket => Ok(Box::new(WsAcceptor::bind(endpoint, policy).await?)),
        }
    }
}

/// Shorthand for [`TransportFactory::connect`]
pub async fn connect(endpoint: &Endpoint, policy: &TransportPolicy) -> Result<SharedConnection> {
    TransportFactory::connect(endpoint, policy).await
}

/// Shorthand for [`TransportFactory::bind`]
pub async fn bind(endpoint: &Endpoint, policy: &TransportPolicy) -> Result<Box<dyn Listener>> {
    TransportFactory::bind(endpoint, policy).await
}
