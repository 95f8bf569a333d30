//! Network Infrastructure
//!
//! ## Purpose
//!
//! Moves opaque frames between peers. A frame handed to [`Connection::send`]
//! arrives intact, in order, as exactly one [`Connection::receive`] result on
//! the other side, regardless of transport.
//!
//! ## Architecture Role
//!
//! ```text
//! codec (frame bytes) → [network] → peer
//!                          │
//!          ┌───────────────┼────────────────┐
//!          ▼               ▼                ▼
//!     tcp (4-byte BE   websocket (one   memory (mpsc
//!     length prefix)   binary message)  pairs, tests)
//! ```
//!
//! ## Resource Bounds
//!
//! [`TransportPolicy`] carries the connect timeout, the idle timeout (no
//! traffic in either direction closes the connection), the write deadline
//! (a stalled writer is closed, never queued without bound) and the maximum
//! frame size.

pub mod connection;
pub mod endpoint;
pub mod error;
pub mod policy;
pub mod transports;

pub use connection::{
    generate_connection_id, incoming, Connection, ConnectionId, ConnectionStats, SharedConnection,
};
pub use endpoint::{Endpoint, TransportKind};
pub use error::{Result, TransportError};
pub use policy::TransportPolicy;
pub use transports::{bind, connect, Listener, MemoryConnection, TransportFactory};
