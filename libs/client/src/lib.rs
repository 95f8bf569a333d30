//! # Actor Runtime Client
//!
//! ## Purpose
//!
//! Calls actors hosted on a remote node as if they were local and keeps
//! property streams alive across connection loss.
//!
//! ## Architecture Role
//!
//! ```text
//! ActorProxy ──call──► ConnectionManager ──frames──► network ──► ActorServer
//!     │                  │  pending calls by call id
//! Subscription ◄─events──┤  stream checkpoints + last full value
//!                        └─ reconnect with backoff, then StreamResume
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! # async fn run() -> client::Result<()> {
//! use client::{ClientOptions, ConnectionManager};
//! use codec::{Arguments, StreamFilter};
//! use network::Endpoint;
//!
//! let manager = ConnectionManager::new(Endpoint::tcp("127.0.0.1", 7420), ClientOptions::default());
//! manager.connect().await?;
//!
//! let counter = manager.resolve("counter");
//! let value: i64 = counter.call("increment()", Arguments::empty()).await?;
//!
//! let mut updates = counter.subscribe("count", StreamFilter::PassThrough).await?;
//! while let Some(update) = updates.next().await {
//!     println!("#{} {}", update.sequence, update.value);
//! }
//! # let _ = value;
//! # Ok(())
//! # }
//! ```

pub mod connector;
pub mod error;
pub mod manager;
pub mod options;
pub mod proxy;
pub mod resolver;
pub mod subscription;

pub use connector::{Connector, EndpointConnector};
pub use error::{ClientError, Result};
pub use manager::{ConnectionManager, ConnectionState, SUBSCRIBER_LAGGED, UNSUBSCRIBED};
pub use options::{ClientOptions, ReconnectPolicy};
pub use proxy::ActorProxy;
pub use resolver::Resolver;
pub use subscription::{StreamEvent, StreamUpdate, Subscription};
