//! # Actor Runtime
//!
//! ## Purpose
//!
//! Hosts uniquely addressable, stateful actors and invokes them the same way
//! whether the caller is in-process or on the other end of a connection.
//!
//! ## Architecture Role
//!
//! ```text
//! Connection ─► ActorServer ─► InvocationEngine ─► hooks ─► ActorRegistry
//!                   │                                          │
//!                   │ subscribe / resume                       ▼
//!                   └──────────────► mailbox job ─► StreamRegistry
//!                                         │
//!                                  one actor, one task
//! ```
//!
//! ## Execution Model
//! - One mailbox task per actor; calls run FIFO, each to completion
//! - Different actors run in parallel on the tokio runtime
//! - Subscription snapshots are mailbox jobs, so they never interleave with
//!   a method's emissions
//! - The engine never fails a call network-side: every failure is an error
//!   descriptor in the response

pub mod actor;
pub mod cell;
pub mod discovery;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod observer;
pub mod registry;
pub mod server;
pub mod store;

pub use actor::{Actor, ActorContext};
pub use cell::{ActorHandle, DispatchError};
pub use discovery::{MemoryDiscovery, ServiceDiscovery};
pub use dispatch::{MethodError, MethodFuture, MethodTable, Reply};
pub use engine::{CallContext, EngineMetrics, InvocationEngine, PendingCall};
pub use error::{ActorError, Result};
pub use hooks::{
    Action, AllowListAuthorizer, Authenticator, Authorizer, CallRequest, HookChain, Principal,
    RateDecision, RateLimiter, Resource, SizeLimitValidator, TokenAuthenticator, TokenBucketLimiter,
    Validator,
};
pub use observer::{CallRecord, InvocationObserver, TracingObserver};
pub use registry::ActorRegistry;
pub use server::ActorServer;
pub use store::{MemoryStateStore, StateStore};
