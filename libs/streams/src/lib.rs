//! # Actor State Streaming
//!
//! ## Purpose
//!
//! Pushes incremental actor-state updates to many subscribers with ordered,
//! gap-free sequences, replay on reconnect and optional filtering and delta
//! encoding.
//!
//! ## Architecture Role
//!
//! ```text
//! Observed<T>::set ─► Emitter ─► StreamRegistry::emit
//!                                     │  per session: filter → delta → buffer
//!                                     ▼
//!                               StreamOutlet (bounded, try_send)
//!                                     │
//!                                     ▼
//!                           connection writer task
//! ```
//!
//! ## Delivery Guarantees
//! - Sequence numbers per stream are 1, 2, 3, … with no gaps for a
//!   subscriber that stays connected
//! - A resume from `n` replays `n+1..current` when buffered, otherwise sends
//!   a fresh snapshot as sequence 1. The snapshot fallback is best-effort
//!   freshness: intermediate states are collapsed into it.
//! - A slow or vanished subscriber is suspended, never queued without bound

pub mod buffer;
pub mod delta;
pub mod error;
pub mod filter;
pub mod metrics;
pub mod observed;
pub mod registry;
pub mod session;
pub mod settings;

pub use buffer::{BufferEntry, StreamBuffer};
pub use delta::{apply_delta, diff, encode_update, EncodedUpdate};
pub use error::{StreamError, StreamResult};
pub use metrics::StreamMetricsSnapshot;
pub use observed::{Emitter, Observed};
pub use registry::{ResumeOutcome, StreamRegistry, SubscribeRequest};
pub use session::{Delivery, OutletId, SessionState, StreamOutlet};
pub use settings::StreamSettings;

/// Reason sent in `StreamEnd` when the observed actor goes away
pub const ACTOR_DEREGISTERED: &str = "actor deregistered";
