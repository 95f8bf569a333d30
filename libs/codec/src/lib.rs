//! # Actor Runtime Wire Codec
//!
//! ## Purpose
//!
//! Turns typed call, response and stream messages into a transport-agnostic
//! byte representation and back. Pure transformation: no I/O, no state.
//!
//! ## Architecture Role
//!
//! ```text
//! actors/client → [codec] → network
//!      ↑             ↓          ↓
//!  Typed calls   Envelopes   Framed bytes
//! ```
//!
//! ## What This Crate Contains
//! - Envelope kinds with an explicit discriminator byte ([`EnvelopeKind`])
//! - Frame header validation and bincode bodies ([`wire`])
//! - JSON payload helpers for arguments, results and streamed values
//! - [`ErrorDescriptor`], the serializable failure carried in responses
//! - Stream filter descriptions sent by subscribers
//!
//! ## What This Crate Does NOT Contain
//! - Length-prefix framing or sockets (belongs in `network`)
//! - Filter evaluation or delta computation (belongs in `streams`)

pub mod descriptor;
pub mod envelope;
pub mod error;
pub mod filter;
pub mod ids;
pub mod payload;
pub mod time;
pub mod wire;

pub use descriptor::ErrorDescriptor;
pub use envelope::{
    CallResult, Envelope, EnvelopeKind, InvocationEnvelope, InvocationResponse,
    StreamDataEnvelope, StreamEndEnvelope, StreamErrorEnvelope, StreamResumeEnvelope,
    StreamStartEnvelope, StreamSubscribeEnvelope,
};
pub use error::{CodecError, CodecResult};
pub use filter::{Comparison, StreamFilter};
pub use ids::{ActorId, CallId, StreamId};
pub use payload::{decode_document, decode_value, encode_value, Arguments};
pub use time::current_timestamp_ns;
pub use wire::{decode, encode, WireFormat};

/// Reserved target answered by the engine itself: succeeds with void when
/// the addressed actor is exposed.
pub const EXISTS_TARGET: &str = "$exists";

/// Metadata key carrying caller credentials
pub const CREDENTIALS_KEY: &str = "authorization";
