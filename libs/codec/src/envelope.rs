//! Envelope kinds exchanged between peers
//!
//! Calls flow client → server as [`InvocationEnvelope`] and come back as
//! [`InvocationResponse`]. Streams are opened with a subscribe envelope,
//! announced by `StreamStart`, fed by `StreamData` and closed by `StreamEnd`
//! or `StreamError`. A reconnecting client sends `StreamResume` with its
//! last checkpoint.

use crate::descriptor::ErrorDescriptor;
use crate::filter::StreamFilter;
use crate::ids::{ActorId, CallId, StreamId};
use crate::payload::Arguments;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One call against one actor target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationEnvelope {
    pub call_id: CallId,
    pub actor_id: ActorId,
    /// Method name plus signature tag, e.g. `add(by:)`
    pub target: String,
    /// Ordered type tags for generic calls
    pub generic_substitutions: Vec<String>,
    /// Ordered, individually encoded parameters
    pub arguments: Vec<Vec<u8>>,
    /// Credentials and tracing context for pre-dispatch hooks
    pub metadata: BTreeMap<String, String>,
}

impl InvocationEnvelope {
    pub fn new(actor_id: ActorId, target: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            call_id: CallId::new(),
            actor_id,
            target: target.into(),
            generic_substitutions: Vec::new(),
            arguments: arguments.into_inner(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_generics(mut self, substitutions: Vec<String>) -> Self {
        self.generic_substitutions = substitutions;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Borrow the arguments for positional decoding
    pub fn arguments(&self) -> Arguments {
        Arguments::from_raw(self.arguments.clone())
    }
}

/// Outcome of a call: a value, the void marker, or an error descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallResult {
    Value(Vec<u8>),
    Void,
    Error(ErrorDescriptor),
}

impl CallResult {
    pub fn is_success(&self) -> bool {
        !matches!(self, CallResult::Error(_))
    }

    pub fn error(&self) -> Option<&ErrorDescriptor> {
        match self {
            CallResult::Error(descriptor) => Some(descriptor),
            _ => None,
        }
    }
}

/// Reply to exactly one invocation envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationResponse {
    pub call_id: CallId,
    pub result: CallResult,
}

impl InvocationResponse {
    pub fn value(call_id: CallId, payload: Vec<u8>) -> Self {
        Self {
            call_id,
            result: CallResult::Value(payload),
        }
    }

    pub fn void(call_id: CallId) -> Self {
        Self {
            call_id,
            result: CallResult::Void,
        }
    }

    pub fn error(call_id: CallId, descriptor: ErrorDescriptor) -> Self {
        Self {
            call_id,
            result: CallResult::Error(descriptor),
        }
    }
}

/// Request to observe an actor property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSubscribeEnvelope {
    pub call_id: CallId,
    pub actor_id: ActorId,
    pub target: String,
    pub filter: StreamFilter,
    pub metadata: BTreeMap<String, String>,
}

/// Server acknowledgement naming the stream opened for a subscribe call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStartEnvelope {
    pub stream_id: StreamId,
    pub call_id: CallId,
    pub actor_id: ActorId,
    pub target: String,
}

/// One sequenced update. `is_delta` tells the receiver to patch its last
/// full value instead of replacing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDataEnvelope {
    pub stream_id: StreamId,
    pub sequence: u64,
    pub data: Vec<u8>,
    pub timestamp_ns: u64,
    pub is_delta: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEndEnvelope {
    pub stream_id: StreamId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamErrorEnvelope {
    pub stream_id: StreamId,
    pub error_message: String,
}

/// Reconnecting client asking to continue after `last_sequence`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamResumeEnvelope {
    pub stream_id: StreamId,
    pub last_sequence: u64,
    pub actor_id: ActorId,
    pub target: String,
}

/// Explicit discriminator written into every frame header
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    Invocation = 0x01,
    Response = 0x02,
    StreamSubscribe = 0x10,
    StreamStart = 0x11,
    StreamData = 0x12,
    StreamEnd = 0x13,
    StreamError = 0x14,
    StreamResume = 0x15,
}

impl EnvelopeKind {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(EnvelopeKind::Invocation),
            0x02 => Some(EnvelopeKind::Response),
            0x10 => Some(EnvelopeKind::StreamSubscribe),
            0x11 => Some(EnvelopeKind::StreamStart),
            0x12 => Some(EnvelopeKind::StreamData),
            0x13 => Some(EnvelopeKind::StreamEnd),
            0x14 => Some(EnvelopeKind::StreamError),
            0x15 => Some(EnvelopeKind::StreamResume),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EnvelopeKind::Invocation => "invocation",
            EnvelopeKind::Response => "response",
            EnvelopeKind::StreamSubscribe => "stream_subscribe",
            EnvelopeKind::StreamStart => "stream_start",
            EnvelopeKind::StreamData => "stream_data",
            EnvelopeKind::StreamEnd => "stream_end",
            EnvelopeKind::StreamError => "stream_error",
            EnvelopeKind::StreamResume => "stream_resume",
        }
    }
}

/// Any message that crosses the transport
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Invocation(InvocationEnvelope),
    Response(InvocationResponse),
    StreamSubscribe(StreamSubscribeEnvelope),
    StreamStart(StreamStartEnvelope),
    StreamData(StreamDataEnvelope),
    StreamEnd(StreamEndEnvelope),
    StreamError(StreamErrorEnvelope),
    StreamResume(StreamResumeEnvelope),
}

impl Envelope {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::Invocation(_) => EnvelopeKind::Invocation,
            Envelope::Response(_) => EnvelopeKind::Response,
            Envelope::StreamSubscribe(_) => EnvelopeKind::StreamSubscribe,
            Envelope::StreamStart(_) => EnvelopeKind::StreamStart,
            Envelope::StreamData(_) => EnvelopeKind::StreamData,
            Envelope::StreamEnd(_) => EnvelopeKind::StreamEnd,
            Envelope::StreamError(_) => EnvelopeKind::StreamError,
            Envelope::StreamResume(_) => EnvelopeKind::StreamResume,
        }
    }

    /// Call id for envelopes that belong to a request/response exchange
    pub fn call_id(&self) -> Option<&CallId> {
        match self {
            Envelope::Invocation(e) => Some(&e.call_id),
            Envelope::Response(e) => Some(&e.call_id),
            Envelope::StreamSubscribe(e) => Some(&e.call_id),
            Envelope::StreamStart(e) => Some(&e.call_id),
            _ => None,
        }
    }

    pub fn stream_id(&self) -> Option<&StreamId> {
        match self {
            Envelope::StreamStart(e) => Some(&e.stream_id),
            Envelope::StreamData(e) => Some(&e.stream_id),
            Envelope::StreamEnd(e) => Some(&e.stream_id),
            Envelope::StreamError(e) => Some(&e.stream_id),
            Envelope::StreamResume(e) => Some(&e.stream_id),
            _ => None,
        }
    }
}

impl From<InvocationEnvelope> for Envelope {
    fn from(e: InvocationEnvelope) -> Self {
        Envelope::Invocation(e)
    }
}

impl From<InvocationResponse> for Envelope {
    fn from(e: InvocationResponse) -> Self {
        Envelope::Response(e)
    }
}

impl From<StreamDataEnvelope> for Envelope {
    fn from(e: StreamDataEnvelope) -> Self {
        Envelope::StreamData(e)
    }
}
