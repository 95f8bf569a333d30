//! Client error types
//!
//! [`ClientError::Remote`] means the call reached the actor and failed
//! there. Everything for which [`ClientError::is_transport`] holds means the
//! outcome on the server is unknown.

use codec::{decode_value, ActorId, CallId, CodecError, ErrorDescriptor};
use network::TransportError;
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    /// The server answered with an error descriptor
    #[error("Remote call failed: {0}")]
    Remote(ErrorDescriptor),

    #[error("Unknown actor {actor_id}")]
    UnknownActor { actor_id: ActorId },

    /// No response within the call timeout. The server is not preempted.
    #[error("Call {call_id} timed out after {timeout_ms}ms")]
    Timeout { call_id: CallId, timeout_ms: u64 },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Failed to connect to {endpoint} after {attempts} attempt(s): {message}")]
    ConnectionFailed {
        endpoint: String,
        attempts: u32,
        message: String,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Protocol violation: {message}")]
    Protocol { message: String },

    #[error("Discovery error: {message}")]
    Discovery { message: String },
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    /// Map a response descriptor. An unknown actor gets its own variant so
    /// callers can match on it without inspecting the descriptor.
    pub fn from_descriptor(descriptor: ErrorDescriptor) -> Self {
        match descriptor {
            ErrorDescriptor::TargetNotFound {
                actor_id,
                target: None,
            } => ClientError::UnknownActor { actor_id },
            other => ClientError::Remote(other),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        ClientError::Protocol {
            message: message.into(),
        }
    }

    /// True when the call may or may not have run on the server
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ClientError::Timeout { .. }
                | ClientError::ConnectionClosed
                | ClientError::ConnectionFailed { .. }
                | ClientError::Transport(_)
        )
    }

    pub fn descriptor(&self) -> Option<&ErrorDescriptor> {
        match self {
            ClientError::Remote(descriptor) => Some(descriptor),
            _ => None,
        }
    }

    /// Rebuild an application error raised by the actor. `None` when this
    /// is not an application error or the payload is not an `E`.
    pub fn application_error<E: DeserializeOwned>(&self) -> Option<(&str, E)> {
        match self {
            ClientError::Remote(ErrorDescriptor::Application {
                error_type,
                payload,
            }) => decode_value(payload).ok().map(|error| (error_type.as_str(), error)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::encode_value;

    #[test]
    fn test_unknown_actor_descriptor_maps_to_variant() {
        let err = ClientError::from_descriptor(ErrorDescriptor::unknown_actor(ActorId::from("ghost")));
        assert!(matches!(err, ClientError::UnknownActor { ref actor_id } if actor_id.as_str() == "ghost"));

        let err = ClientError::from_descriptor(ErrorDescriptor::unknown_target(
            ActorId::from("counter"),
            "missing()",
        ));
        assert!(matches!(err, ClientError::Remote(ErrorDescriptor::TargetNotFound { .. })));
    }

    #[test]
    fn test_transport_category() {
        assert!(ClientError::ConnectionClosed.is_transport());
        assert!(ClientError::Timeout {
            call_id: CallId::new(),
            timeout_ms: 10
        }
        .is_transport());
        assert!(!ClientError::Remote(ErrorDescriptor::Internal {
            message: "boom".to_string()
        })
        .is_transport());
    }

    #[test]
    fn test_application_error_payload_decodes() {
        let err = ClientError::Remote(ErrorDescriptor::Application {
            error_type: "InsufficientFunds".to_string(),
            payload: encode_value(&42u64).unwrap(),
        });
        let (error_type, needed) = err.application_error::<u64>().unwrap();
        assert_eq!(error_type, "InsufficientFunds");
        assert_eq!(needed, 42);
        assert!(err.application_error::<String>().is_none());
    }
}
