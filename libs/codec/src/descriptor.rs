//! Error descriptors carried inside invocation responses
//!
//! The invocation engine never fails a call network-side; every failure is
//! folded into one of these and sent back under the caller's call id.

use crate::ids::ActorId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Serializable description of why a call did not produce a value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorDescriptor {
    /// An argument could not be decoded; the method was not invoked
    Decoding { message: String },

    /// The result could not be encoded
    Encoding { message: String },

    /// Unknown actor (`target` is `None`) or unknown method on a known actor
    TargetNotFound {
        actor_id: ActorId,
        target: Option<String>,
    },

    /// The method signalled a business failure. `payload` is the encoded
    /// error value, passed through untouched so the caller can rebuild it.
    Application { error_type: String, payload: Vec<u8> },

    Authentication { message: String },

    Authorization { message: String },

    RateLimited { retry_after_ms: Option<u64> },

    Validation {
        message: String,
        size: usize,
        limit: usize,
    },

    /// Runtime failure unrelated to the caller's input (actor mailbox gone)
    Internal { message: String },
}

impl ErrorDescriptor {
    pub fn unknown_actor(actor_id: ActorId) -> Self {
        Self::TargetNotFound {
            actor_id,
            target: None,
        }
    }

    pub fn unknown_target(actor_id: ActorId, target: impl Into<String>) -> Self {
        Self::TargetNotFound {
            actor_id,
            target: Some(target.into()),
        }
    }

    /// Short stable name for metrics and log fields
    pub fn category(&self) -> &'static str {
        match self {
            ErrorDescriptor::Decoding { .. } => "decoding",
            ErrorDescriptor::Encoding { .. } => "encoding",
            ErrorDescriptor::TargetNotFound { .. } => "target_not_found",
            ErrorDescriptor::Application { .. } => "application",
            ErrorDescriptor::Authentication { .. } => "authentication",
            ErrorDescriptor::Authorization { .. } => "authorization",
            ErrorDescriptor::RateLimited { .. } => "rate_limited",
            ErrorDescriptor::Validation { .. } => "validation",
            ErrorDescriptor::Internal { .. } => "internal",
        }
    }

    /// Rejections raised by pre-dispatch hooks
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ErrorDescriptor::Authentication { .. }
                | ErrorDescriptor::Authorization { .. }
                | ErrorDescriptor::RateLimited { .. }
                | ErrorDescriptor::Validation { .. }
        )
    }
}

impl fmt::Display for ErrorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorDescriptor::Decoding { message } => write!(f, "decoding error: {}", message),
            ErrorDescriptor::Encoding { message } => write!(f, "encoding error: {}", message),
            ErrorDescriptor::TargetNotFound {
                actor_id,
                target: None,
            } => write!(f, "unknown actor '{}'", actor_id),
            ErrorDescriptor::TargetNotFound {
                actor_id,
                target: Some(target),
            } => write!(f, "actor '{}' has no target '{}'", actor_id, target),
            ErrorDescriptor::Application { error_type, payload } => write!(
                f,
                "application error {} ({} bytes)",
                error_type,
                payload.len()
            ),
            ErrorDescriptor::Authentication { message } => {
                write!(f, "authentication failed: {}", message)
            }
            ErrorDescriptor::Authorization { message } => {
                write!(f, "authorization denied: {}", message)
            }
            ErrorDescriptor::RateLimited {
                retry_after_ms: Some(ms),
            } => write!(f, "rate limited, retry after {}ms", ms),
            ErrorDescriptor::RateLimited { retry_after_ms: None } => write!(f, "rate limited"),
            ErrorDescriptor::Validation {
                message,
                size,
                limit,
            } => write!(f, "validation failed: {} ({} > {})", message, size, limit),
            ErrorDescriptor::Internal { message } => write!(f, "internal error: {}", message),
        }
    }
}
