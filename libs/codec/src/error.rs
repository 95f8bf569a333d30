//! Codec errors
//!
//! Every variant is recoverable at the connection level: a peer that sends a
//! frame we cannot decode loses that frame, not the connection.

use thiserror::Error;

/// Errors raised while encoding or decoding envelopes and payloads
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    /// A field could not be represented in the wire format
    #[error("Encoding failed for {context}: {message}")]
    Encoding { context: String, message: String },

    /// Malformed or truncated input
    #[error("Decoding failed for {context}: {message}")]
    Decoding { context: String, message: String },

    /// Frame shorter than the fixed header
    #[error("Frame too small: need {need} bytes, got {got}")]
    FrameTooSmall { need: usize, got: usize },

    /// Magic bytes did not match
    #[error("Invalid magic: expected {expected:#06x}, got {actual:#06x}")]
    InvalidMagic { expected: u16, actual: u16 },

    /// Protocol version is not understood by this decoder
    #[error("Unsupported protocol version {version}: supported version is {supported}")]
    UnsupportedVersion { version: u8, supported: u8 },

    /// Discriminator byte does not name a known envelope kind
    #[error("Unknown envelope kind {tag:#04x}")]
    UnknownKind { tag: u8 },

    /// Positional argument requested beyond the supplied arguments
    #[error("Missing argument {index}: call supplied {supplied}")]
    MissingArgument { index: usize, supplied: usize },
}

impl CodecError {
    pub fn encoding(context: impl Into<String>, message: impl ToString) -> Self {
        Self::Encoding {
            context: context.into(),
            message: message.to_string(),
        }
    }

    pub fn decoding(context: impl Into<String>, message: impl ToString) -> Self {
        Self::Decoding {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// True for errors produced while reading input
    pub fn is_decoding(&self) -> bool {
        !matches!(self, CodecError::Encoding { .. })
    }
}

/// Result type for codec operations
pub type CodecResult<T> = std::result::Result<T, CodecError>;
