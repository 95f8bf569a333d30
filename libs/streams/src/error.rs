//! Stream error types

use codec::{CodecError, StreamId};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum StreamError {
    #[error("Unknown stream {stream_id}")]
    UnknownStream { stream_id: StreamId },

    #[error("Failed to encode streamed value: {message}")]
    Encoding { message: String },

    #[error("Emitter is not bound to a stream registry")]
    Unbound,
}

impl From<CodecError> for StreamError {
    fn from(err: CodecError) -> Self {
        StreamError::Encoding {
            message: err.to_string(),
        }
    }
}

pub type StreamResult<T> = std::result::Result<T, StreamError>;
