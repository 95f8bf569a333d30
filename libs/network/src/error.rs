//! Transport Error Types
//!
//! Transport failures are never recovered by the invocation engine; they
//! propagate to whoever owns the connection (server loop or client
//! connection manager), which decides between retry and terminal failure.

use thiserror::Error;

/// Main transport error type
#[derive(Error, Debug)]
pub enum TransportError {
    /// Refused, unreachable or handshake failure while connecting
    #[error("Connection error: {message} (endpoint: {endpoint})")]
    Connection {
        message: String,
        endpoint: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Write on a closed, broken or stalled connection. Never retried here.
    #[error("Send error: {message}")]
    Send { message: String },

    /// Operation on a connection that has already been closed
    #[error("Connection closed")]
    Closed,

    /// Framing violations (oversized frame, partial header at EOF, text frame)
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Connect timeout, idle timeout or write deadline
    #[error("Timeout error: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Invalid endpoint or policy
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Generic I/O errors
    #[error("I/O error: {message}")]
    Io {
        message: String,
        source: std::io::Error,
    },
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// Create a connection error
    pub fn connection(message: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            endpoint: endpoint.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        endpoint: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            endpoint: endpoint.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn send(message: impl Into<String>) -> Self {
        Self::Send {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Check if reconnecting might help
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Connection { .. } => true,
            TransportError::Send { .. } => true,
            TransportError::Closed => true,
            TransportError::Timeout { .. } => true,
            TransportError::Io { .. } => true,
            TransportError::Protocol { .. } => false,
            TransportError::Configuration { .. } => false,
        }
    }

    /// Get error category for metrics
    pub fn category(&self) -> &'static str {
        match self {
            TransportError::Connection { .. } => "connection",
            TransportError::Send { .. } => "send",
            TransportError::Closed => "closed",
            TransportError::Protocol { .. } => "protocol",
            TransportError::Timeout { .. } => "timeout",
            TransportError::Configuration { .. } => "configuration",
            TransportError::Io { .. } => "io",
        }
    }
}

// Custom Clone implementation since Box<dyn Error> doesn't implement Clone
impl Clone for TransportError {
    fn clone(&self) -> Self {
        match self {
            TransportError::Connection {
                message, endpoint, ..
            } => TransportError::Connection {
                message: message.clone(),
                endpoint: endpoint.clone(),
                source: None,
            },
            TransportError::Send { message } => TransportError::Send {
                message: message.clone(),
            },
            TransportError::Closed => TransportError::Closed,
            TransportError::Protocol { message } => TransportError::Protocol {
                message: message.clone(),
            },
            TransportError::Timeout {
                operation,
                timeout_ms,
            } => TransportError::Timeout {
                operation: operation.clone(),
                timeout_ms: *timeout_ms,
            },
            TransportError::Configuration { message, field } => TransportError::Configuration {
                message: message.clone(),
                field: field.clone(),
            },
            TransportError::Io { message, source } => TransportError::Io {
                message: message.clone(),
                source: std::io::Error::new(source.kind(), source.to_string()),
            },
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::io(err.to_string(), err)
    }
}
