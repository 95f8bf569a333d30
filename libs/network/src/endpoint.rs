//! Endpoint addressing
//!
//! `tcp://host:port` selects length-prefixed TCP, `ws://host:port/path` a
//! WebSocket. Anything else is a configuration error.

use crate::{Result, TransportError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Transport family of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Tcp,
    WebSocket,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Tcp => write!(f, "tcp"),
            TransportKind::WebSocket => write!(f, "ws"),
        }
    }
}

/// Parsed network endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    kind: TransportKind,
    host: String,
    port: u16,
    path: String,
}

impl Endpoint {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            kind: TransportKind::Tcp,
            host: host.into(),
            port,
            path: String::new(),
        }
    }

    pub fn websocket(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        let mut path = path.into();
        if !path.is_empty() && !path.starts_with('/') {
            path.insert(0, '/');
        }
        Self {
            kind: TransportKind::WebSocket,
            host: host.into(),
            port,
            path,
        }
    }

    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input).map_err(|e| {
            TransportError::configuration(format!("invalid endpoint '{}': {}", input, e), Some("endpoint"))
        })?;

        let kind = match url.scheme() {
            "tcp" => TransportKind::Tcp,
            "ws" => TransportKind::WebSocket,
            other => {
                return Err(TransportError::configuration(
                    format!("unsupported endpoint scheme '{}'", other),
                    Some("endpoint"),
                ))
            }
        };

        let host = url
            .host_str()
            .ok_or_else(|| TransportError::configuration(format!("endpoint '{}' has no host", input), Some("endpoint")))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = url.port_or_known_default().ok_or_else(|| {
            TransportError::configuration(format!("endpoint '{}' has no port", input), Some("endpoint"))
        })?;

        let path = match kind {
            TransportKind::Tcp => String::new(),
            TransportKind::WebSocket if url.path() == "/" => String::new(),
            TransportKind::WebSocket => url.path().to_string(),
        };

        Ok(Self {
            kind,
            host,
            port,
            path,
        })
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// `host:port` suitable for `TcpStream::connect` and `TcpListener::bind`
    pub fn socket_address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Same endpoint with a different port, used after binding port 0
    pub fn with_port(&self, port: u16) -> Self {
        Self {
            port,
            ..self.clone()
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.kind, self.socket_address(), self.path)
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        Endpoint::parse(s)
    }
}

impl TryFrom<String> for Endpoint {
    type Error = TransportError;

    fn try_from(value: String) -> Result<Self> {
        Endpoint::parse(&value)
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}
