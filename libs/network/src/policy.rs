//! Connection policy: timeouts and frame limits shared by all transports

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Resource bounds applied to every connection
///
/// `idle_timeout` closes a connection with no traffic in either direction.
/// `write_timeout` is the flush deadline: a writer that cannot flush in time
/// is considered stalled and its connection is closed rather than queued
/// without bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportPolicy {
    pub connect_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    pub write_timeout: Duration,
    pub max_frame_size: usize,
    /// Frames buffered per direction on in-memory connections
    pub channel_capacity: usize,
}

impl Default for TransportPolicy {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Some(Duration::from_secs(120)),
            write_timeout: Duration::from_secs(10),
            max_frame_size: 16 * 1024 * 1024, // 16MB
            channel_capacity: 1024,
        }
    }
}

impl TransportPolicy {
    pub fn with_idle_timeout(mut self, idle: Option<Duration>) -> Self {
        self.idle_timeout = idle;
        self
    }

    pub fn with_write_timeout(mut self, write: Duration) -> Self {
        self.write_timeout = write;
        self
    }

    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }
}
