use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Stream registry tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Maximum buffered entries per session, oldest evicted first
    pub buffer_capacity: usize,
    /// Age after which buffered entries are purged; also how long a
    /// suspended session survives before expiring
    pub buffer_ttl: Duration,
    /// Envelopes queued per outlet before the session is suspended
    pub outlet_capacity: usize,
    pub delta_enabled: bool,
    /// How often the reaper purges expired sessions
    pub reap_interval: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            buffer_capacity: 100,
            buffer_ttl: Duration::from_secs(300),
            outlet_capacity: 256,
            delta_enabled: true,
            reap_interval: Duration::from_secs(30),
        }
    }
}
