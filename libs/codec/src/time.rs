//! Wall-clock timestamps for stream data envelopes

use std::time::{SystemTime, UNIX_EPOCH};

/// Nanoseconds since the UNIX epoch, or 0 if the clock is before it
pub fn current_timestamp_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos().min(u64::MAX as u128) as u64)
        .unwrap_or(0)
}
