use std::sync::atomic::{AtomicU64, Ordering};

/// Registry-wide counters
#[derive(Debug, Default)]
pub struct StreamMetrics {
    pub sessions_created: AtomicU64,
    pub updates_sent: AtomicU64,
    pub updates_buffered: AtomicU64,
    pub updates_filtered: AtomicU64,
    pub deltas_sent: AtomicU64,
    pub replays: AtomicU64,
    pub restarts: AtomicU64,
    pub sessions_expired: AtomicU64,
}

impl StreamMetrics {
    #[inline]
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StreamMetricsSnapshot {
        StreamMetricsSnapshot {
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            updates_sent: self.updates_sent.load(Ordering::Relaxed),
            updates_buffered: self.updates_buffered.load(Ordering::Relaxed),
            updates_filtered: self.updates_filtered.load(Ordering::Relaxed),
            deltas_sent: self.deltas_sent.load(Ordering::Relaxed),
            replays: self.replays.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
            sessions_expired: self.sessions_expired.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamMetricsSnapshot {
    pub sessions_created: u64,
    pub updates_sent: u64,
    pub updates_buffered: u64,
    pub updates_filtered: u64,
    pub deltas_sent: u64,
    pub replays: u64,
    pub restarts: u64,
    pub sessions_expired: u64,
}
