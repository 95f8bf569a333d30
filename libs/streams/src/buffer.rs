//! Per-session replay buffer
//!
//! Holds the most recent delivered updates so a reconnecting subscriber can
//! be brought up to date without a snapshot. Bounded by entry count and by
//! entry age; eviction is always oldest-first.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// One delivered update, read-only once appended
#[derive(Debug, Clone, PartialEq)]
pub struct BufferEntry {
    pub sequence: u64,
    pub data: Vec<u8>,
    pub timestamp_ns: u64,
    pub is_delta: bool,
    pub(crate) appended_at: Instant,
}

impl BufferEntry {
    pub fn new(sequence: u64, data: Vec<u8>, timestamp_ns: u64, is_delta: bool) -> Self {
        Self {
            sequence,
            data,
            timestamp_ns,
            is_delta,
            appended_at: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.appended_at.elapsed()
    }
}

#[derive(Debug)]
pub struct StreamBuffer {
    entries: VecDeque<BufferEntry>,
    capacity: usize,
    ttl: Duration,
}

impl StreamBuffer {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            ttl,
        }
    }

    /// Append an entry. Sequences must be appended in increasing order.
    pub fn push(&mut self, entry: BufferEntry) {
        debug_assert!(self
            .entries
            .back()
            .map_or(true, |last| last.sequence < entry.sequence));
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        self.purge_expired();
    }

    /// Drop entries older than the TTL, returning how many were removed
    pub fn purge_expired(&mut self) -> usize {
        let before = self.entries.len();
        while self
            .entries
            .front()
            .is_some_and(|front| front.appended_at.elapsed() > self.ttl)
        {
            self.entries.pop_front();
        }
        before - self.entries.len()
    }

    /// Entries after `last_sequence` up to `current`, when the buffer can
    /// supply all of them contiguously. `Some(vec![])` means the caller is
    /// already up to date; `None` means the gap cannot be filled.
    pub fn replay_after(&self, last_sequence: u64, current: u64) -> Option<Vec<BufferEntry>> {
        if last_sequence == current {
            return Some(Vec::new());
        }
        if last_sequence > current {
            return None;
        }

        let first = self.entries.front()?;
        if first.sequence > last_sequence + 1 {
            return None;
        }
        let replay: Vec<BufferEntry> = self
            .entries
            .iter()
            .filter(|e| e.sequence > last_sequence)
            .cloned()
            .collect();

        match replay.last() {
            Some(last) if last.sequence == current => Some(replay),
            _ => None,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn oldest_sequence(&self) -> Option<u64> {
        self.entries.front().map(|e| e.sequence)
    }

    pub fn latest_sequence(&self) -> Option<u64> {
        self.entries.back().map(|e| e.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(count: u64, capacity: usize) -> StreamBuffer {
        let mut buffer = StreamBuffer::new(capacity, Duration::from_secs(300));
        for seq in 1..=count {
            buffer.push(BufferEntry::new(seq, vec![seq as u8], 0, false));
        }
        buffer
    }

    #[test]
    fn test_capacity_evicts_oldest_first() {
        let buffer = filled(150, 100);
        assert_eq!(buffer.len(), 100);
        assert_eq!(buffer.oldest_sequence(), Some(51));
        assert_eq!(buffer.latest_sequence(), Some(150));
    }

    #[test]
    fn test_replay_contiguous_tail() {
        let buffer = filled(7, 100);
        let replay = buffer.replay_after(5, 7).unwrap();
        let seqs: Vec<u64> = replay.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![6, 7]);
    }

    #[test]
    fn test_replay_up_to_date_is_empty() {
        let buffer = filled(7, 100);
        assert_eq!(buffer.replay_after(7, 7).unwrap().len(), 0);
    }

    #[test]
    fn test_replay_gap_after_eviction() {
        let buffer = filled(150, 100);
        assert!(buffer.replay_after(10, 150).is_none());
        assert!(buffer.replay_after(50, 150).is_some());
        assert!(buffer.replay_after(49, 150).is_none());
    }

    #[test]
    fn test_replay_from_future_sequence_fails() {
        let buffer = filled(3, 100);
        assert!(buffer.replay_after(9, 3).is_none());
    }

    #[test]
    fn test_ttl_purges_old_entries() {
        let mut buffer = StreamBuffer::new(100, Duration::from_millis(20));
        buffer.push(BufferEntry::new(1, vec![], 0, false));
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(buffer.purge_expired(), 1);
        assert!(buffer.is_empty());
        assert!(buffer.replay_after(0, 1).is_none());
    }
}
