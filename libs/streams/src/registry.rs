//! Stream Registry
//!
//! Owns every stream session by value, keyed by stream id and indexed by
//! (actor, target) for emission. Session lifecycle is explicit:
//!
//! ```text
//!  subscribe ──► Active ──(outlet full/closed, disconnect)──► Suspended
//!                  ▲                                              │
//!                  └──────────── resume within TTL ───────────────┤
//!                                                                 ▼
//!                                          TTL elapsed ──► Expired (removed)
//! ```
//!
//! The table lock only guards membership. Each session has its own mutex,
//! which serializes emission so sequence numbers stay gap-free even when
//! values are emitted from several tasks.

use crate::metrics::{StreamMetrics, StreamMetricsSnapshot};
use crate::session::{Delivery, OutletId, SessionState, StreamOutlet, StreamSession};
use crate::settings::StreamSettings;
use crate::StreamResult;
use codec::{
    ActorId, CallId, Envelope, StreamEndEnvelope, StreamFilter, StreamId, StreamResumeEnvelope,
    StreamStartEnvelope,
};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type SessionRef = Arc<Mutex<StreamSession>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    actor_id: ActorId,
    target: String,
}

#[derive(Debug, Default)]
struct SessionTable {
    sessions: HashMap<StreamId, SessionRef>,
    by_target: HashMap<StreamKey, HashSet<StreamId>>,
}

impl SessionTable {
    /// Insert under `stream_id`, returning any session it replaces
    fn insert(&mut self, stream_id: StreamId, key: StreamKey, handle: SessionRef) -> Option<SessionRef> {
        let replaced = self.remove(&stream_id);
        self.by_target.entry(key).or_default().insert(stream_id.clone());
        self.sessions.insert(stream_id, handle);
        replaced
    }

    fn remove(&mut self, stream_id: &StreamId) -> Option<SessionRef> {
        let handle = self.sessions.remove(stream_id)?;
        self.by_target.retain(|_, ids| {
            ids.remove(stream_id);
            !ids.is_empty()
        });
        Some(handle)
    }
}

/// Parameters of a new subscription
#[derive(Debug, Clone)]
pub struct SubscribeRequest {
    pub call_id: CallId,
    pub actor_id: ActorId,
    pub target: String,
    pub filter: StreamFilter,
}

/// How a resume request was satisfied. Neither case is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// Buffered entries after the checkpoint were re-sent in order
    Replayed { count: usize },
    /// The gap could not be filled; a snapshot went out as sequence 1
    Restarted,
}

#[derive(Debug)]
pub struct StreamRegistry {
    settings: StreamSettings,
    table: RwLock<SessionTable>,
    metrics: StreamMetrics,
}

impl StreamRegistry {
    pub fn new(settings: StreamSettings) -> Self {
        Self {
            settings,
            table: RwLock::new(SessionTable::default()),
            metrics: StreamMetrics::default(),
        }
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    /// Open a session, announce it with `StreamStart` and send `snapshot`
    /// as sequence 1.
    pub fn subscribe(
        &self,
        request: SubscribeRequest,
        snapshot: &Value,
        outlet: StreamOutlet,
    ) -> StreamResult<StreamId> {
        let stream_id = StreamId::new();
        let mut session = StreamSession::new(
            stream_id.clone(),
            request.actor_id.clone(),
            request.target.clone(),
            request.filter,
            outlet,
            &self.settings,
        );

        let start = Envelope::StreamStart(StreamStartEnvelope {
            stream_id: stream_id.clone(),
            call_id: request.call_id,
            actor_id: request.actor_id.clone(),
            target: request.target.clone(),
        });
        if !session.offer(start) {
            session.suspend();
        }
        let delivery = session.restart(snapshot)?;
        self.record(delivery);

        info!(
            stream_id = %stream_id,
            actor_id = %request.actor_id,
            target = %request.target,
            "Stream subscribed"
        );
        StreamMetrics::incr(&self.metrics.sessions_created);
        self.insert(session);
        Ok(stream_id)
    }

    /// Offer a new value of (actor, target) to every live session on it.
    /// Returns how many sessions assigned it a sequence number.
    pub fn emit(&self, actor_id: &ActorId, target: &str, value: &Value) -> usize {
        let handles: Vec<SessionRef> = {
            let table = self.table.read();
            let key = StreamKey {
                actor_id: actor_id.clone(),
                target: target.to_string(),
            };
            match table.by_target.get(&key) {
                Some(ids) => ids.iter().filter_map(|id| table.sessions.get(id).cloned()).collect(),
                None => return 0,
            }
        };

        let mut accepted = 0;
        for handle in handles {
            let mut session = handle.lock();
            match session.deliver(value, &self.settings) {
                Ok(delivery) => {
                    if matches!(delivery, Delivery::Sent { .. } | Delivery::Buffered { .. }) {
                        accepted += 1;
                    }
                    self.record(delivery);
                }
                Err(e) => warn!(stream_id = %session.stream_id(), error = %e, "Failed to encode update"),
            }
        }
        accepted
    }

    /// Reattach a subscriber after reconnect. Replays the buffered tail
    /// when contiguous, otherwise restarts from `snapshot`. Unknown or
    /// expired stream ids become a fresh session under the same id.
    pub fn resume(
        &self,
        request: &StreamResumeEnvelope,
        snapshot: &Value,
        outlet: StreamOutlet,
    ) -> StreamResult<ResumeOutcome> {
        let existing = self.table.read().sessions.get(&request.stream_id).cloned();

        if let Some(handle) = existing {
            let mut session = handle.lock();
            // The reaper may not have run since the TTL elapsed
            if session.state() != SessionState::Expired
                && session.is_expired_at(Instant::now(), self.settings.buffer_ttl)
            {
                session.expire();
                StreamMetrics::incr(&self.metrics.sessions_expired);
            }
            let same_target = session.actor_id == request.actor_id && session.target == request.target;
            if session.state() != SessionState::Expired && same_target {
                session.attach(outlet);
                let current = session.last_sequence();
                session.buffer.purge_expired();

                if let Some(entries) = session.buffer.replay_after(request.last_sequence, current) {
                    let mut count = 0;
                    for entry in &entries {
                        if !session.push(entry) {
                            break;
                        }
                        count += 1;
                    }
                    StreamMetrics::incr(&self.metrics.replays);
                    debug!(
                        stream_id = %request.stream_id,
                        from = request.last_sequence,
                        count,
                        "Stream resumed from buffer"
                    );
                    return Ok(ResumeOutcome::Replayed { count });
                }

                let delivery = session.restart(snapshot)?;
                self.record(delivery);
                StreamMetrics::incr(&self.metrics.restarts);
                info!(
                    stream_id = %request.stream_id,
                    last_sequence = request.last_sequence,
                    current,
                    "Buffer cannot fill gap, restarting stream from snapshot"
                );
                return Ok(ResumeOutcome::Restarted);
            }
        }

        // Fresh session under the presented id; the original filter is gone
        let mut session = StreamSession::new(
            request.stream_id.clone(),
            request.actor_id.clone(),
            request.target.clone(),
            StreamFilter::PassThrough,
            outlet,
            &self.settings,
        );
        let delivery = session.restart(snapshot)?;
        self.record(delivery);
        StreamMetrics::incr(&self.metrics.sessions_created);
        StreamMetrics::incr(&self.metrics.restarts);
        info!(stream_id = %request.stream_id, "Unknown stream resumed as fresh subscription");
        self.insert(session);
        Ok(ResumeOutcome::Restarted)
    }

    /// Detach the subscriber but keep buffering
    pub fn suspend(&self, stream_id: &StreamId) -> bool {
        let Some(handle) = self.table.read().sessions.get(stream_id).cloned() else {
            return false;
        };
        handle.lock().suspend();
        true
    }

    /// Suspend every session writing to `outlet_id`, e.g. on disconnect
    pub fn suspend_outlet(&self, outlet_id: OutletId) -> usize {
        let handles: Vec<SessionRef> = self.table.read().sessions.values().cloned().collect();
        let mut suspended = 0;
        for handle in handles {
            let mut session = handle.lock();
            if session.outlet.as_ref().is_some_and(|o| o.id() == outlet_id) {
                session.suspend();
                suspended += 1;
            }
        }
        if suspended > 0 {
            debug!(outlet_id, suspended, "Suspended sessions for closed outlet");
        }
        suspended
    }

    /// Destroy a session at the subscriber's request
    pub fn unsubscribe(&self, stream_id: &StreamId) -> bool {
        let Some(handle) = self.table.write().remove(stream_id) else {
            return false;
        };
        handle.lock().expire();
        debug!(stream_id = %stream_id, "Stream unsubscribed");
        true
    }

    /// End every stream observing `actor_id`, notifying attached subscribers
    pub fn end_actor(&self, actor_id: &ActorId, reason: &str) -> usize {
        let removed: Vec<SessionRef> = {
            let mut table = self.table.write();
            let ids: Vec<StreamId> = table
                .by_target
                .iter()
                .filter(|(key, _)| &key.actor_id == actor_id)
                .flat_map(|(_, ids)| ids.iter().cloned())
                .collect();
            ids.iter().filter_map(|id| table.remove(id)).collect()
        };

        for handle in &removed {
            let mut session = handle.lock();
            session.offer(Envelope::StreamEnd(StreamEndEnvelope {
                stream_id: session.stream_id().clone(),
                reason: reason.to_string(),
            }));
            session.expire();
        }
        if !removed.is_empty() {
            info!(actor_id = %actor_id, ended = removed.len(), reason, "Ended actor streams");
        }
        removed.len()
    }

    /// Remove sessions suspended longer than the buffer TTL and drop stale
    /// buffer entries from the rest.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let handles: Vec<(StreamId, SessionRef)> = self
            .table
            .read()
            .sessions
            .iter()
            .map(|(id, h)| (id.clone(), h.clone()))
            .collect();

        let mut expired = Vec::new();
        for (id, handle) in handles {
            let mut session = handle.lock();
            if session.is_expired_at(now, self.settings.buffer_ttl) {
                session.expire();
                expired.push(id);
            } else {
                session.buffer.purge_expired();
            }
        }

        if !expired.is_empty() {
            let mut table = self.table.write();
            for id in &expired {
                table.remove(id);
                StreamMetrics::incr(&self.metrics.sessions_expired);
            }
            debug!(expired = expired.len(), "Purged expired stream sessions");
        }
        expired.len()
    }

    /// Periodically purge expired sessions until the registry is dropped
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let registry: Weak<StreamRegistry> = Arc::downgrade(self);
        let period = self.settings.reap_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.purge_expired();
            }
        })
    }

    pub fn session_state(&self, stream_id: &StreamId) -> Option<SessionState> {
        let handle = self.table.read().sessions.get(stream_id).cloned()?;
        let state = handle.lock().state();
        Some(state)
    }

    pub fn last_sequence(&self, stream_id: &StreamId) -> Option<u64> {
        let handle = self.table.read().sessions.get(stream_id).cloned()?;
        let sequence = handle.lock().last_sequence();
        Some(sequence)
    }

    /// Number of sessions observing (actor, target)
    pub fn subscriber_count(&self, actor_id: &ActorId, target: &str) -> usize {
        let key = StreamKey {
            actor_id: actor_id.clone(),
            target: target.to_string(),
        };
        self.table.read().by_target.get(&key).map_or(0, |ids| ids.len())
    }

    pub fn len(&self) -> usize {
        self.table.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics(&self) -> StreamMetricsSnapshot {
        self.metrics.snapshot()
    }

    fn insert(&self, session: StreamSession) {
        let stream_id = session.stream_id.clone();
        let key = StreamKey {
            actor_id: session.actor_id.clone(),
            target: session.target.clone(),
        };
        let replaced = self
            .table
            .write()
            .insert(stream_id, key, Arc::new(Mutex::new(session)));
        if let Some(old) = replaced {
            old.lock().expire();
        }
    }

    fn record(&self, delivery: Delivery) {
        match delivery {
            Delivery::Sent { is_delta, .. } => {
                StreamMetrics::incr(&self.metrics.updates_sent);
                if is_delta {
                    StreamMetrics::incr(&self.metrics.deltas_sent);
                }
            }
            Delivery::Buffered { .. } => StreamMetrics::incr(&self.metrics.updates_buffered),
            Delivery::Filtered => StreamMetrics::incr(&self.metrics.updates_filtered),
            Delivery::Dropped => {}
        }
    }
}
