//! # Stream Registry Tests
//!
//! Sequencing, filtering, resume and backpressure through the public API.
//! Outlets are plain channels drained with `try_recv`, so every assertion
//! sees exactly what a connection writer would have sent.

use codec::{decode_document, ActorId, CallId, Comparison, Envelope, StreamFilter, StreamResumeEnvelope};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use streams::{
    apply_delta, Emitter, Observed, ResumeOutcome, SessionState, StreamOutlet, StreamRegistry,
    StreamSettings, SubscribeRequest, ACTOR_DEREGISTERED,
};
use tokio::sync::mpsc;

fn request(filter: StreamFilter) -> SubscribeRequest {
    SubscribeRequest {
        call_id: CallId::new(),
        actor_id: ActorId::from("counter"),
        target: "count".to_string(),
        filter,
    }
}

fn drain(rx: &mut mpsc::Receiver<Envelope>) -> Vec<Envelope> {
    let mut out = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        out.push(envelope);
    }
    out
}

/// (sequence, reconstructed full value) for every data envelope, applying
/// deltas on top of the previous value
fn data_values(envelopes: &[Envelope], mut current: Value) -> Vec<(u64, Value)> {
    let mut out = Vec::new();
    for envelope in envelopes {
        if let Envelope::StreamData(data) = envelope {
            let payload = decode_document(&data.data).unwrap();
            if data.is_delta {
                apply_delta(&mut current, &payload);
            } else {
                current = payload;
            }
            out.push((data.sequence, current.clone()));
        }
    }
    out
}

fn sequences(envelopes: &[Envelope]) -> Vec<u64> {
    data_values(envelopes, Value::Null).into_iter().map(|(s, _)| s).collect()
}

#[test]
fn test_subscribe_sends_start_then_snapshot_at_one() {
    let registry = StreamRegistry::new(StreamSettings::default());
    let (outlet, mut rx) = StreamOutlet::channel(1, 16);
    let req = request(StreamFilter::PassThrough);
    let call_id = req.call_id.clone();

    let stream_id = registry.subscribe(req, &json!({"count": 0}), outlet).unwrap();
    let sent = drain(&mut rx);

    match &sent[0] {
        Envelope::StreamStart(start) => {
            assert_eq!(start.stream_id, stream_id);
            assert_eq!(start.call_id, call_id);
        }
        other => panic!("expected StreamStart, got {:?}", other),
    }
    assert_eq!(data_values(&sent, Value::Null), vec![(1, json!({"count": 0}))]);
}

#[test]
fn test_emissions_are_gap_free_and_ordered() {
    let registry = StreamRegistry::new(StreamSettings::default());
    let (outlet, mut rx) = StreamOutlet::channel(1, 64);
    registry
        .subscribe(request(StreamFilter::PassThrough), &json!({"count": 0}), outlet)
        .unwrap();

    let actor = ActorId::from("counter");
    for n in 1..=2 {
        assert_eq!(registry.emit(&actor, "count", &json!({"count": n})), 1);
    }

    let values = data_values(&drain(&mut rx), Value::Null);
    assert_eq!(
        values,
        vec![
            (1, json!({"count": 0})),
            (2, json!({"count": 1})),
            (3, json!({"count": 2})),
        ]
    );
}

#[test]
fn test_emit_to_other_target_is_ignored() {
    let registry = StreamRegistry::new(StreamSettings::default());
    let (outlet, mut rx) = StreamOutlet::channel(1, 16);
    registry.subscribe(request(StreamFilter::PassThrough), &json!(0), outlet).unwrap();
    drain(&mut rx);

    assert_eq!(registry.emit(&ActorId::from("counter"), "name", &json!("x")), 0);
    assert_eq!(registry.emit(&ActorId::from("other"), "count", &json!(1)), 0);
    assert!(drain(&mut rx).is_empty());
}

#[test]
fn test_changed_filter_suppresses_identical_values() {
    let registry = StreamRegistry::new(StreamSettings::default());
    let actor = ActorId::from("counter");

    let (outlet, mut rx) = StreamOutlet::channel(1, 16);
    registry.subscribe(request(StreamFilter::Changed), &json!({"v": "x"}), outlet).unwrap();
    drain(&mut rx);
    registry.emit(&actor, "count", &json!({"v": "a"}));
    registry.emit(&actor, "count", &json!({"v": "a"}));
    assert_eq!(sequences(&drain(&mut rx)), vec![2]);

    let (outlet, mut rx) = StreamOutlet::channel(2, 16);
    registry.subscribe(request(StreamFilter::Changed), &json!({"v": "x"}), outlet).unwrap();
    drain(&mut rx);
    let before = registry.metrics().updates_filtered;
    registry.emit(&actor, "count", &json!({"v": "a"}));
    registry.emit(&actor, "count", &json!({"v": "a"}));
    registry.emit(&actor, "count", &json!({"v": "b"}));
    assert_eq!(sequences(&drain(&mut rx)), vec![2, 3]);
    assert!(registry.metrics().updates_filtered > before);
}

#[test]
fn test_threshold_filter_on_count() {
    let registry = StreamRegistry::new(StreamSettings::default());
    let actor = ActorId::from("counter");
    let filter = StreamFilter::threshold("count", Comparison::GreaterThan, 100.0);

    let (outlet, mut rx) = StreamOutlet::channel(1, 16);
    registry.subscribe(request(filter), &json!({"count": 0}), outlet).unwrap();
    drain(&mut rx);

    registry.emit(&actor, "count", &json!({"count": 99}));
    assert!(drain(&mut rx).is_empty());

    registry.emit(&actor, "count", &json!({"count": 101}));
    let values = data_values(&drain(&mut rx), json!({"count": 0}));
    assert_eq!(values, vec![(2, json!({"count": 101}))]);
}

#[test]
fn test_deltas_reconstruct_full_values() {
    let registry = StreamRegistry::new(StreamSettings::default());
    let actor = ActorId::from("counter");
    let base = json!({"count": 0, "label": "a fairly long label that never changes"});

    let (outlet, mut rx) = StreamOutlet::channel(1, 16);
    registry.subscribe(request(StreamFilter::PassThrough), &base, outlet).unwrap();
    let mut next = base.clone();
    next["count"] = json!(1);
    registry.emit(&actor, "count", &next);

    let sent = drain(&mut rx);
    let delta = sent
        .iter()
        .find_map(|e| match e {
            Envelope::StreamData(d) if d.sequence == 2 => Some(d.is_delta),
            _ => None,
        })
        .unwrap();
    assert!(delta);
    assert_eq!(data_values(&sent, Value::Null).last().unwrap().1, next);
    assert_eq!(registry.metrics().deltas_sent, 1);
}

#[test]
fn test_resume_after_disconnect_replays_missed_updates() {
    let registry = StreamRegistry::new(StreamSettings::default());
    let actor = ActorId::from("counter");

    let (outlet, mut rx) = StreamOutlet::channel(7, 64);
    let stream_id = registry
        .subscribe(request(StreamFilter::PassThrough), &json!({"count": 0}), outlet)
        .unwrap();
    for n in 1..=4 {
        registry.emit(&actor, "count", &json!({"count": n}));
    }
    let received = data_values(&drain(&mut rx), Value::Null);
    assert_eq!(received.last().unwrap().0, 5);
    let last_value = received.last().unwrap().1.clone();

    // Connection drops
    assert_eq!(registry.suspend_outlet(7), 1);
    assert_eq!(registry.session_state(&stream_id), Some(SessionState::Suspended));
    registry.emit(&actor, "count", &json!({"count": 5}));
    registry.emit(&actor, "count", &json!({"count": 6}));

    let (outlet, mut rx) = StreamOutlet::channel(8, 64);
    let resume = StreamResumeEnvelope {
        stream_id: stream_id.clone(),
        last_sequence: 5,
        actor_id: actor.clone(),
        target: "count".to_string(),
    };
    let outcome = registry.resume(&resume, &json!({"count": 6}), outlet).unwrap();
    assert_eq!(outcome, ResumeOutcome::Replayed { count: 2 });

    // Live updates continue after the replay
    registry.emit(&actor, "count", &json!({"count": 7}));
    let values = data_values(&drain(&mut rx), last_value);
    assert_eq!(
        values,
        vec![
            (6, json!({"count": 5})),
            (7, json!({"count": 6})),
            (8, json!({"count": 7})),
        ]
    );
    assert_eq!(registry.session_state(&stream_id), Some(SessionState::Active));
}

#[test]
fn test_resume_beyond_buffer_restarts_with_snapshot() {
    let settings = StreamSettings {
        buffer_capacity: 3,
        ..StreamSettings::default()
    };
    let registry = StreamRegistry::new(settings);
    let actor = ActorId::from("counter");

    let (outlet, _rx) = StreamOutlet::channel(1, 64);
    let stream_id = registry
        .subscribe(request(StreamFilter::PassThrough), &json!({"count": 0}), outlet)
        .unwrap();
    registry.suspend(&stream_id);
    for n in 1..=10 {
        registry.emit(&actor, "count", &json!({"count": n}));
    }

    let (outlet, mut rx) = StreamOutlet::channel(2, 64);
    let resume = StreamResumeEnvelope {
        stream_id: stream_id.clone(),
        last_sequence: 1,
        actor_id: actor.clone(),
        target: "count".to_string(),
    };
    let outcome = registry.resume(&resume, &json!({"count": 10}), outlet).unwrap();
    assert_eq!(outcome, ResumeOutcome::Restarted);
    assert_eq!(data_values(&drain(&mut rx), Value::Null), vec![(1, json!({"count": 10}))]);
    assert_eq!(registry.last_sequence(&stream_id), Some(1));

    registry.emit(&actor, "count", &json!({"count": 11}));
    assert_eq!(sequences(&drain(&mut rx)), vec![2]);
}

#[test]
fn test_resume_after_ttl_restarts_without_reaper() {
    let settings = StreamSettings {
        buffer_ttl: Duration::from_millis(50),
        ..StreamSettings::default()
    };
    let registry = StreamRegistry::new(settings);
    let actor = ActorId::from("counter");

    let (outlet, _rx) = StreamOutlet::channel(1, 64);
    let stream_id = registry
        .subscribe(request(StreamFilter::Changed), &json!({"count": 0}), outlet)
        .unwrap();
    registry.suspend(&stream_id);
    registry.emit(&actor, "count", &json!({"count": 1}));
    registry.emit(&actor, "count", &json!({"count": 2}));
    std::thread::sleep(Duration::from_millis(150));

    let (outlet, mut rx) = StreamOutlet::channel(2, 64);
    let resume = StreamResumeEnvelope {
        stream_id: stream_id.clone(),
        last_sequence: 1,
        actor_id: actor.clone(),
        target: "count".to_string(),
    };
    let outcome = registry.resume(&resume, &json!({"count": 2}), outlet).unwrap();
    assert_eq!(outcome, ResumeOutcome::Restarted);
    assert_eq!(data_values(&drain(&mut rx), Value::Null), vec![(1, json!({"count": 2}))]);
    assert_eq!(registry.session_state(&stream_id), Some(SessionState::Active));
    assert_eq!(registry.metrics().sessions_expired, 1);

    // Fresh session: the old Changed filter no longer applies
    registry.emit(&actor, "count", &json!({"count": 2}));
    assert_eq!(sequences(&drain(&mut rx)), vec![2]);
}

#[test]
fn test_resume_does_not_replay_entries_older_than_ttl() {
    let settings = StreamSettings {
        buffer_ttl: Duration::from_millis(50),
        ..StreamSettings::default()
    };
    let registry = StreamRegistry::new(settings);
    let actor = ActorId::from("counter");

    let (outlet, _rx) = StreamOutlet::channel(1, 64);
    let stream_id = registry
        .subscribe(request(StreamFilter::PassThrough), &json!({"count": 0}), outlet)
        .unwrap();
    registry.emit(&actor, "count", &json!({"count": 1}));
    registry.emit(&actor, "count", &json!({"count": 2}));
    std::thread::sleep(Duration::from_millis(100));
    // Suspended well inside the TTL, but the missed entries are stale
    registry.suspend(&stream_id);

    let (outlet, mut rx) = StreamOutlet::channel(2, 64);
    let resume = StreamResumeEnvelope {
        stream_id: stream_id.clone(),
        last_sequence: 1,
        actor_id: actor.clone(),
        target: "count".to_string(),
    };
    let outcome = registry.resume(&resume, &json!({"count": 2}), outlet).unwrap();
    assert_eq!(outcome, ResumeOutcome::Restarted);
    assert_eq!(sequences(&drain(&mut rx)), vec![1]);
}

#[test]
fn test_resume_unknown_stream_starts_fresh_under_same_id() {
    let registry = StreamRegistry::new(StreamSettings::default());
    let (outlet, mut rx) = StreamOutlet::channel(1, 16);
    let resume = StreamResumeEnvelope {
        stream_id: codec::StreamId::from_raw("expired-stream"),
        last_sequence: 42,
        actor_id: ActorId::from("counter"),
        target: "count".to_string(),
    };

    let outcome = registry.resume(&resume, &json!({"count": 3}), outlet).unwrap();
    assert_eq!(outcome, ResumeOutcome::Restarted);
    assert_eq!(registry.last_sequence(&resume.stream_id), Some(1));
    assert_eq!(sequences(&drain(&mut rx)), vec![1]);
}

#[test]
fn test_full_outlet_suspends_instead_of_queueing() {
    let registry = StreamRegistry::new(StreamSettings::default());
    let actor = ActorId::from("counter");
    // Room for StreamStart and the snapshot only
    let (outlet, mut rx) = StreamOutlet::channel(1, 2);
    let stream_id = registry
        .subscribe(request(StreamFilter::PassThrough), &json!(0), outlet)
        .unwrap();

    registry.emit(&actor, "count", &json!(1));
    assert_eq!(registry.session_state(&stream_id), Some(SessionState::Suspended));

    // Still buffered for a later resume
    registry.emit(&actor, "count", &json!(2));
    assert_eq!(registry.last_sequence(&stream_id), Some(3));
    assert_eq!(drain(&mut rx).len(), 2);
}

#[test]
fn test_end_actor_notifies_and_removes_sessions() {
    let registry = StreamRegistry::new(StreamSettings::default());
    let (outlet, mut rx) = StreamOutlet::channel(1, 16);
    let stream_id = registry.subscribe(request(StreamFilter::PassThrough), &json!(0), outlet).unwrap();
    drain(&mut rx);

    assert_eq!(registry.end_actor(&ActorId::from("counter"), ACTOR_DEREGISTERED), 1);
    match drain(&mut rx).as_slice() {
        [Envelope::StreamEnd(end)] => {
            assert_eq!(end.stream_id, stream_id);
            assert_eq!(end.reason, ACTOR_DEREGISTERED);
        }
        other => panic!("expected StreamEnd, got {:?}", other),
    }
    assert!(registry.is_empty());
    assert_eq!(registry.emit(&ActorId::from("counter"), "count", &json!(1)), 0);
}

#[test]
fn test_unsubscribe_removes_session() {
    let registry = StreamRegistry::new(StreamSettings::default());
    let (outlet, _rx) = StreamOutlet::channel(1, 16);
    let stream_id = registry.subscribe(request(StreamFilter::PassThrough), &json!(0), outlet).unwrap();
    assert!(registry.unsubscribe(&stream_id));
    assert!(!registry.unsubscribe(&stream_id));
    assert_eq!(registry.subscriber_count(&ActorId::from("counter"), "count"), 0);
}

#[test]
fn test_suspended_sessions_expire_after_ttl() {
    let settings = StreamSettings {
        buffer_ttl: Duration::from_millis(30),
        ..StreamSettings::default()
    };
    let registry = StreamRegistry::new(settings);
    let (outlet, _rx) = StreamOutlet::channel(1, 16);
    let active = registry.subscribe(request(StreamFilter::PassThrough), &json!(0), outlet.clone()).unwrap();
    let idle = registry.subscribe(request(StreamFilter::PassThrough), &json!(0), outlet).unwrap();
    registry.suspend(&idle);

    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(registry.purge_expired(), 1);
    assert_eq!(registry.session_state(&idle), None);
    assert_eq!(registry.session_state(&active), Some(SessionState::Active));
    assert_eq!(registry.metrics().sessions_expired, 1);
}

#[tokio::test]
async fn test_reaper_purges_in_background() {
    let settings = StreamSettings {
        buffer_ttl: Duration::from_millis(10),
        reap_interval: Duration::from_millis(20),
        ..StreamSettings::default()
    };
    let registry = Arc::new(StreamRegistry::new(settings));
    let reaper = registry.spawn_reaper();

    let (outlet, _rx) = StreamOutlet::channel(1, 16);
    let stream_id = registry.subscribe(request(StreamFilter::PassThrough), &json!(0), outlet).unwrap();
    registry.suspend(&stream_id);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(registry.is_empty());
    reaper.abort();
}

#[tokio::test]
async fn test_concurrent_emitters_keep_sequences_contiguous() {
    let registry = Arc::new(StreamRegistry::new(StreamSettings::default()));
    let (outlet, mut rx) = StreamOutlet::channel(1, 1024);
    registry.subscribe(request(StreamFilter::PassThrough), &json!(0), outlet).unwrap();

    let mut tasks = Vec::new();
    for worker in 0..4 {
        let emitter = Emitter::new(registry.clone(), ActorId::from("counter"), "count");
        tasks.push(tokio::spawn(async move {
            for n in 0..50 {
                emitter.notify(&(worker * 1000 + n)).unwrap();
                tokio::task::yield_now().await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let seqs = sequences(&drain(&mut rx));
    assert_eq!(seqs, (1..=201).collect::<Vec<u64>>());
}

#[test]
fn test_observed_set_notifies_bound_emitter() {
    let registry = Arc::new(StreamRegistry::new(StreamSettings::default()));
    let (outlet, mut rx) = StreamOutlet::channel(1, 16);
    registry.subscribe(request(StreamFilter::PassThrough), &json!(0), outlet).unwrap();
    drain(&mut rx);

    let mut count: Observed<u64> = Observed::new(0);
    count.set(1); // unbound: nothing streamed
    assert!(drain(&mut rx).is_empty());

    count.bind(Emitter::new(registry.clone(), ActorId::from("counter"), "count"));
    count.set(2);
    count.update(|c| *c += 1);
    assert_eq!(*count.get(), 3);

    let values = data_values(&drain(&mut rx), Value::Null);
    assert_eq!(values, vec![(2, json!(2)), (3, json!(3))]);
}
