//! # Connection Server Tests
//!
//! Drives `ActorServer` over in-memory connections with raw envelopes, the
//! way a remote client would.

use actors::{
    Actor, ActorContext, ActorRegistry, ActorServer, HookChain, InvocationEngine, MethodTable,
    Reply, TokenAuthenticator,
};
use async_trait::async_trait;
use bytes::Bytes;
use codec::{
    decode_value, ActorId, Arguments, CallId, CallResult, Envelope, EnvelopeKind, ErrorDescriptor,
    InvocationEnvelope, StreamFilter, StreamResumeEnvelope, StreamSubscribeEnvelope,
    CREDENTIALS_KEY,
};
use network::{Connection, MemoryConnection, SharedConnection, TransportPolicy};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use streams::{Observed, StreamRegistry, StreamSettings};

#[derive(Default)]
struct Counter {
    count: Observed<i64>,
}

#[async_trait]
impl Actor for Counter {
    fn type_name() -> &'static str {
        "Counter"
    }

    fn methods() -> MethodTable<Self> {
        MethodTable::<Self>::new()
            .sync_method("increment()", |counter, _| {
                counter.count.update(|count| *count += 1);
                Reply::value(counter.count.get())
            })
            .method("slow()", |_, _| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Reply::void()
                })
            })
            .property("count", |counter: &Counter| *counter.count.get())
    }

    async fn on_start(&mut self, ctx: &ActorContext) -> actors::Result<()> {
        self.count.bind(ctx.emitter("count"));
        Ok(())
    }
}

async fn server_with(hooks: HookChain) -> Arc<ActorServer> {
    let streams = Arc::new(StreamRegistry::new(StreamSettings::default()));
    let registry = Arc::new(ActorRegistry::new(streams));
    registry.expose(Counter::default(), "counter").await.unwrap();
    let engine = Arc::new(InvocationEngine::new(registry).with_hooks(hooks));
    Arc::new(ActorServer::new(engine))
}

fn connect(server: &Arc<ActorServer>) -> SharedConnection {
    let (client, server_end) = MemoryConnection::pair(&TransportPolicy::default());
    server.spawn_connection(server_end);
    client
}

async fn send(conn: &SharedConnection, envelope: Envelope) {
    conn.send(codec::encode(&envelope).unwrap()).await.unwrap();
}

async fn next(conn: &SharedConnection) -> Envelope {
    let frame = tokio::time::timeout(Duration::from_secs(5), conn.receive())
        .await
        .expect("timed out waiting for envelope")
        .unwrap()
        .expect("connection closed");
    codec::decode(&frame).unwrap()
}

async fn increment(conn: &SharedConnection) -> i64 {
    let envelope = InvocationEnvelope::new(ActorId::from("counter"), "increment()", Arguments::empty());
    let call_id = envelope.call_id.clone();
    send(conn, envelope.into()).await;
    loop {
        if let Envelope::Response(response) = next(conn).await {
            assert_eq!(response.call_id, call_id);
            match response.result {
                CallResult::Value(bytes) => return decode_value(&bytes).unwrap(),
                other => panic!("unexpected {:?}", other),
            }
        }
    }
}

fn subscribe_envelope() -> StreamSubscribeEnvelope {
    StreamSubscribeEnvelope {
        call_id: CallId::new(),
        actor_id: ActorId::from("counter"),
        target: "count".to_string(),
        filter: StreamFilter::PassThrough,
        metadata: BTreeMap::new(),
    }
}

#[test_log::test(tokio::test)]
async fn test_invocations_over_connection() {
    let server = server_with(HookChain::new()).await;
    let conn = connect(&server);

    assert_eq!(increment(&conn).await, 1);
    assert_eq!(increment(&conn).await, 2);
    assert_eq!(increment(&conn).await, 3);
}

#[tokio::test]
async fn test_garbage_frame_is_dropped_not_fatal() {
    let server = server_with(HookChain::new()).await;
    let conn = connect(&server);

    conn.send(Bytes::from_static(b"\x00\x01garbage")).await.unwrap();
    assert_eq!(increment(&conn).await, 1);
}

#[tokio::test]
async fn test_subscribe_streams_snapshot_then_updates() {
    let server = server_with(HookChain::new()).await;
    let conn = connect(&server);

    let subscribe = subscribe_envelope();
    let call_id = subscribe.call_id.clone();
    send(&conn, Envelope::StreamSubscribe(subscribe)).await;

    let stream_id = match next(&conn).await {
        Envelope::StreamStart(start) => {
            assert_eq!(start.call_id, call_id);
            start.stream_id
        }
        other => panic!("expected StreamStart, got {:?}", other),
    };
    match next(&conn).await {
        Envelope::StreamData(data) => {
            assert_eq!(data.stream_id, stream_id);
            assert_eq!(data.sequence, 1);
            assert_eq!(decode_value::<i64>(&data.data).unwrap(), 0);
        }
        other => panic!("expected snapshot, got {:?}", other),
    }

    // Second connection drives the counter so stream traffic is isolated
    let driver = connect(&server);
    increment(&driver).await;
    increment(&driver).await;

    for expected in [2u64, 3] {
        match next(&conn).await {
            Envelope::StreamData(data) => assert_eq!(data.sequence, expected),
            other => panic!("unexpected {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_subscribe_to_unknown_property_is_rejected() {
    let server = server_with(HookChain::new()).await;
    let conn = connect(&server);

    let mut subscribe = subscribe_envelope();
    subscribe.target = "missing".to_string();
    let call_id = subscribe.call_id.clone();
    send(&conn, Envelope::StreamSubscribe(subscribe)).await;

    match next(&conn).await {
        Envelope::Response(response) => {
            assert_eq!(response.call_id, call_id);
            assert!(matches!(
                response.result,
                CallResult::Error(ErrorDescriptor::TargetNotFound { target: Some(_), .. })
            ));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_subscription_requires_credentials_when_authenticating() {
    let hooks = HookChain::new().with_authenticator(Arc::new(TokenAuthenticator::new([("t0k", "alice")])));
    let server = server_with(hooks).await;
    let conn = connect(&server);

    send(&conn, Envelope::StreamSubscribe(subscribe_envelope())).await;
    match next(&conn).await {
        Envelope::Response(response) => assert!(matches!(
            response.result,
            CallResult::Error(ErrorDescriptor::Authentication { .. })
        )),
        other => panic!("unexpected {:?}", other),
    }

    let mut subscribe = subscribe_envelope();
    subscribe
        .metadata
        .insert(CREDENTIALS_KEY.to_string(), "Bearer t0k".to_string());
    send(&conn, Envelope::StreamSubscribe(subscribe)).await;
    assert!(matches!(next(&conn).await, Envelope::StreamStart(_)));
}

#[tokio::test]
async fn test_resume_after_disconnect_replays_missed_updates() {
    let server = server_with(HookChain::new()).await;
    let driver = connect(&server);

    let first = connect(&server);
    send(&first, Envelope::StreamSubscribe(subscribe_envelope())).await;
    let stream_id = match next(&first).await {
        Envelope::StreamStart(start) => start.stream_id,
        other => panic!("unexpected {:?}", other),
    };
    let mut last_sequence = 0;
    assert!(matches!(next(&first).await, Envelope::StreamData(_)));
    for _ in 0..4 {
        increment(&driver).await;
        if let Envelope::StreamData(data) = next(&first).await {
            last_sequence = data.sequence;
        }
    }
    assert_eq!(last_sequence, 5);

    first.close().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    increment(&driver).await;
    increment(&driver).await;

    let second = connect(&server);
    send(
        &second,
        Envelope::StreamResume(StreamResumeEnvelope {
            stream_id: stream_id.clone(),
            last_sequence,
            actor_id: ActorId::from("counter"),
            target: "count".to_string(),
        }),
    )
    .await;

    let mut replayed = Vec::new();
    for _ in 0..2 {
        match next(&second).await {
            Envelope::StreamData(data) => {
                assert_eq!(data.stream_id, stream_id);
                replayed.push(data.sequence);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
    assert_eq!(replayed, vec![6, 7]);

    increment(&driver).await;
    match next(&second).await {
        Envelope::StreamData(data) => assert_eq!(data.sequence, 8),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_deregister_ends_streams() {
    let server = server_with(HookChain::new()).await;
    let conn = connect(&server);
    send(&conn, Envelope::StreamSubscribe(subscribe_envelope())).await;
    assert!(matches!(next(&conn).await, Envelope::StreamStart(_)));
    assert!(matches!(next(&conn).await, Envelope::StreamData(_)));

    server
        .engine()
        .registry()
        .deregister(&ActorId::from("counter"))
        .await
        .unwrap();

    match next(&conn).await {
        Envelope::StreamEnd(end) => assert_eq!(end.reason, streams::ACTOR_DEREGISTERED),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_deregister_ends_subscription_queued_behind_a_call() {
    let server = server_with(HookChain::new()).await;
    let conn = connect(&server);

    send(
        &conn,
        InvocationEnvelope::new(ActorId::from("counter"), "slow()", Arguments::empty()).into(),
    )
    .await;
    send(&conn, Envelope::StreamSubscribe(subscribe_envelope())).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let registry = server.engine().registry().clone();
    registry.deregister(&ActorId::from("counter")).await.unwrap();
    assert!(registry.streams().is_empty());

    let mut kinds = Vec::new();
    loop {
        match next(&conn).await {
            Envelope::StreamEnd(end) => {
                assert_eq!(end.reason, streams::ACTOR_DEREGISTERED);
                break;
            }
            other => kinds.push(other.kind().name()),
        }
    }
    assert_eq!(kinds.len(), 3, "got {:?}", kinds);
    assert!(kinds.contains(&EnvelopeKind::StreamStart.name()));
    assert!(kinds.contains(&EnvelopeKind::StreamData.name()));
    assert!(kinds.contains(&EnvelopeKind::Response.name()));
}
