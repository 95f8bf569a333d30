//! # End-to-End Scenarios
//!
//! Each scenario runs a node on a loopback listener and talks to it only
//! through the client library. Transport-sensitive scenarios run over both
//! TCP and WebSocket.

use actor_node::demo::Counter;
use actors::{ActorError, MemoryDiscovery, ServiceDiscovery};
use anyhow::Result;
use client::{ClientError, ConnectionState, ReconnectPolicy, Resolver, StreamEvent};
use codec::{ActorId, Arguments, Comparison, ErrorDescriptor, StreamFilter};
use e2e_tests::{test_options, within, Gauge, Label, Reading, TestNode};
use network::TransportKind;
use runtime_config::RuntimeConfig;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

async fn node_with_counter(kind: TransportKind) -> Result<TestNode> {
    let node = TestNode::start(kind).await?;
    node.registry().expose(Counter::default(), "counter").await?;
    Ok(node)
}

async fn increments_in_order(kind: TransportKind) -> Result<()> {
    let node = node_with_counter(kind).await?;
    let manager = node.client()?;
    manager.connect().await?;
    let counter = manager.resolve_checked("counter").await?;

    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(within(counter.call::<i64>("increment()", Arguments::empty())).await??);
    }
    assert_eq!(seen, vec![1, 2, 3]);

    let total: i64 = counter
        .call("add(by:)", Arguments::empty().with(&10i64)?)
        .await?;
    assert_eq!(total, 13);

    manager.disconnect().await;
    node.shutdown().await;
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_counter_increments_over_tcp() -> Result<()> {
    increments_in_order(TransportKind::Tcp).await
}

#[test_log::test(tokio::test)]
async fn test_counter_increments_over_websocket() -> Result<()> {
    increments_in_order(TransportKind::WebSocket).await
}

async fn stream_sequences(kind: TransportKind) -> Result<()> {
    let node = node_with_counter(kind).await?;
    let manager = node.client()?;
    let counter = manager.resolve("counter");

    let mut updates = counter.subscribe("count", StreamFilter::PassThrough).await?;
    counter.call::<i64>("increment()", Arguments::empty()).await?;
    counter.call::<i64>("increment()", Arguments::empty()).await?;

    let mut received = Vec::new();
    for _ in 0..3 {
        let update = within(updates.next()).await?.expect("stream ended early");
        received.push((update.sequence, update.decode::<i64>()?));
    }
    assert_eq!(received, vec![(1, 0), (2, 1), (3, 2)]);

    node.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_stream_sequences_over_tcp() -> Result<()> {
    stream_sequences(TransportKind::Tcp).await
}

#[tokio::test]
async fn test_stream_sequences_over_websocket() -> Result<()> {
    stream_sequences(TransportKind::WebSocket).await
}

async fn resume_after_disconnect(kind: TransportKind) -> Result<()> {
    let node = node_with_counter(kind).await?;
    let driver = node.client()?;
    let counter = driver.resolve("counter");

    // Slow first retry so the driver can advance the counter while the
    // subscriber is away
    let options = test_options().with_reconnect(ReconnectPolicy {
        initial_delay: Duration::from_millis(300),
        multiplier: 1.0,
        max_delay: Duration::from_millis(300),
        max_attempts: 10,
    });
    let (subscriber, connector) = node.severable_client(options)?;
    let mut updates = subscriber
        .resolve("counter")
        .subscribe("count", StreamFilter::PassThrough)
        .await?;

    assert_eq!(within(updates.next()).await?.map(|u| u.sequence), Some(1));
    for expected in 2..=5u64 {
        counter.call::<i64>("increment()", Arguments::empty()).await?;
        assert_eq!(within(updates.next()).await?.map(|u| u.sequence), Some(expected));
    }
    assert_eq!(subscriber.checkpoint(updates.stream_id()), Some(5));

    connector.sever().await;
    let mut states = subscriber.watch_state();
    within(states.wait_for(|s| matches!(s, ConnectionState::Reconnecting { .. }))).await??;
    counter.call::<i64>("increment()", Arguments::empty()).await?;
    counter.call::<i64>("increment()", Arguments::empty()).await?;

    let sixth = within(updates.next()).await?.expect("stream ended");
    let seventh = within(updates.next()).await?.expect("stream ended");
    assert_eq!((sixth.sequence, sixth.decode::<i64>()?), (6, 5));
    assert_eq!((seventh.sequence, seventh.decode::<i64>()?), (7, 6));
    assert!(!sixth.is_reset);
    assert_eq!(connector.connects(), 2);
    assert_eq!(subscriber.state(), ConnectionState::Connected);

    node.shutdown().await;
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_resume_replays_missed_updates_over_tcp() -> Result<()> {
    resume_after_disconnect(TransportKind::Tcp).await
}

#[test_log::test(tokio::test)]
async fn test_resume_replays_missed_updates_over_websocket() -> Result<()> {
    resume_after_disconnect(TransportKind::WebSocket).await
}

#[tokio::test]
async fn test_changed_filter_drops_repeats() -> Result<()> {
    let node = TestNode::start(TransportKind::Tcp).await?;
    node.registry().expose(Label::default(), "label").await?;
    let manager = node.client()?;
    let label = manager.resolve("label");

    let mut updates = label.subscribe("text", StreamFilter::Changed).await?;
    let snapshot = within(updates.next()).await?.expect("snapshot");
    assert_eq!(snapshot.decode::<String>()?, "");

    for text in ["A", "A", "B", "C"] {
        label.call_void("set(_:)", Arguments::empty().with(text)?).await?;
    }

    let mut received = Vec::new();
    for _ in 0..3 {
        let update = within(updates.next()).await?.expect("stream ended");
        received.push((update.sequence, update.decode::<String>()?));
    }
    assert_eq!(
        received,
        vec![(2, "A".to_string()), (3, "B".to_string()), (4, "C".to_string())]
    );

    node.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_threshold_filter_on_field() -> Result<()> {
    let node = TestNode::start(TransportKind::Tcp).await?;
    node.registry().expose(Gauge::default(), "gauge").await?;
    let manager = node.client()?;
    let gauge = manager.resolve("gauge");

    let filter = StreamFilter::threshold("count", Comparison::GreaterThan, 100.0);
    let mut updates = gauge.subscribe("reading", filter).await?;
    let snapshot: Reading = within(updates.next_value()).await?.expect("snapshot")?;
    assert_eq!(snapshot.count, 0);

    gauge.call_void("record(_:)", Arguments::empty().with(&99i64)?).await?;
    gauge.call_void("record(_:)", Arguments::empty().with(&101i64)?).await?;

    let update = within(updates.next()).await?.expect("stream ended");
    assert_eq!(update.sequence, 2);
    assert_eq!(update.decode::<Reading>()?, Reading { count: 101 });

    node.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_duplicate_expose_keeps_original() -> Result<()> {
    let node = node_with_counter(TransportKind::Tcp).await?;
    let counter = node.client()?.resolve("counter");
    assert_eq!(counter.call::<i64>("increment()", Arguments::empty()).await?, 1);

    let err = node
        .registry()
        .expose(Counter::default(), "counter")
        .await
        .unwrap_err();
    assert!(matches!(err, ActorError::DuplicateIdentifier { .. }));

    assert_eq!(counter.call::<i64>("increment()", Arguments::empty()).await?, 2);
    node.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_deregister_ends_streams_and_calls() -> Result<()> {
    let node = node_with_counter(TransportKind::Tcp).await?;
    let manager = node.client()?;
    let counter = manager.resolve("counter");
    let mut updates = counter.subscribe("count", StreamFilter::PassThrough).await?;
    within(updates.next()).await?.expect("snapshot");

    node.registry().deregister(&ActorId::from("counter")).await?;

    match within(updates.next_event()).await? {
        Some(StreamEvent::Ended { reason }) => assert_eq!(reason, streams::ACTOR_DEREGISTERED),
        other => panic!("expected stream end, got {:?}", other),
    }
    let err = counter
        .call::<i64>("increment()", Arguments::empty())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::UnknownActor { .. }));
    assert!(!counter.exists().await?);

    node.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_security_hooks_from_configuration() -> Result<()> {
    let mut config = RuntimeConfig::default();
    config.node.listen = vec!["tcp://127.0.0.1:0".to_string()];
    config.security.tokens = BTreeMap::from([("s3cret".to_string(), "alice".to_string())]);
    config.security.allow = BTreeMap::from([("alice".to_string(), vec!["counter".to_string()])]);
    let node = TestNode::start_with(config).await?;
    node.registry().expose(Counter::default(), "counter").await?;
    node.registry().expose(Gauge::default(), "gauge").await?;
    let manager = node.client()?;

    let err = manager
        .resolve("counter")
        .call::<i64>("increment()", Arguments::empty())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Remote(ErrorDescriptor::Authentication { .. })));

    let counter = manager.resolve("counter").with_credentials("s3cret");
    assert_eq!(counter.call::<i64>("increment()", Arguments::empty()).await?, 1);

    let err = manager
        .resolve("gauge")
        .with_credentials("s3cret")
        .call_void("record(_:)", Arguments::empty().with(&1i64)?)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Remote(ErrorDescriptor::Authorization { .. })));

    node.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_resolution_through_discovery() -> Result<()> {
    let node = node_with_counter(TransportKind::Tcp).await?;
    let discovery = Arc::new(MemoryDiscovery::new());
    discovery
        .register(
            &ActorId::from("counter"),
            node.endpoint()?,
            BTreeMap::new(),
            Duration::from_secs(60),
        )
        .await?;

    let resolver = Resolver::new(discovery, test_options());
    let counter = resolver.resolve("counter").await?;
    assert_eq!(counter.call::<i64>("increment()", Arguments::empty()).await?, 1);
    assert!(matches!(
        resolver.resolve("elsewhere").await,
        Err(ClientError::UnknownActor { .. })
    ));

    resolver.shutdown().await;
    node.shutdown().await;
    Ok(())
}
