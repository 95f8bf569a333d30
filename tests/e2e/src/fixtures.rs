//! Test actors and connectors

use actors::{Actor, ActorContext, MethodTable, Reply};
use async_trait::async_trait;
use client::{Connector, EndpointConnector};
use network::{Connection, Endpoint, SharedConnection, TransportPolicy};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use streams::Observed;

/// Observable string, for change-filter scenarios
#[derive(Default)]
pub struct Label {
    text: Observed<String>,
}

#[async_trait]
impl Actor for Label {
    fn type_name() -> &'static str {
        "Label"
    }

    fn methods() -> MethodTable<Self> {
        MethodTable::<Self>::new()
            .sync_method("set(_:)", |label, args| {
                let text: String = args.decode(0)?;
                label.text.set(text);
                Reply::void()
            })
            .property("text", |label: &Label| label.text.get().clone())
    }

    async fn on_start(&mut self, ctx: &ActorContext) -> actors::Result<()> {
        self.text.bind(ctx.emitter("text"));
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub count: i64,
}

/// Observable struct with a numeric field, for threshold scenarios
#[derive(Default)]
pub struct Gauge {
    reading: Observed<Reading>,
}

#[async_trait]
impl Actor for Gauge {
    fn type_name() -> &'static str {
        "Gauge"
    }

    fn methods() -> MethodTable<Self> {
        MethodTable::<Self>::new()
            .sync_method("record(_:)", |gauge, args| {
                let count: i64 = args.decode(0)?;
                gauge.reading.set(Reading { count });
                Reply::void()
            })
            .property("reading", |gauge: &Gauge| gauge.reading.get().clone())
    }

    async fn on_start(&mut self, ctx: &ActorContext) -> actors::Result<()> {
        self.reading.bind(ctx.emitter("reading"));
        Ok(())
    }
}

/// Real transport connector that can cut its live connection on demand,
/// standing in for a network fault
pub struct SeveringConnector {
    inner: EndpointConnector,
    current: Mutex<Option<SharedConnection>>,
    connects: AtomicU32,
}

impl SeveringConnector {
    pub fn new(endpoint: Endpoint, policy: TransportPolicy) -> Self {
        Self {
            inner: EndpointConnector::new(endpoint, policy),
            current: Mutex::new(None),
            connects: AtomicU32::new(0),
        }
    }

    /// Close the live connection from the client side
    pub async fn sever(&self) {
        let current = self.current.lock().take();
        if let Some(connection) = current {
            connection.close().await;
        }
    }

    /// Successful connects so far
    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for SeveringConnector {
    async fn connect(&self) -> network::Result<SharedConnection> {
        let connection = self.inner.connect().await?;
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.current.lock() = Some(connection.clone());
        Ok(connection)
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }
}
