//! Actors exposed by a stock node

use actors::{Actor, ActorContext, MethodTable, Reply};
use async_trait::async_trait;
use streams::Observed;

/// Shared counter with an observable `count`. State is saved on stop and
/// restored on start when the node has a state store.
#[derive(Default)]
pub struct Counter {
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
            .sync_method("add(by:)", |counter, args| {
                let by: i64 = args.decode(0)?;
                counter.count.update(|count| *count += by);
                Reply::value(counter.count.get())
            })
            .sync_method("reset()", |counter, _| {
                counter.count.set(0);
                Reply::void()
            })
            .sync_method("value()", |counter, _| Reply::value(counter.count.get()))
            .property("count", |counter: &Counter| *counter.count.get())
    }

    async fn on_start(&mut self, ctx: &ActorContext) -> actors::Result<()> {
        if let Some(saved) = ctx.load_state::<i64>().await? {
            self.count.set(saved);
        }
        self.count.bind(ctx.emitter("count"));
        Ok(())
    }

    async fn on_stop(&mut self, ctx: &ActorContext) -> actors::Result<()> {
        ctx.save_state(self.count.get()).await
    }
}
