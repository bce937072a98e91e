//! In-process, prioritized publish/subscribe.
//!
//! Two independent registries live here: a generic named-event bus used for
//! telemetry and lifecycle notifications (`TICK`, `PLUGIN_LOADED`, ...), and
//! a pipeline-stage bus used for the eight fixed chat-turn stages. Pipeline
//! stages are always dispatched sequentially (the pipeline contract depends
//! on every subscriber seeing the same context in order), so it gets its
//! own, simpler registry rather than sharing the parallel/sequential
//! machinery of the generic bus.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::RwLock;
use serde_json::Value;
use vault_plugin_sdk::plugin::{EventHandlerFn, PipelineHandlerFn};
use vault_plugin_sdk::{EventPriority, PipelineContext, PipelineStage};

struct Subscriber<H> {
    priority: EventPriority,
    // Monotonic insertion counter: sort is priority desc, then insertion
    // order ascending, so equal priorities remain stable.
    seq: u64,
    handler: H,
}

fn sorted_insert<H>(list: &mut Vec<Subscriber<H>>, priority: EventPriority, seq: u64, handler: H) {
    list.push(Subscriber { priority, seq, handler });
    list.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
}

/// Prioritized in-process event bus.
pub struct EventBus {
    generic: RwLock<HashMap<String, Vec<Subscriber<EventHandlerFn>>>>,
    pipeline: RwLock<HashMap<PipelineStage, Vec<Subscriber<PipelineHandlerFn>>>>,
    next_seq: std::sync::atomic::AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            generic: RwLock::new(HashMap::new()),
            pipeline: RwLock::new(HashMap::new()),
            next_seq: std::sync::atomic::AtomicU64::new(0),
        }
    }

    fn next_seq(&self) -> u64 {
        self.next_seq
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    /// Subscribe to a named event. Stored sorted by priority descending,
    /// stable on insertion order among ties.
    pub fn subscribe(&self, event: &str, priority: EventPriority, handler: EventHandlerFn) {
        let seq = self.next_seq();
        let mut subs = self.generic.write();
        let list = subs.entry(event.to_string()).or_default();
        sorted_insert(list, priority, seq, handler);
        debug!("subscribed to '{event}' (priority={priority})");
    }

    pub fn subscribe_pipeline(
        &self,
        stage: PipelineStage,
        priority: EventPriority,
        handler: PipelineHandlerFn,
    ) {
        let seq = self.next_seq();
        let mut subs = self.pipeline.write();
        let list = subs.entry(stage).or_default();
        sorted_insert(list, priority, seq, handler);
        debug!("subscribed to pipeline stage {:?} (priority={priority})", stage);
    }

    /// Returns whether a matching subscriber was found and removed.
    /// O(n) over that event's subscriber list.
    pub fn unsubscribe(&self, event: &str, predicate: impl Fn(&EventHandlerFn) -> bool) -> bool {
        let mut subs = self.generic.write();
        if let Some(list) = subs.get_mut(event) {
            let before = list.len();
            list.retain(|s| !predicate(&s.handler));
            return list.len() != before;
        }
        false
    }

    pub fn clear(&self, event: &str) {
        self.generic.write().remove(event);
    }

    /// Publish a named event. `sequential=false` (the default in the
    /// original design) runs all handlers concurrently and waits for every
    /// one to finish; `sequential=true` runs them one at a time in priority
    /// order. Handler panics/errors never escape to the publisher — this
    /// function always returns once every handler has terminated.
    pub async fn publish(&self, event: &str, sequential: bool, payload: Value) {
        // The subscriber list at the instant publish begins is the dispatch
        // set; subscriptions added during dispatch do not run this round.
        let handlers: Vec<EventHandlerFn> = {
            let subs = self.generic.read();
            match subs.get(event) {
                Some(list) => list.iter().map(|s| s.handler.clone()).collect(),
                None => return,
            }
        };

        if sequential {
            for handler in handlers {
                run_guarded(event, &handler, payload.clone()).await;
            }
        } else {
            let futures = handlers
                .into_iter()
                .map(|handler| run_guarded(event, &handler, payload.clone()));
            futures_util::future::join_all(futures).await;
        }
    }

    /// Publish a pipeline stage event. Always sequential: handlers observe
    /// the shared context in strict priority order, one at a time. A
    /// subscriber error is logged and never halts the turn.
    pub async fn publish_pipeline(&self, stage: PipelineStage, ctx: &mut PipelineContext) {
        let handlers: Vec<PipelineHandlerFn> = {
            let subs = self.pipeline.read();
            match subs.get(&stage) {
                Some(list) => list.iter().map(|s| s.handler.clone()).collect(),
                None => {
                    ctx.mark_emitted(stage);
                    return;
                }
            }
        };

        ctx.mark_emitted(stage);
        for handler in handlers {
            if let Err(err) = handler(ctx).await {
                warn!("pipeline stage {:?} subscriber failed: {err}", stage);
            }
        }
    }
}

async fn run_guarded(event: &str, handler: &EventHandlerFn, payload: Value) {
    if let Err(err) = handler(payload).await {
        warn!("event handler failed for '{event}': {err}");
    }
}

/// Convenience constructor for turning an `Arc`-cloneable fallible async
/// closure into an [`EventHandlerFn`].
pub fn handler_fn<F, Fut>(f: F) -> EventHandlerFn
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), vault_plugin_sdk::PluginError>> + Send + 'static,
{
    Arc::new(move |payload| Box::pin(f(payload)))
}

/// Convenience constructor for a [`PipelineHandlerFn`].
pub fn pipeline_handler_fn<F>(f: F) -> PipelineHandlerFn
where
    F: for<'a> Fn(
            &'a mut PipelineContext,
        ) -> futures_util::future::BoxFuture<'a, Result<(), vault_plugin_sdk::PluginError>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn sequential_dispatch_preserves_priority_order() {
        let bus = EventBus::new();
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        for (name, priority) in [("medium", 10), ("low", 1), ("high", 20)] {
            let order = order.clone();
            let name = name.to_string();
            bus.subscribe(
                "test.event",
                priority,
                handler_fn(move |_| {
                    let order = order.clone();
                    let name = name.clone();
                    async move {
                        order.lock().await.push(name);
                        Ok(())
                    }
                }),
            );
        }

        bus.publish("test.event", true, Value::Null).await;
        let recorded = order.lock().await.clone();
        assert_eq!(recorded, vec!["high", "medium", "low"]);
    }

    #[tokio::test]
    async fn equal_priority_ties_preserve_insertion_order() {
        let bus = EventBus::new();
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let order = order.clone();
            let name = name.to_string();
            bus.subscribe(
                "test.event",
                5,
                handler_fn(move |_| {
                    let order = order.clone();
                    let name = name.clone();
                    async move {
                        order.lock().await.push(name);
                        Ok(())
                    }
                }),
            );
        }

        bus.publish("test.event", true, Value::Null).await;
        let recorded = order.lock().await.clone();
        assert_eq!(recorded, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn a_failing_handler_does_not_stop_the_chain() {
        let bus = EventBus::new();
        let ran = Arc::new(AtomicUsize::new(0));

        let ran1 = ran.clone();
        bus.subscribe(
            "test.event",
            10,
            handler_fn(move |_| {
                let ran = ran1.clone();
                async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Err(vault_plugin_sdk::PluginError::new("boom"))
                }
            }),
        );

        let ran2 = ran.clone();
        bus.subscribe(
            "test.event",
            1,
            handler_fn(move |_| {
                let ran = ran2.clone();
                async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );

        bus.publish("test.event", true, Value::Null).await;
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn publish_has_no_effect_without_subscribers() {
        let bus = EventBus::new();
        bus.publish("nothing.subscribed", false, Value::Null).await;
    }

    #[tokio::test]
    async fn unsubscribe_reports_whether_a_handler_was_removed() {
        let bus = EventBus::new();
        let handler = handler_fn(|_| async { Ok(()) });
        bus.subscribe("test.event", 0, handler.clone());
        assert!(bus.unsubscribe("test.event", |h| Arc::ptr_eq(h, &handler)));
        assert!(!bus.unsubscribe("test.event", |h| Arc::ptr_eq(h, &handler)));
    }
}
