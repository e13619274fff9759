//! Destination plugins.
//!
//! A destination wraps one downstream sink behind the plugin contract: it
//! shapes events through its routing rules and middleware chain, buffers
//! them in its own retry queue until the sink is ready, and retries
//! transient send failures with backoff. Nothing a destination does affects
//! sibling destinations or the dispatching caller.

use crate::plugin::{HookResult, PipelineHandle, Plugin, PluginError, PluginMetadata, Stage};
use async_trait::async_trait;
use beacon_core::{Context, Event, LogLevel};
use beacon_queue::{FlushScheduler, RetryQueue};
use beacon_routing::{ChainOutcome, DestinationMiddleware, MiddlewareChain, RuleOutcome, RuleSet};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Send failure reported by a sink.
#[derive(Error, Debug)]
pub enum SinkError {
    /// The sink rejected this event
    #[error("Send failed: {0}")]
    Failed(String),

    /// The sink cannot take events right now
    #[error("Destination unavailable: {0}")]
    Unavailable(String),
}

/// External send capability for one downstream vendor.
#[async_trait]
pub trait DestinationSink: Send + Sync {
    async fn send(&self, event: &Event) -> Result<(), SinkError>;
}

/// Scheduler handle injected into the destination's buffer queue.
///
/// Holds only a weak reference, set after construction, so the queue never
/// owns a path back into its destination.
#[derive(Default)]
struct BufferScheduler {
    target: Mutex<Option<Weak<Destination>>>,
}

impl BufferScheduler {
    fn set_target(&self, target: Weak<Destination>) {
        *self.target.lock().expect("lock poisoned") = Some(target);
    }
}

impl FlushScheduler for BufferScheduler {
    fn request_flush(&self) {
        let target = self.target.lock().expect("lock poisoned").clone();
        if let Some(destination) = target.and_then(|weak| weak.upgrade()) {
            tokio::spawn(async move {
                destination.flush_buffered().await;
            });
        }
    }
}

/// A destination-stage plugin owning its own buffer queue and shaping chain.
pub struct Destination {
    metadata: PluginMetadata,
    sink: Arc<dyn DestinationSink>,
    middleware: MiddlewareChain,
    rules: RuleSet,
    buffer: RetryQueue,
    backoff_base: Duration,
    loaded: AtomicBool,
    ready: AtomicBool,
    draining: AtomicBool,
    self_ref: Mutex<Weak<Destination>>,
}

impl Destination {
    pub fn builder(name: impl Into<String>, sink: Arc<dyn DestinationSink>) -> DestinationBuilder {
        DestinationBuilder {
            name: name.into(),
            version: "1.0.0".to_string(),
            critical: false,
            sink,
            middleware: MiddlewareChain::new(),
            rules: RuleSet::new(),
            max_attempts: 10,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
            starts_ready: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Number of contexts waiting in the buffer.
    pub async fn buffered(&self) -> usize {
        self.buffer.len().await
    }

    /// Mark the sink ready and drain anything buffered while it was not.
    pub async fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        self.flush_buffered().await;
    }

    /// Stop delivering; subsequent events buffer until `mark_ready`.
    pub fn mark_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    async fn handle(&self, mut ctx: Context) -> HookResult {
        let tag = format!("plugin:{}", self.name());
        if !self.ready.load(Ordering::SeqCst) {
            ctx.log(
                LogLevel::Debug,
                "destination not ready, buffering",
                Some(json!({ "destination": self.name() })),
            );
            ctx.stats_mut().increment("destination_buffered", 1.0, &[&tag]);
            self.buffer.push(ctx.clone()).await;
            return Ok(ctx);
        }
        self.deliver(ctx).await
    }

    /// Shape and send one context's event.
    ///
    /// Rule and middleware drops resolve `Ok`: a shaped-away event is not a
    /// failure. A sink error schedules a buffered retry and reports the
    /// failure so the caller's stats see it.
    async fn deliver(&self, mut ctx: Context) -> HookResult {
        let name = self.name().to_string();
        let tag = format!("plugin:{name}");

        let event = match self.rules.evaluate(&name, ctx.event().clone()) {
            RuleOutcome::Continue(event) => event,
            RuleOutcome::Dropped => {
                ctx.stats_mut().increment("routing_dropped", 1.0, &[&tag]);
                return Ok(ctx);
            }
        };

        let event = match self.middleware.apply(event) {
            ChainOutcome::Continue(event) => event,
            ChainOutcome::Dropped { link } => {
                ctx.log(
                    LogLevel::Debug,
                    "middleware dropped event",
                    Some(json!({ "destination": name, "link": link })),
                );
                ctx.stats_mut().increment("middleware_dropped", 1.0, &[&tag]);
                return Ok(ctx);
            }
            ChainOutcome::Stalled { link } => {
                warn!(destination = %name, link = %link, "Middleware stalled, delivery withheld");
                ctx.stats_mut().increment("middleware_stalled", 1.0, &[&tag]);
                return Ok(ctx);
            }
        };

        match self.sink.send(&event).await {
            Ok(()) => {
                ctx.stats_mut()
                    .increment("destination_delivered", 1.0, &[&tag]);
                Ok(ctx)
            }
            Err(e) => {
                warn!(destination = %name, error = %e, "Send failed, scheduling retry");
                if self.buffer.push_with_backoff(ctx.clone()).await {
                    // A first insert lands synchronously with no timer to
                    // wake the drain; later ones ping it themselves.
                    self.spawn_drain(self.backoff_base);
                } else {
                    ctx.stats_mut().increment("destination_dropped", 1.0, &[&tag]);
                }
                Err(PluginError::Message(format!("send to {name} failed: {e}")))
            }
        }
    }

    /// Drain the buffer while the sink stays ready.
    ///
    /// Stops at the first send failure; that context re-queued itself with
    /// backoff and draining again immediately would hammer a struggling
    /// sink.
    pub async fn flush_buffered(&self) {
        if self.draining.swap(true, Ordering::SeqCst) {
            return;
        }
        while self.ready.load(Ordering::SeqCst) {
            let Some(ctx) = self.buffer.pop().await else {
                break;
            };
            if self.deliver(ctx).await.is_err() {
                break;
            }
        }
        self.draining.store(false, Ordering::SeqCst);
    }

    fn spawn_drain(&self, delay: Duration) {
        let target = self.self_ref.lock().expect("lock poisoned").clone();
        if let Some(destination) = target.upgrade() {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                destination.flush_buffered().await;
            });
        }
    }
}

#[async_trait]
impl Plugin for Destination {
    fn metadata(&self) -> PluginMetadata {
        self.metadata.clone()
    }

    async fn load(&self, ctx: Context, _handle: PipelineHandle) -> Result<Context, PluginError> {
        self.loaded.store(true, Ordering::SeqCst);
        debug!(destination = %self.name(), "Destination loaded");
        Ok(ctx)
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    async fn ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn track(&self, ctx: Context) -> HookResult {
        self.handle(ctx).await
    }

    async fn page(&self, ctx: Context) -> HookResult {
        self.handle(ctx).await
    }

    async fn identify(&self, ctx: Context) -> HookResult {
        self.handle(ctx).await
    }

    async fn group(&self, ctx: Context) -> HookResult {
        self.handle(ctx).await
    }

    async fn alias(&self, ctx: Context) -> HookResult {
        self.handle(ctx).await
    }

    async fn screen(&self, ctx: Context) -> HookResult {
        self.handle(ctx).await
    }
}

/// Builder for [`Destination`].
pub struct DestinationBuilder {
    name: String,
    version: String,
    critical: bool,
    sink: Arc<dyn DestinationSink>,
    middleware: MiddlewareChain,
    rules: RuleSet,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
    starts_ready: bool,
}

impl DestinationBuilder {
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Propagate load failures instead of excluding the destination quietly.
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// Append a middleware link. Links run in insertion order.
    pub fn middleware(mut self, link: Arc<dyn DestinationMiddleware>) -> Self {
        self.middleware.push(link);
        self
    }

    /// Replace the routing rule set.
    pub fn rules(mut self, rules: RuleSet) -> Self {
        self.rules = rules;
        self
    }

    /// Tune the buffer's retry behavior.
    pub fn retry(mut self, max_attempts: u32, backoff_base: Duration, backoff_max: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.backoff_base = backoff_base;
        self.backoff_max = backoff_max;
        self
    }

    /// Start buffering until `mark_ready` is called.
    pub fn not_ready(mut self) -> Self {
        self.starts_ready = false;
        self
    }

    pub fn build(self) -> Arc<Destination> {
        let scheduler = Arc::new(BufferScheduler::default());
        let buffer = RetryQueue::new(self.max_attempts, self.backoff_base, self.backoff_max)
            .with_scheduler(scheduler.clone());

        let mut metadata = PluginMetadata::new(self.name, self.version, Stage::Destination);
        if self.critical {
            metadata = metadata.critical();
        }

        let destination = Arc::new(Destination {
            metadata,
            sink: self.sink,
            middleware: self.middleware,
            rules: self.rules,
            buffer,
            backoff_base: self.backoff_base,
            loaded: AtomicBool::new(false),
            ready: AtomicBool::new(self.starts_ready),
            draining: AtomicBool::new(false),
            self_ref: Mutex::new(Weak::new()),
        });

        scheduler.set_target(Arc::downgrade(&destination));
        *destination.self_ref.lock().expect("lock poisoned") = Arc::downgrade(&destination);
        destination
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::PipelineConfig;
    use beacon_routing::{Matcher, Next, RoutingRule};
    use serde_json::Map;
    use std::sync::atomic::AtomicUsize;

    struct RecordingSink {
        sent: Mutex<Vec<Event>>,
        fail_first: AtomicUsize,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                fail_first: AtomicUsize::new(0),
            })
        }

        fn failing_first(count: usize) -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                fail_first: AtomicUsize::new(count),
            })
        }

        fn sent_names(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter_map(|event| event.name.clone())
                .collect()
        }
    }

    #[async_trait]
    impl DestinationSink for RecordingSink {
        async fn send(&self, event: &Event) -> Result<(), SinkError> {
            let remaining = self.fail_first.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_first.store(remaining - 1, Ordering::SeqCst);
                return Err(SinkError::Unavailable("warming up".to_string()));
            }
            self.sent.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    fn track_ctx(name: &str) -> Context {
        Context::new(Event::track(name, Map::new()))
    }

    async fn loaded(destination: &Arc<Destination>) {
        let handle = PipelineHandle::new("test", PipelineConfig::default());
        destination
            .load(Context::system(), handle)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn ready_destination_sends_immediately() {
        let sink = RecordingSink::new();
        let destination = Destination::builder("amplitude", sink.clone()).build();
        loaded(&destination).await;

        let out = destination.track(track_ctx("Foo")).await.unwrap();
        assert_eq!(sink.sent_names(), vec!["Foo".to_string()]);
        assert_eq!(out.stats().counter_total("destination_delivered"), 1.0);
    }

    #[tokio::test]
    async fn not_ready_destination_buffers_until_marked() {
        let sink = RecordingSink::new();
        let destination = Destination::builder("amplitude", sink.clone())
            .not_ready()
            .build();
        loaded(&destination).await;
        assert!(!destination.ready().await);

        destination.track(track_ctx("One")).await.unwrap();
        destination.track(track_ctx("Two")).await.unwrap();
        assert_eq!(destination.buffered().await, 2);
        assert!(sink.sent_names().is_empty());

        destination.mark_ready().await;
        assert_eq!(destination.buffered().await, 0);
        assert_eq!(sink.sent_names(), vec!["One".to_string(), "Two".to_string()]);
    }

    #[tokio::test]
    async fn transient_send_failure_retries_with_backoff() {
        let sink = RecordingSink::failing_first(1);
        let destination = Destination::builder("amplitude", sink.clone())
            .retry(5, Duration::from_millis(5), Duration::from_millis(50))
            .build();
        loaded(&destination).await;

        // First delivery fails and schedules a buffered retry
        assert!(destination.track(track_ctx("Foo")).await.is_err());
        assert!(sink.sent_names().is_empty());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(sink.sent_names(), vec!["Foo".to_string()]);
        assert_eq!(destination.buffered().await, 0);
    }

    #[tokio::test]
    async fn routing_rules_drop_before_the_sink() {
        let sink = RecordingSink::new();
        let mut rules = RuleSet::new();
        rules.add_rule(
            "amplitude",
            RoutingRule::drop_when(Matcher::NameEquals("Secret".to_string())),
        );
        let destination = Destination::builder("amplitude", sink.clone())
            .rules(rules)
            .build();
        loaded(&destination).await;

        let out = destination.track(track_ctx("Secret")).await.unwrap();
        assert!(sink.sent_names().is_empty());
        assert_eq!(out.stats().counter_total("routing_dropped"), 1.0);

        destination.track(track_ctx("Public")).await.unwrap();
        assert_eq!(sink.sent_names(), vec!["Public".to_string()]);
    }

    #[tokio::test]
    async fn middleware_shapes_the_outgoing_event() {
        let sink = RecordingSink::new();
        let destination = Destination::builder("amplitude", sink.clone())
            .middleware(Arc::new(|mut event: Event, next: &mut Next| {
                event.set_property("shaped", serde_json::json!(true));
                next.deliver(event);
            }))
            .build();
        loaded(&destination).await;

        destination.track(track_ctx("Foo")).await.unwrap();
        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].properties.get("shaped"), Some(&serde_json::json!(true)));
    }

    #[tokio::test]
    async fn mark_not_ready_resumes_buffering() {
        let sink = RecordingSink::new();
        let destination = Destination::builder("amplitude", sink.clone()).build();
        loaded(&destination).await;

        destination.track(track_ctx("Before")).await.unwrap();
        destination.mark_not_ready();
        destination.track(track_ctx("During")).await.unwrap();

        assert_eq!(sink.sent_names(), vec!["Before".to_string()]);
        assert_eq!(destination.buffered().await, 1);

        destination.mark_ready().await;
        assert_eq!(
            sink.sent_names(),
            vec!["Before".to_string(), "During".to_string()]
        );
    }

    #[tokio::test]
    async fn stalled_middleware_withholds_delivery() {
        let sink = RecordingSink::new();
        let destination = Destination::builder("amplitude", sink.clone())
            .middleware(Arc::new(|_event: Event, _next: &mut Next| {}))
            .build();
        loaded(&destination).await;

        let out = destination.track(track_ctx("Foo")).await.unwrap();
        assert!(sink.sent_names().is_empty());
        assert_eq!(out.stats().counter_total("middleware_stalled"), 1.0);
    }
}
