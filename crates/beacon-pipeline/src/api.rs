//! Public dispatch surface.
//!
//! A [`Beacon`] is an explicit instance handle: it owns its event queue and
//! plugin registry, and everything a plugin needs reaches it through the
//! [`PipelineHandle`] passed at load. There is no process-wide singleton.

use crate::error::{PipelineError, PipelineResult};
use crate::event_queue::EventQueue;
use crate::plugin::{PipelineHandle, Plugin};
use beacon_core::{Context, Event, LogLevel, PipelineConfig};
use beacon_store::Store;
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Per-call options applied to the event before dispatch.
///
/// The callback is a boundary adapter: it observes the resolved context
/// after the dispatch future settles and has no effect on delivery.
#[derive(Default)]
pub struct EventOptions {
    pub user_id: Option<String>,
    pub anonymous_id: Option<String>,
    /// Merged into the event's per-destination enable/disable map.
    pub integrations: Map<String, Value>,
    /// Merged into the event's context bag.
    pub context: Map<String, Value>,
    pub callback: Option<Box<dyn FnOnce(&Context) + Send>>,
}

impl EventOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn anonymous_id(mut self, anonymous_id: impl Into<String>) -> Self {
        self.anonymous_id = Some(anonymous_id.into());
        self
    }

    pub fn integration(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.integrations.insert(name.into(), Value::Bool(enabled));
        self
    }

    pub fn callback(mut self, callback: impl FnOnce(&Context) + Send + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }
}

/// One pipeline instance.
///
/// Public calls resolve `Ok` even when delivery fails internally; the
/// returned context carries the failure in its stats, logs, and
/// `failed_delivery` slot. The only rejection path is argument validation.
pub struct Beacon {
    queue: EventQueue,
    config: PipelineConfig,
    instance_id: String,
}

impl Beacon {
    /// Instance over an unpersisted retry queue.
    pub fn new(config: PipelineConfig) -> Self {
        let queue = EventQueue::new(config.clone());
        Self {
            queue,
            config,
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Instance whose retry queue mirrors to `store`, picking up items a
    /// previous process left behind. Rehydrated items start flushing after
    /// the first successful `register`.
    pub fn with_store(config: PipelineConfig, store: Arc<dyn Store>) -> Self {
        let queue = EventQueue::with_store(config.clone(), store);
        Self {
            queue,
            config,
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// The underlying event queue, for embedders that drive flushing
    /// directly.
    pub fn event_queue(&self) -> &EventQueue {
        &self.queue
    }

    /// Register plugins in order. Returns the system context used for
    /// loading.
    pub async fn register(&self, plugins: Vec<Arc<dyn Plugin>>) -> PipelineResult<Context> {
        let mut ctx = Context::system();
        for plugin in plugins {
            let name = plugin.metadata().name;
            self.queue
                .register(plugin, ctx.clone(), self.handle())
                .await?;
            ctx.log(
                LogLevel::Debug,
                format!("registered plugin {name}"),
                None,
            );
        }
        self.queue.schedule_flush_if_pending().await;
        Ok(ctx)
    }

    /// Remove a plugin by name, invoking `unload` if present.
    pub async fn deregister(&self, name: &str) -> PipelineResult<Context> {
        self.queue.deregister(name).await?;
        let mut ctx = Context::system();
        ctx.log(
            LogLevel::Debug,
            format!("deregistered plugin {name}"),
            None,
        );
        Ok(ctx)
    }

    /// Record an action the user performed.
    pub async fn track(
        &self,
        name: &str,
        properties: Map<String, Value>,
        options: EventOptions,
    ) -> PipelineResult<Context> {
        if name.trim().is_empty() {
            return Err(PipelineError::Validation(
                "track requires a non-empty event name".to_string(),
            ));
        }
        self.dispatch(Event::track(name, properties), options).await
    }

    /// Record a page view.
    pub async fn page(
        &self,
        category: Option<String>,
        name: Option<String>,
        properties: Map<String, Value>,
        options: EventOptions,
    ) -> PipelineResult<Context> {
        self.dispatch(Event::page(category, name, properties), options)
            .await
    }

    /// Record a screen view.
    pub async fn screen(
        &self,
        name: Option<String>,
        properties: Map<String, Value>,
        options: EventOptions,
    ) -> PipelineResult<Context> {
        self.dispatch(Event::screen(name, properties), options).await
    }

    /// Associate traits with a user.
    pub async fn identify(
        &self,
        user_id: Option<String>,
        traits: Map<String, Value>,
        options: EventOptions,
    ) -> PipelineResult<Context> {
        let has_identity = user_id.is_some()
            || options.user_id.is_some()
            || options.anonymous_id.is_some();
        if !has_identity {
            return Err(PipelineError::Validation(
                "identify requires a user id or anonymous id".to_string(),
            ));
        }
        self.dispatch(Event::identify(user_id, traits), options).await
    }

    /// Associate the user with a group.
    pub async fn group(
        &self,
        group_id: &str,
        traits: Map<String, Value>,
        options: EventOptions,
    ) -> PipelineResult<Context> {
        if group_id.trim().is_empty() {
            return Err(PipelineError::Validation(
                "group requires a non-empty group id".to_string(),
            ));
        }
        self.dispatch(Event::group(group_id, traits), options).await
    }

    /// Link a new user id to a previous identity.
    pub async fn alias(
        &self,
        user_id: &str,
        previous_id: &str,
        options: EventOptions,
    ) -> PipelineResult<Context> {
        if user_id.trim().is_empty() || previous_id.trim().is_empty() {
            return Err(PipelineError::Validation(
                "alias requires a user id and a previous id".to_string(),
            ));
        }
        self.dispatch(Event::alias(user_id, previous_id), options).await
    }

    /// Connectivity gate, forwarded to the event queue.
    pub fn set_online(&self, online: bool) {
        self.queue.set_online(online);
    }

    /// Drain the queue once, returning the contexts delivered.
    pub async fn flush(&self) -> Vec<Context> {
        self.queue.flush().await
    }

    fn handle(&self) -> PipelineHandle {
        PipelineHandle::new(self.instance_id.clone(), self.config.clone())
    }

    async fn dispatch(&self, mut event: Event, options: EventOptions) -> PipelineResult<Context> {
        let EventOptions {
            user_id,
            anonymous_id,
            integrations,
            context,
            callback,
        } = options;

        if user_id.is_some() {
            event.user_id = user_id;
        }
        if anonymous_id.is_some() {
            event.anonymous_id = anonymous_id;
        }
        event.integrations.extend(integrations);
        event.context.extend(context);

        let ctx = Context::new(event);
        let resolved = self.queue.dispatch(ctx).await;
        if let Some(callback) = callback {
            callback(&resolved);
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::{Destination, DestinationSink, SinkError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct CountingSink {
        sent: AtomicUsize,
    }

    impl CountingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl DestinationSink for CountingSink {
        async fn send(&self, _event: &Event) -> Result<(), SinkError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn beacon() -> Beacon {
        Beacon::new(PipelineConfig {
            flush_interval: std::time::Duration::from_millis(10),
            backoff_base: std::time::Duration::from_millis(5),
            backoff_max: std::time::Duration::from_millis(50),
            ..PipelineConfig::default()
        })
    }

    #[tokio::test]
    async fn track_rejects_empty_names() {
        let beacon = beacon();
        let result = beacon.track("", Map::new(), EventOptions::new()).await;
        assert!(matches!(result, Err(PipelineError::Validation(_))));

        let result = beacon.track("  ", Map::new(), EventOptions::new()).await;
        assert!(matches!(result, Err(PipelineError::Validation(_))));
    }

    #[tokio::test]
    async fn identify_requires_some_identity() {
        let beacon = beacon();
        let result = beacon
            .identify(None, Map::new(), EventOptions::new())
            .await;
        assert!(matches!(result, Err(PipelineError::Validation(_))));

        // An anonymous id from options is identity enough
        let result = beacon
            .identify(None, Map::new(), EventOptions::new().anonymous_id("anon-1"))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn alias_requires_both_ids() {
        let beacon = beacon();
        assert!(matches!(
            beacon.alias("u1", "", EventOptions::new()).await,
            Err(PipelineError::Validation(_))
        ));
        assert!(matches!(
            beacon.alias("", "old", EventOptions::new()).await,
            Err(PipelineError::Validation(_))
        ));
        assert!(beacon.alias("u1", "old", EventOptions::new()).await.is_ok());
    }

    #[tokio::test]
    async fn group_requires_a_group_id() {
        let beacon = beacon();
        assert!(matches!(
            beacon.group("", Map::new(), EventOptions::new()).await,
            Err(PipelineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn options_shape_the_event() {
        let beacon = beacon();
        let mut properties = Map::new();
        properties.insert("plan".to_string(), json!("pro"));

        let ctx = beacon
            .track(
                "Upgraded",
                properties,
                EventOptions::new()
                    .user_id("u1")
                    .integration("Amplitude", false),
            )
            .await
            .unwrap();

        let event = ctx.event();
        assert_eq!(event.user_id.as_deref(), Some("u1"));
        assert_eq!(event.properties.get("plan"), Some(&json!("pro")));
        assert!(!event.integration_enabled("Amplitude"));
        assert!(event.integration_enabled("Mixpanel"));
    }

    #[tokio::test]
    async fn callback_observes_the_resolved_context() {
        let beacon = beacon();
        let sink = CountingSink::new();
        let destination = Destination::builder("amplitude", sink.clone()).build();
        beacon
            .register(vec![destination as Arc<dyn Plugin>])
            .await
            .unwrap();

        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        let ctx = beacon
            .track(
                "Foo",
                Map::new(),
                EventOptions::new().callback(move |resolved| {
                    *seen_clone.lock().unwrap() =
                        Some(resolved.stats().counter_total("message_delivered"));
                }),
            )
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), Some(1.0));
        assert!(ctx.is_sealed());
        assert_eq!(sink.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispatch_resolves_ok_even_when_no_destination_exists() {
        let beacon = beacon();
        let ctx = beacon
            .track("Foo", Map::new(), EventOptions::new())
            .await
            .unwrap();
        assert_eq!(ctx.stats().counter_total("message_delivered"), 1.0);
    }

    #[tokio::test]
    async fn register_returns_the_system_context() {
        let beacon = beacon();
        let sink = CountingSink::new();
        let destination = Destination::builder("amplitude", sink).build();

        let ctx = beacon
            .register(vec![destination as Arc<dyn Plugin>])
            .await
            .unwrap();
        assert_eq!(ctx.event().name.as_deref(), Some("system"));
        assert_eq!(ctx.logs().len(), 1);
    }

    #[tokio::test]
    async fn deregister_unknown_plugin_errors() {
        let beacon = beacon();
        assert!(matches!(
            beacon.deregister("ghost").await,
            Err(PipelineError::UnknownPlugin(_))
        ));
    }
}
