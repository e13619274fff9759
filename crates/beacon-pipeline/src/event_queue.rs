//! Event queue: registration, scheduled flushing, and the three-phase
//! delivery pipeline.
//!
//! One context at a time: before plugins run sequentially and must succeed,
//! enrichment plugins run sequentially best-effort, the event seals, and
//! destinations fan out concurrently. A retryable failure re-enters the
//! retry queue with backoff; attempts past the cap drop permanently, visible
//! only through stats and logs.

use crate::deliver::{attempt, ensure, AttemptOutcome, EnsureOutcome};
use crate::error::{PipelineError, PipelineResult};
use crate::plugin::{PipelineHandle, Plugin, Stage};
use beacon_core::{Cancellation, Context, LogLevel, PipelineConfig};
use beacon_queue::{FlushScheduler, RetryQueue};
use beacon_store::Store;
use futures_util::future::join_all;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::{debug, warn};

/// Outcome of one pipeline pass over one context.
enum PassOutcome {
    Delivered(Context),
    /// Cancelled with retry allowed; re-enters the queue if attempts permit.
    Retryable(Context),
    /// Cancelled for good; resolves as failed delivery.
    Fatal(Context),
}

/// Scheduler handle injected into the retry queue.
///
/// Holds only a weak reference, set after construction, so the queue never
/// owns a path back into the event queue that owns it.
#[derive(Default)]
struct QueueScheduler {
    target: StdMutex<Option<Weak<Inner>>>,
}

impl QueueScheduler {
    fn set_target(&self, target: Weak<Inner>) {
        *self.target.lock().expect("lock poisoned") = Some(target);
    }
}

impl FlushScheduler for QueueScheduler {
    fn request_flush(&self) {
        let target = self.target.lock().expect("lock poisoned").clone();
        if let Some(inner) = target.and_then(|weak| weak.upgrade()) {
            EventQueue { inner }.schedule_flush();
        }
    }
}

struct Inner {
    config: PipelineConfig,
    queue: RetryQueue,
    /// Registered plugins in registration order.
    plugins: RwLock<Vec<Arc<dyn Plugin>>>,
    /// Guard: at most one flush loop in flight.
    flushing: AtomicBool,
    online: AtomicBool,
    /// Dispatch futures waiting on a context, by context id.
    waiters: Mutex<HashMap<String, oneshot::Sender<Context>>>,
}

/// Orchestrates plugin registration and staged event delivery.
///
/// Cheap to clone; clones share the same queue and plugin registry.
#[derive(Clone)]
pub struct EventQueue {
    inner: Arc<Inner>,
}

impl EventQueue {
    /// Event queue over an unpersisted retry queue.
    pub fn new(config: PipelineConfig) -> Self {
        Self::build(config, None)
    }

    /// Event queue whose retry queue mirrors to `store`, rehydrating any
    /// items a previous process left behind.
    pub fn with_store(config: PipelineConfig, store: Arc<dyn Store>) -> Self {
        Self::build(config, Some(store))
    }

    fn build(config: PipelineConfig, store: Option<Arc<dyn Store>>) -> Self {
        let scheduler = Arc::new(QueueScheduler::default());
        let queue = match store {
            Some(store) => RetryQueue::persisted(
                config.max_attempts,
                config.backoff_base,
                config.backoff_max,
                store,
                &config.queue_name,
            ),
            None => RetryQueue::new(config.max_attempts, config.backoff_base, config.backoff_max),
        }
        .with_scheduler(scheduler.clone());

        let inner = Arc::new(Inner {
            config,
            queue,
            plugins: RwLock::new(Vec::new()),
            flushing: AtomicBool::new(false),
            online: AtomicBool::new(true),
            waiters: Mutex::new(HashMap::new()),
        });
        scheduler.set_target(Arc::downgrade(&inner));
        Self { inner }
    }

    /// Register a plugin and invoke its `load`.
    ///
    /// A non-critical destination that fails to load is warned about and
    /// excluded from dispatch; any other load failure propagates.
    pub async fn register(
        &self,
        plugin: Arc<dyn Plugin>,
        ctx: Context,
        handle: PipelineHandle,
    ) -> PipelineResult<()> {
        let meta = plugin.metadata();
        match plugin.load(ctx, handle).await {
            Ok(_) => {
                self.inner.plugins.write().await.push(plugin);
                debug!(plugin = %meta.name, stage = meta.stage.as_str(), "Registered plugin");
                Ok(())
            }
            Err(e) if meta.stage == Stage::Destination && !meta.critical => {
                warn!(
                    plugin = %meta.name,
                    error = %e,
                    "Destination failed to load, excluded from dispatch"
                );
                Ok(())
            }
            Err(e) => Err(PipelineError::PluginLoad {
                plugin: meta.name,
                message: e.to_string(),
            }),
        }
    }

    /// Remove a plugin by name, invoking `unload` if present.
    pub async fn deregister(&self, name: &str) -> PipelineResult<()> {
        let plugin = {
            let mut plugins = self.inner.plugins.write().await;
            let position = plugins
                .iter()
                .position(|plugin| plugin.metadata().name == name)
                .ok_or_else(|| PipelineError::UnknownPlugin(name.to_string()))?;
            plugins.remove(position)
        };

        if let Err(e) = plugin.unload().await {
            warn!(plugin = %name, error = %e, "Plugin unload failed");
        }
        debug!(plugin = %name, "Deregistered plugin");
        Ok(())
    }

    /// Enqueue a context and resolve once it finishes processing.
    ///
    /// The returned context is the backpressure signal: delivered or
    /// permanently dropped, this resolves either way. Delivery failures
    /// never surface as errors here.
    pub async fn dispatch(&self, ctx: Context) -> Context {
        let fallback = ctx.clone();
        let receiver = self.subscribe(&ctx).await;

        let fast_path = self.inner.online.load(Ordering::SeqCst)
            && !self.inner.flushing.load(Ordering::SeqCst)
            && self.inner.queue.is_empty().await;
        if fast_path {
            self.dispatch_single(ctx).await;
        } else {
            self.inner.queue.push(ctx).await;
            self.schedule_flush();
        }

        match receiver.await {
            Ok(resolved) => resolved,
            Err(_) => fallback,
        }
    }

    /// Fast path: run the pipeline immediately, with the same attempt
    /// accounting and retry behavior as the queued path.
    pub async fn dispatch_single(&self, ctx: Context) {
        self.inner.queue.push(ctx).await;
        let Some(ctx) = self.inner.queue.pop().await else {
            return;
        };
        let outcome = self.run_pipeline(ctx).await;
        self.settle(outcome).await;
    }

    /// Drain the queue once, while readiness holds. Returns the contexts
    /// delivered during this pass.
    pub async fn flush(&self) -> Vec<Context> {
        let mut delivered = Vec::new();
        while self.inner.online.load(Ordering::SeqCst) {
            let Some(ctx) = self.inner.queue.pop().await else {
                break;
            };
            let outcome = self.run_pipeline(ctx).await;
            if let Some(ctx) = self.settle(outcome).await {
                delivered.push(ctx);
            }
        }
        delivered
    }

    /// Start the flush loop unless one is already running.
    ///
    /// The loop drains a batch, sleeps the flush interval, and repeats while
    /// work remains; backoff re-insertions restart it through the scheduler
    /// handle.
    pub fn schedule_flush(&self) {
        if self.inner.flushing.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                this.flush().await;
                if !this.inner.online.load(Ordering::SeqCst)
                    || this.inner.queue.is_empty().await
                {
                    break;
                }
                tokio::time::sleep(this.inner.config.flush_interval).await;
            }
            this.inner.flushing.store(false, Ordering::SeqCst);

            // An item may have arrived between the last drain and the guard
            // release.
            if this.inner.online.load(Ordering::SeqCst) && !this.inner.queue.is_empty().await {
                this.schedule_flush();
            }
        });
    }

    /// Start a flush loop if rehydrated or buffered work is waiting.
    pub async fn schedule_flush_if_pending(&self) {
        if !self.inner.queue.is_empty().await {
            self.schedule_flush();
        }
    }

    /// Connectivity gate. While offline the queue accumulates; going online
    /// resumes flushing.
    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::SeqCst);
        if online {
            self.schedule_flush();
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Items currently awaiting delivery.
    pub async fn pending(&self) -> usize {
        self.inner.queue.len().await
    }

    /// Attempt count recorded for this context's id.
    pub async fn attempts(&self, ctx: &Context) -> u32 {
        self.inner.queue.attempts(ctx).await
    }

    async fn subscribe(&self, ctx: &Context) -> oneshot::Receiver<Context> {
        let (sender, receiver) = oneshot::channel();
        self.inner
            .waiters
            .lock()
            .await
            .insert(ctx.id().as_str().to_string(), sender);
        receiver
    }

    async fn resolve(&self, mut ctx: Context) -> Context {
        ctx.flush_logs();
        if let Some(sender) = self
            .inner
            .waiters
            .lock()
            .await
            .remove(ctx.id().as_str())
        {
            let _ = sender.send(ctx.clone());
        }
        ctx
    }

    /// One pass: before, enrichment, seal, destinations, after.
    async fn run_pipeline(&self, mut ctx: Context) -> PassOutcome {
        for plugin in self.plugins_by_stage(Stage::Before).await {
            match ensure(ctx, &plugin).await {
                EnsureOutcome::Continue(next) => ctx = next,
                EnsureOutcome::Cancelled(cancelled) => return Self::classify(cancelled),
            }
            if ctx.is_cancelled() {
                return Self::classify(ctx);
            }
        }

        let mut enrichment_failed = false;
        for plugin in self.plugins_by_stage(Stage::Enrichment).await {
            match attempt(ctx, &plugin).await {
                AttemptOutcome::Ok(next) => ctx = next,
                AttemptOutcome::Failed {
                    ctx: last_good, ..
                } => {
                    enrichment_failed = true;
                    ctx = last_good;
                }
            }
        }
        // Cancellation is cooperative: checked between stages
        if ctx.is_cancelled() {
            return Self::classify(ctx);
        }
        if enrichment_failed {
            ctx.cancel(Cancellation::new("enrichment plugin failed", true));
            return PassOutcome::Retryable(ctx);
        }

        ctx.seal();

        let destinations: Vec<Arc<dyn Plugin>> = self
            .plugins_by_stage(Stage::Destination)
            .await
            .into_iter()
            .filter(|plugin| ctx.event().integration_enabled(&plugin.metadata().name))
            .collect();
        let results = join_all(
            destinations
                .iter()
                .map(|plugin| attempt(ctx.clone(), plugin)),
        )
        .await;
        for (plugin, result) in destinations.iter().zip(results) {
            if let AttemptOutcome::Failed { error, .. } = result {
                let name = plugin.metadata().name;
                let tag = format!("plugin:{name}");
                ctx.stats_mut().increment("delivery_failed", 1.0, &[&tag]);
                ctx.log(
                    LogLevel::Warn,
                    "destination failed",
                    Some(json!({ "destination": name, "error": error.to_string() })),
                );
            }
        }

        for plugin in self.plugins_by_stage(Stage::After).await {
            let after_ctx = ctx.clone();
            let plugin = plugin.clone();
            tokio::spawn(async move {
                attempt(after_ctx, &plugin).await;
            });
        }

        ctx.stats_mut().increment("message_delivered", 1.0, &[]);
        PassOutcome::Delivered(ctx)
    }

    async fn settle(&self, outcome: PassOutcome) -> Option<Context> {
        match outcome {
            PassOutcome::Delivered(ctx) => Some(self.resolve(ctx).await),
            PassOutcome::Retryable(mut ctx) => {
                let attempts = self.inner.queue.attempts(&ctx).await;
                if attempts <= self.inner.config.max_attempts
                    && self.inner.queue.push_with_backoff(ctx.clone()).await
                {
                    debug!(context_id = %ctx.id(), attempts, "Re-queued for retry");
                    None
                } else {
                    ctx.stats_mut().increment("delivery_dropped", 1.0, &[]);
                    let reason = ctx
                        .cancellation()
                        .map(|c| c.reason().to_string())
                        .unwrap_or_else(|| "retry limit exceeded".to_string());
                    ctx.set_failed_delivery(reason);
                    self.resolve(ctx).await;
                    None
                }
            }
            PassOutcome::Fatal(mut ctx) => {
                let reason = ctx
                    .cancellation()
                    .map(|c| c.reason().to_string())
                    .unwrap_or_else(|| "cancelled".to_string());
                ctx.set_failed_delivery(reason);
                self.resolve(ctx).await;
                None
            }
        }
    }

    fn classify(ctx: Context) -> PassOutcome {
        match ctx.cancellation() {
            Some(cancellation) if cancellation.retryable() => PassOutcome::Retryable(ctx),
            _ => PassOutcome::Fatal(ctx),
        }
    }

    async fn plugins_by_stage(&self, stage: Stage) -> Vec<Arc<dyn Plugin>> {
        self.inner
            .plugins
            .read()
            .await
            .iter()
            .filter(|plugin| plugin.metadata().stage == stage && plugin.is_loaded())
            .cloned()
            .collect()
    }
}
