//! Attempt-ordered retry queue.

use crate::backoff::compute_backoff;
use crate::persist::Persistence;
use beacon_core::Context;
use beacon_store::Store;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Handle the queue pings when a delayed re-insertion lands.
///
/// Injected by the owning event queue or destination so the backoff timer
/// can wake its flush loop without holding a reference back into it.
pub trait FlushScheduler: Send + Sync {
    fn request_flush(&self);
}

/// Scheduler that ignores every request. Default for standalone queues.
#[derive(Debug, Default)]
pub struct NoopScheduler;

impl FlushScheduler for NoopScheduler {
    fn request_flush(&self) {}
}

struct QueueState {
    /// Resident items, ascending by attempt count. Stable sort keeps
    /// insertion order among equal counts.
    items: Vec<Context>,
    /// Attempt counter per context id. Survives pop and permanent drop so
    /// attempt counts stay observable after an item leaves.
    seen: HashMap<String, u32>,
    /// Items scheduled for delayed re-insertion, by id. Counted by
    /// `includes` but not by `len`.
    future: HashMap<String, Context>,
}

impl QueueState {
    fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|ctx| ctx.id().as_str() == id)
    }

    fn insert_sorted(&mut self, ctx: Context) {
        self.items.push(ctx);
        self.items.sort_by_key(|ctx| ctx.attempts());
    }
}

/// Retry queue ordered by attempt count, fewest attempts first.
///
/// Every push increments the id's attempt counter; pushes past
/// `max_attempts`, and pushes of an id already resident or scheduled, are
/// dropped silently. With a store attached, contents are mirrored on every
/// accepted push and every pop, and rehydrated on construction.
#[derive(Clone)]
pub struct RetryQueue {
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
    state: Arc<Mutex<QueueState>>,
    persistence: Option<Persistence>,
    scheduler: Arc<dyn FlushScheduler>,
}

impl RetryQueue {
    /// Create an unpersisted queue.
    pub fn new(max_attempts: u32, backoff_base: Duration, backoff_max: Duration) -> Self {
        Self {
            max_attempts,
            backoff_base,
            backoff_max,
            state: Arc::new(Mutex::new(QueueState {
                items: Vec::new(),
                seen: HashMap::new(),
                future: HashMap::new(),
            })),
            persistence: None,
            scheduler: Arc::new(NoopScheduler),
        }
    }

    /// Create a queue mirrored to `store` under a key namespaced by `name`.
    ///
    /// Existing persisted records are rehydrated as resident items: fresh
    /// context ids, original events and attempt counts. Items past the
    /// attempt cap are discarded during rehydration.
    pub fn persisted(
        max_attempts: u32,
        backoff_base: Duration,
        backoff_max: Duration,
        store: Arc<dyn Store>,
        name: &str,
    ) -> Self {
        let persistence = Persistence::new(store, name);

        let mut items = Vec::new();
        let mut seen = HashMap::new();
        for record in persistence.load() {
            if record.attempts > max_attempts {
                continue;
            }
            let mut ctx = Context::new(record.event);
            ctx.set_attempts(record.attempts);
            seen.insert(ctx.id().as_str().to_string(), record.attempts);
            items.push(ctx);
        }
        items.sort_by_key(|ctx| ctx.attempts());

        if !items.is_empty() {
            debug!(queue = %name, count = items.len(), "Rehydrated persisted queue items");
        }

        Self {
            max_attempts,
            backoff_base,
            backoff_max,
            state: Arc::new(Mutex::new(QueueState {
                items,
                seen,
                future: HashMap::new(),
            })),
            persistence: Some(persistence),
            scheduler: Arc::new(NoopScheduler),
        }
    }

    /// Attach the scheduler handle pinged when delayed insertions land.
    pub fn with_scheduler(mut self, scheduler: Arc<dyn FlushScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Push a context. Returns whether it was accepted.
    pub async fn push(&self, ctx: Context) -> bool {
        let mut state = self.state.lock().await;
        let accepted = self.accept(&mut state, ctx);
        if accepted {
            self.mirror(&state);
        }
        accepted
    }

    /// Re-insert after a backoff delay instead of synchronously.
    ///
    /// The first push of an id delegates to [`push`](Self::push). Otherwise
    /// the attempt counter advances immediately, the cap and dedup checks
    /// apply, and the insertion itself lands after `backoff(attempts)` on a
    /// spawned timer; the scheduler handle is pinged when it does.
    pub async fn push_with_backoff(&self, mut ctx: Context) -> bool {
        let delay;
        {
            let mut state = self.state.lock().await;
            let id = ctx.id().as_str().to_string();
            let prior = state.seen.get(&id).copied().unwrap_or(0);
            if prior == 0 {
                let accepted = self.accept(&mut state, ctx);
                if accepted {
                    self.mirror(&state);
                }
                return accepted;
            }

            let attempts = prior + 1;
            state.seen.insert(id.clone(), attempts);
            if attempts > self.max_attempts
                || state.contains(&id)
                || state.future.contains_key(&id)
            {
                return false;
            }

            ctx.set_attempts(attempts);
            delay = compute_backoff(attempts, self.backoff_base, self.backoff_max);
            state.future.insert(id, ctx.clone());
            self.mirror(&state);
        }

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.land(ctx).await;
        });
        true
    }

    /// Remove and return the lowest-attempt item.
    pub async fn pop(&self) -> Option<Context> {
        let mut state = self.state.lock().await;
        if state.items.is_empty() {
            return None;
        }
        let ctx = state.items.remove(0);
        self.mirror(&state);
        Some(ctx)
    }

    /// Attempt count recorded for this context's id.
    pub async fn attempts(&self, ctx: &Context) -> u32 {
        let state = self.state.lock().await;
        state.seen.get(ctx.id().as_str()).copied().unwrap_or(0)
    }

    /// Whether this id is resident or scheduled for re-insertion.
    pub async fn includes(&self, ctx: &Context) -> bool {
        let state = self.state.lock().await;
        let id = ctx.id().as_str();
        state.contains(id) || state.future.contains_key(id)
    }

    /// Number of items awaiting delivery. Scheduled-but-not-landed items are
    /// excluded.
    pub async fn len(&self) -> usize {
        self.state.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.items.is_empty()
    }

    fn accept(&self, state: &mut QueueState, mut ctx: Context) -> bool {
        let id = ctx.id().as_str().to_string();
        let attempts = state.seen.get(&id).copied().unwrap_or(0) + 1;
        state.seen.insert(id.clone(), attempts);

        if attempts > self.max_attempts {
            debug!(context_id = %id, attempts, "Dropping push past attempt cap");
            return false;
        }
        if state.contains(&id) || state.future.contains_key(&id) {
            return false;
        }

        ctx.set_attempts(attempts);
        state.insert_sorted(ctx);
        true
    }

    async fn land(&self, ctx: Context) {
        {
            let mut state = self.state.lock().await;
            let id = ctx.id().as_str().to_string();
            if state.future.remove(&id).is_none() {
                // Landed after a competing push claimed the id; nothing to do.
                return;
            }
            state.insert_sorted(ctx);
            self.mirror(&state);
        }
        self.scheduler.request_flush();
    }

    fn mirror(&self, state: &QueueState) {
        if let Some(persistence) = &self.persistence {
            persistence.save(
                state
                    .items
                    .iter()
                    .chain(state.future.values())
                    .map(|ctx| (ctx.event(), ctx.attempts())),
            );
        }
    }
}
