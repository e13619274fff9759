//! Delivery context: the envelope that carries one event through the
//! pipeline.
//!
//! A context is created per public call, sealed after the enrichment phase,
//! and discarded once delivery resolves. Logs and stats append at any time;
//! the event itself is mutable only until `seal()`.

use crate::{Event, LogBuffer, LogLevel, Stats};
use serde_json::Value;
use uuid::Uuid;

/// Unique context identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextId(String);

impl ContextId {
    fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Explicit cancellation state, recorded at most once per context.
#[derive(Debug, Clone)]
pub struct Cancellation {
    reason: String,
    retryable: bool,
}

impl Cancellation {
    pub fn new(reason: impl Into<String>, retryable: bool) -> Self {
        Self {
            reason: reason.into(),
            retryable,
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn retryable(&self) -> bool {
        self.retryable
    }
}

/// Envelope around exactly one event.
///
/// Identity is the context id: two contexts are the same delivery iff their
/// ids match, regardless of event contents.
#[derive(Debug, Clone)]
pub struct Context {
    id: ContextId,
    event: Event,
    sealed: bool,
    cancellation: Option<Cancellation>,
    logs: LogBuffer,
    stats: Stats,
    attempts: u32,
    failed_delivery: Option<String>,
}

impl Context {
    /// Wrap an event in a fresh context.
    pub fn new(event: Event) -> Self {
        Self {
            id: ContextId::generate(),
            event,
            sealed: false,
            cancellation: None,
            logs: LogBuffer::new(),
            stats: Stats::new(),
            attempts: 0,
            failed_delivery: None,
        }
    }

    /// Context backing plugin registration and other internal operations.
    pub fn system() -> Self {
        Self::new(Event::system())
    }

    pub fn id(&self) -> &ContextId {
        &self.id
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Apply a mutation to the event.
    ///
    /// Once the context is sealed this is a logged no-op, never an error:
    /// late enrichment must not corrupt an event already fanned out to
    /// destinations.
    pub fn update_event(&mut self, apply: impl FnOnce(&mut Event)) {
        if self.sealed {
            self.logs.push(
                LogLevel::Debug,
                "update_event ignored on sealed context",
                None,
            );
            self.stats
                .increment("context_sealed_update_ignored", 1.0, &[]);
            return;
        }
        apply(&mut self.event);
    }

    /// Mark the event immutable. Idempotent, one-way.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Record cancellation. Only the first call transitions state; later
    /// calls are ignored.
    pub fn cancel(&mut self, cancellation: Cancellation) {
        if self.cancellation.is_none() {
            self.logs.push(
                LogLevel::Debug,
                format!("context cancelled: {}", cancellation.reason()),
                None,
            );
            self.cancellation = Some(cancellation);
        }
    }

    pub fn cancellation(&self) -> Option<&Cancellation> {
        self.cancellation.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_some()
    }

    /// Append a log entry. Unrestricted, sealed or not.
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>, extras: Option<Value>) {
        self.logs.push(level, message, extras);
    }

    pub fn logs(&self) -> &LogBuffer {
        &self.logs
    }

    /// Drain buffered logs to `tracing`.
    pub fn flush_logs(&mut self) {
        let id = self.id.as_str().to_string();
        self.logs.flush(&id);
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut Stats {
        &mut self.stats
    }

    /// Attempt count mirrored from the owning queue, for observability.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn set_attempts(&mut self, attempts: u32) {
        self.attempts = attempts;
    }

    /// Record terminal delivery failure. The dispatch future still resolves
    /// with this context.
    pub fn set_failed_delivery(&mut self, reason: impl Into<String>) {
        self.failed_delivery = Some(reason.into());
    }

    pub fn failed_delivery(&self) -> Option<&str> {
        self.failed_delivery.as_deref()
    }

    /// Same delivery iff ids match.
    pub fn is_same(&self, other: &Context) -> bool {
        self.id == other.id
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use serde_json::Map;

    fn track_context(name: &str) -> Context {
        Context::new(Event::track(name, Map::new()))
    }

    #[test]
    fn update_event_applies_while_unsealed() {
        let mut ctx = track_context("Foo");
        ctx.update_event(|event| event.set_property("plan", json!("pro")));
        assert_eq!(ctx.event().properties.get("plan"), Some(&json!("pro")));
    }

    #[test]
    fn seal_is_idempotent_and_freezes_the_event() {
        let mut ctx = track_context("Foo");
        ctx.seal();
        ctx.seal();
        assert!(ctx.is_sealed());

        ctx.update_event(|event| event.set_property("late", json!(true)));
        assert!(ctx.event().properties.get("late").is_none());

        // The no-op is observable, not silent
        assert_eq!(
            ctx.stats().counter_total("context_sealed_update_ignored"),
            1.0
        );
        assert_eq!(ctx.logs().len(), 1);
    }

    #[test]
    fn cancel_transitions_once() {
        let mut ctx = track_context("Foo");
        ctx.cancel(Cancellation::new("validation failed", false));
        ctx.cancel(Cancellation::new("second reason", true));

        let cancellation = ctx.cancellation().unwrap();
        assert_eq!(cancellation.reason(), "validation failed");
        assert!(!cancellation.retryable());
    }

    #[test]
    fn identity_is_the_context_id() {
        let a = track_context("Foo");
        let b = track_context("Foo");
        assert!(!a.is_same(&b));

        let copy = a.clone();
        assert!(a.is_same(&copy));
        assert_eq!(a, copy);
    }

    #[test]
    fn logs_and_stats_append_after_seal() {
        let mut ctx = track_context("Foo");
        ctx.seal();
        ctx.log(LogLevel::Warn, "late warning", None);
        ctx.stats_mut().increment("late_counter", 1.0, &[]);

        assert_eq!(ctx.logs().len(), 1);
        assert_eq!(ctx.stats().counter_total("late_counter"), 1.0);
    }
}
