//! Attempt-ordered retry queue for in-flight contexts.
//!
//! This crate provides:
//! - RetryQueue: fairness-ordered queue with per-id attempt accounting and
//!   silent drop past the attempt cap
//! - Backoff re-insertion on a spawned timer, with an injected scheduler
//!   handle to wake the owning flush loop
//! - An optional persistence mirror so in-flight items survive a restart

mod backoff;
mod persist;
mod queue;

pub use backoff::compute_backoff;
pub use persist::{queue_key, PersistedItem};
pub use queue::{FlushScheduler, NoopScheduler, RetryQueue};
