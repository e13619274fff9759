//! Event delivery pipeline.
//!
//! This crate wires the core pieces together:
//! - [`Plugin`]: the staged hook contract (before, enrichment, destination,
//!   utility, after)
//! - [`attempt`] / [`ensure`]: timed, error-containing hook invocation
//! - [`EventQueue`]: registration, scheduled flushing, and the three-phase
//!   pipeline with retry re-entry
//! - [`Destination`]: per-sink buffering, middleware, and routing rules
//! - [`Beacon`]: the public track/page/identify/group/alias/screen surface

mod api;
mod deliver;
mod destination;
mod error;
mod event_queue;
mod plugin;

pub use api::{Beacon, EventOptions};
pub use deliver::{attempt, ensure, AttemptOutcome, EnsureOutcome};
pub use destination::{Destination, DestinationBuilder, DestinationSink, SinkError};
pub use error::{PipelineError, PipelineResult};
pub use event_queue::EventQueue;
pub use plugin::{HookResult, PipelineHandle, Plugin, PluginError, PluginMetadata, Stage};

// Re-exported so embedders depend on one crate
pub use beacon_core::{
    Cancellation, Context, ContextId, Event, EventType, LogLevel, PipelineConfig,
};
