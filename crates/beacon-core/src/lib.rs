//! Core types for the Beacon event pipeline: events, contexts, and the
//! logging/stats collectors that ride along with every dispatch.

mod config;
mod context;
mod event;
mod logger;
mod logging;
mod stats;

pub use config::PipelineConfig;
pub use context::{Cancellation, Context, ContextId};
pub use event::{Event, EventType};
pub use logger::{LogBuffer, LogEntry, LogLevel};
pub use logging::init_logging;
pub use stats::{Metric, MetricKind, Stats};
