//! Per-context log buffer.
//!
//! Contexts accumulate log entries while they move through the pipeline and
//! drain them to `tracing` when they resolve, so one event's trail shows up
//! as a contiguous block in the log stream.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Log severity for context-local entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One buffered log entry.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    /// Structured extras attached to the entry.
    pub extras: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

/// Append-only log buffer owned by a context.
#[derive(Debug, Clone, Default)]
pub struct LogBuffer {
    entries: Vec<LogEntry>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Never fails and never filters.
    pub fn push(&mut self, level: LogLevel, message: impl Into<String>, extras: Option<Value>) {
        self.entries.push(LogEntry {
            level,
            message: message.into(),
            extras,
            timestamp: Utc::now(),
        });
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drain every buffered entry to `tracing`, tagged with the owning
    /// context id.
    pub fn flush(&mut self, context_id: &str) {
        for entry in self.entries.drain(..) {
            let extras = entry
                .extras
                .map(|value| value.to_string())
                .unwrap_or_default();
            match entry.level {
                LogLevel::Debug => {
                    tracing::debug!(context_id = %context_id, extras = %extras, "{}", entry.message)
                }
                LogLevel::Info => {
                    tracing::info!(context_id = %context_id, extras = %extras, "{}", entry.message)
                }
                LogLevel::Warn => {
                    tracing::warn!(context_id = %context_id, extras = %extras, "{}", entry.message)
                }
                LogLevel::Error => {
                    tracing::error!(context_id = %context_id, extras = %extras, "{}", entry.message)
                }
            }
        }
    }
}
