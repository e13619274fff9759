//! Per-context stats collector.

use chrono::{DateTime, Utc};

/// Metric flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
}

/// One recorded metric sample.
#[derive(Debug, Clone)]
pub struct Metric {
    pub kind: MetricKind,
    pub name: String,
    pub value: f64,
    /// `key:value` tags, e.g. `plugin:amplitude`.
    pub tags: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Counters and gauges collected while a context moves through the pipeline.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    metrics: Vec<Metric>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a counter increment.
    pub fn increment(&mut self, name: impl Into<String>, value: f64, tags: &[&str]) {
        self.record(MetricKind::Counter, name, value, tags);
    }

    /// Record a gauge sample.
    pub fn gauge(&mut self, name: impl Into<String>, value: f64, tags: &[&str]) {
        self.record(MetricKind::Gauge, name, value, tags);
    }

    fn record(&mut self, kind: MetricKind, name: impl Into<String>, value: f64, tags: &[&str]) {
        self.metrics.push(Metric {
            kind,
            name: name.into(),
            value,
            tags: tags.iter().map(|tag| tag.to_string()).collect(),
            timestamp: Utc::now(),
        });
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    /// Sum of all counter samples with the given name.
    pub fn counter_total(&self, name: &str) -> f64 {
        self.metrics
            .iter()
            .filter(|metric| metric.kind == MetricKind::Counter && metric.name == name)
            .map(|metric| metric.value)
            .sum()
    }

    /// All samples with the given name.
    pub fn samples(&self, name: &str) -> Vec<&Metric> {
        self.metrics
            .iter()
            .filter(|metric| metric.name == name)
            .collect()
    }
}
