//! Pipeline configuration.

use std::time::Duration;

/// Configuration for queue flushing and retry behavior.
///
/// # Fields
///
/// - `flush_interval`: spacing between flush batches (default: 500ms)
/// - `max_attempts`: push attempts per context before permanent drop
///   (default: 10)
/// - `backoff_base`: initial delay for backoff re-insertion (default: 500ms)
/// - `backoff_max`: cap on the backoff delay (default: 30s)
/// - `queue_name`: namespace for the persisted queue key (default: "main")
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Spacing between flush batches.
    pub flush_interval: Duration,
    /// Maximum push attempts per context. The first dispatch counts as
    /// attempt 1; a push past this cap is silently dropped.
    pub max_attempts: u32,
    /// Base delay for backoff re-insertion.
    pub backoff_base: Duration,
    /// Cap on the backoff delay.
    pub backoff_max: Duration,
    /// Namespace for the persisted queue key.
    pub queue_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(500),
            max_attempts: 10,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
            queue_name: "main".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.flush_interval, Duration::from_millis(500));
        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.backoff_base, Duration::from_millis(500));
        assert_eq!(config.backoff_max, Duration::from_secs(30));
        assert_eq!(config.queue_name, "main");
    }
}
