//! Topic-based time-to-live policy.

use std::collections::HashMap;
use std::time::Duration;

use super::config::TtlConfig;

/// Maps a topic to the lifetime of entries written under it.
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    default_ttl: Duration,
    max_age: Duration,
    topics: HashMap<String, Duration>,
}

impl TtlPolicy {
    pub fn new(config: &TtlConfig) -> Self {
        let topics = config
            .topics
            .iter()
            .map(|(topic, ttl)| (topic.trim().to_lowercase(), *ttl))
            .collect();

        Self {
            default_ttl: config.default_ttl,
            max_age: config.max_age,
            topics,
        }
    }

    /// TTL for `topic` (case-insensitive), never longer than the max age.
    pub fn ttl_for(&self, topic: &str) -> Duration {
        let ttl = self
            .topics
            .get(topic.trim().to_lowercase().as_str())
            .copied()
            .unwrap_or(self.default_ttl);
        ttl.min(self.max_age)
    }
}
