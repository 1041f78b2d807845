//! Cache configuration.

use std::time::Duration;

/// Configuration for the process-local cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries in the cache.
    pub max_capacity: u64,

    /// Lifetime of full records and projections.
    pub ttl: Duration,

    /// Lifetime of negative markers.
    /// Kept short so keys created on other nodes become visible without a broadcast.
    pub negative_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            ttl: Duration::from_secs(300),         // 5 minutes
            negative_ttl: Duration::from_secs(30), // 30 seconds
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with the given max capacity.
    pub fn with_capacity(max_capacity: u64) -> Self {
        Self {
            max_capacity,
            ..Default::default()
        }
    }

    /// Set max capacity for cache (builder pattern).
    #[must_use]
    pub fn max_capacity(mut self, max_capacity: u64) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    /// Set time-to-live for records and projections.
    #[must_use]
    pub fn ttl(mut self, duration: Duration) -> Self {
        self.ttl = duration;
        self
    }

    /// Set time-to-live for negative markers.
    #[must_use]
    pub fn negative_ttl(mut self, duration: Duration) -> Self {
        self.negative_ttl = duration;
        self
    }
}
