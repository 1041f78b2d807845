//! Process-local cache (L1) on Moka.

use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::Expiry;
use moka::sync::Cache;

use super::CacheConfig;
use crate::paste::{Paste, PasteMeta};

/// What L1 can hold for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum L1Entry {
    /// Full record, content included.
    Full(Arc<Paste>),
    /// Permission-only projection; content must be hydrated from the store.
    Meta(PasteMeta),
    /// Key confirmed absent.
    Missing,
}

impl L1Entry {
    pub fn full(paste: Paste) -> Self {
        Self::Full(Arc::new(paste))
    }

    /// Projection of whatever is held, if anything.
    pub fn meta(&self) -> Option<PasteMeta> {
        match self {
            Self::Full(paste) => Some(paste.meta()),
            Self::Meta(meta) => Some(meta.clone()),
            Self::Missing => None,
        }
    }
}

/// Per-variant lifetimes: negative markers expire faster than real entries.
struct EntryExpiry {
    ttl: Duration,
    negative_ttl: Duration,
}

impl EntryExpiry {
    fn lifetime(&self, entry: &L1Entry) -> Duration {
        match entry {
            L1Entry::Missing => self.negative_ttl,
            L1Entry::Full(_) | L1Entry::Meta(_) => self.ttl,
        }
    }
}

impl Expiry<String, L1Entry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &L1Entry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(self.lifetime(value))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &L1Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(self.lifetime(value))
    }
}

/// L1 cache keyed by paste key.
///
/// Cloning is cheap and shares the same underlying cache. All operations are
/// synchronous; last writer wins.
#[derive(Clone)]
pub struct LocalCache {
    inner: Cache<String, L1Entry>,
}

impl LocalCache {
    pub fn new(config: &CacheConfig) -> Self {
        let inner = Cache::builder()
            .max_capacity(config.max_capacity)
            .expire_after(EntryExpiry {
                ttl: config.ttl,
                negative_ttl: config.negative_ttl,
            })
            .build();

        Self { inner }
    }

    pub fn get(&self, key: &str) -> Option<L1Entry> {
        self.inner.get(key)
    }

    pub fn insert(&self, key: impl Into<String>, entry: L1Entry) {
        self.inner.insert(key.into(), entry);
    }

    pub fn invalidate(&self, key: &str) {
        self.inner.invalidate(key);
    }

    /// Get the number of entries in the cache.
    ///
    /// Note: This may not be perfectly accurate due to concurrent operations.
    pub fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }
}

impl std::fmt::Debug for LocalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCache")
            .field("entry_count", &self.inner.entry_count())
            .finish()
    }
}
