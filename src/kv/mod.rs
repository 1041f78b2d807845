//! Shared key-value tier (L2).
//!
//! Durable, low-latency and shared by every process. Holds either the
//! lightweight projection of a paste or a placeholder meaning "exists in the
//! durable store, not mirrored yet". Never holds content.

mod memory;
mod mongo;

pub use memory::MemoryKv;
pub use mongo::MongoKv;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::paste::PasteMeta;

/// Value stored under a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "meta", rename_all = "snake_case")]
pub enum KvValue {
    Meta(PasteMeta),
    Placeholder,
}

/// A value together with its version. Every write bumps the version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    pub value: KvValue,
    pub version: u64,
}

/// Precondition for [`KvStore::compare_and_swap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    /// The key must not exist.
    Absent,
    /// The key must exist at exactly this version.
    Version(u64),
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<KvEntry>>;

    /// Unconditional write.
    async fn set(&self, key: &str, value: &KvValue) -> StoreResult<()>;

    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Atomic write guarded by `expected`. Returns `false` when the
    /// precondition did not hold and nothing was written.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Expected,
        value: &KvValue,
    ) -> StoreResult<bool>;

    /// All entries whose key starts with `prefix`, ordered by key.
    async fn list(&self, prefix: &str) -> StoreResult<Vec<(String, KvEntry)>>;

    fn backend_name(&self) -> &'static str;
}
