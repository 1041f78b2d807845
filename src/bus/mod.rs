//! Cross-process invalidation bus.
//!
//! Every node publishes `{operation, key, metadata}` after a mutation and
//! every node, the publisher included, applies what it receives to its own L1.
//! Delivery is at-least-once and unordered across publishers.

mod local;
mod mongo;

pub use local::LocalBus;
pub use mongo::MongoBus;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::StoreResult;
use crate::paste::{now_ms, PasteMeta};

/// Receiver buffer for subscribers. A subscriber that falls further behind
/// loses the oldest messages and is told how many it skipped.
pub const BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationMessage {
    pub operation: Operation,
    pub key: String,
    /// New projection for updates, tombstone for soft deletes, `None` when a
    /// reservation was rolled back.
    #[serde(default)]
    pub metadata: Option<PasteMeta>,
    /// Publishing node.
    pub origin: String,
    /// Publish time (ms).
    pub sent_at: i64,
}

impl InvalidationMessage {
    pub fn update(origin: &str, key: &str, metadata: PasteMeta) -> Self {
        Self::new(Operation::Update, origin, key, Some(metadata))
    }

    pub fn delete(origin: &str, key: &str, metadata: Option<PasteMeta>) -> Self {
        Self::new(Operation::Delete, origin, key, metadata)
    }

    fn new(operation: Operation, origin: &str, key: &str, metadata: Option<PasteMeta>) -> Self {
        Self {
            operation,
            key: key.to_string(),
            metadata,
            origin: origin.to_string(),
            sent_at: now_ms(),
        }
    }
}

#[async_trait]
pub trait InvalidationBus: Send + Sync {
    async fn publish(&self, message: &InvalidationMessage) -> StoreResult<()>;

    /// New receiver seeing every message published from now on.
    fn subscribe(&self) -> broadcast::Receiver<InvalidationMessage>;

    fn backend_name(&self) -> &'static str;
}
