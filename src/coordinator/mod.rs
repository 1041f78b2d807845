//! Tier coordinator.
//!
//! Fronts the durable store (L3) with the shared KV (L2) and a process-local
//! cache (L1). Reads fall through the tiers and memoize on the way back.
//! Writes reserve in L2, answer immediately, and persist to L3 from a
//! background queue; a failed persist is rolled back and broadcast so every
//! node converges on what the store actually holds.

mod queue;
mod read;
mod write;

#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::bus::{InvalidationBus, InvalidationMessage, Operation};
use crate::cache::{L1Entry, LocalCache};
use crate::config::Config;
use crate::database::PasteRepository;
use crate::error::{PasteError, StoreError};
use crate::kv::{Expected, KvStore, KvValue};
use crate::paste::{Page, PasteSummary};
use crate::retry::{RetryPolicy, RollbackPolicy};

use queue::{PersistJob, PersistQueue};

/// Handles to the shared tiers.
#[derive(Clone)]
pub struct Tiers {
    pub repo: Arc<dyn PasteRepository>,
    pub kv: Arc<dyn KvStore>,
    pub bus: Arc<dyn InvalidationBus>,
}

/// Answer to a successful create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Created {
    pub key: String,
    pub url: String,
}

/// Answer to a successful update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Updated {
    pub key: String,
    pub url: String,
}

/// Answer to a successful soft delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Deleted {
    pub key: String,
}

/// Cheap to clone; all clones share one L1, one queue and one listener.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    node_id: String,
    l1: LocalCache,
    kv: Arc<dyn KvStore>,
    repo: Arc<dyn PasteRepository>,
    bus: Arc<dyn InvalidationBus>,
    retry: RetryPolicy,
    rollback: RollbackPolicy,
    base_url: Url,
    key_length: usize,
    max_content_bytes: usize,
    queue: PersistQueue,
    listener: JoinHandle<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

impl Coordinator {
    /// Build a coordinator over `tiers` and start its persist worker and bus
    /// listener. Must be called inside a Tokio runtime.
    ///
    /// The listener is subscribed before this returns, so no message
    /// published afterwards is missed.
    pub fn new(tiers: Tiers, config: &Config) -> Self {
        let node_id = uuid::Uuid::new_v4().to_string();
        let events = tiers.bus.subscribe();

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| Inner {
            node_id,
            l1: LocalCache::new(&config.cache),
            kv: tiers.kv,
            repo: tiers.repo,
            bus: tiers.bus,
            retry: config.retry.clone(),
            rollback: config.rollback.clone(),
            base_url: config.base_url.clone(),
            key_length: config.key_length,
            max_content_bytes: config.max_content_bytes,
            queue: PersistQueue::start(weak.clone()),
            listener: spawn_listener(weak.clone(), events),
        });

        info!(
            node = %inner.node_id,
            store = inner.repo.backend_name(),
            kv = inner.kv.backend_name(),
            bus = inner.bus.backend_name(),
            "Coordinator started"
        );

        Self { inner }
    }

    /// Identifier stamped on every message this node publishes.
    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    /// This node's L1.
    pub fn local_cache(&self) -> &LocalCache {
        &self.inner.l1
    }

    /// Jobs queued or running.
    pub fn pending_jobs(&self) -> usize {
        self.inner.queue.pending()
    }

    /// Wait for every queued persist job, rollbacks included, to finish.
    pub async fn drain(&self) {
        self.inner.queue.drain().await;
    }

    /// Live pastes owned by `email`, newest first. Read straight from the
    /// store; listings are never cached.
    pub async fn list_owned(
        &self,
        email: &str,
        limit: u64,
        offset: u64,
    ) -> Result<Page<PasteSummary>, PasteError> {
        let inner = &self.inner;
        inner
            .retry
            .run("store list", || inner.repo.paginate_by_owner(email, limit, offset))
            .await
            .map_err(|e| unavailable("store list", email, e))
    }

    /// Live pastes of every owner, newest first.
    pub async fn list_alive(&self, limit: u64, offset: u64) -> Result<Page<PasteSummary>, PasteError> {
        let inner = &self.inner;
        inner
            .retry
            .run("store list", || inner.repo.list_alive(limit, offset))
            .await
            .map_err(|e| unavailable("store list", "*", e))
    }

    /// Put a placeholder in L2 for every stored key L2 does not know, so
    /// records written before L2 was attached are found by reads and
    /// guarded against re-creation. Returns how many were added.
    pub async fn mirror_store_keys(&self) -> Result<usize, PasteError> {
        let inner = &self.inner;
        let stored = inner
            .retry
            .run("store keys", || inner.repo.all_keys())
            .await
            .map_err(|e| unavailable("store keys", "*", e))?;

        let known: HashSet<String> = inner
            .kv
            .list("")
            .await
            .map_err(|e| unavailable("kv list", "*", e))?
            .into_iter()
            .map(|(key, _)| key)
            .collect();

        let mut seeded = 0;
        for key in stored.iter().filter(|key| !known.contains(*key)) {
            let added = inner
                .kv
                .compare_and_swap(key, Expected::Absent, &KvValue::Placeholder)
                .await
                .map_err(|e| unavailable("kv seed", key, e))?;
            if added {
                seeded += 1;
            }
        }

        info!(seeded, stored = stored.len(), "Store keys mirrored into L2");
        Ok(seeded)
    }

    /// Stored records, tombstones included.
    pub async fn count(&self) -> Result<u64, PasteError> {
        let inner = &self.inner;
        inner
            .retry
            .run("store count", || inner.repo.count())
            .await
            .map_err(|e| unavailable("store count", "*", e))
    }
}

impl Inner {
    fn url_for(&self, key: &str) -> Result<String, PasteError> {
        self.base_url
            .join(key)
            .map(String::from)
            .map_err(|_| PasteError::InvalidKey(key.to_string()))
    }

    async fn run_job(&self, job: PersistJob) {
        match job {
            PersistJob::Create { paste } => self.persist_create(paste).await,
            PersistJob::Update {
                paste,
                prior_l1,
                previous,
            } => self.persist_update(paste, prior_l1, previous).await,
            PersistJob::Tombstone { key, tombstone } => {
                self.persist_tombstone(&key, tombstone).await
            }
        }
    }

    /// Publish, logging instead of failing. Peers that miss a message
    /// converge once their L1 entry expires.
    async fn broadcast(&self, message: InvalidationMessage) {
        if let Err(e) = self.bus.publish(&message).await {
            warn!(key = %message.key, op = ?message.operation, "Invalidation not published: {}", e);
        }
    }

    /// Fold one bus message into L1. Messages are applied in arrival order
    /// with no per-key versioning.
    fn apply_invalidation(&self, message: &InvalidationMessage) {
        let key = message.key.as_str();
        match (message.operation, &message.metadata) {
            (Operation::Update, Some(meta)) => match self.l1.get(key) {
                // Same content: refresh the projection, keep the bytes.
                Some(L1Entry::Full(paste)) if paste.hash == meta.hash => {
                    let merged = (*paste).clone().with_meta(meta);
                    self.l1.insert(key, L1Entry::full(merged));
                }
                _ => self.l1.insert(key, L1Entry::Meta(meta.clone())),
            },
            (Operation::Delete, Some(tombstone)) => {
                self.l1.insert(key, L1Entry::Meta(tombstone.clone()));
            }
            (_, None) => self.l1.invalidate(key),
        }
        debug!(
            key,
            op = ?message.operation,
            origin = %message.origin,
            "Applied invalidation"
        );
    }
}

fn spawn_listener(
    owner: Weak<Inner>,
    mut events: broadcast::Receiver<InvalidationMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(message) => {
                    let Some(inner) = owner.upgrade() else { break };
                    inner.apply_invalidation(&message);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Invalidation listener lagged; L1 converges on expiry");
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Invalidation listener stopped");
    })
}

/// Log a tier failure and map it to the caller-facing error.
fn unavailable(op: &'static str, key: &str, err: StoreError) -> PasteError {
    error!(key, op, "Tier failure: {}", err);
    PasteError::Unavailable
}
