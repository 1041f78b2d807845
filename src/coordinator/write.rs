//! Write paths and their background persistence.

use tracing::{debug, error, info, warn};

use super::queue::PersistJob;
use super::{unavailable, Coordinator, Created, Deleted, Inner, Updated};
use crate::bus::InvalidationMessage;
use crate::cache::L1Entry;
use crate::database::PastePatch;
use crate::error::{PasteError, StoreError};
use crate::kv::{Expected, KvEntry, KvValue};
use crate::paste::{generate_key, is_valid_key, now_ms, Paste, PasteDraft, PasteMeta, Requester};

/// Fresh keys tried by [`Coordinator::create_generated`] before giving up.
const GENERATE_ATTEMPTS: usize = 5;

impl Coordinator {
    /// Reserve `key` and accept `draft` for it.
    ///
    /// Returns as soon as L2 holds the reservation; the store write happens
    /// in the background and is rolled back everywhere if it fails.
    ///
    /// # Errors
    /// `InvalidKey`, `TooLarge`, `Conflict` when the key is taken (including
    /// by a tombstone), `Unavailable` when L2 cannot be reached.
    pub async fn create(&self, key: &str, draft: PasteDraft) -> Result<Created, PasteError> {
        self.inner.create(key, draft).await
    }

    /// [`create`](Self::create) under a random key of the configured length,
    /// drawing a new key on conflict.
    pub async fn create_generated(&self, draft: PasteDraft) -> Result<Created, PasteError> {
        for _ in 0..GENERATE_ATTEMPTS {
            let key = generate_key(self.inner.key_length);
            match self.inner.create(&key, draft.clone()).await {
                Err(PasteError::Conflict(_)) => debug!(key, "Generated key taken, drawing another"),
                result => return result,
            }
        }
        warn!(attempts = GENERATE_ATTEMPTS, "No free generated key");
        Err(PasteError::Conflict("no free generated key".to_string()))
    }

    /// Replace the record at `key` on behalf of its owner.
    pub async fn update(
        &self,
        key: &str,
        draft: PasteDraft,
        requester: &Requester,
    ) -> Result<Updated, PasteError> {
        self.inner.validate(key, &draft)?;
        let previous = self.inner.authorize(key, requester).await?;
        self.inner.apply_update(key, draft, previous).await
    }

    /// Overwrite an already-authorized record. `previous` is the projection
    /// the caller authorized against; it is restored if persisting fails and
    /// the store cannot be re-read.
    ///
    /// The owner cannot change through an update.
    pub async fn apply_update(
        &self,
        key: &str,
        draft: PasteDraft,
        previous: PasteMeta,
    ) -> Result<Updated, PasteError> {
        self.inner.validate(key, &draft)?;
        self.inner.apply_update(key, draft, previous).await
    }

    /// Tombstone `key` on behalf of its owner: content emptied, expiry
    /// negated. The key stays reserved.
    pub async fn soft_delete(&self, key: &str, requester: &Requester) -> Result<Deleted, PasteError> {
        self.inner.soft_delete(key, requester).await
    }
}

impl Inner {
    fn validate(&self, key: &str, draft: &PasteDraft) -> Result<(), PasteError> {
        if !is_valid_key(key) {
            return Err(PasteError::InvalidKey(key.to_string()));
        }
        if draft.content.len() > self.max_content_bytes {
            return Err(PasteError::TooLarge {
                size: draft.content.len(),
                limit: self.max_content_bytes,
            });
        }
        Ok(())
    }

    pub(super) async fn create(&self, key: &str, draft: PasteDraft) -> Result<Created, PasteError> {
        self.validate(key, &draft)?;
        let url = self.url_for(key)?;
        let paste = Paste::from_draft(key, draft, now_ms());

        let reserved = self
            .kv
            .compare_and_swap(key, Expected::Absent, &KvValue::Meta(paste.meta()))
            .await
            .map_err(|e| unavailable("kv reserve", key, e))?;

        if !reserved {
            debug!(key, "Key already reserved");
            return Err(PasteError::Conflict(key.to_string()));
        }

        self.l1.insert(key, L1Entry::full(paste.clone()));
        self.queue.push(PersistJob::Create { paste });

        info!(key, "Paste reserved");
        Ok(Created {
            key: key.to_string(),
            url,
        })
    }

    pub(super) async fn apply_update(
        &self,
        key: &str,
        draft: PasteDraft,
        previous: PasteMeta,
    ) -> Result<Updated, PasteError> {
        let url = self.url_for(key)?;
        let mut paste = Paste::from_draft(key, draft, now_ms());
        paste.email = previous.email.clone();

        self.kv
            .set(key, &KvValue::Meta(paste.meta()))
            .await
            .map_err(|e| unavailable("kv set", key, e))?;

        let prior_l1 = self.l1.get(key);
        self.l1.insert(key, L1Entry::full(paste.clone()));
        self.queue.push(PersistJob::Update {
            paste,
            prior_l1,
            previous,
        });

        info!(key, "Paste update accepted");
        Ok(Updated {
            key: key.to_string(),
            url,
        })
    }

    pub(super) async fn soft_delete(
        &self,
        key: &str,
        requester: &Requester,
    ) -> Result<Deleted, PasteError> {
        let meta = self.authorize(key, requester).await?;
        let tombstone = meta.tombstoned();

        self.kv
            .set(key, &KvValue::Meta(tombstone.clone()))
            .await
            .map_err(|e| unavailable("kv set", key, e))?;

        let entry = match self.l1.get(key) {
            Some(L1Entry::Full(paste)) => L1Entry::full((*paste).clone().tombstoned()),
            _ => L1Entry::Meta(tombstone.clone()),
        };
        self.l1.insert(key, entry);

        self.broadcast(InvalidationMessage::delete(
            &self.node_id,
            key,
            Some(tombstone.clone()),
        ))
        .await;
        self.queue.push(PersistJob::Tombstone {
            key: key.to_string(),
            tombstone,
        });

        info!(key, "Paste tombstoned");
        Ok(Deleted {
            key: key.to_string(),
        })
    }

    pub(super) async fn persist_create(&self, paste: Paste) {
        let key = paste.key.as_str();
        let outcome = self
            .retry
            .run("store create", || self.repo.create(&paste))
            .await;

        match outcome {
            Ok(true) => {
                debug!(key, "Paste persisted");
                self.refresh_projection(key, &paste).await;
            }
            Ok(false) => {
                warn!(key, "Store already holds this key, undoing reservation");
                self.rollback_create(key).await;
            }
            Err(e) => {
                error!(key, "Persisting paste failed, undoing reservation: {}", e);
                self.rollback_create(key).await;
            }
        }
    }

    /// Re-read the stored record and mirror its projection into L2, so L2
    /// matches L3 byte for byte after a successful write.
    ///
    /// Returns `None` when L2 has moved on since the write was accepted
    /// (a tombstone, or a concurrent writer); L1 and L2 are then left alone.
    async fn refresh_projection(&self, key: &str, written: &Paste) -> Option<PasteMeta> {
        let stored = match self.repo.get_by_key(key).await {
            Ok(Some(stored)) => stored,
            Ok(None) => written.clone(),
            Err(e) => {
                warn!(key, "Re-read after write failed, using written record: {}", e);
                written.clone()
            }
        };
        let meta = stored.meta();

        match self.store_projection(key, &meta).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(key, "L2 changed since the write, keeping it");
                return None;
            }
            Err(e) => warn!(key, "Could not refresh projection in L2: {}", e),
        }
        if let Some(L1Entry::Full(held)) = self.l1.get(key)
            && held.hash == stored.hash
            && held.is_live(now_ms())
        {
            self.l1.insert(key, L1Entry::full(stored));
        }

        Some(meta)
    }

    /// Compare-and-swap `meta` into L2 against the entry read just before.
    /// A dead projection in L2 is never replaced by a live one: only the
    /// tombstone job writes over a tombstone.
    async fn store_projection(&self, key: &str, meta: &PasteMeta) -> Result<bool, StoreError> {
        let now = now_ms();
        let expected = match self.kv.get(key).await? {
            None => Expected::Absent,
            Some(KvEntry {
                value: KvValue::Meta(current),
                ..
            }) if !current.is_live(now) && meta.is_live(now) => return Ok(false),
            Some(entry) => Expected::Version(entry.version),
        };
        self.kv
            .compare_and_swap(key, expected, &KvValue::Meta(meta.clone()))
            .await
    }

    async fn rollback_create(&self, key: &str) {
        self.l1.invalidate(key);
        self.restore_from_store(key, None).await;
    }

    pub(super) async fn persist_update(
        &self,
        paste: Paste,
        prior_l1: Option<L1Entry>,
        previous: PasteMeta,
    ) {
        let key = paste.key.as_str();
        let patch = PastePatch::replace_with(&paste);
        let outcome = self
            .retry
            .run("store update", || self.repo.update(key, &patch))
            .await;

        match outcome {
            Ok(true) => {
                if let Some(meta) = self.refresh_projection(key, &paste).await {
                    self.broadcast(InvalidationMessage::update(&self.node_id, key, meta))
                        .await;
                }
                debug!(key, "Paste update persisted");
            }
            Ok(false) => {
                warn!(key, "Store has no record to update, rolling back");
                self.rollback_update(key, prior_l1, previous).await;
            }
            Err(e) => {
                error!(key, "Persisting update failed, rolling back: {}", e);
                self.rollback_update(key, prior_l1, previous).await;
            }
        }
    }

    async fn rollback_update(&self, key: &str, prior_l1: Option<L1Entry>, previous: PasteMeta) {
        match prior_l1 {
            Some(entry) => self.l1.insert(key, entry),
            None => self.l1.invalidate(key),
        }
        self.restore_from_store(key, Some(previous)).await;
    }

    /// Make L2 and L1 agree with what L3 holds after a rejected write, then
    /// tell the other nodes. `fallback` stands in for the stored projection
    /// when L3 cannot be read; `None` releases the key.
    async fn restore_from_store(&self, key: &str, fallback: Option<PasteMeta>) {
        let restored = match self
            .rollback
            .run("store re-read", || self.repo.get_by_key(key))
            .await
        {
            Ok(stored) => stored.map(|p| p.meta()),
            Err(e) => {
                warn!(key, "Store unreadable during rollback: {}", e);
                fallback
            }
        };

        let result: Result<bool, StoreError> = match &restored {
            Some(meta) => {
                self.rollback
                    .run("kv restore", || self.store_projection(key, meta))
                    .await
            }
            None => self
                .rollback
                .run("kv release", move || async move {
                    self.kv.delete(key).await.map(|()| true)
                })
                .await,
        };
        match result {
            Ok(true) => {}
            // A tombstone or a newer write landed meanwhile; its job settles the tiers.
            Ok(false) => {
                debug!(key, "L2 changed during rollback, keeping it");
                return;
            }
            Err(e) => error!(key, "L2 still holds a rejected write: {}", e),
        }

        let message = match restored {
            Some(meta) => {
                if let Some(L1Entry::Full(held)) = self.l1.get(key)
                    && held.hash != meta.hash
                {
                    self.l1.insert(key, L1Entry::Meta(meta.clone()));
                }
                InvalidationMessage::update(&self.node_id, key, meta)
            }
            None => {
                self.l1.invalidate(key);
                InvalidationMessage::delete(&self.node_id, key, None)
            }
        };
        self.broadcast(message).await;
    }

    pub(super) async fn persist_tombstone(&self, key: &str, tombstone: PasteMeta) {
        let patch = PastePatch::tombstone(tombstone.expire);
        match self
            .retry
            .run("store tombstone", || self.repo.update(key, &patch))
            .await
        {
            Ok(true) => {
                debug!(key, "Tombstone persisted");
                self.reassert_tombstone(key, tombstone).await;
            }
            Ok(false) => warn!(key, "Store has no record to tombstone"),
            Err(e) => error!(key, "Tombstone not persisted, store still holds content: {}", e),
        }
    }

    /// Write the stored tombstone over whatever L2 and L1 hold and announce
    /// it again. Jobs queued ahead of the delete may have replaced it.
    async fn reassert_tombstone(&self, key: &str, fallback: PasteMeta) {
        let tombstone = match self.repo.get_by_key(key).await {
            Ok(Some(stored)) if !stored.is_live(now_ms()) => stored.meta(),
            Ok(_) => fallback,
            Err(e) => {
                warn!(key, "Re-read after tombstone failed, using accepted one: {}", e);
                fallback
            }
        };

        let value = KvValue::Meta(tombstone.clone());
        if let Err(e) = self
            .rollback
            .run("kv tombstone", || self.kv.set(key, &value))
            .await
        {
            error!(key, "Tombstone not reasserted in L2: {}", e);
        }
        self.l1.insert(key, L1Entry::Meta(tombstone.clone()));
        self.broadcast(InvalidationMessage::delete(&self.node_id, key, Some(tombstone)))
            .await;
    }
}
