//! Read path: resolve, metadata lookup, owner authorization.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{unavailable, Coordinator, Inner};
use crate::cache::L1Entry;
use crate::error::PasteError;
use crate::kv::KvValue;
use crate::paste::{now_ms, Paste, PasteMeta, Requester};

/// Gate applied on every tier: gone records are not found, protected ones
/// need the exact password.
fn check_access(meta: &PasteMeta, password: Option<&str>, now: i64) -> Result<(), PasteError> {
    if !meta.is_live(now) {
        return Err(PasteError::NotFound);
    }
    if !meta.password_matches(password) {
        return Err(PasteError::Forbidden);
    }
    Ok(())
}

fn check_paste(paste: &Paste, password: Option<&str>, now: i64) -> Result<(), PasteError> {
    if !paste.is_live(now) {
        return Err(PasteError::NotFound);
    }
    let open = paste.password.as_deref().is_none_or(str::is_empty);
    if !open && password != paste.password.as_deref() {
        return Err(PasteError::Forbidden);
    }
    Ok(())
}

impl Coordinator {
    /// Return the full record for `key` if it exists, is live and `password`
    /// opens it.
    ///
    /// # Errors
    /// `NotFound` for unknown, expired or tombstoned keys, `Forbidden` for a
    /// wrong password, `Unavailable` when a tier cannot be reached.
    pub async fn resolve(&self, key: &str, password: Option<&str>) -> Result<Arc<Paste>, PasteError> {
        self.inner.resolve(key, password).await
    }

    /// Permission projection for `key`, `None` if the key does not exist.
    /// Never pulls content into L1 unless the store had to be consulted.
    pub async fn lookup_meta(&self, key: &str) -> Result<Option<PasteMeta>, PasteError> {
        self.inner.lookup_meta(key).await
    }

    /// Check that `requester` may modify `key`, returning the current
    /// projection.
    ///
    /// # Errors
    /// `NotFound` for unknown or dead keys; `Forbidden` when the requester is
    /// not the owner or the password is wrong.
    pub async fn authorize(&self, key: &str, requester: &Requester) -> Result<PasteMeta, PasteError> {
        self.inner.authorize(key, requester).await
    }
}

impl Inner {
    pub(super) async fn resolve(
        &self,
        key: &str,
        password: Option<&str>,
    ) -> Result<Arc<Paste>, PasteError> {
        let now = now_ms();

        match self.l1.get(key) {
            Some(L1Entry::Missing) => return Err(PasteError::NotFound),
            Some(L1Entry::Full(paste)) => {
                check_paste(&paste, password, now)?;
                return Ok(paste);
            }
            Some(L1Entry::Meta(meta)) => {
                check_access(&meta, password, now)?;
                return self.hydrate(key, password, now).await;
            }
            None => {}
        }

        let entry = self
            .kv
            .get(key)
            .await
            .map_err(|e| unavailable("kv get", key, e))?;

        match entry.map(|e| e.value) {
            None => {
                self.l1.insert(key, L1Entry::Missing);
                Err(PasteError::NotFound)
            }
            Some(KvValue::Placeholder) => {
                let Some(paste) = self.mirror(key).await? else {
                    return Err(PasteError::NotFound);
                };
                check_paste(&paste, password, now)?;
                Ok(paste)
            }
            Some(KvValue::Meta(meta)) => {
                check_access(&meta, password, now)?;
                self.hydrate(key, password, now).await
            }
        }
    }

    /// Load content from L3 after the projection already passed the gate.
    /// The stored record is authoritative, so it is gated again.
    async fn hydrate(
        &self,
        key: &str,
        password: Option<&str>,
        now: i64,
    ) -> Result<Arc<Paste>, PasteError> {
        let Some(paste) = self.fetch(key).await? else {
            // Reserved but not yet persisted, or rolled back.
            debug!(key, "Projection present, store has no record");
            return Err(PasteError::NotFound);
        };

        let paste = Arc::new(paste);
        self.l1.insert(key, L1Entry::Full(Arc::clone(&paste)));
        check_paste(&paste, password, now)?;
        Ok(paste)
    }

    /// Replace an L2 placeholder with the real projection from L3.
    async fn mirror(&self, key: &str) -> Result<Option<Arc<Paste>>, PasteError> {
        let Some(paste) = self.fetch(key).await? else {
            self.l1.insert(key, L1Entry::Missing);
            return Ok(None);
        };

        if let Err(e) = self.kv.set(key, &KvValue::Meta(paste.meta())).await {
            warn!(key, "Could not mirror projection into L2: {}", e);
        }

        let paste = Arc::new(paste);
        self.l1.insert(key, L1Entry::Full(Arc::clone(&paste)));
        Ok(Some(paste))
    }

    async fn fetch(&self, key: &str) -> Result<Option<Paste>, PasteError> {
        self.retry
            .run("store get", || self.repo.get_by_key(key))
            .await
            .map_err(|e| unavailable("store get", key, e))
    }

    pub(super) async fn lookup_meta(&self, key: &str) -> Result<Option<PasteMeta>, PasteError> {
        match self.l1.get(key) {
            Some(L1Entry::Missing) => return Ok(None),
            Some(entry) => return Ok(entry.meta()),
            None => {}
        }

        let entry = self
            .kv
            .get(key)
            .await
            .map_err(|e| unavailable("kv get", key, e))?;

        match entry.map(|e| e.value) {
            None => {
                self.l1.insert(key, L1Entry::Missing);
                Ok(None)
            }
            Some(KvValue::Meta(meta)) => {
                self.l1.insert(key, L1Entry::Meta(meta.clone()));
                Ok(Some(meta))
            }
            Some(KvValue::Placeholder) => Ok(self.mirror(key).await?.map(|p| p.meta())),
        }
    }

    pub(super) async fn authorize(
        &self,
        key: &str,
        requester: &Requester,
    ) -> Result<PasteMeta, PasteError> {
        let meta = self.lookup_meta(key).await?.ok_or(PasteError::NotFound)?;

        if !meta.is_live(now_ms()) {
            return Err(PasteError::NotFound);
        }
        if !meta.is_owned_by(&requester.email) {
            debug!(key, "Requester is not the owner");
            return Err(PasteError::Forbidden);
        }
        if !meta.password_matches(requester.password.as_deref()) {
            return Err(PasteError::Forbidden);
        }

        Ok(meta)
    }
}
