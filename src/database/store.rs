//! Durable store contract (L3).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::paste::{Page, Paste, PasteSummary};

/// Partial update of a stored paste. `None` leaves a field untouched.
///
/// `created_at` and `key` are never patched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PastePatch {
    pub content: Option<Vec<u8>>,
    pub mime: Option<String>,
    pub length: Option<u64>,
    pub hash: Option<u64>,
    /// `Some(None)` clears the password.
    pub password: Option<Option<String>>,
    pub expire: Option<i64>,
    pub ip: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
}

impl PastePatch {
    /// Patch that rewrites every mutable field from `paste`.
    pub fn replace_with(paste: &Paste) -> Self {
        Self {
            content: Some(paste.content.clone()),
            mime: Some(paste.mime.clone()),
            length: Some(paste.length),
            hash: Some(paste.hash),
            password: Some(paste.password.clone()),
            expire: Some(paste.expire),
            ip: Some(paste.ip.clone()),
            email: Some(paste.email.clone()),
            name: Some(paste.name.clone()),
        }
    }

    /// Soft-delete patch: empty content and the (already negated) expiry.
    pub fn tombstone(expire: i64) -> Self {
        Self {
            content: Some(Vec::new()),
            length: Some(0),
            expire: Some(expire),
            ..Default::default()
        }
    }

    pub fn apply_to(&self, paste: &mut Paste) {
        if let Some(content) = &self.content {
            paste.content = content.clone();
        }
        if let Some(mime) = &self.mime {
            paste.mime = mime.clone();
        }
        if let Some(length) = self.length {
            paste.length = length;
        }
        if let Some(hash) = self.hash {
            paste.hash = hash;
        }
        if let Some(password) = &self.password {
            paste.password = password.clone();
        }
        if let Some(expire) = self.expire {
            paste.expire = expire;
        }
        if let Some(ip) = &self.ip {
            paste.ip = ip.clone();
        }
        if let Some(email) = &self.email {
            paste.email = email.clone();
        }
        if let Some(name) = &self.name {
            paste.name = name.clone();
        }
    }
}

/// Repository over the durable store.
///
/// Implementations are interchangeable and chosen by configuration at start.
#[async_trait]
pub trait PasteRepository: Send + Sync {
    /// Insert a new paste. `false` if the key already has a row.
    async fn create(&self, paste: &Paste) -> StoreResult<bool>;

    async fn get_by_key(&self, key: &str) -> StoreResult<Option<Paste>>;

    /// Apply `patch` to an existing row. `false` if there is no such row.
    async fn update(&self, key: &str, patch: &PastePatch) -> StoreResult<bool>;

    /// Physically remove a row. Not used by the soft-delete path.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Live pastes (expiry in the future), newest first.
    async fn list_alive(&self, limit: u64, offset: u64) -> StoreResult<Page<PasteSummary>>;

    /// Live pastes owned by `email`, newest first.
    async fn paginate_by_owner(
        &self,
        email: &str,
        limit: u64,
        offset: u64,
    ) -> StoreResult<Page<PasteSummary>>;

    async fn count(&self) -> StoreResult<u64>;

    async fn all_keys(&self) -> StoreResult<Vec<String>>;

    fn backend_name(&self) -> &'static str;
}
