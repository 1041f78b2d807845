//! Paste records and their lightweight projection.

use serde::{Deserialize, Serialize};

use super::hash::content_hash;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Negate a live expiry. Already-negative (or zero) expiries are left alone so
/// that tombstoning twice never resurrects a record.
pub fn tombstone_expire(expire: i64) -> i64 {
    if expire > 0 { -expire } else { expire }
}

/// A full stored paste, content included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paste {
    pub key: String,
    /// Creation time (ms).
    pub created_at: i64,
    /// Absolute expiry (ms). Zero, negative or past means gone.
    pub expire: i64,
    pub ip: String,
    pub content: Vec<u8>,
    pub mime: String,
    pub length: u64,
    /// Plaintext access password. `None` or empty means open.
    pub password: Option<String>,
    pub email: String,
    pub name: String,
    pub hash: u64,
}

/// What a client submits on create/update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasteDraft {
    pub content: Vec<u8>,
    pub mime: String,
    pub password: Option<String>,
    /// Absolute expiry (ms).
    pub expire: i64,
    pub ip: String,
    pub email: String,
    pub name: String,
}

impl Paste {
    /// Build a record from a draft, computing length and hash.
    pub fn from_draft(key: impl Into<String>, draft: PasteDraft, created_at: i64) -> Self {
        let length = draft.content.len() as u64;
        let hash = content_hash(&draft.content);
        Self {
            key: key.into(),
            created_at,
            expire: draft.expire,
            ip: draft.ip,
            content: draft.content,
            mime: draft.mime,
            length,
            password: draft.password.filter(|p| !p.is_empty()),
            email: draft.email,
            name: draft.name,
            hash,
        }
    }

    /// Project the permission/freshness subset.
    pub fn meta(&self) -> PasteMeta {
        PasteMeta {
            email: self.email.clone(),
            name: self.name.clone(),
            ip: self.ip.clone(),
            length: self.length,
            expire: self.expire,
            hash: self.hash,
            password: self.password.clone(),
        }
    }

    /// Overlay projection fields onto this record, keeping content.
    pub fn with_meta(mut self, meta: &PasteMeta) -> Self {
        self.email = meta.email.clone();
        self.name = meta.name.clone();
        self.ip = meta.ip.clone();
        self.length = meta.length;
        self.expire = meta.expire;
        self.hash = meta.hash;
        self.password = meta.password.clone();
        self
    }

    /// Empty content and negated expiry.
    pub fn tombstoned(mut self) -> Self {
        self.content.clear();
        self.length = 0;
        self.expire = tombstone_expire(self.expire);
        self
    }

    pub fn is_live(&self, now: i64) -> bool {
        self.expire > now
    }
}

/// Lightweight projection of a [`Paste`]: everything needed to answer
/// existence, permission and freshness questions without the content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasteMeta {
    pub email: String,
    pub name: String,
    pub ip: String,
    pub length: u64,
    pub expire: i64,
    pub hash: u64,
    #[serde(default)]
    pub password: Option<String>,
}

impl PasteMeta {
    pub fn is_live(&self, now: i64) -> bool {
        self.expire > now
    }

    /// Open records accept anything; protected ones need an exact match.
    pub fn password_matches(&self, given: Option<&str>) -> bool {
        match self.password.as_deref() {
            None | Some("") => true,
            Some(expected) => given == Some(expected),
        }
    }

    pub fn is_owned_by(&self, email: &str) -> bool {
        !self.email.is_empty() && self.email == email
    }

    /// Tombstoned copy: zero length, negated expiry.
    pub fn tombstoned(&self) -> Self {
        Self {
            length: 0,
            expire: tombstone_expire(self.expire),
            ..self.clone()
        }
    }
}

/// Listing row: a record without content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasteSummary {
    pub key: String,
    pub created_at: i64,
    pub expire: i64,
    pub mime: String,
    pub length: u64,
    pub name: String,
    pub protected: bool,
}

impl From<&Paste> for PasteSummary {
    fn from(paste: &Paste) -> Self {
        Self {
            key: paste.key.clone(),
            created_at: paste.created_at,
            expire: paste.expire,
            mime: paste.mime.clone(),
            length: paste.length,
            name: paste.name.clone(),
            protected: paste.password.as_deref().is_some_and(|p| !p.is_empty()),
        }
    }
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

/// Identity presented by a caller for owner-only operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requester {
    pub email: String,
    pub password: Option<String>,
}

impl Requester {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: None,
        }
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}
