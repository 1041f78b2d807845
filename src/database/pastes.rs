//! Paste repository on MongoDB.
//!
//! Handles CRUD operations for pastes in the `pastes` collection.
//! The key is the document `_id`, content is stored as BSON binary.

use anyhow::Context;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use mongodb::bson::spec::BinarySubtype;
use mongodb::bson::{doc, Binary, Bson, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::FindOptions;
use mongodb::{Collection, IndexModel};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::store::{PastePatch, PasteRepository};
use super::Database;
use crate::error::{StoreError, StoreResult};
use crate::paste::{now_ms, Page, Paste, PasteSummary};

const DUPLICATE_KEY: i32 = 11000;

/// Stored shape of a paste.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PasteDocument {
    #[serde(rename = "_id")]
    key: String,
    created_at: i64,
    expire: i64,
    ip: String,
    content: Binary,
    mime: String,
    length: i64,
    #[serde(default)]
    password: Option<String>,
    email: String,
    name: String,
    hash: i64,
}

fn binary(bytes: Vec<u8>) -> Binary {
    Binary {
        subtype: BinarySubtype::Generic,
        bytes,
    }
}

impl From<&Paste> for PasteDocument {
    fn from(paste: &Paste) -> Self {
        Self {
            key: paste.key.clone(),
            created_at: paste.created_at,
            expire: paste.expire,
            ip: paste.ip.clone(),
            content: binary(paste.content.clone()),
            mime: paste.mime.clone(),
            length: paste.length as i64,
            password: paste.password.clone(),
            email: paste.email.clone(),
            name: paste.name.clone(),
            hash: paste.hash as i64,
        }
    }
}

impl From<PasteDocument> for Paste {
    fn from(doc: PasteDocument) -> Self {
        Self {
            key: doc.key,
            created_at: doc.created_at,
            expire: doc.expire,
            ip: doc.ip,
            content: doc.content.bytes,
            mime: doc.mime,
            length: doc.length.max(0) as u64,
            password: doc.password,
            email: doc.email,
            name: doc.name,
            hash: doc.hash.max(0) as u64,
        }
    }
}

/// `$set` document for a patch.
fn set_document(patch: &PastePatch) -> Document {
    let mut set = Document::new();
    if let Some(content) = &patch.content {
        set.insert("content", Bson::Binary(binary(content.clone())));
    }
    if let Some(mime) = &patch.mime {
        set.insert("mime", mime.as_str());
    }
    if let Some(length) = patch.length {
        set.insert("length", length as i64);
    }
    if let Some(hash) = patch.hash {
        set.insert("hash", hash as i64);
    }
    if let Some(password) = &patch.password {
        set.insert(
            "password",
            password.as_ref().map_or(Bson::Null, |p| Bson::String(p.clone())),
        );
    }
    if let Some(expire) = patch.expire {
        set.insert("expire", expire);
    }
    if let Some(ip) = &patch.ip {
        set.insert("ip", ip.as_str());
    }
    if let Some(email) = &patch.email {
        set.insert("email", email.as_str());
    }
    if let Some(name) = &patch.name {
        set.insert("name", name.as_str());
    }
    set
}

/// Repository for pastes backed by MongoDB.
#[derive(Debug, Clone)]
pub struct MongoPasteRepository {
    collection: Collection<PasteDocument>,
}

impl MongoPasteRepository {
    /// Create a repository and make sure its indexes exist.
    pub async fn new(db: &Database) -> StoreResult<Self> {
        let collection: Collection<PasteDocument> = db.collection("pastes");

        let by_owner = IndexModel::builder()
            .keys(doc! { "email": 1, "created_at": -1 })
            .build();
        let by_expire = IndexModel::builder().keys(doc! { "expire": 1 }).build();
        collection.create_indexes([by_owner, by_expire]).await?;

        Ok(Self { collection })
    }

    async fn page(&self, filter: Document, limit: u64, offset: u64) -> StoreResult<Page<PasteSummary>> {
        let total = self.collection.count_documents(filter.clone()).await?;
        let Some(options) = page_options(limit, offset) else {
            return Ok(Page {
                items: Vec::new(),
                total,
            });
        };

        // Content is projected away; read raw documents instead of PasteDocument.
        let raw: Collection<Document> = self.collection.clone_with_type();
        let mut cursor = raw.find(filter).with_options(options).await?;
        let mut items = Vec::new();

        while let Some(document) = cursor.next().await {
            match summary_from(&document?) {
                Ok(summary) => items.push(summary),
                Err(e) => warn!("Skipping unreadable paste document: {}", e),
            }
        }

        Ok(Page { items, total })
    }
}

/// Listing options, or `None` when nothing is asked for: the server reads a
/// zero limit as no limit at all.
fn page_options(limit: u64, offset: u64) -> Option<FindOptions> {
    if limit == 0 {
        return None;
    }
    let options = FindOptions::builder()
        .sort(doc! { "created_at": -1, "_id": 1 })
        .skip(offset)
        .limit(limit.min(i64::MAX as u64) as i64)
        .projection(doc! { "content": 0 })
        .build();
    Some(options)
}

/// Keys from an `_id` projection. A cursor error aborts with that error;
/// documents whose key is not a string are counted and skipped.
async fn collect_keys<S, E>(mut documents: S) -> StoreResult<Vec<String>>
where
    S: Stream<Item = Result<Document, E>> + Unpin,
    StoreError: From<E>,
{
    let mut keys = Vec::new();
    let mut skipped = 0usize;

    while let Some(document) = documents.next().await {
        match document?.get_str("_id") {
            Ok(key) => keys.push(key.to_string()),
            Err(_) => skipped += 1,
        }
    }

    if skipped > 0 {
        warn!(skipped, "Ignored paste documents without a string key");
    }
    Ok(keys)
}

fn summary_from(doc: &Document) -> StoreResult<PasteSummary> {
    let read = || -> anyhow::Result<PasteSummary> {
        Ok(PasteSummary {
            key: doc.get_str("_id").context("_id")?.to_string(),
            created_at: doc.get_i64("created_at").context("created_at")?,
            expire: doc.get_i64("expire").context("expire")?,
            mime: doc.get_str("mime").context("mime")?.to_string(),
            length: doc.get_i64("length").context("length")?.max(0) as u64,
            name: doc.get_str("name").unwrap_or_default().to_string(),
            protected: doc.get_str("password").is_ok_and(|p| !p.is_empty()),
        })
    };
    read().map_err(|e| StoreError::Serialization(format!("{e:#}")))
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY
    )
}

#[async_trait]
impl PasteRepository for MongoPasteRepository {
    async fn create(&self, paste: &Paste) -> StoreResult<bool> {
        match self.collection.insert_one(PasteDocument::from(paste)).await {
            Ok(_) => {
                debug!("Created paste {}", paste.key);
                Ok(true)
            }
            Err(err) if is_duplicate_key(&err) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn get_by_key(&self, key: &str) -> StoreResult<Option<Paste>> {
        let result = self.collection.find_one(doc! { "_id": key }).await?;
        debug!("DB get paste {}: {:?}", key, result.is_some());
        Ok(result.map(Paste::from))
    }

    async fn update(&self, key: &str, patch: &PastePatch) -> StoreResult<bool> {
        let set = set_document(patch);
        if set.is_empty() {
            return Ok(self.get_by_key(key).await?.is_some());
        }

        let result = self
            .collection
            .update_one(doc! { "_id": key }, doc! { "$set": set })
            .await?;
        debug!("Updated paste {}: matched {}", key, result.matched_count);
        Ok(result.matched_count == 1)
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let result = self.collection.delete_one(doc! { "_id": key }).await?;
        debug!("Deleted paste {}: {}", key, result.deleted_count > 0);
        Ok(result.deleted_count > 0)
    }

    async fn list_alive(&self, limit: u64, offset: u64) -> StoreResult<Page<PasteSummary>> {
        self.page(doc! { "expire": { "$gt": now_ms() } }, limit, offset)
            .await
    }

    async fn paginate_by_owner(
        &self,
        email: &str,
        limit: u64,
        offset: u64,
    ) -> StoreResult<Page<PasteSummary>> {
        self.page(
            doc! { "email": email, "expire": { "$gt": now_ms() } },
            limit,
            offset,
        )
        .await
    }

    async fn count(&self) -> StoreResult<u64> {
        Ok(self.collection.count_documents(doc! {}).await?)
    }

    async fn all_keys(&self) -> StoreResult<Vec<String>> {
        let raw: Collection<Document> = self.collection.clone_with_type();
        let options = FindOptions::builder()
            .projection(doc! { "_id": 1 })
            .sort(doc! { "_id": 1 })
            .build();

        let cursor = raw.find(doc! {}).with_options(options).await?;
        collect_keys(cursor).await
    }

    fn backend_name(&self) -> &'static str {
        "mongodb"
    }
}
