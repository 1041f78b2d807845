//! MongoDB-backed KV tier.
//!
//! One document per key in the `kv` collection: `{ _id, value, version }`.
//! Absence-CAS relies on the unique `_id` index: a duplicate-key insert means
//! somebody else holds the key.

use async_trait::async_trait;
use futures::StreamExt;
use mongodb::bson::{doc, to_bson};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{FindOptions, UpdateOptions};
use mongodb::Collection;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Expected, KvEntry, KvStore, KvValue};
use crate::database::Database;
use crate::error::StoreResult;

const DUPLICATE_KEY: i32 = 11000;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KvDocument {
    #[serde(rename = "_id")]
    key: String,
    value: KvValue,
    version: i64,
}

impl From<KvDocument> for KvEntry {
    fn from(doc: KvDocument) -> Self {
        Self {
            value: doc.value,
            version: doc.version.max(0) as u64,
        }
    }
}

/// KV tier stored in a MongoDB collection.
#[derive(Debug, Clone)]
pub struct MongoKv {
    collection: Collection<KvDocument>,
}

impl MongoKv {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection("kv"),
        }
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY
    )
}

/// Escape regex metacharacters so a key prefix matches literally.
fn escape_prefix(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    escaped.push('^');
    for ch in prefix.chars() {
        if "\\.+*?()|[]{}^$-".contains(ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[async_trait]
impl KvStore for MongoKv {
    async fn get(&self, key: &str) -> StoreResult<Option<KvEntry>> {
        let result = self.collection.find_one(doc! { "_id": key }).await?;
        Ok(result.map(KvEntry::from))
    }

    async fn set(&self, key: &str, value: &KvValue) -> StoreResult<()> {
        let update = doc! {
            "$set": { "value": to_bson(value)? },
            "$inc": { "version": 1_i64 },
        };
        let options = UpdateOptions::builder().upsert(true).build();

        self.collection
            .update_one(doc! { "_id": key }, update)
            .with_options(options)
            .await?;

        debug!("KV set {}", key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let result = self.collection.delete_one(doc! { "_id": key }).await?;
        debug!("KV delete {}: {}", key, result.deleted_count > 0);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Expected,
        value: &KvValue,
    ) -> StoreResult<bool> {
        match expected {
            Expected::Absent => {
                let document = KvDocument {
                    key: key.to_string(),
                    value: value.clone(),
                    version: 1,
                };
                match self.collection.insert_one(document).await {
                    Ok(_) => Ok(true),
                    Err(err) if is_duplicate_key(&err) => Ok(false),
                    Err(err) => Err(err.into()),
                }
            }
            Expected::Version(version) => {
                let current = version as i64;
                let next = current + 1;
                let filter = doc! { "_id": key, "version": current };
                let update = doc! {
                    "$set": { "value": to_bson(value)?, "version": next },
                };
                let result = self.collection.update_one(filter, update).await?;
                Ok(result.matched_count == 1)
            }
        }
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<(String, KvEntry)>> {
        let filter = if prefix.is_empty() {
            doc! {}
        } else {
            doc! { "_id": { "$regex": escape_prefix(prefix) } }
        };
        let options = FindOptions::builder().sort(doc! { "_id": 1 }).build();

        let mut cursor = self.collection.find(filter).with_options(options).await?;
        let mut items = Vec::new();

        while let Some(result) = cursor.next().await {
            match result {
                Ok(doc) => items.push((doc.key.clone(), KvEntry::from(doc))),
                Err(e) => warn!("Skipping unreadable KV document: {}", e),
            }
        }

        Ok(items)
    }

    fn backend_name(&self) -> &'static str {
        "mongodb"
    }
}
