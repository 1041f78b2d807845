//! Invalidation bus over a capped MongoDB collection.
//!
//! Publishing inserts into `invalidations`; a background task tails the
//! collection with a tailable cursor and fans every document out to local
//! subscribers. Tailable cursors die on an empty collection or a network
//! hiccup. A capped collection keeps insertion order, so the tail re-opens
//! from the start and skips up to the last `_id` it delivered; publisher
//! clocks play no part. If that document has already rolled out, everything
//! still held is delivered again.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{doc, from_document, Document};
use mongodb::options::{CursorType, FindOptions};
use mongodb::Collection;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{InvalidationBus, InvalidationMessage, BUS_CAPACITY};
use crate::database::Database;
use crate::error::StoreResult;

const COLLECTION: &str = "invalidations";

/// Size of the capped collection in bytes.
const CAPPED_SIZE: u64 = 16 * 1024 * 1024;

/// Pause before re-opening a dead tailable cursor.
const REOPEN_DELAY: Duration = Duration::from_millis(250);

/// Bus shared by every process connected to the same database.
pub struct MongoBus {
    collection: Collection<InvalidationMessage>,
    sender: broadcast::Sender<InvalidationMessage>,
    tail: JoinHandle<()>,
}

impl MongoBus {
    /// Ensure the capped collection exists and start tailing it. Messages
    /// already in the collection are not delivered.
    pub async fn start(db: &Database) -> StoreResult<Self> {
        if db.ensure_capped(COLLECTION, CAPPED_SIZE).await? {
            info!("Created capped collection '{}'", COLLECTION);
        }

        let collection: Collection<InvalidationMessage> = db.collection(COLLECTION);
        let raw: Collection<Document> = collection.clone_with_type();
        let newest = raw
            .find_one(doc! {})
            .sort(doc! { "$natural": -1 })
            .await?
            .and_then(|document| document.get_object_id("_id").ok());

        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        let tail = tokio::spawn(tail(raw, sender.clone(), Resume::after(newest)));

        Ok(Self {
            collection,
            sender,
            tail,
        })
    }
}

/// Position of the tail in insertion order.
#[derive(Debug)]
struct Resume {
    /// Last document delivered, or present when the tail started.
    last: Option<ObjectId>,
    skipping: bool,
}

impl Resume {
    fn after(last: Option<ObjectId>) -> Self {
        Self {
            last,
            skipping: false,
        }
    }

    /// Arm for a cursor that replays the collection from the start.
    /// `still_held` tells whether `last` is still in the collection.
    fn reopen(&mut self, still_held: bool) {
        self.skipping = self.last.is_some() && still_held;
    }

    /// Whether the document `id`, next in insertion order, is new.
    fn admit(&mut self, id: ObjectId) -> bool {
        if self.skipping {
            if self.last == Some(id) {
                self.skipping = false;
            }
            return false;
        }
        self.last = Some(id);
        true
    }
}

async fn tail(
    raw: Collection<Document>,
    sender: broadcast::Sender<InvalidationMessage>,
    mut resume: Resume,
) {
    let options = FindOptions::builder()
        .cursor_type(CursorType::TailableAwait)
        .build();

    loop {
        let still_held = match resume.last {
            Some(id) => raw
                .find_one(doc! { "_id": id })
                .await
                .map(|found| found.is_some()),
            None => Ok(false),
        };

        match still_held {
            Ok(still_held) => {
                resume.reopen(still_held);
                follow(&raw, &options, &sender, &mut resume).await;
            }
            Err(e) => warn!("Failed to locate last invalidation: {}", e),
        }

        tokio::time::sleep(REOPEN_DELAY).await;
    }
}

/// Deliver new documents until the cursor dies.
async fn follow(
    raw: &Collection<Document>,
    options: &FindOptions,
    sender: &broadcast::Sender<InvalidationMessage>,
    resume: &mut Resume,
) {
    let mut cursor = match raw.find(doc! {}).with_options(options.clone()).await {
        Ok(cursor) => cursor,
        Err(e) => {
            warn!("Failed to open invalidation tail: {}", e);
            return;
        }
    };

    while let Some(result) = cursor.next().await {
        let document = match result {
            Ok(document) => document,
            Err(e) => {
                warn!("Invalidation tail interrupted: {}", e);
                return;
            }
        };
        let Ok(id) = document.get_object_id("_id") else {
            continue;
        };
        if !resume.admit(id) {
            continue;
        }

        match from_document::<InvalidationMessage>(document) {
            // Nobody listening yet is fine.
            Ok(message) => {
                let _ = sender.send(message);
            }
            Err(e) => warn!("Skipping unreadable invalidation: {}", e),
        }
    }
    debug!("Invalidation cursor closed, re-opening");
}

impl Drop for MongoBus {
    fn drop(&mut self) {
        self.tail.abort();
    }
}

#[async_trait]
impl InvalidationBus for MongoBus {
    async fn publish(&self, message: &InvalidationMessage) -> StoreResult<()> {
        self.collection.insert_one(message).await?;
        debug!(key = %message.key, operation = ?message.operation, "Published invalidation");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<InvalidationMessage> {
        self.sender.subscribe()
    }

    fn backend_name(&self) -> &'static str {
        "mongodb"
    }
}
