//! Connection shared by the MongoDB-backed tiers.

use std::time::Duration;

use mongodb::bson::doc;
use mongodb::options::{ClientOptions, CreateCollectionOptions};
use mongodb::{Client, Collection};
use tracing::{debug, info};

use crate::error::StoreResult;

/// Reported to the server unless the URI names an application.
const APP_NAME: &str = "pastel";

/// How long an operation waits for a usable server before failing, unless
/// the URI says otherwise.
const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// One client and one database. The store, the KV and the bus all hold a
/// clone, so they share a single connection pool.
#[derive(Debug, Clone)]
pub struct Database {
    client: Client,
    db: mongodb::Database,
}

impl Database {
    /// Dial `uri` and make sure the deployment answers before any tier
    /// is built on it.
    pub async fn connect(uri: &str, db_name: &str) -> StoreResult<Self> {
        let client = Client::with_options(client_options(uri).await?)?;
        let database = Self {
            db: client.database(db_name),
            client,
        };

        database.ping().await?;
        info!(database = db_name, "Connected to MongoDB");
        Ok(database)
    }

    async fn ping(&self) -> StoreResult<()> {
        self.db.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }

    pub fn collection<T: Send + Sync>(&self, name: &str) -> Collection<T> {
        self.db.collection(name)
    }

    /// Create `name` as a capped collection of `size` bytes unless it
    /// already exists. Returns whether it was created.
    pub async fn ensure_capped(&self, name: &str, size: u64) -> StoreResult<bool> {
        let existing = self.db.list_collection_names().await?;
        if existing.iter().any(|n| n == name) {
            return Ok(false);
        }

        let options = CreateCollectionOptions::builder()
            .capped(true)
            .size(size)
            .build();
        self.db.create_collection(name).with_options(options).await?;
        Ok(true)
    }

    /// Close the pool without waiting for open cursors, such as the bus
    /// tail, to finish.
    pub async fn shutdown(self) {
        debug!("Closing MongoDB client");
        self.client.shutdown().immediate(true).await;
    }
}

async fn client_options(uri: &str) -> StoreResult<ClientOptions> {
    let mut options = ClientOptions::parse(uri).await?;
    options.app_name.get_or_insert_with(|| APP_NAME.to_string());
    options
        .server_selection_timeout
        .get_or_insert(SERVER_SELECTION_TIMEOUT);
    Ok(options)
}
