//! Backend selection: turn a [`Config`] into connected tiers.

use std::sync::Arc;

use tracing::info;

use crate::bus::{InvalidationBus, LocalBus, MongoBus};
use crate::config::{BusBackend, Config, KvBackend, StoreBackend};
use crate::coordinator::Tiers;
use crate::database::{
    Database, MemoryPasteRepository, MongoPasteRepository, PasteRepository, SqlitePasteRepository,
};
use crate::error::{StoreError, StoreResult};
use crate::kv::{KvStore, MemoryKv, MongoKv};

/// Connected backends. `database` is set when any tier runs on MongoDB so the
/// client can be shut down cleanly.
pub struct Backends {
    pub tiers: Tiers,
    pub database: Option<Database>,
}

impl Backends {
    /// Connect every tier `config` selects. MongoDB is dialed once and shared.
    ///
    /// # Errors
    /// Fails if a backend cannot be reached or initialised.
    pub async fn connect(config: &Config) -> StoreResult<Self> {
        let needs_mongo = config.store == StoreBackend::Mongo
            || config.kv == KvBackend::Mongo
            || config.bus == BusBackend::Mongo;

        let database = if needs_mongo {
            let uri = config
                .mongodb_uri
                .as_deref()
                .ok_or_else(|| StoreError::Connection("MONGODB_URI is not set".to_string()))?;
            info!("Connecting to MongoDB...");
            Some(Database::connect(uri, &config.mongodb_database).await?)
        } else {
            None
        };
        let mongo = || {
            database
                .as_ref()
                .ok_or_else(|| StoreError::Internal("MongoDB not connected".to_string()))
        };

        let repo: Arc<dyn PasteRepository> = match &config.store {
            StoreBackend::Mongo => Arc::new(MongoPasteRepository::new(mongo()?).await?),
            StoreBackend::Sqlite { path } => Arc::new(SqlitePasteRepository::open(path).await?),
            StoreBackend::Memory => Arc::new(MemoryPasteRepository::new()),
        };

        let kv: Arc<dyn KvStore> = match config.kv {
            KvBackend::Mongo => Arc::new(MongoKv::new(mongo()?)),
            KvBackend::Memory => Arc::new(MemoryKv::new()),
        };

        let bus: Arc<dyn InvalidationBus> = match config.bus {
            BusBackend::Mongo => Arc::new(MongoBus::start(mongo()?).await?),
            BusBackend::Local => Arc::new(LocalBus::new()),
        };

        info!(
            store = repo.backend_name(),
            kv = kv.backend_name(),
            bus = bus.backend_name(),
            "Backends ready"
        );

        Ok(Self {
            tiers: Tiers { repo, kv, bus },
            database,
        })
    }
}
