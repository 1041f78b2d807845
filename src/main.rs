//! Pastel node.
//!
//! Connects the configured tiers, runs a coordinator until Ctrl-C, then
//! flushes pending writes before exiting.

use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pastel::{Backends, Config, Coordinator};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

/// How long shutdown waits for queued writes.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file first (before anything else)
    dotenvy::dotenv().ok();

    // If RUST_LOG is not set, default to "info" level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pastel=info,mongodb=warn,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting pastel node...");

    let config = Config::from_env()?;
    info!("Configuration loaded successfully");
    info!(
        "Backends: store={:?} kv={:?} bus={:?}",
        config.store, config.kv, config.bus
    );

    let backends = Backends::connect(&config).await?;
    let coordinator = Coordinator::new(backends.tiers, &config);

    if config.mirror_on_start {
        let seeded = coordinator.mirror_store_keys().await?;
        info!("Seeded {} placeholders from the store", seeded);
    }

    info!(
        node = %coordinator.node_id(),
        base_url = %config.base_url,
        "Node ready"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, draining {} pending writes", coordinator.pending_jobs());

    if tokio::time::timeout(DRAIN_TIMEOUT, coordinator.drain()).await.is_err() {
        warn!(
            pending = coordinator.pending_jobs(),
            "Drain timed out, pending writes are lost"
        );
    }

    drop(coordinator);
    if let Some(database) = backends.database {
        database.shutdown().await;
    }

    info!("Bye");
    Ok(())
}
