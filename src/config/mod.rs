//! Configuration module for pastel.
//!
//! Loads configuration from environment variables (and `.env`).

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::cache::CacheConfig;
use crate::retry::{RetryPolicy, RollbackPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Durable store backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Mongo,
    Sqlite { path: PathBuf },
    Memory,
}

/// KV tier backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvBackend {
    Mongo,
    Memory,
}

/// Invalidation bus backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusBackend {
    Mongo,
    Local,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Base for the URLs handed back on create/update. Always ends with `/`.
    pub base_url: Url,

    pub store: StoreBackend,
    pub kv: KvBackend,
    pub bus: BusBackend,

    // MongoDB
    pub mongodb_uri: Option<String>,
    pub mongodb_database: String,

    pub cache: CacheConfig,
    pub retry: RetryPolicy,
    pub rollback: RollbackPolicy,

    /// Length of generated keys.
    pub key_length: usize,
    /// Largest accepted content.
    pub max_content_bytes: usize,
    /// Seed L2 placeholders for stored keys at start.
    pub mirror_on_start: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            store: StoreBackend::Memory,
            kv: KvBackend::Memory,
            bus: BusBackend::Local,
            mongodb_uri: None,
            mongodb_database: "pastel".to_string(),
            cache: CacheConfig::default(),
            retry: RetryPolicy::default(),
            rollback: RollbackPolicy::default(),
            key_length: 6,
            max_content_bytes: 10 * 1024 * 1024,
            mirror_on_start: false,
        }
    }
}

fn default_base_url() -> Url {
    Url::parse("http://localhost:8000/").expect("static URL is valid")
}

/// Parse a base URL, making sure relative joins append to its path.
pub fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let with_slash = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Url::parse(&with_slash).map_err(|_| ConfigError::Invalid {
        var: "PUBLIC_BASE_URL",
        value: raw.to_string(),
    })
}

fn var(name: &'static str) -> Option<String> {
    env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parsed<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match var(name) {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { var: name, value }),
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    /// Fails on unparsable values, or when a MongoDB-backed tier is selected
    /// without `MONGODB_URI`.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let base_url = match var("PUBLIC_BASE_URL") {
            Some(raw) => parse_base_url(&raw)?,
            None => defaults.base_url,
        };

        let store = match var("STORE_BACKEND").map(|s| s.to_lowercase()).as_deref() {
            None | Some("mongodb") | Some("mongo") => StoreBackend::Mongo,
            Some("sqlite") => StoreBackend::Sqlite {
                path: var("SQLITE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("data/pastel.db")),
            },
            Some("memory") => StoreBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "STORE_BACKEND",
                    value: other.to_string(),
                });
            }
        };

        let kv = match var("KV_BACKEND").map(|s| s.to_lowercase()).as_deref() {
            None | Some("mongodb") | Some("mongo") => KvBackend::Mongo,
            Some("memory") => KvBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "KV_BACKEND",
                    value: other.to_string(),
                });
            }
        };

        let bus = match var("BUS_BACKEND").map(|s| s.to_lowercase()).as_deref() {
            None | Some("mongodb") | Some("mongo") => BusBackend::Mongo,
            Some("local") => BusBackend::Local,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "BUS_BACKEND",
                    value: other.to_string(),
                });
            }
        };

        let mongodb_uri = var("MONGODB_URI");
        let needs_mongo =
            store == StoreBackend::Mongo || kv == KvBackend::Mongo || bus == BusBackend::Mongo;
        if needs_mongo && mongodb_uri.is_none() {
            return Err(ConfigError::Missing("MONGODB_URI"));
        }

        let cache = CacheConfig::with_capacity(parsed("L1_MAX_CAPACITY", defaults.cache.max_capacity)?)
            .ttl(Duration::from_secs(parsed("L1_TTL_SECS", defaults.cache.ttl.as_secs())?))
            .negative_ttl(Duration::from_secs(parsed(
                "L1_NEGATIVE_TTL_SECS",
                defaults.cache.negative_ttl.as_secs(),
            )?));

        let retry = RetryPolicy::new(
            parsed("RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
            Duration::from_millis(parsed(
                "RETRY_BASE_DELAY_MS",
                defaults.retry.base_delay.as_millis() as u64,
            )?),
        );

        let rollback = RollbackPolicy::new(
            parsed("ROLLBACK_ATTEMPTS", defaults.rollback.attempts)?,
            Duration::from_millis(parsed(
                "ROLLBACK_DELAY_MS",
                defaults.rollback.delay.as_millis() as u64,
            )?),
        );

        Ok(Self {
            base_url,
            store,
            kv,
            bus,
            mongodb_uri,
            mongodb_database: var("MONGODB_DATABASE").unwrap_or(defaults.mongodb_database),
            cache,
            retry,
            rollback,
            key_length: parsed("KEY_LENGTH", defaults.key_length)?,
            max_content_bytes: parsed("MAX_CONTENT_BYTES", defaults.max_content_bytes)?,
            mirror_on_start: parsed("MIRROR_ON_START", defaults.mirror_on_start)?,
        })
    }
}
