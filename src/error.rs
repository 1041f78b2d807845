//! Error types.
//!
//! `StoreError` covers faults raised by the KV tier, the durable store and the
//! invalidation bus. `PasteError` is what callers of the coordinator see; it
//! never carries driver details.

use std::io;

use serde_json::{json, Value};
use thiserror::Error;

/// MongoDB command codes treated as "server temporarily unavailable".
const MONGO_TRANSIENT_CODES: &[i32] = &[
    6,     // HostUnreachable
    7,     // HostNotFound
    89,    // NetworkTimeout
    91,    // ShutdownInProgress
    189,   // PrimarySteppedDown
    9001,  // SocketException
    10107, // NotWritablePrimary
    11600, // InterruptedAtShutdown
    11602, // InterruptedDueToReplStateChange
    13435, // NotPrimaryNoSecondaryOk
    13436, // NotPrimaryOrSecondary
];

/// SQLite primary/extended result codes for a busy or locked database.
const SQLITE_TRANSIENT_CODES: &[&str] = &["5", "6", "261", "262", "517"];

/// Tier-level failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("store temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("mongodb error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for tier operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Whether the retry policy may try again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Timeout(_) | Self::Unavailable(_) => true,
            Self::Mongo(err) => mongo_is_transient(err),
            Self::Sqlite(err) => sqlite_is_transient(err),
            Self::Serialization(_) | Self::Internal(_) => false,
        }
    }
}

impl From<mongodb::bson::ser::Error> for StoreError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

fn io_is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::TimedOut
    )
}

fn mongo_is_transient(err: &mongodb::error::Error) -> bool {
    use mongodb::error::ErrorKind;

    match err.kind.as_ref() {
        ErrorKind::Io(io) => io_is_transient(io),
        ErrorKind::ServerSelection { .. } | ErrorKind::ConnectionPoolCleared { .. } => true,
        ErrorKind::Command(cmd) => MONGO_TRANSIENT_CODES.contains(&cmd.code),
        _ => false,
    }
}

fn sqlite_is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(io) => io_is_transient(io),
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => db
            .code()
            .is_some_and(|code| SQLITE_TRANSIENT_CODES.contains(&code.as_ref())),
        _ => false,
    }
}

/// Caller-facing outcome of a coordinator operation that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PasteError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("content too large: {size} bytes (limit {limit})")]
    TooLarge { size: usize, limit: usize },

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("key already taken: {0}")]
    Conflict(String),

    #[error("service temporarily unavailable")]
    Unavailable,
}

impl PasteError {
    /// HTTP status the outer layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidKey(_) => 400,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::Conflict(_) => 409,
            Self::TooLarge { .. } => 413,
            Self::Unavailable => 503,
        }
    }

    /// JSON body for the outer layer.
    pub fn to_json(&self) -> Value {
        json!({
            "status": self.status_code(),
            "error": self.to_string(),
        })
    }
}
