//! Pastel - three-tier paste store coordinator
//!
//! Serves paste records from a process-local cache (L1), a shared KV tier
//! with compare-and-swap (L2) and a durable store (L3), keeping them
//! consistent across nodes through an invalidation bus.
//!
//! ## Architecture
//!
//! - `config` - Environment configuration
//! - `bootstrap` - Backend selection from configuration
//! - `coordinator` - Read/write paths, persistence queue, bus listener
//! - `cache` - L1 on Moka
//! - `kv` - L2 contract, MongoDB and in-memory backends
//! - `database` - L3 contract, MongoDB, SQLite and in-memory backends
//! - `bus` - Invalidation bus, MongoDB capped collection or in-process
//! - `paste` - Records, projections, keys, content hash
//! - `retry` - Backoff for transient faults, fixed-delay rollback retry
//! - `error` - Store faults and caller-facing errors

pub mod bootstrap;
pub mod bus;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod database;
pub mod error;
pub mod kv;
pub mod paste;
pub mod retry;

pub use bootstrap::Backends;
pub use config::Config;
pub use coordinator::{Coordinator, Created, Deleted, Tiers, Updated};
pub use error::{PasteError, StoreError};
pub use paste::{Paste, PasteDraft, PasteMeta, Requester};
