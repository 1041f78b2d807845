//! Cache module - process-local tier (L1) built on Moka.
//!
//! ## Architecture
//!
//! - `CacheConfig` - capacity and lifetimes, builder style
//! - `LocalCache` - typed wrapper over `moka::sync::Cache`
//! - `L1Entry` - full record, permission-only projection, or negative marker
//!
//! ## Usage
//!
//! ```rust,ignore
//! let l1 = LocalCache::new(&CacheConfig::default());
//! l1.insert("abcd", L1Entry::Missing);
//! assert_eq!(l1.get("abcd"), Some(L1Entry::Missing));
//! ```

mod config;
mod local;

pub use config::CacheConfig;
pub use local::{L1Entry, LocalCache};
