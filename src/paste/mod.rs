//! Paste domain types.

mod hash;
mod key;
mod record;

pub use hash::{content_hash, content_hash_seeded, HASH_LIMIT};
pub use key::{generate_key, is_valid_key, MAX_KEY_LEN, MIN_KEY_LEN};
pub use record::{
    now_ms, tombstone_expire, Page, Paste, PasteDraft, PasteMeta, PasteSummary, Requester,
};
