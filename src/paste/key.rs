//! Paste key rules and generation.

use rand::Rng;
use rand::distr::Alphanumeric;

/// Shortest accepted key.
pub const MIN_KEY_LEN: usize = 2;

/// Longest accepted key.
pub const MAX_KEY_LEN: usize = 32;

/// Check that `key` is 2-32 characters of `[A-Za-z0-9-._]`.
///
/// Dot-only keys are refused; they would resolve as relative path segments.
pub fn is_valid_key(key: &str) -> bool {
    (MIN_KEY_LEN..=MAX_KEY_LEN).contains(&key.len())
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_'))
        && key.bytes().any(|b| b != b'.')
}

/// Generate a random alphanumeric key of `len` characters.
///
/// `len` is clamped into the accepted key range.
pub fn generate_key(len: usize) -> String {
    let len = len.clamp(MIN_KEY_LEN, MAX_KEY_LEN);
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
