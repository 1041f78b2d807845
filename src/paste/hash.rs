//! 53-bit content hash.
//!
//! cyrb53 over the raw content bytes. Not cryptographic: the value is an
//! ETag and a change detector, nothing more.

/// Largest value the hash can produce (exclusive).
pub const HASH_LIMIT: u64 = 1 << 53;

/// Hash `data` with the default seed.
pub fn content_hash(data: &[u8]) -> u64 {
    content_hash_seeded(data, 0)
}

/// Hash `data` with an explicit seed.
pub fn content_hash_seeded(data: &[u8], seed: u32) -> u64 {
    let mut h1: u32 = 0xdead_beef ^ seed;
    let mut h2: u32 = 0x41c6_ce57 ^ seed;

    for &byte in data {
        let ch = u32::from(byte);
        h1 = (h1 ^ ch).wrapping_mul(2_654_435_761);
        h2 = (h2 ^ ch).wrapping_mul(1_597_334_677);
    }

    h1 = (h1 ^ (h1 >> 16)).wrapping_mul(2_246_822_507);
    h1 ^= (h2 ^ (h2 >> 13)).wrapping_mul(3_266_489_909);
    h2 = (h2 ^ (h2 >> 16)).wrapping_mul(2_246_822_507);
    h2 ^= (h1 ^ (h1 >> 13)).wrapping_mul(3_266_489_909);

    (u64::from(h2 & 0x1f_ffff) << 32) | u64::from(h1)
}
