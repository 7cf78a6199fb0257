//! Key hashing for ring placement
//!
//! Both functions are pure: no seed, no process state. A given entity maps to
//! the same ring position across restarts and across implementations.

use std::hash::Hasher;

use fnv::FnvHasher;

use crate::model::EntityKey;

/// 64-bit golden ratio, used to decorrelate sequential shard seeds
pub const GOLDEN_GAMMA: u64 = 0x9e37_79b9_7f4a_7c15;

/// Ring key of an entity: FNV-1a over the key's 8 little-endian bytes
pub fn hash_key(key: EntityKey) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(&key.to_le_bytes());
    hasher.finish()
}

/// 64-bit avalanche finalizer (the fmix64 stage of MurmurHash3).
///
/// Three xor-shift rounds separated by multiplications with odd constants.
/// Not suitable for anything security sensitive.
pub fn mix64(mut x: u64) -> u64 {
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
    x ^= x >> 33;
    x = x.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    x ^= x >> 33;
    x
}

/// Seed of virtual node `replica` of `shard`. The `+1` keeps shard 0 away from zero,
/// which is a fixed point of [`mix64`].
pub fn point_seed(shard: usize, replica: usize) -> u64 {
    (shard as u64)
        .wrapping_add(1)
        .wrapping_mul(GOLDEN_GAMMA)
        .wrapping_add(replica as u64)
}
