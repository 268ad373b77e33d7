//! Hashing utilities for shardkv
//!
//! Keys are partitioned over shard groups `data1..=dataN` by BLAKE3 of the
//! key modulo the shard count.

/// Prefix of every shard group id.
pub const SHARD_PREFIX: &str = "data";

/// Compute shard number for a key, in `0..num_shards`.
pub fn shard_key(key: &str, num_shards: u64) -> u64 {
    let hash = blake3::hash(key.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&hash.as_bytes()[0..8]);
    u64::from_le_bytes(head) % num_shards.max(1)
}

/// Shard group id for a numeric shard id (1-based).
pub fn shard_group_name(shard_id: u32) -> String {
    format!("{}{}", SHARD_PREFIX, shard_id)
}

/// Shard group responsible for `key` when `shard_count` groups exist:
/// `"data" + (hash(key) mod shard_count + 1)`.
pub fn shard_group_for_key(key: &str, shard_count: u64) -> String {
    format!("{}{}", SHARD_PREFIX, shard_key(key, shard_count) + 1)
}
