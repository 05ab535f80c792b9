//! Partition-Key Hash Routing
//!
//! A record's partition key is digested to a 128-bit hash key (big-endian
//! MD5, keyless and stable across restarts), and the hash key selects the
//! open shard whose range contains it. Explicit hash keys bypass the
//! digest and are taken verbatim; `u128` covers [0, 2^128-1] exactly, so
//! a successful parse is the whole range check.

use crate::kinesis::types::ShardData;
use md5::{Digest, Md5};

/// 128-bit hash key for a partition key.
pub fn hash_key(partition_key: &str) -> u128 {
    let digest = Md5::digest(partition_key.as_bytes());
    u128::from_be_bytes(digest.into())
}

/// Parse a client-supplied explicit hash key. `None` for anything that is
/// not a plain decimal in [0, 2^128-1].
pub fn parse_explicit_hash_key(value: &str) -> Option<u128> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse::<u128>().ok()
}

/// Find the open shard whose range contains `key`. Open-shard ranges
/// exactly tile the key space, so for any in-range key on a consistent
/// topology exactly one match exists.
pub fn shard_for_hash_key(shards: &[ShardData], key: u128) -> Option<&ShardData> {
    shards
        .iter()
        .filter(|s| s.is_open())
        .find(|s| s.starting_hash_key <= key && key <= s.ending_hash_key)
}
