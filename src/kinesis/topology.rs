//! Shard Topology Algorithms
//!
//! Pure functions over shard arrays: uniform creation, split, merge, and
//! rescale. The state-machine side (status transitions, deferred
//! completion, locking) lives in `registry.rs`; everything here takes a
//! shard list and returns the mutated list, which keeps the invariant -
//! open-shard ranges exactly tile [0, 2^128-1] - testable in isolation.

use crate::kinesis::types::{ShardData, MAX_HASH_KEY};

/// Width of each range when the key space is divided into `count` equal
/// parts (floor division; the final shard absorbs the remainder).
fn uniform_width(count: u64) -> u128 {
    // 2^128 / count, computed without representing 2^128 itself. A single
    // shard takes the whole space; its width is never added to anything.
    let count = count as u128;
    if count == 1 {
        return MAX_HASH_KEY;
    }
    MAX_HASH_KEY / count + u128::from(MAX_HASH_KEY % count == count - 1)
}

/// Partition the full key space into `count` shards with sequential
/// indices starting at `first_index`.
pub fn uniform_shards(count: u64, first_index: u32, now_secs: u64) -> Vec<ShardData> {
    let width = uniform_width(count);
    (0..count)
        .map(|i| {
            let start = width * i as u128;
            let end = if i == count - 1 {
                MAX_HASH_KEY
            } else {
                start + width - 1
            };
            ShardData::open(first_index + i as u32, start, end, now_secs)
        })
        .collect()
}

/// Close `parent` and append two children splitting its range at
/// `new_starting_hash_key`. The caller has already validated the key lies
/// strictly inside the parent's range.
pub fn split(shards: &mut Vec<ShardData>, parent_index: u32, new_starting_hash_key: u128, now_secs: u64) {
    let next_index = shards.len() as u32;
    let parent = &mut shards[parent_index as usize];
    parent.close(now_secs);
    let parent_id = parent.shard_id();
    let (start, end) = (parent.starting_hash_key, parent.ending_hash_key);

    let mut low = ShardData::open(next_index, start, new_starting_hash_key - 1, now_secs);
    low.parent_shard_id = Some(parent_id.clone());
    let mut high = ShardData::open(next_index + 1, new_starting_hash_key, end, now_secs);
    high.parent_shard_id = Some(parent_id);
    shards.push(low);
    shards.push(high);
}

/// Close both parents and append one child spanning their union. The
/// caller has already validated adjacency.
pub fn merge(shards: &mut Vec<ShardData>, shard_index: u32, adjacent_index: u32, now_secs: u64) {
    let next_index = shards.len() as u32;
    let (start, parent_id) = {
        let shard = &mut shards[shard_index as usize];
        shard.close(now_secs);
        (shard.starting_hash_key, shard.shard_id())
    };
    let (end, adjacent_id) = {
        let adjacent = &mut shards[adjacent_index as usize];
        adjacent.close(now_secs);
        (adjacent.ending_hash_key, adjacent.shard_id())
    };

    let mut child = ShardData::open(next_index, start, end, now_secs);
    child.parent_shard_id = Some(parent_id);
    child.adjacent_parent_shard_id = Some(adjacent_id);
    shards.push(child);
}

/// Close every open shard and append `target` uniform shards covering the
/// full key space, ids continuing the existing sequence.
pub fn rescale(shards: &mut Vec<ShardData>, target: u64, now_secs: u64) {
    for shard in shards.iter_mut() {
        if shard.is_open() {
            shard.close(now_secs);
        }
    }
    let next_index = shards.len() as u32;
    shards.extend(uniform_shards(target, next_index, now_secs));
}

/// Verify the open shards exactly tile [0, 2^128-1]: no gaps, no
/// overlaps. Testing hook for the topology invariant.
pub fn open_shards_cover_key_space(shards: &[ShardData]) -> bool {
    let mut open: Vec<&ShardData> = shards.iter().filter(|s| s.is_open()).collect();
    open.sort_by_key(|s| s.starting_hash_key);
    let mut expected: u128 = 0;
    for shard in &open {
        if shard.starting_hash_key != expected || shard.ending_hash_key < shard.starting_hash_key {
            return false;
        }
        if shard.ending_hash_key == MAX_HASH_KEY {
            return expected == shard.starting_hash_key && shard == open.last().unwrap();
        }
        expected = shard.ending_hash_key + 1;
    }
    false
}
