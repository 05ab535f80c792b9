//! Stream and shard metadata types.
//!
//! `StreamData`/`ShardData` are the internal persisted forms. They carry
//! fields that must never reach clients (the tag map, the per-group
//! sequence counters, the pending shard count of a CREATING stream); the
//! client-visible projections live in `actions.rs` and are built from
//! these via the `describe_*` methods.

use crate::kinesis::sequence::SequenceNumber;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Largest value of the 128-bit hash-key space.
pub const MAX_HASH_KEY: u128 = u128::MAX;

/// Shard-index block size sharing one sequence counter.
pub const SEQUENCE_COUNTER_GROUP: u32 = 5;

/// Maximum number of tags per stream.
pub const MAX_TAGS_PER_STREAM: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamStatus {
    Creating,
    Active,
    Updating,
    Deleting,
}

impl StreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamStatus::Creating => "CREATING",
            StreamStatus::Active => "ACTIVE",
            StreamStatus::Updating => "UPDATING",
            StreamStatus::Deleting => "DELETING",
        }
    }
}

/// Persisted shard metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardData {
    /// Position in the stream's creation order; never reused.
    pub index: u32,
    pub parent_shard_id: Option<String>,
    /// Set only on merge results.
    pub adjacent_parent_shard_id: Option<String>,
    pub starting_hash_key: u128,
    pub ending_hash_key: u128,
    pub starting_sequence_number: String,
    /// None while the shard is open.
    pub ending_sequence_number: Option<String>,
    /// Creation time in epoch seconds; embedded in sequence numbers.
    pub created_secs: u64,
}

impl ShardData {
    /// A freshly opened shard covering `[start, end]`.
    pub fn open(index: u32, start: u128, end: u128, now_secs: u64) -> Self {
        ShardData {
            index,
            parent_shard_id: None,
            adjacent_parent_shard_id: None,
            starting_hash_key: start,
            ending_hash_key: end,
            starting_sequence_number: SequenceNumber::shard_start(now_secs, index).encode(),
            ending_sequence_number: None,
            created_secs: now_secs,
        }
    }

    pub fn shard_id(&self) -> String {
        shard_id_from_index(self.index)
    }

    pub fn is_open(&self) -> bool {
        self.ending_sequence_number.is_none()
    }

    /// Mint the terminal sequence number and close the shard.
    pub fn close(&mut self, now_secs: u64) {
        self.ending_sequence_number =
            Some(SequenceNumber::shard_end(self.created_secs, self.index, now_secs).encode());
    }
}

/// Persisted stream metadata. Everything below `tags` is internal-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamData {
    pub name: String,
    pub status: StreamStatus,
    pub retention_hours: u32,
    pub created_secs: u64,
    pub shards: Vec<ShardData>,
    /// Hidden: never projected into describe output.
    pub tags: BTreeMap<String, String>,
    /// Hidden: next sequence index per block of 5 shard indices. `None`
    /// until a group mints its first record.
    pub sequence_counters: Vec<Option<u64>>,
    /// Hidden: shard count recorded at CreateStream, materialized when the
    /// stream flips to ACTIVE.
    pub pending_shard_count: Option<u64>,
}

impl StreamData {
    pub fn new(name: String, shard_count: u64, now_secs: u64) -> Self {
        StreamData {
            name,
            status: StreamStatus::Creating,
            retention_hours: 24,
            created_secs: now_secs,
            shards: Vec::new(),
            tags: BTreeMap::new(),
            sequence_counters: Vec::new(),
            pending_shard_count: Some(shard_count),
        }
    }

    pub fn open_shards(&self) -> impl Iterator<Item = &ShardData> {
        self.shards.iter().filter(|s| s.is_open())
    }

    /// Open shards plus the not-yet-materialized shards of a CREATING
    /// stream; the unit the account-wide limit counts.
    pub fn open_shard_count(&self) -> u64 {
        self.open_shards().count() as u64 + self.pending_shard_count.unwrap_or(0)
    }

    pub fn find_shard(&self, shard_id: &str) -> Option<&ShardData> {
        let index = parse_shard_id(shard_id)?;
        self.shards.get(index as usize).filter(|s| s.index == index)
    }

    /// Next shard index for topology changes (ids are never reused).
    pub fn next_shard_index(&self) -> u32 {
        self.shards.len() as u32
    }
}

pub fn shard_id_from_index(index: u32) -> String {
    format!("shardId-{:012}", index)
}

/// Parse `shardId-<12 digits>`; None when the shape is wrong.
pub fn parse_shard_id(shard_id: &str) -> Option<u32> {
    let digits = shard_id.strip_prefix("shardId-")?;
    if digits.len() != 12 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u32>().ok()
}

/// Stream names are `[a-zA-Z0-9_.-]{1,128}`.
pub fn is_valid_stream_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 128
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || b == b'-')
}

/// A record as stored in the per-stream log, keyed by (shard index,
/// sequence). Immutable once written except for retention deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub partition_key: String,
    pub data: Vec<u8>,
    pub arrival_millis: u64,
}

/// Ordered record key: shard index (big-endian) followed by the packed
/// sequence number bytes.
pub fn record_key(shard_index: u32, sequence: &SequenceNumber) -> Vec<u8> {
    let mut key = Vec::with_capacity(27);
    key.extend_from_slice(&shard_index.to_be_bytes());
    key.extend_from_slice(&sequence.to_key_bytes());
    key
}

/// Exclusive upper bound for all keys of one shard.
pub fn shard_key_upper_bound(shard_index: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(4);
    key.extend_from_slice(&(shard_index + 1).to_be_bytes());
    key
}
