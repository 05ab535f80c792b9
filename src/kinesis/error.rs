//! Typed errors and their message templates.
//!
//! Message wording is part of the compatibility contract with the emulated
//! service: clients match on these strings, so every template is frozen
//! here behind a constructor and covered by tests. Do not paraphrase.

use crate::kinesis::clock::js_date_string;
use crate::store::StoreError;

/// Iterator and NextToken validity window.
pub const ITERATOR_TTL_MILLIS: u64 = 300_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KinesisError {
    ResourceNotFound(String),
    ResourceInUse(String),
    LimitExceeded(String),
    InvalidArgument(String),
    ExpiredIterator(String),
    ExpiredNextToken(String),
    ProvisionedThroughputExceeded(String),
    /// Reserved for the sequence-version compatibility quirk: surfaces as an
    /// opaque server fault, never as a client error.
    InternalFailure,
    /// Fatal storage failure. Never produced for not-found/not-open cases.
    Store(StoreError),
}

impl KinesisError {
    /// Wire-level error code, as clients would see it in the `__type` field.
    pub fn code(&self) -> &'static str {
        match self {
            KinesisError::ResourceNotFound(_) => "ResourceNotFoundException",
            KinesisError::ResourceInUse(_) => "ResourceInUseException",
            KinesisError::LimitExceeded(_) => "LimitExceededException",
            KinesisError::InvalidArgument(_) => "InvalidArgumentException",
            KinesisError::ExpiredIterator(_) => "ExpiredIteratorException",
            KinesisError::ExpiredNextToken(_) => "ExpiredNextTokenException",
            KinesisError::ProvisionedThroughputExceeded(_) => {
                "ProvisionedThroughputExceededException"
            }
            KinesisError::InternalFailure => "InternalFailure",
            KinesisError::Store(_) => "InternalFailure",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            KinesisError::ResourceNotFound(m)
            | KinesisError::ResourceInUse(m)
            | KinesisError::LimitExceeded(m)
            | KinesisError::InvalidArgument(m)
            | KinesisError::ExpiredIterator(m)
            | KinesisError::ExpiredNextToken(m)
            | KinesisError::ProvisionedThroughputExceeded(m) => m,
            KinesisError::InternalFailure => "",
            KinesisError::Store(_) => "",
        }
    }
}

impl std::fmt::Display for KinesisError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KinesisError::Store(e) => write!(f, "InternalFailure: {}", e),
            KinesisError::InternalFailure => write!(f, "InternalFailure"),
            _ => write!(f, "{}: {}", self.code(), self.message()),
        }
    }
}

impl std::error::Error for KinesisError {}

impl From<StoreError> for KinesisError {
    fn from(e: StoreError) -> Self {
        KinesisError::Store(e)
    }
}

// ============================================================================
// Message templates
// ============================================================================

pub fn stream_not_found(account_id: &str, stream_name: &str) -> KinesisError {
    KinesisError::ResourceNotFound(format!(
        "Stream {} under account {} not found.",
        stream_name, account_id
    ))
}

pub fn shard_not_found(account_id: &str, stream_name: &str, shard_id: &str) -> KinesisError {
    KinesisError::ResourceNotFound(format!(
        "Could not find shard {} in stream {} under account {}.",
        shard_id, stream_name, account_id
    ))
}

pub fn stream_already_exists(account_id: &str, stream_name: &str) -> KinesisError {
    KinesisError::ResourceInUse(format!(
        "Stream {} under account {} already exists.",
        stream_name, account_id
    ))
}

pub fn stream_not_active(account_id: &str, stream_name: &str, status: &str) -> KinesisError {
    KinesisError::ResourceInUse(format!(
        "Stream {} under account {} not ACTIVE, instead in state {}.",
        stream_name, account_id, status
    ))
}

pub fn shard_limit_exceeded(
    account_id: &str,
    region: &str,
    current: u64,
    limit: u64,
    additional: u64,
) -> KinesisError {
    KinesisError::LimitExceeded(format!(
        "This request would exceed the shard limit for the account {} in {}. \
         Current shard count for the account: {}. Limit: {}. \
         Number of additional shards that would have resulted from this request: {}. \
         Refer to the AWS Service Limits page \
         (http://docs.aws.amazon.com/general/latest/gr/aws_service_limits.html#limits_kinesis) \
         for current limits and how to request higher limits.",
        account_id, region, current, limit, additional
    ))
}

pub fn scale_up_limit(current: u64, target: u64) -> KinesisError {
    KinesisError::LimitExceeded(format!(
        "UpdateShardCount cannot scale up over double your current open shard count. \
         Current open shard count: {} Target shard count: {}",
        current, target
    ))
}

pub fn scale_down_limit(current: u64, target: u64) -> KinesisError {
    KinesisError::LimitExceeded(format!(
        "UpdateShardCount cannot scale down below half your current open shard count. \
         Current open shard count: {} Target shard count: {}",
        current, target
    ))
}

pub fn too_many_tags(account_id: &str, stream_name: &str) -> KinesisError {
    KinesisError::LimitExceeded(format!(
        "Failed to add tags to stream {} under account {} because a stream can have up to \
         10 tags.",
        stream_name, account_id
    ))
}

pub fn invalid_iterator() -> KinesisError {
    KinesisError::InvalidArgument("Invalid ShardIterator.".to_string())
}

pub fn expired_iterator(mint_millis: u64, now_millis: u64) -> KinesisError {
    KinesisError::ExpiredIterator(format!(
        "Iterator expired. The iterator was created at time {} while right now it is {} \
         which is further in the future than the tolerated delay of {} milliseconds.",
        js_date_string(mint_millis),
        js_date_string(now_millis),
        ITERATOR_TTL_MILLIS
    ))
}

pub fn invalid_next_token() -> KinesisError {
    KinesisError::InvalidArgument("Invalid NextToken.".to_string())
}

pub fn expired_next_token() -> KinesisError {
    KinesisError::ExpiredNextToken(
        "NextToken expired. NextTokens are only valid for 300 seconds.".to_string(),
    )
}

pub fn invalid_explicit_hash_key(hash_key: &str) -> KinesisError {
    KinesisError::InvalidArgument(format!(
        "Invalid ExplicitHashKey. ExplicitHashKey must be in the range [0, 2^128-1]: {}",
        hash_key
    ))
}

pub fn invalid_new_starting_hash_key(value: &str) -> KinesisError {
    KinesisError::InvalidArgument(format!("Invalid NewStartingHashKey: {}", value))
}

pub fn invalid_split_hash_key(
    new_starting_hash_key: u128,
    shard_id: &str,
    starting_hash_key: u128,
    ending_hash_key: u128,
) -> KinesisError {
    KinesisError::InvalidArgument(format!(
        "NewStartingHashKey {} used in SplitShard() on shard {} is not both greater than \
         one plus the shard's StartingHashKey {} and less than the shard's EndingHashKey {}.",
        new_starting_hash_key, shard_id, starting_hash_key, ending_hash_key
    ))
}

pub fn shards_not_adjacent(
    account_id: &str,
    stream_name: &str,
    shard_id: &str,
    adjacent_shard_id: &str,
) -> KinesisError {
    KinesisError::InvalidArgument(format!(
        "Shards {} and {} in stream {} under account {} are not an adjacent pair.",
        shard_id, adjacent_shard_id, stream_name, account_id
    ))
}

pub fn shard_closed(account_id: &str, stream_name: &str, shard_id: &str) -> KinesisError {
    KinesisError::InvalidArgument(format!(
        "Shard {} in stream {} under account {} has already been merged or split and is no \
         longer eligible for this operation.",
        shard_id, stream_name, account_id
    ))
}

pub fn invalid_sequence_number(sequence_number: &str) -> KinesisError {
    KinesisError::InvalidArgument(format!("Invalid SequenceNumber: {}", sequence_number))
}

pub fn unsupported_sequence_version(sequence_number: &str, version: u8) -> KinesisError {
    KinesisError::InvalidArgument(format!(
        "SequenceNumber {} has an unsupported version: {}.",
        sequence_number, version
    ))
}

pub fn sequence_encodes_other_shard(encoded_shard_id: &str, shard_id: &str) -> KinesisError {
    KinesisError::InvalidArgument(format!(
        "Invalid StartingSequenceNumber. It encodes {}, while it was used in a call to a \
         shard with {}",
        encoded_shard_id, shard_id
    ))
}

pub fn throughput_exceeded(account_id: &str, stream_name: &str, shard_id: &str) -> KinesisError {
    KinesisError::ProvisionedThroughputExceeded(format!(
        "Rate exceeded for shard {} in stream {} under account {}.",
        shard_id, stream_name, account_id
    ))
}

pub fn retention_increase_too_short(
    stream_name: &str,
    requested_hours: u32,
    current_hours: u32,
) -> KinesisError {
    KinesisError::InvalidArgument(format!(
        "Requested retention period ({} hours) for stream {} can not be shorter than \
         existing retention period ({} hours). Use DecreaseRetentionPeriod API.",
        requested_hours, stream_name, current_hours
    ))
}

pub fn retention_decrease_too_long(
    stream_name: &str,
    requested_hours: u32,
    current_hours: u32,
) -> KinesisError {
    KinesisError::InvalidArgument(format!(
        "Requested retention period ({} hours) for stream {} can not be longer than \
         existing retention period ({} hours). Use IncreaseRetentionPeriod API.",
        requested_hours, stream_name, current_hours
    ))
}
