//! Record Data Plane
//!
//! PutRecord/PutRecords, shard iterators, and GetRecords.
//!
//! ## Sequence counters
//!
//! Sequence indices are drawn from per-group monotonic counters, one
//! counter per block of 5 shard indices. A group's counter initializes to
//! 1 when the minting shard was created in the current second (so the
//! first record sorts above the shard's starting sequence number) and 0
//! otherwise. Counters live inside the stream metadata and are persisted
//! before the record batch; a crash between the two writes loses records
//! but can never duplicate a sequence index.
//!
//! ## Batch commit order
//!
//! PutRecords commits shard batches in a fixed non-sequential permutation
//! of the shard indices, chosen by the stream's current shard count. This
//! reproduces the observable batch ordering of the emulated service and
//! is relied on by compatibility tests; do not simplify to sequential.

use crate::kinesis::actions::{
    GetRecordsInput, GetRecordsOutput, GetShardIteratorInput, GetShardIteratorOutput,
    PutRecordInput, PutRecordOutput, PutRecordsInput, PutRecordsOutput, PutRecordsResultEntry,
    Record, ShardIteratorType,
};
use crate::kinesis::error::{self, KinesisError};
use crate::kinesis::sequence::{self, SequenceDecodeError, SequenceNumber, SEQ_VERSION_QUIRK};
use crate::kinesis::service::{records_ns, KinesisService};
use crate::kinesis::tokens::{self, TokenError};
use crate::kinesis::types::{
    record_key, shard_id_from_index, shard_key_upper_bound, StoredRecord, StreamData,
    SEQUENCE_COUNTER_GROUP,
};
use crate::kinesis::{clock, hashing};
use crate::store::{BatchOp, StoreError};
use rand::Rng;
use std::ops::Bound;
use tracing::warn;

const GET_RECORDS_DEFAULT_LIMIT: usize = 10_000;

/// Draw the next sequence index for a shard, initializing its group
/// counter on first use.
fn next_sequence_index(
    stream: &mut StreamData,
    shard_index: u32,
    shard_created_secs: u64,
    now_secs: u64,
) -> u64 {
    let group = (shard_index / SEQUENCE_COUNTER_GROUP) as usize;
    if stream.sequence_counters.len() <= group {
        stream.sequence_counters.resize(group + 1, None);
    }
    let counter = stream.sequence_counters[group]
        .get_or_insert_with(|| initial_counter(shard_created_secs, now_secs));
    let index = *counter;
    *counter += 1;
    index
}

/// The index the next record in this shard's group would receive, without
/// consuming it.
fn peek_sequence_index(
    stream: &StreamData,
    shard_index: u32,
    shard_created_secs: u64,
    now_secs: u64,
) -> u64 {
    let group = (shard_index / SEQUENCE_COUNTER_GROUP) as usize;
    match stream.sequence_counters.get(group).copied().flatten() {
        Some(counter) => counter,
        None => initial_counter(shard_created_secs, now_secs),
    }
}

/// A shard created this very second starts at 1 so its first record sorts
/// above the shard's starting sequence number (index 0).
fn initial_counter(shard_created_secs: u64, now_secs: u64) -> u64 {
    u64::from(shard_created_secs == now_secs)
}

/// The fixed order in which PutRecords commits per-shard batches.
/// `shard_count` is the stream's total shard count; `indices` are the
/// shards the batch actually touches.
fn shard_commit_order(shard_count: usize, mut indices: Vec<u32>) -> Vec<u32> {
    let stride: u32 = if shard_count < 18 {
        3
    } else if shard_count < 27 {
        4
    } else if shard_count < 50 {
        5
    } else {
        // Large streams commit sequentially by index
        indices.sort_unstable();
        return indices;
    };
    indices.sort_by_key(|&ix| (ix % stride, ix));
    indices
}

/// Classify a client-supplied sequence number for use against `shard_id`.
fn validate_sequence_number(
    value: &str,
    shard_id: &str,
    shard_index: u32,
) -> Result<SequenceNumber, KinesisError> {
    let seq = match SequenceNumber::decode(value) {
        Ok(seq) => seq,
        Err(SequenceDecodeError::Malformed) => return Err(error::invalid_sequence_number(value)),
        Err(SequenceDecodeError::UnsupportedVersion(v)) => {
            return Err(error::unsupported_sequence_version(value, v))
        }
    };
    if seq.version == SEQ_VERSION_QUIRK {
        // Known compatibility defect of the emulated service: this version
        // decodes but validation surfaces an opaque server fault.
        return Err(KinesisError::InternalFailure);
    }
    if seq.shard_index != shard_index {
        return Err(error::sequence_encodes_other_shard(
            &shard_id_from_index(seq.shard_index),
            shard_id,
        ));
    }
    Ok(seq)
}

impl KinesisService {
    fn inject_throughput_fault(&self) -> bool {
        let rate = self.config.throughput_error_rate;
        rate > 0.0 && self.faults.lock().gen_bool(rate.min(1.0))
    }

    fn encode_record(&self, record: &StoredRecord) -> Result<Vec<u8>, KinesisError> {
        bincode::serialize(record).map_err(|e| {
            KinesisError::Store(StoreError::Corruption(format!("encoding record: {}", e)))
        })
    }

    // ========================================================================
    // Write path
    // ========================================================================

    pub async fn put_record(&self, input: PutRecordInput) -> Result<PutRecordOutput, KinesisError> {
        let _guard = self.gate.acquire(&input.stream_name).await;
        let mut stream = self.require_data_visible(&input.stream_name)?;

        let hash = match input.explicit_hash_key.as_deref() {
            Some(value) => hashing::parse_explicit_hash_key(value)
                .ok_or_else(|| error::invalid_explicit_hash_key(value))?,
            None => hashing::hash_key(&input.partition_key),
        };
        let (shard_index, shard_created_secs, shard_id) = {
            let shard = hashing::shard_for_hash_key(&stream.shards, hash)
                .ok_or(KinesisError::InternalFailure)?;
            (shard.index, shard.created_secs, shard.shard_id())
        };

        if let Some(value) = input.sequence_number_for_ordering.as_deref() {
            // Validated but otherwise ignored; ordering comes from the gate.
            validate_sequence_number(value, &shard_id, shard_index)?;
        }

        if self.inject_throughput_fault() {
            return Err(error::throughput_exceeded(
                &self.config.account_id,
                &input.stream_name,
                &shard_id,
            ));
        }

        let now_millis = clock::now_millis();
        let now_secs = now_millis / 1000;
        let seq_index = next_sequence_index(&mut stream, shard_index, shard_created_secs, now_secs);
        let seq = SequenceNumber::new(shard_created_secs, shard_index, seq_index, now_secs);

        // Counters first: losing the record is recoverable, reusing a
        // sequence index is not.
        self.save_stream(&stream)?;
        let record = StoredRecord {
            partition_key: input.partition_key,
            data: input.data,
            arrival_millis: now_millis,
        };
        self.store.put(
            &records_ns(&input.stream_name),
            &record_key(shard_index, &seq),
            &self.encode_record(&record)?,
        )?;

        Ok(PutRecordOutput {
            shard_id,
            sequence_number: seq.encode(),
        })
    }

    pub async fn put_records(
        &self,
        input: PutRecordsInput,
    ) -> Result<PutRecordsOutput, KinesisError> {
        let _guard = self.gate.acquire(&input.stream_name).await;
        let mut stream = self.require_data_visible(&input.stream_name)?;
        let records_namespace = records_ns(&input.stream_name);

        // Resolve every entry to its shard (or a synthetic failure) before
        // minting anything.
        enum Resolved {
            Shard { index: u32, created_secs: u64 },
            Failed { shard_id: String },
        }
        let mut resolved = Vec::with_capacity(input.records.len());
        for entry in &input.records {
            let hash = match entry.explicit_hash_key.as_deref() {
                Some(value) => hashing::parse_explicit_hash_key(value)
                    .ok_or_else(|| error::invalid_explicit_hash_key(value))?,
                None => hashing::hash_key(&entry.partition_key),
            };
            let shard = hashing::shard_for_hash_key(&stream.shards, hash)
                .ok_or(KinesisError::InternalFailure)?;
            if self.inject_throughput_fault() {
                resolved.push(Resolved::Failed {
                    shard_id: shard.shard_id(),
                });
            } else {
                resolved.push(Resolved::Shard {
                    index: shard.index,
                    created_secs: shard.created_secs,
                });
            }
        }

        // Commit shard batches in the fixed permutation; entries within a
        // shard keep request order.
        let mut touched: Vec<u32> = resolved
            .iter()
            .filter_map(|r| match r {
                Resolved::Shard { index, .. } => Some(*index),
                Resolved::Failed { .. } => None,
            })
            .collect();
        touched.sort_unstable();
        touched.dedup();
        let commit_order = shard_commit_order(stream.shards.len(), touched);

        let now_millis = clock::now_millis();
        let now_secs = now_millis / 1000;
        let mut results = vec![PutRecordsResultEntry::default(); input.records.len()];
        let mut failed_record_count = 0u64;
        let mut ops = Vec::new();

        for (entry_index, r) in resolved.iter().enumerate() {
            if let Resolved::Failed { shard_id } = r {
                let err = error::throughput_exceeded(
                    &self.config.account_id,
                    &input.stream_name,
                    shard_id,
                );
                results[entry_index] = PutRecordsResultEntry {
                    error_code: Some(err.code().to_string()),
                    error_message: Some(err.message().to_string()),
                    ..Default::default()
                };
                failed_record_count += 1;
            }
        }

        for shard_index in commit_order {
            for (entry_index, r) in resolved.iter().enumerate() {
                let created_secs = match r {
                    Resolved::Shard {
                        index,
                        created_secs,
                    } if *index == shard_index => *created_secs,
                    _ => continue,
                };
                let seq_index =
                    next_sequence_index(&mut stream, shard_index, created_secs, now_secs);
                let seq = SequenceNumber::new(created_secs, shard_index, seq_index, now_secs);
                let record = StoredRecord {
                    partition_key: input.records[entry_index].partition_key.clone(),
                    data: input.records[entry_index].data.clone(),
                    arrival_millis: now_millis,
                };
                ops.push(BatchOp::Put {
                    key: record_key(shard_index, &seq),
                    value: self.encode_record(&record)?,
                });
                results[entry_index] = PutRecordsResultEntry {
                    sequence_number: Some(seq.encode()),
                    shard_id: Some(shard_id_from_index(shard_index)),
                    ..Default::default()
                };
            }
        }

        self.save_stream(&stream)?;
        if !ops.is_empty() {
            self.store.write_batch(&records_namespace, ops)?;
        }

        Ok(PutRecordsOutput {
            failed_record_count,
            records: results,
        })
    }

    // ========================================================================
    // Read path
    // ========================================================================

    pub fn get_shard_iterator(
        &self,
        input: GetShardIteratorInput,
    ) -> Result<GetShardIteratorOutput, KinesisError> {
        let stream = self.require_data_visible(&input.stream_name)?;
        let shard = stream.find_shard(&input.shard_id).ok_or_else(|| {
            error::shard_not_found(&self.config.account_id, &input.stream_name, &input.shard_id)
        })?;

        let now_secs = clock::now_secs();
        let starting_sequence = match input.shard_iterator_type {
            ShardIteratorType::AtSequenceNumber | ShardIteratorType::AfterSequenceNumber => {
                let value = input.starting_sequence_number.as_deref().ok_or_else(|| {
                    KinesisError::InvalidArgument(
                        "StartingSequenceNumber must be provided for iterators of type \
                         AT_SEQUENCE_NUMBER and AFTER_SEQUENCE_NUMBER."
                            .to_string(),
                    )
                })?;
                let seq = validate_sequence_number(value, &input.shard_id, shard.index)?;
                let encoded = seq.encode();
                if input.shard_iterator_type == ShardIteratorType::AfterSequenceNumber {
                    sequence::successor(&encoded)
                } else {
                    encoded
                }
            }
            ShardIteratorType::TrimHorizon => shard.starting_sequence_number.clone(),
            ShardIteratorType::Latest => self.latest_sequence(&stream, shard.index, now_secs),
            ShardIteratorType::AtTimestamp => {
                let timestamp = input.timestamp.ok_or_else(|| {
                    KinesisError::InvalidArgument(
                        "Timestamp must be provided for iterators of type AT_TIMESTAMP."
                            .to_string(),
                    )
                })?;
                let at_millis = (timestamp * 1000.0) as u64;
                match self.first_sequence_at_or_after(&input.stream_name, shard.index, at_millis)? {
                    Some(seq) => seq,
                    None => self.latest_sequence(&stream, shard.index, now_secs),
                }
            }
        };

        Ok(GetShardIteratorOutput {
            shard_iterator: tokens::encode_iterator(
                &input.stream_name,
                &input.shard_id,
                &starting_sequence,
                &self.config.region,
            ),
        })
    }

    /// Sequence number the next record in this shard's counter group would
    /// receive. Read-only: minting happens on write.
    fn latest_sequence(&self, stream: &StreamData, shard_index: u32, now_secs: u64) -> String {
        let shard = &stream.shards[shard_index as usize];
        let seq_index = peek_sequence_index(stream, shard_index, shard.created_secs, now_secs);
        SequenceNumber::new(shard.created_secs, shard_index, seq_index, now_secs).encode()
    }

    /// First stored sequence in the shard whose arrival is at or after
    /// `at_millis`.
    fn first_sequence_at_or_after(
        &self,
        stream_name: &str,
        shard_index: u32,
        at_millis: u64,
    ) -> Result<Option<String>, KinesisError> {
        let entries = self.store.scan(
            &records_ns(stream_name),
            Bound::Included(shard_index.to_be_bytes().to_vec()),
            Bound::Excluded(shard_key_upper_bound(shard_index)),
            None,
        )?;
        for (key, value) in entries {
            let record: StoredRecord = bincode::deserialize(&value).map_err(|e| {
                KinesisError::Store(StoreError::Corruption(format!("decoding record: {}", e)))
            })?;
            if record.arrival_millis >= at_millis {
                let seq = SequenceNumber::decode_key_bytes(&key[4..]).map_err(|_| {
                    KinesisError::Store(StoreError::Corruption(
                        "record key holds an undecodable sequence".to_string(),
                    ))
                })?;
                return Ok(Some(seq.encode()));
            }
        }
        Ok(None)
    }

    pub async fn get_records(
        &self,
        input: GetRecordsInput,
    ) -> Result<GetRecordsOutput, KinesisError> {
        let now_millis = clock::now_millis();
        let payload =
            tokens::decode_iterator(&input.shard_iterator, now_millis).map_err(|e| match e {
                TokenError::Invalid => error::invalid_iterator(),
                TokenError::Expired {
                    mint_millis,
                    now_millis,
                } => error::expired_iterator(mint_millis, now_millis),
            })?;

        let stream = self.require_data_visible(&payload.stream_name)?;
        let shard = stream.find_shard(&payload.shard_id).ok_or_else(|| {
            error::shard_not_found(
                &self.config.account_id,
                &payload.stream_name,
                &payload.shard_id,
            )
        })?;
        let start = SequenceNumber::decode(&payload.sequence_number)
            .map_err(|_| error::invalid_iterator())?;

        let limit = input.limit.unwrap_or(GET_RECORDS_DEFAULT_LIMIT as u64) as usize;
        let namespace = records_ns(&payload.stream_name);
        let entries = self.store.scan(
            &namespace,
            Bound::Included(record_key(shard.index, &start)),
            Bound::Excluded(shard_key_upper_bound(shard.index)),
            Some(limit),
        )?;

        let exhausted = entries.len() < limit;
        let retention_cutoff_secs =
            (now_millis / 1000).saturating_sub(u64::from(stream.retention_hours) * 3600);
        let mut records = Vec::new();
        let mut expired_keys = Vec::new();
        let mut last_sequence: Option<String> = None;
        let mut last_arrival_millis: Option<u64> = None;
        for (key, value) in entries {
            let seq = SequenceNumber::decode_key_bytes(&key[4..]).map_err(|_| {
                KinesisError::Store(StoreError::Corruption(
                    "record key holds an undecodable sequence".to_string(),
                ))
            })?;
            if seq.write_secs < retention_cutoff_secs {
                expired_keys.push(key);
                continue;
            }
            let record: StoredRecord = bincode::deserialize(&value).map_err(|e| {
                KinesisError::Store(StoreError::Corruption(format!("decoding record: {}", e)))
            })?;
            let encoded = seq.encode();
            last_arrival_millis = Some(record.arrival_millis);
            records.push(Record {
                sequence_number: encoded.clone(),
                approximate_arrival_timestamp: record.arrival_millis as f64 / 1000.0,
                data: record.data,
                partition_key: record.partition_key,
            });
            last_sequence = Some(encoded);
        }

        // Retention trimming happens off the response path.
        if !expired_keys.is_empty() {
            let svc = self.clone();
            tokio::spawn(async move {
                let ops = expired_keys
                    .into_iter()
                    .map(|key| BatchOp::Delete { key })
                    .collect();
                match svc.store.write_batch(&namespace, ops) {
                    Ok(()) | Err(StoreError::Closed) => {}
                    Err(e) => warn!(error = %e, "retention trim failed"),
                }
            });
        }

        let next_sequence = match last_sequence {
            Some(last) => sequence::successor(&last),
            None => payload.sequence_number.clone(),
        };
        // A closed shard that has been read to its end is finished; open
        // shards always hand back a resumption point.
        let next_shard_iterator = match shard.ending_sequence_number.as_deref() {
            Some(_) if exhausted => None,
            Some(end) if sequence::compare(&next_sequence, end) == std::cmp::Ordering::Greater => {
                None
            }
            _ => Some(tokens::encode_iterator(
                &payload.stream_name,
                &payload.shard_id,
                &next_sequence,
                &self.config.region,
            )),
        };

        // Caught up once the scan drains the shard; otherwise the lag is
        // measured from the newest record handed back.
        let millis_behind_latest = match last_arrival_millis {
            Some(arrival) if !exhausted => now_millis.saturating_sub(arrival),
            _ => 0,
        };

        Ok(GetRecordsOutput {
            records,
            next_shard_iterator,
            millis_behind_latest,
        })
    }
}
