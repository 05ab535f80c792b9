//! Stream Lifecycle and Topology Actions
//!
//! Control-plane handlers: create/delete, describe/list, tags, retention,
//! and the three topology changes (split, merge, uniform rescale).
//!
//! ## Two-phase transitions
//!
//! Every state change acks immediately with the intermediate status
//! (CREATING/UPDATING/DELETING) persisted, then completes on a timer:
//!
//! ```text
//! request ──> gate ──> validate ──> save intermediate ──> ack
//!                                        │
//!                                        └─ spawn: sleep(delay)
//!                                                  gate
//!                                                  reload + re-check status
//!                                                  apply + save final
//! ```
//!
//! Completions are never cancelled. A completion that finds the stream
//! gone, the status changed by a competing transition, or the store
//! closed becomes a no-op; any other failure is logged and dropped.

use crate::kinesis::actions::{
    AddTagsToStreamInput, CreateStreamInput, DecreaseStreamRetentionPeriodInput,
    DeleteStreamInput, DescribeStreamInput, DescribeStreamOutput, DescribeStreamSummaryInput,
    DescribeStreamSummaryOutput, EmptyOutput, EnhancedMetrics, IncreaseStreamRetentionPeriodInput,
    ListShardsInput, ListShardsOutput, ListStreamsInput, ListStreamsOutput,
    ListTagsForStreamInput, ListTagsForStreamOutput, MergeShardsInput, RemoveTagsFromStreamInput,
    Shard, SplitShardInput, StreamDescription, StreamDescriptionSummary, Tag,
    UpdateShardCountInput, UpdateShardCountOutput,
};
use crate::kinesis::error::{self, KinesisError};
use crate::kinesis::service::{records_ns, KinesisService, STREAMS_NS};
use crate::kinesis::tokens::{self, TokenError};
use crate::kinesis::types::{StreamData, StreamStatus, MAX_TAGS_PER_STREAM};
use crate::kinesis::{clock, topology};
use crate::store::StoreError;
use std::time::Duration;
use tracing::{error, info};

const DESCRIBE_STREAM_DEFAULT_LIMIT: usize = 100;
const LIST_STREAMS_DEFAULT_LIMIT: usize = 100;
const LIST_SHARDS_DEFAULT_LIMIT: usize = 1000;
const LIST_TAGS_DEFAULT_LIMIT: usize = 50;

impl KinesisService {
    // ========================================================================
    // Create / delete
    // ========================================================================

    pub async fn create_stream(
        &self,
        input: CreateStreamInput,
    ) -> Result<EmptyOutput, KinesisError> {
        let _guard = self.gate.acquire(&input.stream_name).await;
        if self.load_stream(&input.stream_name)?.is_some() {
            return Err(error::stream_already_exists(
                &self.config.account_id,
                &input.stream_name,
            ));
        }
        let current = self.account_open_shard_count()?;
        if current + input.shard_count > self.config.shard_limit {
            return Err(error::shard_limit_exceeded(
                &self.config.account_id,
                &self.config.region,
                current,
                self.config.shard_limit,
                input.shard_count,
            ));
        }

        let stream = StreamData::new(input.stream_name.clone(), input.shard_count, clock::now_secs());
        self.save_stream(&stream)?;
        info!(
            stream = %input.stream_name,
            shard_count = input.shard_count,
            "stream creation started"
        );

        let shard_count = input.shard_count;
        self.spawn_completion(
            &input.stream_name,
            StreamStatus::Creating,
            self.config.create_stream_delay,
            move |stream| {
                let now_secs = clock::now_secs();
                stream.pending_shard_count = None;
                stream.shards = topology::uniform_shards(shard_count, 0, now_secs);
                stream.status = StreamStatus::Active;
            },
        );
        Ok(EmptyOutput::default())
    }

    pub async fn delete_stream(
        &self,
        input: DeleteStreamInput,
    ) -> Result<EmptyOutput, KinesisError> {
        let _guard = self.gate.acquire(&input.stream_name).await;
        let mut stream = self.require_stream(&input.stream_name)?;
        if stream.status == StreamStatus::Creating {
            return Err(error::stream_not_active(
                &self.config.account_id,
                &input.stream_name,
                stream.status.as_str(),
            ));
        }

        stream.status = StreamStatus::Deleting;
        self.save_stream(&stream)?;
        // The record log goes away with the ack; only metadata lingers
        // until the deferred removal.
        self.store.delete_namespace(&records_ns(&input.stream_name))?;
        info!(stream = %input.stream_name, "stream deletion started");

        let svc = self.clone();
        let name = input.stream_name.clone();
        let delay = self.config.delete_stream_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _guard = svc.gate.acquire(&name).await;
            match svc.load_stream(&name) {
                Ok(Some(stream)) if stream.status == StreamStatus::Deleting => {
                    let _ = svc.store.delete_namespace(&records_ns(&name));
                    match svc.store.delete(STREAMS_NS, name.as_bytes()) {
                        Ok(()) | Err(StoreError::Closed) => {
                            info!(stream = %name, "stream removed");
                        }
                        Err(e) => error!(stream = %name, error = %e, "stream removal failed"),
                    }
                }
                Ok(_) => {}
                Err(KinesisError::Store(StoreError::Closed)) => {}
                Err(e) => error!(stream = %name, error = %e, "stream removal failed"),
            }
        });
        Ok(EmptyOutput::default())
    }

    /// Schedule the second phase of a two-phase transition. `mutate` runs
    /// only if the stream still exists with `expected` status when the
    /// timer fires.
    fn spawn_completion<F>(
        &self,
        stream_name: &str,
        expected: StreamStatus,
        delay: Duration,
        mutate: F,
    ) where
        F: FnOnce(&mut StreamData) + Send + 'static,
    {
        let svc = self.clone();
        let name = stream_name.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _guard = svc.gate.acquire(&name).await;
            match svc.load_stream(&name) {
                Ok(Some(mut stream)) if stream.status == expected => {
                    mutate(&mut stream);
                    match svc.save_stream(&stream) {
                        Ok(()) | Err(KinesisError::Store(StoreError::Closed)) => {}
                        Err(e) => {
                            error!(stream = %name, error = %e, "deferred transition failed")
                        }
                    }
                }
                // Superseded by a competing transition, or already gone
                Ok(_) => {}
                Err(KinesisError::Store(StoreError::Closed)) => {}
                Err(e) => error!(stream = %name, error = %e, "deferred transition failed"),
            }
        });
    }

    // ========================================================================
    // Describe / list
    // ========================================================================

    pub fn describe_stream(
        &self,
        input: DescribeStreamInput,
    ) -> Result<DescribeStreamOutput, KinesisError> {
        let stream = self.require_stream(&input.stream_name)?;
        let limit = input.limit.unwrap_or(DESCRIBE_STREAM_DEFAULT_LIMIT as u64) as usize;

        let after = input.exclusive_start_shard_id;
        // Fixed-width ids make lexicographic order the index order.
        let eligible: Vec<Shard> = stream
            .shards
            .iter()
            .filter(|s| after.as_deref().map_or(true, |a| s.shard_id().as_str() > a))
            .map(Shard::from_data)
            .collect();
        let has_more_shards = eligible.len() > limit;
        let shards = eligible.into_iter().take(limit).collect();

        Ok(DescribeStreamOutput {
            stream_description: StreamDescription {
                stream_name: stream.name.clone(),
                stream_arn: self.config.stream_arn(&stream.name),
                stream_status: stream.status.as_str().to_string(),
                retention_period_hours: stream.retention_hours,
                stream_creation_timestamp: stream.created_secs as f64,
                enhanced_monitoring: vec![EnhancedMetrics {
                    shard_level_metrics: Vec::new(),
                }],
                encryption_type: "NONE".to_string(),
                has_more_shards,
                shards,
            },
        })
    }

    pub fn describe_stream_summary(
        &self,
        input: DescribeStreamSummaryInput,
    ) -> Result<DescribeStreamSummaryOutput, KinesisError> {
        let stream = self.require_stream(&input.stream_name)?;
        Ok(DescribeStreamSummaryOutput {
            stream_description_summary: StreamDescriptionSummary {
                stream_name: stream.name.clone(),
                stream_arn: self.config.stream_arn(&stream.name),
                stream_status: stream.status.as_str().to_string(),
                retention_period_hours: stream.retention_hours,
                stream_creation_timestamp: stream.created_secs as f64,
                enhanced_monitoring: vec![EnhancedMetrics {
                    shard_level_metrics: Vec::new(),
                }],
                encryption_type: "NONE".to_string(),
                open_shard_count: stream.open_shard_count(),
                consumer_count: 0,
            },
        })
    }

    pub fn list_streams(&self, input: ListStreamsInput) -> Result<ListStreamsOutput, KinesisError> {
        let limit = input.limit.unwrap_or(LIST_STREAMS_DEFAULT_LIMIT as u64) as usize;
        let start_after = input.exclusive_start_stream_name;
        // Fetch one past the page to learn whether more remain.
        let keys = self.store.list_keys(
            STREAMS_NS,
            start_after.as_deref().map(str::as_bytes),
            Some(limit + 1),
        )?;
        let has_more_streams = keys.len() > limit;
        let stream_names = keys
            .into_iter()
            .take(limit)
            .map(|k| String::from_utf8_lossy(&k).into_owned())
            .collect();
        Ok(ListStreamsOutput {
            stream_names,
            has_more_streams,
        })
    }

    pub fn list_shards(&self, input: ListShardsInput) -> Result<ListShardsOutput, KinesisError> {
        let (stream_name, after) = match input.next_token {
            Some(token) => {
                let now = clock::now_millis();
                let (name, shard_id) =
                    tokens::decode_next_token(&token, now).map_err(|e| match e {
                        TokenError::Invalid => error::invalid_next_token(),
                        TokenError::Expired { .. } => error::expired_next_token(),
                    })?;
                (name, Some(shard_id))
            }
            None => {
                let name = input.stream_name.ok_or_else(|| {
                    KinesisError::InvalidArgument(
                        "Either NextToken or StreamName should be provided.".to_string(),
                    )
                })?;
                (name, input.exclusive_start_shard_id)
            }
        };

        let stream = self.require_stream(&stream_name)?;
        let limit = input.max_results.unwrap_or(LIST_SHARDS_DEFAULT_LIMIT as u64) as usize;
        let eligible: Vec<Shard> = stream
            .shards
            .iter()
            .filter(|s| after.as_deref().map_or(true, |a| s.shard_id().as_str() > a))
            .map(Shard::from_data)
            .collect();
        let next_token = if eligible.len() > limit {
            limit
                .checked_sub(1)
                .and_then(|i| eligible.get(i))
                .map(|last| tokens::encode_next_token(&stream_name, &last.shard_id))
        } else {
            None
        };
        let shards = eligible.into_iter().take(limit).collect();
        Ok(ListShardsOutput { shards, next_token })
    }

    // ========================================================================
    // Retention
    // ========================================================================

    pub async fn increase_stream_retention_period(
        &self,
        input: IncreaseStreamRetentionPeriodInput,
    ) -> Result<EmptyOutput, KinesisError> {
        let _guard = self.gate.acquire(&input.stream_name).await;
        let mut stream = self.require_active(&input.stream_name)?;
        if input.retention_period_hours < stream.retention_hours {
            return Err(error::retention_increase_too_short(
                &input.stream_name,
                input.retention_period_hours,
                stream.retention_hours,
            ));
        }
        stream.retention_hours = input.retention_period_hours;
        self.save_stream(&stream)?;
        Ok(EmptyOutput::default())
    }

    pub async fn decrease_stream_retention_period(
        &self,
        input: DecreaseStreamRetentionPeriodInput,
    ) -> Result<EmptyOutput, KinesisError> {
        let _guard = self.gate.acquire(&input.stream_name).await;
        let mut stream = self.require_active(&input.stream_name)?;
        if input.retention_period_hours > stream.retention_hours {
            return Err(error::retention_decrease_too_long(
                &input.stream_name,
                input.retention_period_hours,
                stream.retention_hours,
            ));
        }
        stream.retention_hours = input.retention_period_hours;
        self.save_stream(&stream)?;
        Ok(EmptyOutput::default())
    }

    // ========================================================================
    // Tags
    // ========================================================================

    pub async fn add_tags_to_stream(
        &self,
        input: AddTagsToStreamInput,
    ) -> Result<EmptyOutput, KinesisError> {
        let _guard = self.gate.acquire(&input.stream_name).await;
        let mut stream = self.require_stream(&input.stream_name)?;
        let mut tags = stream.tags.clone();
        tags.extend(input.tags);
        if tags.len() > MAX_TAGS_PER_STREAM {
            return Err(error::too_many_tags(
                &self.config.account_id,
                &input.stream_name,
            ));
        }
        stream.tags = tags;
        self.save_stream(&stream)?;
        Ok(EmptyOutput::default())
    }

    pub async fn remove_tags_from_stream(
        &self,
        input: RemoveTagsFromStreamInput,
    ) -> Result<EmptyOutput, KinesisError> {
        let _guard = self.gate.acquire(&input.stream_name).await;
        let mut stream = self.require_stream(&input.stream_name)?;
        for key in &input.tag_keys {
            stream.tags.remove(key);
        }
        self.save_stream(&stream)?;
        Ok(EmptyOutput::default())
    }

    pub fn list_tags_for_stream(
        &self,
        input: ListTagsForStreamInput,
    ) -> Result<ListTagsForStreamOutput, KinesisError> {
        let stream = self.require_stream(&input.stream_name)?;
        let limit = input.limit.unwrap_or(LIST_TAGS_DEFAULT_LIMIT as u64) as usize;
        let after = input.exclusive_start_tag_key;
        // BTreeMap iteration gives the sorted order the paging contract needs
        let eligible: Vec<Tag> = stream
            .tags
            .iter()
            .filter(|(k, _)| after.as_deref().map_or(true, |a| k.as_str() > a))
            .map(|(k, v)| Tag {
                key: k.clone(),
                value: v.clone(),
            })
            .collect();
        let has_more_tags = eligible.len() > limit;
        let tags = eligible.into_iter().take(limit).collect();
        Ok(ListTagsForStreamOutput {
            tags,
            has_more_tags,
        })
    }

    // ========================================================================
    // Topology changes
    // ========================================================================

    /// The stream must exist and be ACTIVE.
    fn require_active(&self, name: &str) -> Result<StreamData, KinesisError> {
        let stream = self.require_stream(name)?;
        if stream.status != StreamStatus::Active {
            return Err(error::stream_not_active(
                &self.config.account_id,
                name,
                stream.status.as_str(),
            ));
        }
        Ok(stream)
    }

    pub async fn split_shard(&self, input: SplitShardInput) -> Result<EmptyOutput, KinesisError> {
        let _guard = self.gate.acquire(&input.stream_name).await;
        let mut stream = self.require_active(&input.stream_name)?;
        let shard = stream.find_shard(&input.shard_to_split).ok_or_else(|| {
            error::shard_not_found(
                &self.config.account_id,
                &input.stream_name,
                &input.shard_to_split,
            )
        })?;
        if !shard.is_open() {
            return Err(error::shard_closed(
                &self.config.account_id,
                &input.stream_name,
                &input.shard_to_split,
            ));
        }

        let new_key = input
            .new_starting_hash_key
            .parse::<u128>()
            .map_err(|_| error::invalid_new_starting_hash_key(&input.new_starting_hash_key))?;
        if new_key <= shard.starting_hash_key.saturating_add(1) || new_key >= shard.ending_hash_key
        {
            return Err(error::invalid_split_hash_key(
                new_key,
                &input.shard_to_split,
                shard.starting_hash_key,
                shard.ending_hash_key,
            ));
        }

        let current = self.account_open_shard_count()?;
        if current + 1 > self.config.shard_limit {
            return Err(error::shard_limit_exceeded(
                &self.config.account_id,
                &self.config.region,
                current,
                self.config.shard_limit,
                1,
            ));
        }

        let parent_index = shard.index;
        stream.status = StreamStatus::Updating;
        self.save_stream(&stream)?;
        info!(
            stream = %input.stream_name,
            shard = %input.shard_to_split,
            "shard split started"
        );

        self.spawn_completion(
            &input.stream_name,
            StreamStatus::Updating,
            self.config.update_stream_delay,
            move |stream| {
                topology::split(&mut stream.shards, parent_index, new_key, clock::now_secs());
                stream.status = StreamStatus::Active;
            },
        );
        Ok(EmptyOutput::default())
    }

    pub async fn merge_shards(&self, input: MergeShardsInput) -> Result<EmptyOutput, KinesisError> {
        let _guard = self.gate.acquire(&input.stream_name).await;
        let mut stream = self.require_active(&input.stream_name)?;

        let lookup = |stream: &StreamData, shard_id: &str| -> Result<(u32, u128, u128, bool), KinesisError> {
            let shard = stream.find_shard(shard_id).ok_or_else(|| {
                error::shard_not_found(&self.config.account_id, &input.stream_name, shard_id)
            })?;
            Ok((
                shard.index,
                shard.starting_hash_key,
                shard.ending_hash_key,
                shard.is_open(),
            ))
        };
        let (index, _start, end, open) = lookup(&stream, &input.shard_to_merge)?;
        let (adjacent_index, adjacent_start, _end, adjacent_open) =
            lookup(&stream, &input.adjacent_shard_to_merge)?;

        if !open {
            return Err(error::shard_closed(
                &self.config.account_id,
                &input.stream_name,
                &input.shard_to_merge,
            ));
        }
        if !adjacent_open {
            return Err(error::shard_closed(
                &self.config.account_id,
                &input.stream_name,
                &input.adjacent_shard_to_merge,
            ));
        }
        if end.checked_add(1) != Some(adjacent_start) {
            return Err(error::shards_not_adjacent(
                &self.config.account_id,
                &input.stream_name,
                &input.shard_to_merge,
                &input.adjacent_shard_to_merge,
            ));
        }

        stream.status = StreamStatus::Updating;
        self.save_stream(&stream)?;
        info!(
            stream = %input.stream_name,
            shard = %input.shard_to_merge,
            adjacent = %input.adjacent_shard_to_merge,
            "shard merge started"
        );

        self.spawn_completion(
            &input.stream_name,
            StreamStatus::Updating,
            self.config.update_stream_delay,
            move |stream| {
                topology::merge(&mut stream.shards, index, adjacent_index, clock::now_secs());
                stream.status = StreamStatus::Active;
            },
        );
        Ok(EmptyOutput::default())
    }

    pub async fn update_shard_count(
        &self,
        input: UpdateShardCountInput,
    ) -> Result<UpdateShardCountOutput, KinesisError> {
        let _guard = self.gate.acquire(&input.stream_name).await;
        let mut stream = self.require_active(&input.stream_name)?;

        let current = stream.open_shards().count() as u64;
        let target = input.target_shard_count;
        if target > current * 2 {
            return Err(error::scale_up_limit(current, target));
        }
        if target * 2 < current {
            return Err(error::scale_down_limit(current, target));
        }
        let account = self.account_open_shard_count()?;
        if account - current + target > self.config.shard_limit {
            return Err(error::shard_limit_exceeded(
                &self.config.account_id,
                &self.config.region,
                account,
                self.config.shard_limit,
                target.saturating_sub(current),
            ));
        }

        stream.status = StreamStatus::Updating;
        self.save_stream(&stream)?;
        info!(
            stream = %input.stream_name,
            current,
            target,
            "shard rescale started"
        );

        self.spawn_completion(
            &input.stream_name,
            StreamStatus::Updating,
            self.config.update_stream_delay,
            move |stream| {
                topology::rescale(&mut stream.shards, target, clock::now_secs());
                stream.status = StreamStatus::Active;
            },
        );
        Ok(UpdateShardCountOutput {
            stream_name: input.stream_name,
            current_shard_count: current,
            target_shard_count: target,
        })
    }
}
