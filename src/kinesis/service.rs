//! Service Core
//!
//! `KinesisService` owns the shared handles (store, config, per-stream
//! gate, fault RNG) and the persistence helpers every action goes
//! through. The actions themselves are split across two impl blocks:
//! stream/topology lifecycle in `registry.rs`, the record data plane in
//! `records.rs`.
//!
//! ## Persistence layout
//!
//! ```text
//! namespace "streams":           streamName -> bincode(StreamData)
//! namespace "records/<stream>":  shardIndex_be4 ‖ seq_be23 -> bincode(StoredRecord)
//! ```
//!
//! Stream metadata is the authority for everything clients can observe;
//! the record namespaces hold only the log entries. Deleting a stream
//! drops its record namespace wholesale.

use crate::kinesis::actions::{Action, ActionOutput, DescribeLimitsInput, DescribeLimitsOutput};
use crate::kinesis::config::KinesisConfig;
use crate::kinesis::error::KinesisError;
use crate::kinesis::gate::ConcurrencyGate;
use crate::kinesis::types::StreamData;
use crate::store::{OrderedStore, StoreError};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

/// Namespace holding all stream metadata.
pub(crate) const STREAMS_NS: &str = "streams";

/// Namespace holding one stream's record log.
pub(crate) fn records_ns(stream_name: &str) -> String {
    format!("records/{}", stream_name)
}

/// The emulated stream service. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct KinesisService {
    pub(crate) store: Arc<dyn OrderedStore>,
    pub(crate) config: Arc<KinesisConfig>,
    pub(crate) gate: Arc<ConcurrencyGate>,
    pub(crate) faults: Arc<Mutex<StdRng>>,
}

impl KinesisService {
    pub fn new(store: Arc<dyn OrderedStore>, config: KinesisConfig) -> Self {
        let rng = match config.fault_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        KinesisService {
            store,
            config: Arc::new(config),
            gate: Arc::new(ConcurrencyGate::new()),
            faults: Arc::new(Mutex::new(rng)),
        }
    }

    pub fn config(&self) -> &KinesisConfig {
        &self.config
    }

    /// Route a typed action to its handler.
    pub async fn dispatch(&self, action: Action) -> Result<ActionOutput, KinesisError> {
        match action {
            Action::CreateStream(input) => {
                self.create_stream(input).await.map(ActionOutput::CreateStream)
            }
            Action::DeleteStream(input) => {
                self.delete_stream(input).await.map(ActionOutput::DeleteStream)
            }
            Action::DescribeStream(input) => {
                self.describe_stream(input).map(ActionOutput::DescribeStream)
            }
            Action::DescribeStreamSummary(input) => self
                .describe_stream_summary(input)
                .map(ActionOutput::DescribeStreamSummary),
            Action::ListShards(input) => self.list_shards(input).map(ActionOutput::ListShards),
            Action::ListStreams(input) => self.list_streams(input).map(ActionOutput::ListStreams),
            Action::IncreaseStreamRetentionPeriod(input) => self
                .increase_stream_retention_period(input)
                .await
                .map(ActionOutput::IncreaseStreamRetentionPeriod),
            Action::DecreaseStreamRetentionPeriod(input) => self
                .decrease_stream_retention_period(input)
                .await
                .map(ActionOutput::DecreaseStreamRetentionPeriod),
            Action::AddTagsToStream(input) => self
                .add_tags_to_stream(input)
                .await
                .map(ActionOutput::AddTagsToStream),
            Action::RemoveTagsFromStream(input) => self
                .remove_tags_from_stream(input)
                .await
                .map(ActionOutput::RemoveTagsFromStream),
            Action::ListTagsForStream(input) => self
                .list_tags_for_stream(input)
                .map(ActionOutput::ListTagsForStream),
            Action::PutRecord(input) => {
                self.put_record(input).await.map(ActionOutput::PutRecord)
            }
            Action::PutRecords(input) => {
                self.put_records(input).await.map(ActionOutput::PutRecords)
            }
            Action::GetShardIterator(input) => self
                .get_shard_iterator(input)
                .map(ActionOutput::GetShardIterator),
            Action::GetRecords(input) => {
                self.get_records(input).await.map(ActionOutput::GetRecords)
            }
            Action::MergeShards(input) => {
                self.merge_shards(input).await.map(ActionOutput::MergeShards)
            }
            Action::SplitShard(input) => {
                self.split_shard(input).await.map(ActionOutput::SplitShard)
            }
            Action::UpdateShardCount(input) => self
                .update_shard_count(input)
                .await
                .map(ActionOutput::UpdateShardCount),
            Action::DescribeLimits(input) => {
                self.describe_limits(input).map(ActionOutput::DescribeLimits)
            }
        }
    }

    // ========================================================================
    // Persistence helpers
    // ========================================================================

    pub(crate) fn load_stream(&self, name: &str) -> Result<Option<StreamData>, KinesisError> {
        match self.store.get(STREAMS_NS, name.as_bytes())? {
            Some(bytes) => {
                let stream = bincode::deserialize(&bytes).map_err(|e| {
                    KinesisError::Store(StoreError::Corruption(format!(
                        "stream metadata for {}: {}",
                        name, e
                    )))
                })?;
                Ok(Some(stream))
            }
            None => Ok(None),
        }
    }

    pub(crate) fn save_stream(&self, stream: &StreamData) -> Result<(), KinesisError> {
        let bytes = bincode::serialize(stream).map_err(|e| {
            KinesisError::Store(StoreError::Corruption(format!(
                "encoding stream metadata for {}: {}",
                stream.name, e
            )))
        })?;
        self.store.put(STREAMS_NS, stream.name.as_bytes(), &bytes)?;
        Ok(())
    }

    /// The stream must exist; any status is acceptable.
    pub(crate) fn require_stream(&self, name: &str) -> Result<StreamData, KinesisError> {
        self.load_stream(name)?.ok_or_else(|| {
            crate::kinesis::error::stream_not_found(&self.config.account_id, name)
        })
    }

    /// The stream must exist with its data plane visible. CREATING and
    /// DELETING streams answer data-plane calls as if absent.
    pub(crate) fn require_data_visible(&self, name: &str) -> Result<StreamData, KinesisError> {
        use crate::kinesis::types::StreamStatus;
        let stream = self.require_stream(name)?;
        match stream.status {
            StreamStatus::Creating | StreamStatus::Deleting => Err(
                crate::kinesis::error::stream_not_found(&self.config.account_id, name),
            ),
            StreamStatus::Active | StreamStatus::Updating => Ok(stream),
        }
    }

    /// Sum of open (and pending) shards across every stream in the account.
    pub(crate) fn account_open_shard_count(&self) -> Result<u64, KinesisError> {
        let mut total = 0;
        for (name, bytes) in self.store.scan(
            STREAMS_NS,
            std::ops::Bound::Unbounded,
            std::ops::Bound::Unbounded,
            None,
        )? {
            let stream: StreamData = bincode::deserialize(&bytes).map_err(|e| {
                KinesisError::Store(StoreError::Corruption(format!(
                    "stream metadata for {}: {}",
                    String::from_utf8_lossy(&name),
                    e
                )))
            })?;
            total += stream.open_shard_count();
        }
        Ok(total)
    }

    pub fn describe_limits(
        &self,
        _input: DescribeLimitsInput,
    ) -> Result<DescribeLimitsOutput, KinesisError> {
        Ok(DescribeLimitsOutput {
            shard_limit: self.config.shard_limit,
            open_shard_count: self.account_open_shard_count()?,
        })
    }
}
