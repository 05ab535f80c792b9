//! Service configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the emulated stream service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KinesisConfig {
    /// Twelve-digit account identifier used in ARNs and error messages.
    pub account_id: String,
    /// Region identifier used in ARNs and error messages.
    pub region: String,
    /// Account-wide open-shard limit (sum across all streams).
    pub shard_limit: u64,
    /// Delay before a CREATING stream flips to ACTIVE.
    #[serde(with = "duration_millis")]
    pub create_stream_delay: Duration,
    /// Delay before a topology change (split/merge/rescale) completes.
    #[serde(with = "duration_millis")]
    pub update_stream_delay: Duration,
    /// Delay before a DELETING stream is removed.
    #[serde(with = "duration_millis")]
    pub delete_stream_delay: Duration,
    /// Probability in [0, 1] that a record write fails with a synthetic
    /// ProvisionedThroughputExceededException.
    pub throughput_error_rate: f64,
    /// Seed for the fault-injection RNG. Fixed seeds give reproducible
    /// fault sequences.
    pub fault_seed: Option<u64>,
}

impl Default for KinesisConfig {
    fn default() -> Self {
        KinesisConfig {
            account_id: "000000000000".to_string(),
            region: "us-east-1".to_string(),
            shard_limit: 10,
            create_stream_delay: Duration::from_millis(500),
            update_stream_delay: Duration::from_millis(500),
            delete_stream_delay: Duration::from_millis(500),
            throughput_error_rate: 0.0,
            fault_seed: None,
        }
    }
}

impl KinesisConfig {
    /// Configuration for tests: near-instant lifecycle transitions.
    pub fn test() -> Self {
        KinesisConfig {
            create_stream_delay: Duration::from_millis(20),
            update_stream_delay: Duration::from_millis(20),
            delete_stream_delay: Duration::from_millis(20),
            fault_seed: Some(42),
            ..KinesisConfig::default()
        }
    }

    /// Stream ARN in the account/region this service emulates.
    pub fn stream_arn(&self, stream_name: &str) -> String {
        format!(
            "arn:aws:kinesis:{}:{}:stream/{}",
            self.region, self.account_id, stream_name
        )
    }
}

/// Serde helper for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = KinesisConfig::default();
        assert_eq!(config.shard_limit, 10);
        assert_eq!(config.throughput_error_rate, 0.0);
        assert_eq!(
            config.stream_arn("foo"),
            "arn:aws:kinesis:us-east-1:000000000000:stream/foo"
        );
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = KinesisConfig::test();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: KinesisConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.create_stream_delay, Duration::from_millis(20));
        assert_eq!(parsed.fault_seed, Some(42));
    }
}
