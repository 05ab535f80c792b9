//! Stream Lifecycle Integration Tests
//!
//! Full-service tests for create/delete, the deferred status transitions,
//! describe/list paging, tags, retention, and account limits.

use kinesis_sim::kinesis::actions::{
    Action, ActionOutput, AddTagsToStreamInput, CreateStreamInput,
    DecreaseStreamRetentionPeriodInput, DeleteStreamInput, DescribeStreamInput,
    DescribeStreamSummaryInput, IncreaseStreamRetentionPeriodInput, ListShardsInput,
    ListStreamsInput, ListTagsForStreamInput, RemoveTagsFromStreamInput, StreamDescription,
};
use kinesis_sim::{KinesisConfig, KinesisService, MemoryStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn service() -> KinesisService {
    KinesisService::new(Arc::new(MemoryStore::new()), KinesisConfig::test())
}

fn create_input(name: &str, shard_count: u64) -> CreateStreamInput {
    CreateStreamInput {
        stream_name: name.to_string(),
        shard_count,
    }
}

fn describe(svc: &KinesisService, name: &str) -> StreamDescription {
    svc.describe_stream(DescribeStreamInput {
        stream_name: name.to_string(),
        limit: None,
        exclusive_start_shard_id: None,
    })
    .unwrap()
    .stream_description
}

/// Poll until the stream reports ACTIVE.
async fn wait_active(svc: &KinesisService, name: &str) {
    for _ in 0..200 {
        if describe(svc, name).stream_status == "ACTIVE" {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("stream {} never became ACTIVE", name);
}

#[tokio::test]
async fn test_create_stream_two_phase() {
    let svc = service();
    svc.create_stream(create_input("s", 2)).await.unwrap();

    // Ack is immediate: CREATING with no shards yet
    let desc = describe(&svc, "s");
    assert_eq!(desc.stream_status, "CREATING");
    assert!(desc.shards.is_empty());
    assert_eq!(desc.stream_arn, "arn:aws:kinesis:us-east-1:000000000000:stream/s");
    assert_eq!(desc.retention_period_hours, 24);

    wait_active(&svc, "s").await;
    let desc = describe(&svc, "s");
    assert_eq!(desc.shards.len(), 2);
    // Exact halves of the 128-bit key space
    let half = 1u128 << 127;
    assert_eq!(desc.shards[0].hash_key_range.starting_hash_key, "0");
    assert_eq!(
        desc.shards[0].hash_key_range.ending_hash_key,
        (half - 1).to_string()
    );
    assert_eq!(
        desc.shards[1].hash_key_range.starting_hash_key,
        half.to_string()
    );
    assert_eq!(
        desc.shards[1].hash_key_range.ending_hash_key,
        u128::MAX.to_string()
    );
    assert!(desc.shards.iter().all(|s| s
        .sequence_number_range
        .ending_sequence_number
        .is_none()));
}

#[tokio::test]
async fn test_create_duplicate_stream() {
    let svc = service();
    svc.create_stream(create_input("s", 1)).await.unwrap();
    let err = svc.create_stream(create_input("s", 1)).await.unwrap_err();
    assert_eq!(err.code(), "ResourceInUseException");
    assert_eq!(
        err.message(),
        "Stream s under account 000000000000 already exists."
    );
}

#[tokio::test]
async fn test_create_stream_over_account_limit() {
    let svc = service();
    svc.create_stream(create_input("a", 6)).await.unwrap();
    // 6 pending shards count against the limit of 10 immediately
    let err = svc.create_stream(create_input("b", 5)).await.unwrap_err();
    assert_eq!(err.code(), "LimitExceededException");
    assert!(err.message().contains("Current shard count for the account: 6."));
    assert!(err.message().contains("Limit: 10."));
    assert!(err
        .message()
        .contains("would have resulted from this request: 5."));
}

#[tokio::test]
async fn test_delete_creating_stream_is_rejected() {
    let svc = service();
    svc.create_stream(create_input("s", 1)).await.unwrap();
    let err = svc
        .delete_stream(DeleteStreamInput {
            stream_name: "s".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ResourceInUseException");
    assert_eq!(
        err.message(),
        "Stream s under account 000000000000 not ACTIVE, instead in state CREATING."
    );
}

#[tokio::test]
async fn test_delete_stream_two_phase() {
    let svc = service();
    svc.create_stream(create_input("s", 1)).await.unwrap();
    wait_active(&svc, "s").await;

    svc.delete_stream(DeleteStreamInput {
        stream_name: "s".to_string(),
    })
    .await
    .unwrap();
    assert_eq!(describe(&svc, "s").stream_status, "DELETING");

    // After the delete delay the metadata entry is gone
    for _ in 0..200 {
        if svc
            .describe_stream(DescribeStreamInput {
                stream_name: "s".to_string(),
                limit: None,
                exclusive_start_shard_id: None,
            })
            .is_err()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("stream was never removed");
}

#[tokio::test]
async fn test_describe_missing_stream() {
    let svc = service();
    let err = svc
        .describe_stream(DescribeStreamInput {
            stream_name: "ghost".to_string(),
            limit: None,
            exclusive_start_shard_id: None,
        })
        .unwrap_err();
    assert_eq!(err.code(), "ResourceNotFoundException");
    assert_eq!(
        err.message(),
        "Stream ghost under account 000000000000 not found."
    );
}

#[tokio::test]
async fn test_describe_stream_shard_paging() {
    let svc = service();
    svc.create_stream(create_input("s", 5)).await.unwrap();
    wait_active(&svc, "s").await;

    let page = svc
        .describe_stream(DescribeStreamInput {
            stream_name: "s".to_string(),
            limit: Some(2),
            exclusive_start_shard_id: None,
        })
        .unwrap()
        .stream_description;
    assert_eq!(page.shards.len(), 2);
    assert!(page.has_more_shards);
    assert_eq!(page.shards[0].shard_id, "shardId-000000000000");

    let rest = svc
        .describe_stream(DescribeStreamInput {
            stream_name: "s".to_string(),
            limit: Some(10),
            exclusive_start_shard_id: Some(page.shards[1].shard_id.clone()),
        })
        .unwrap()
        .stream_description;
    assert_eq!(rest.shards.len(), 3);
    assert!(!rest.has_more_shards);
    assert_eq!(rest.shards[0].shard_id, "shardId-000000000002");
}

#[tokio::test]
async fn test_describe_stream_summary() {
    let svc = service();
    svc.create_stream(create_input("s", 3)).await.unwrap();
    wait_active(&svc, "s").await;

    let summary = svc
        .describe_stream_summary(DescribeStreamSummaryInput {
            stream_name: "s".to_string(),
        })
        .unwrap()
        .stream_description_summary;
    assert_eq!(summary.stream_status, "ACTIVE");
    assert_eq!(summary.open_shard_count, 3);
    assert_eq!(summary.consumer_count, 0);
    assert_eq!(summary.encryption_type, "NONE");
}

#[tokio::test]
async fn test_list_streams_paging() {
    let svc = service();
    for name in ["alpha", "beta", "gamma"] {
        svc.create_stream(create_input(name, 1)).await.unwrap();
    }

    let page = svc
        .list_streams(ListStreamsInput {
            exclusive_start_stream_name: None,
            limit: Some(2),
        })
        .unwrap();
    assert_eq!(page.stream_names, vec!["alpha", "beta"]);
    assert!(page.has_more_streams);

    let rest = svc
        .list_streams(ListStreamsInput {
            exclusive_start_stream_name: Some("beta".to_string()),
            limit: None,
        })
        .unwrap();
    assert_eq!(rest.stream_names, vec!["gamma"]);
    assert!(!rest.has_more_streams);
}

#[tokio::test]
async fn test_list_shards_next_token_round_trip() {
    let svc = service();
    svc.create_stream(create_input("s", 5)).await.unwrap();
    wait_active(&svc, "s").await;

    let page = svc
        .list_shards(ListShardsInput {
            stream_name: Some("s".to_string()),
            next_token: None,
            exclusive_start_shard_id: None,
            max_results: Some(2),
        })
        .unwrap();
    assert_eq!(page.shards.len(), 2);
    let token = page.next_token.expect("expected a continuation token");

    let rest = svc
        .list_shards(ListShardsInput {
            stream_name: None,
            next_token: Some(token),
            exclusive_start_shard_id: None,
            max_results: None,
        })
        .unwrap();
    assert_eq!(rest.shards.len(), 3);
    assert_eq!(rest.shards[0].shard_id, "shardId-000000000002");
    assert!(rest.next_token.is_none());
}

#[tokio::test]
async fn test_list_shards_bad_token() {
    let svc = service();
    let err = svc
        .list_shards(ListShardsInput {
            stream_name: None,
            next_token: Some("not-a-token".to_string()),
            exclusive_start_shard_id: None,
            max_results: None,
        })
        .unwrap_err();
    assert_eq!(err.code(), "InvalidArgumentException");
    assert_eq!(err.message(), "Invalid NextToken.");
}

#[tokio::test]
async fn test_tag_lifecycle_and_limit() {
    let svc = service();
    svc.create_stream(create_input("s", 1)).await.unwrap();
    wait_active(&svc, "s").await;

    let mut tags = BTreeMap::new();
    for i in 0..10 {
        tags.insert(format!("k{:02}", i), format!("v{}", i));
    }
    svc.add_tags_to_stream(AddTagsToStreamInput {
        stream_name: "s".to_string(),
        tags,
    })
    .await
    .unwrap();

    // An eleventh distinct key is over the limit
    let mut extra = BTreeMap::new();
    extra.insert("k10".to_string(), "v".to_string());
    let err = svc
        .add_tags_to_stream(AddTagsToStreamInput {
            stream_name: "s".to_string(),
            tags: extra,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "LimitExceededException");
    assert_eq!(
        err.message(),
        "Failed to add tags to stream s under account 000000000000 because a stream can \
         have up to 10 tags."
    );

    // Overwriting an existing key is fine
    let mut overwrite = BTreeMap::new();
    overwrite.insert("k00".to_string(), "updated".to_string());
    svc.add_tags_to_stream(AddTagsToStreamInput {
        stream_name: "s".to_string(),
        tags: overwrite,
    })
    .await
    .unwrap();

    let listed = svc
        .list_tags_for_stream(ListTagsForStreamInput {
            stream_name: "s".to_string(),
            exclusive_start_tag_key: None,
            limit: Some(3),
        })
        .unwrap();
    assert_eq!(listed.tags.len(), 3);
    assert!(listed.has_more_tags);
    assert_eq!(listed.tags[0].key, "k00");
    assert_eq!(listed.tags[0].value, "updated");

    svc.remove_tags_from_stream(RemoveTagsFromStreamInput {
        stream_name: "s".to_string(),
        tag_keys: vec!["k00".to_string(), "absent".to_string()],
    })
    .await
    .unwrap();
    let listed = svc
        .list_tags_for_stream(ListTagsForStreamInput {
            stream_name: "s".to_string(),
            exclusive_start_tag_key: None,
            limit: None,
        })
        .unwrap();
    assert_eq!(listed.tags.len(), 9);
    assert!(!listed.has_more_tags);
}

#[tokio::test]
async fn test_retention_adjustments() {
    let svc = service();
    svc.create_stream(create_input("s", 1)).await.unwrap();
    wait_active(&svc, "s").await;

    svc.increase_stream_retention_period(IncreaseStreamRetentionPeriodInput {
        stream_name: "s".to_string(),
        retention_period_hours: 48,
    })
    .await
    .unwrap();
    assert_eq!(describe(&svc, "s").retention_period_hours, 48);

    let err = svc
        .increase_stream_retention_period(IncreaseStreamRetentionPeriodInput {
            stream_name: "s".to_string(),
            retention_period_hours: 24,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "InvalidArgumentException");
    assert_eq!(
        err.message(),
        "Requested retention period (24 hours) for stream s can not be shorter than \
         existing retention period (48 hours). Use DecreaseRetentionPeriod API."
    );

    let err = svc
        .decrease_stream_retention_period(DecreaseStreamRetentionPeriodInput {
            stream_name: "s".to_string(),
            retention_period_hours: 72,
        })
        .await
        .unwrap_err();
    assert_eq!(
        err.message(),
        "Requested retention period (72 hours) for stream s can not be longer than \
         existing retention period (48 hours). Use IncreaseRetentionPeriod API."
    );

    svc.decrease_stream_retention_period(DecreaseStreamRetentionPeriodInput {
        stream_name: "s".to_string(),
        retention_period_hours: 24,
    })
    .await
    .unwrap();
    assert_eq!(describe(&svc, "s").retention_period_hours, 24);
}

#[tokio::test]
async fn test_retention_requires_active() {
    let svc = service();
    svc.create_stream(create_input("s", 1)).await.unwrap();
    let err = svc
        .increase_stream_retention_period(IncreaseStreamRetentionPeriodInput {
            stream_name: "s".to_string(),
            retention_period_hours: 48,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ResourceInUseException");
}

#[tokio::test]
async fn test_dispatch_routes_by_action() {
    let svc = service();
    let output = svc
        .dispatch(Action::CreateStream(create_input("s", 1)))
        .await
        .unwrap();
    assert!(matches!(output, ActionOutput::CreateStream(_)));
    wait_active(&svc, "s").await;

    match svc
        .dispatch(Action::DescribeStreamSummary(DescribeStreamSummaryInput {
            stream_name: "s".to_string(),
        }))
        .await
        .unwrap()
    {
        ActionOutput::DescribeStreamSummary(out) => {
            assert_eq!(out.stream_description_summary.open_shard_count, 1)
        }
        other => panic!("wrong payload: {:?}", other),
    }
}
