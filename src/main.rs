use kinesis_sim::kinesis::actions::{
    CreateStreamInput, DescribeStreamInput, GetRecordsInput, GetShardIteratorInput,
    PutRecordInput, ShardIteratorType,
};
use kinesis_sim::{ActionOutput, Action, KinesisConfig, KinesisService, MemoryStore};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let service = KinesisService::new(Arc::new(MemoryStore::new()), KinesisConfig::default());

    println!("=== Stream Service Emulator Demo ===\n");

    service
        .dispatch(Action::CreateStream(CreateStreamInput {
            stream_name: "demo".to_string(),
            shard_count: 2,
        }))
        .await?;
    println!("CreateStream(demo, 2) acknowledged; waiting for ACTIVE...");
    tokio::time::sleep(Duration::from_millis(700)).await;

    let description = match service
        .dispatch(Action::DescribeStream(DescribeStreamInput {
            stream_name: "demo".to_string(),
            limit: None,
            exclusive_start_shard_id: None,
        }))
        .await?
    {
        ActionOutput::DescribeStream(out) => out.stream_description,
        other => unreachable!("unexpected payload: {:?}", other),
    };
    println!(
        "Stream {} is {} with {} shards",
        description.stream_name,
        description.stream_status,
        description.shards.len()
    );

    for i in 0..5 {
        let output = service
            .dispatch(Action::PutRecord(PutRecordInput {
                stream_name: "demo".to_string(),
                partition_key: format!("key-{}", i),
                data: format!("payload {}", i).into_bytes(),
                explicit_hash_key: None,
                sequence_number_for_ordering: None,
            }))
            .await?;
        if let ActionOutput::PutRecord(out) = output {
            println!("PutRecord key-{} -> {} seq {}", i, out.shard_id, out.sequence_number);
        }
    }

    for shard in &description.shards {
        let iterator = match service
            .dispatch(Action::GetShardIterator(GetShardIteratorInput {
                stream_name: "demo".to_string(),
                shard_id: shard.shard_id.clone(),
                shard_iterator_type: ShardIteratorType::TrimHorizon,
                starting_sequence_number: None,
                timestamp: None,
            }))
            .await?
        {
            ActionOutput::GetShardIterator(out) => out.shard_iterator,
            other => unreachable!("unexpected payload: {:?}", other),
        };
        if let ActionOutput::GetRecords(out) = service
            .dispatch(Action::GetRecords(GetRecordsInput {
                shard_iterator: iterator,
                limit: None,
            }))
            .await?
        {
            println!("GetRecords({}) -> {} records", shard.shard_id, out.records.len());
            for record in out.records {
                println!(
                    "  {} seq {} ({} bytes)",
                    record.partition_key,
                    record.sequence_number,
                    record.data.len()
                );
            }
        }
    }

    println!("\n=== Demo completed ===");
    Ok(())
}
