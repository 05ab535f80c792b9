pub mod kinesis;
pub mod store;

pub use kinesis::{Action, ActionOutput, KinesisConfig, KinesisError, KinesisService};
pub use store::{MemoryStore, OrderedStore};
