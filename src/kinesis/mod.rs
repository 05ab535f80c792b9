//! Emulated partitioned event-stream service.
//!
//! Module layout follows the data flow:
//!
//! ```text
//! actions ──> service ──┬──> registry (lifecycle, topology, tags)
//!                       └──> records  (put/get, iterators)
//!                              │
//!        sequence / tokens / hashing / topology / gate
//!                              │
//!                        store (ordered KV)
//! ```

pub mod actions;
pub mod clock;
pub mod config;
pub mod error;
pub mod gate;
pub mod hashing;
pub mod records;
pub mod registry;
pub mod sequence;
pub mod service;
pub mod tokens;
pub mod topology;
pub mod types;

pub use actions::{Action, ActionOutput};
pub use config::KinesisConfig;
pub use error::KinesisError;
pub use service::KinesisService;
