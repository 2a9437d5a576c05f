// SPDX-License-Identifier: Apache-2.0

//! Tail log files matched by glob patterns, following each file by content identity
//! across renames, rotations and truncation, and emit one entry per record.
//!
//! ```no_run
//! use std::sync::Arc;
//! use filelog::{FileConsumerConfig, JsonFileCheckpointStore, WriterSink};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> filelog::Result<()> {
//! let config = FileConsumerConfig {
//!     include: vec!["/var/log/app/*.log".to_string()],
//!     ..Default::default()
//! };
//! let manager = config.build(
//!     Arc::new(WriterSink::new(std::io::stdout())),
//!     Arc::new(JsonFileCheckpointStore::new("/var/lib/filelog/offsets.json")),
//! )?;
//! manager.run(CancellationToken::new()).await
//! # }
//! ```

pub mod config;
pub mod encoding;
pub mod entry;
pub mod error;
pub mod init;
pub mod input;
pub mod manager;
pub mod metrics;
pub mod parse;
pub mod persistence;
pub mod reconcile;
pub mod sink;
pub mod split;

pub use config::{FileConsumerConfig, StartAt};
pub use entry::{FileAttributes, LogEntry};
pub use error::{Error, Result};
pub use manager::{Manager, PollStats};
pub use persistence::{
    Checkpoint, CheckpointStore, JsonFileCheckpointStore, MemoryCheckpointStore,
};
pub use sink::{ChannelSink, EntryReceiver, LogSink, SinkError, WriterSink};
