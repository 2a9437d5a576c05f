// SPDX-License-Identifier: Apache-2.0

//! Persistence for storing file offsets across restarts.
//!
//! The manager is the only writer. It saves after every poll and loads once at startup.

mod json_file;
mod schema;
mod store;

pub use json_file::JsonFileCheckpointStore;
pub use schema::{PERSISTED_STATE_VERSION, PersistedCheckpointV1, PersistedStateV1};
pub use store::{Checkpoint, CheckpointStore, MemoryCheckpointStore};
