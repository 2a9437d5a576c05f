// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::input::Fingerprint;

/// Saved read position of one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub fingerprint: Fingerprint,
    pub offset: u64,
    /// Last path the file was seen at. Informational only, identity is the fingerprint.
    pub path: PathBuf,
}

/// Storage for checkpoints. Implementations must tolerate being called from any thread.
pub trait CheckpointStore: Send + Sync {
    /// Load all saved checkpoints. An empty store yields an empty list.
    fn load(&self) -> Result<Vec<Checkpoint>>;

    /// Replace the saved checkpoints with `checkpoints`.
    fn save(&self, checkpoints: &[Checkpoint]) -> Result<()>;
}

/// Keeps checkpoints in memory; state is lost with the process
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Mutex<Vec<Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checkpoints(checkpoints: Vec<Checkpoint>) -> Self {
        Self {
            checkpoints: Mutex::new(checkpoints),
        }
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self) -> Result<Vec<Checkpoint>> {
        self.checkpoints
            .lock()
            .map(|c| c.clone())
            .map_err(|e| Error::Persistence(e.to_string()))
    }

    fn save(&self, checkpoints: &[Checkpoint]) -> Result<()> {
        let mut saved = self
            .checkpoints
            .lock()
            .map_err(|e| Error::Persistence(e.to_string()))?;
        *saved = checkpoints.to_vec();
        Ok(())
    }
}
