// SPDX-License-Identifier: Apache-2.0

//! Versioned on-disk format for checkpoints.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::store::Checkpoint;
use crate::input::Fingerprint;

/// Current schema version for persisted state
pub const PERSISTED_STATE_VERSION: u8 = 1;

/// Persisted state for all known files (v1)
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedStateV1 {
    /// Schema version (always 1 for this format)
    pub version: u8,
    pub checkpoints: Vec<PersistedCheckpointV1>,
}

impl Default for PersistedStateV1 {
    fn default() -> Self {
        Self {
            version: PERSISTED_STATE_VERSION,
            checkpoints: Vec::new(),
        }
    }
}

/// Persisted state for a single file (v1)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedCheckpointV1 {
    /// Last known path, for people reading the file
    pub path: String,
    /// Base64 of the leading file bytes
    pub fingerprint: Fingerprint,
    pub offset: u64,
}

impl From<&Checkpoint> for PersistedCheckpointV1 {
    fn from(cp: &Checkpoint) -> Self {
        Self {
            path: cp.path.to_string_lossy().into_owned(),
            fingerprint: cp.fingerprint.clone(),
            offset: cp.offset,
        }
    }
}

impl From<PersistedCheckpointV1> for Checkpoint {
    fn from(entry: PersistedCheckpointV1) -> Self {
        Self {
            fingerprint: entry.fingerprint,
            offset: entry.offset,
            path: PathBuf::from(entry.path),
        }
    }
}
