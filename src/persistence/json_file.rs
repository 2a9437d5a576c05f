// SPDX-License-Identifier: Apache-2.0

//! JSON file-based checkpoint store with atomic writes.
//!
//! Writes go to a temporary file that is then renamed over the target, so a crash
//! mid-write leaves the previous checkpoints intact.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use portable_atomic::AtomicU64;
use tracing::debug;

use super::schema::{PERSISTED_STATE_VERSION, PersistedStateV1};
use super::store::{Checkpoint, CheckpointStore};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct JsonFileCheckpointStore {
    path: PathBuf,
}

impl JsonFileCheckpointStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl CheckpointStore for JsonFileCheckpointStore {
    fn load(&self) -> Result<Vec<Checkpoint>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No checkpoint file, starting fresh");
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)
            .map_err(|e| Error::Persistence(format!("failed to open checkpoint file: {}", e)))?;
        let value: serde_json::Value =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| {
                Error::Persistence(format!(
                    "checkpoint file {} is corrupted: {}",
                    self.path.display(),
                    e
                ))
            })?;

        let version = value.get("version").and_then(|v| v.as_u64());
        if version != Some(PERSISTED_STATE_VERSION as u64) {
            return Err(Error::Persistence(format!(
                "unsupported checkpoint version {:?} in {}",
                version,
                self.path.display()
            )));
        }

        let state: PersistedStateV1 = serde_json::from_value(value).map_err(|e| {
            Error::Persistence(format!(
                "checkpoint file {} is corrupted: {}",
                self.path.display(),
                e
            ))
        })?;

        Ok(state.checkpoints.into_iter().map(Checkpoint::from).collect())
    }

    fn save(&self, checkpoints: &[Checkpoint]) -> Result<()> {
        let state = PersistedStateV1 {
            version: PERSISTED_STATE_VERSION,
            checkpoints: checkpoints.iter().map(Into::into).collect(),
        };
        atomic_write(&self.path, &state)
    }
}

/// Write state to file atomically (write to temp, then rename)
fn atomic_write(path: &Path, state: &PersistedStateV1) -> Result<()> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Persistence(format!("failed to create parent directory: {}", e))
            })?;
        }
    }

    // Process ID plus a counter keeps concurrent writers off each other's temp files
    let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let temp_path = path.with_extension(format!("tmp.{}.{}", std::process::id(), unique_id));

    let result = write_temp(&temp_path, state).and_then(|()| {
        fs::rename(&temp_path, path)
            .map_err(|e| Error::Persistence(format!("failed to rename checkpoint file: {}", e)))
    });
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn write_temp(temp_path: &Path, state: &PersistedStateV1) -> Result<()> {
    let file = File::create(temp_path)
        .map_err(|e| Error::Persistence(format!("failed to create temp file: {}", e)))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, state)
        .map_err(|e| Error::Persistence(format!("failed to write checkpoints: {}", e)))?;
    writer
        .flush()
        .map_err(|e| Error::Persistence(format!("failed to flush checkpoints: {}", e)))
}
