// SPDX-License-Identifier: Apache-2.0

//! Records handed to the sink.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::input::Fingerprint;

/// Attribute key for the base name of the source file
pub const ATTR_LOG_FILE_NAME: &str = "log.file.name";
/// Attribute key for the absolute path of the source file
pub const ATTR_LOG_FILE_PATH: &str = "log.file.path";

/// Metadata shared by every record read from one file during one read pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttributes {
    pub path: PathBuf,
    pub file_name: String,
    pub fingerprint: Fingerprint,
    /// Rendered attributes: the enabled file name/path keys plus the static labels
    pub attributes: BTreeMap<String, String>,
}

impl FileAttributes {
    pub fn new(
        path: &Path,
        fingerprint: Fingerprint,
        labels: &BTreeMap<String, String>,
        include_file_name: bool,
        include_file_path: bool,
    ) -> Self {
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut attributes = labels.clone();
        if include_file_name {
            attributes.insert(ATTR_LOG_FILE_NAME.to_string(), file_name.clone());
        }
        if include_file_path {
            attributes.insert(
                ATTR_LOG_FILE_PATH.to_string(),
                path.to_string_lossy().into_owned(),
            );
        }

        Self {
            path,
            file_name,
            fingerprint,
            attributes,
        }
    }
}

/// A single log record
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub attributes: Arc<FileAttributes>,
    /// Record content decoded to UTF-8, without its line ending
    pub body: Vec<u8>,
    /// Byte offset in the source file where the record starts
    pub offset: u64,
    pub observed_time: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(attributes: Arc<FileAttributes>, body: Vec<u8>, offset: u64) -> Self {
        Self {
            attributes,
            body,
            offset,
            observed_time: Utc::now(),
        }
    }

    /// Body as text, with invalid UTF-8 replaced
    pub fn body_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn observed_time_unix_nano(&self) -> u64 {
        self.observed_time
            .timestamp_nanos_opt()
            .and_then(|n| u64::try_from(n).ok())
            .unwrap_or_default()
    }
}

/// JSON form written by [`crate::sink::WriterSink`]
#[derive(Serialize)]
pub(crate) struct EntryRecord<'a> {
    pub observed_time: &'a DateTime<Utc>,
    pub body: &'a str,
    pub attributes: &'a BTreeMap<String, String>,
}
