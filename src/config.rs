// SPDX-License-Identifier: Apache-2.0

//! Configuration for the file consumer.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::encoding::Encoding;
use crate::error::{Error, Result};
use crate::input::{FileFinder, OpenFileGauge, ReaderContext};
use crate::manager::{Manager, PollSettings};
use crate::metrics::{ConsumerMetrics, get_meter};
use crate::parse::{ByteSize, deser_duration};
use crate::persistence::CheckpointStore;
use crate::sink::LogSink;
use crate::split::{MultilineConfig, Splitter};

/// Smallest fingerprint that still tells files apart
pub const MIN_FINGERPRINT_SIZE: u64 = 16;

/// Where to start reading a file that is already present when the consumer starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartAt {
    /// Start reading from the beginning of the file
    Beginning,
    /// Start reading from the end of the file (only new content)
    #[default]
    End,
}

impl FromStr for StartAt {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "beginning" => Ok(StartAt::Beginning),
            "end" => Ok(StartAt::End),
            other => Err(format!(
                "invalid start_at '{}', expected 'beginning' or 'end'",
                other
            )),
        }
    }
}

impl fmt::Display for StartAt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartAt::Beginning => write!(f, "beginning"),
            StartAt::End => write!(f, "end"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConsumerConfig {
    /// Glob patterns for files to include
    pub include: Vec<String>,
    /// Glob patterns for files to exclude
    pub exclude: Vec<String>,
    #[serde(deserialize_with = "deser_duration")]
    pub poll_interval: Duration,
    /// Number of leading bytes used to identify a file
    pub fingerprint_size: ByteSize,
    /// Maximum size of a single record
    pub max_log_size: ByteSize,
    /// Bytes a single read pass may consume from one file
    pub max_read_size: ByteSize,
    /// Maximum number of files read at the same time
    pub max_concurrent_files: usize,
    pub encoding: String,
    pub start_at: StartAt,
    pub multiline: MultilineConfig,
    /// How long an unterminated record may sit unchanged before it is emitted anyway
    #[serde(deserialize_with = "deser_duration")]
    pub force_flush_period: Duration,
    pub include_file_name: bool,
    pub include_file_path: bool,
    /// Static labels added to every record
    pub attributes: BTreeMap<String, String>,
    /// Polls a file that disappeared is remembered for, in case it shows up elsewhere
    pub retain_retired_polls: u32,
    /// How long checkpoint saves may keep failing before the consumer gives up
    #[serde(deserialize_with = "deser_duration")]
    pub max_checkpoint_failure_duration: Duration,
}

impl Default for FileConsumerConfig {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            poll_interval: Duration::from_millis(200),
            fingerprint_size: ByteSize(1000),
            max_log_size: ByteSize(1024 * 1024),
            max_read_size: ByteSize(16 * 1024 * 1024),
            max_concurrent_files: 512,
            encoding: "utf-8".to_string(),
            start_at: StartAt::End,
            multiline: MultilineConfig::default(),
            force_flush_period: Duration::from_millis(500),
            include_file_name: true,
            include_file_path: false,
            attributes: BTreeMap::new(),
            retain_retired_polls: 3,
            max_checkpoint_failure_duration: Duration::from_secs(60),
        }
    }
}

impl FileConsumerConfig {
    /// Check the plain value constraints. Patterns and the encoding are checked by
    /// [`FileConsumerConfig::build`].
    pub fn validate(&self) -> Result<()> {
        if self.include.is_empty() {
            return Err(Error::Config(
                "at least one include pattern must be specified".to_string(),
            ));
        }
        if self.fingerprint_size.0 < MIN_FINGERPRINT_SIZE {
            return Err(Error::Config(format!(
                "fingerprint_size must be at least {} bytes, got {}",
                MIN_FINGERPRINT_SIZE, self.fingerprint_size
            )));
        }
        if self.max_log_size.0 == 0 {
            return Err(Error::Config("max_log_size must be positive".to_string()));
        }
        if self.max_read_size.0 == 0 {
            return Err(Error::Config("max_read_size must be positive".to_string()));
        }
        if self.max_concurrent_files == 0 {
            return Err(Error::Config("max_concurrent_files must be at least 1".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll_interval must be positive".to_string()));
        }
        Ok(())
    }

    /// Validate everything and assemble a [`Manager`].
    pub fn build(
        self,
        sink: Arc<dyn LogSink>,
        store: Arc<dyn CheckpointStore>,
    ) -> Result<Manager> {
        self.validate()?;

        let finder = FileFinder::new(&self.include, &self.exclude)?;
        let encoding = Encoding::lookup(&self.encoding)?;
        let mode = self.multiline.build()?;

        let metrics = ConsumerMetrics::new(&get_meter());
        let ctx = ReaderContext {
            splitter: Splitter::new(mode, encoding, self.max_log_size.as_usize()),
            sink,
            include_file_name: self.include_file_name,
            include_file_path: self.include_file_path,
            labels: self.attributes,
            max_read_size: self.max_read_size.0,
            open_files: OpenFileGauge::new(metrics.clone()),
            metrics,
        };

        let settings = PollSettings {
            poll_interval: self.poll_interval,
            fingerprint_size: self.fingerprint_size.as_usize(),
            max_concurrent_files: self.max_concurrent_files,
            start_at: self.start_at,
            force_flush_period: self.force_flush_period,
            retain_retired_polls: self.retain_retired_polls,
            max_checkpoint_failure_duration: self.max_checkpoint_failure_duration,
        };

        Ok(Manager::new(finder, Arc::new(ctx), store, settings))
    }
}
