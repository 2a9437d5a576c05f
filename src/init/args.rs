// SPDX-License-Identifier: Apache-2.0

use clap::{Args, ValueEnum};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{FileConsumerConfig, StartAt};
use crate::parse::{ByteSize, parse_duration};
use crate::split::MultilineConfig;

/// Where to start reading files
#[derive(Copy, Clone, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum StartAtArg {
    /// Start at the beginning of the file
    Beginning,
    /// Start at the end of the file (tail mode)
    #[default]
    End,
}

impl From<StartAtArg> for StartAt {
    fn from(s: StartAtArg) -> Self {
        match s {
            StartAtArg::Beginning => StartAt::Beginning,
            StartAtArg::End => StartAt::End,
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct FileConsumerArgs {
    /// Comma-separated glob patterns for files to include (e.g., "/var/log/*.log,/tmp/*.log")
    #[arg(long, env = "FILELOG_INCLUDE", value_delimiter = ',', required = true)]
    pub include: Vec<String>,

    /// Comma-separated glob patterns for files to exclude
    #[arg(long, env = "FILELOG_EXCLUDE", value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// How often to look for new data, e.g. "200ms", "1s" or "1m30s"
    #[arg(
        long,
        env = "FILELOG_POLL_INTERVAL",
        default_value = "200ms",
        value_parser = parse_duration
    )]
    pub poll_interval: Duration,

    /// Number of leading bytes used to identify a file, e.g. "1000" or "1KiB"
    #[arg(long, env = "FILELOG_FINGERPRINT_SIZE", default_value = "1000")]
    pub fingerprint_size: ByteSize,

    /// Maximum record size; longer records are truncated
    #[arg(long, env = "FILELOG_MAX_LOG_SIZE", default_value = "1MiB")]
    pub max_log_size: ByteSize,

    /// Bytes read from one file per poll before moving on
    #[arg(long, env = "FILELOG_MAX_READ_SIZE", default_value = "16MiB")]
    pub max_read_size: ByteSize,

    /// Maximum number of files to read concurrently
    #[arg(long, env = "FILELOG_MAX_CONCURRENT_FILES", default_value = "512")]
    pub max_concurrent_files: usize,

    /// Text encoding of the files (utf-8, utf-16le, utf-16be, nop, ...)
    #[arg(long, env = "FILELOG_ENCODING", default_value = "utf-8")]
    pub encoding: String,

    /// Where to start reading files present at startup: beginning or end
    #[arg(value_enum, long, env = "FILELOG_START_AT", default_value = "end")]
    pub start_at: StartAtArg,

    /// Regex matching the first line of a multi-line record
    #[arg(long, env = "FILELOG_LINE_START_PATTERN")]
    pub line_start_pattern: Option<String>,

    /// Regex matching the last line of a multi-line record
    #[arg(long, env = "FILELOG_LINE_END_PATTERN")]
    pub line_end_pattern: Option<String>,

    /// Emit an unterminated record after it has not changed for this long (0 disables)
    #[arg(
        long,
        env = "FILELOG_FORCE_FLUSH_PERIOD",
        default_value = "500ms",
        value_parser = parse_duration
    )]
    pub force_flush_period: Duration,

    /// Add the file name to every record
    #[arg(long, env = "FILELOG_INCLUDE_FILE_NAME", default_value = "true")]
    pub include_file_name: bool,

    /// Add the absolute file path to every record
    #[arg(long, env = "FILELOG_INCLUDE_FILE_PATH", default_value = "false")]
    pub include_file_path: bool,

    /// Comma-separated static labels added to every record (e.g., "env=prod,team=core")
    #[arg(long, env = "FILELOG_ATTRIBUTES", value_delimiter = ',', value_parser = parse_key_val)]
    pub attributes: Vec<(String, String)>,

    /// Path to store file offsets for persistence across restarts
    #[arg(
        long,
        env = "FILELOG_OFFSETS_PATH",
        default_value = "/var/lib/filelog/offsets.json"
    )]
    pub offsets_path: PathBuf,

    /// Number of polls a vanished file is remembered for
    #[arg(long, env = "FILELOG_RETAIN_RETIRED_POLLS", default_value = "3")]
    pub retain_retired_polls: u32,

    /// How long checkpoint saves may keep failing before exiting
    #[arg(
        long,
        env = "FILELOG_MAX_CHECKPOINT_FAILURE_DURATION",
        default_value = "60s",
        value_parser = parse_duration
    )]
    pub max_checkpoint_failure_duration: Duration,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("invalid attribute '{}', expected key=value", s))
}

impl FileConsumerArgs {
    /// Build the consumer config from command line args
    pub fn build_config(&self) -> FileConsumerConfig {
        FileConsumerConfig {
            include: self.include.clone(),
            exclude: self.exclude.clone(),
            poll_interval: self.poll_interval,
            fingerprint_size: self.fingerprint_size,
            max_log_size: self.max_log_size,
            max_read_size: self.max_read_size,
            max_concurrent_files: self.max_concurrent_files,
            encoding: self.encoding.clone(),
            start_at: self.start_at.into(),
            multiline: MultilineConfig {
                line_start_pattern: self.line_start_pattern.clone(),
                line_end_pattern: self.line_end_pattern.clone(),
            },
            force_flush_period: self.force_flush_period,
            include_file_name: self.include_file_name,
            include_file_path: self.include_file_path,
            attributes: self.attributes.iter().cloned().collect::<BTreeMap<_, _>>(),
            retain_retired_polls: self.retain_retired_polls,
            max_checkpoint_failure_duration: self.max_checkpoint_failure_duration,
        }
    }
}
