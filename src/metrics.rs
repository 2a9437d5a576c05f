// SPDX-License-Identifier: Apache-2.0

//! OpenTelemetry instruments for the file consumer.
//!
//! Instruments come from the global meter provider and are no-ops until the host
//! installs one.

use opentelemetry::metrics::{Counter, Meter, UpDownCounter};
use opentelemetry::{KeyValue, global};

use crate::input::ReadStats;

pub fn get_meter() -> Meter {
    global::meter("filelog")
}

/// What failed when a file could not be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileErrorKind {
    Fingerprint,
    Read,
    Task,
}

impl FileErrorKind {
    fn as_str(self) -> &'static str {
        match self {
            FileErrorKind::Fingerprint => "fingerprint",
            FileErrorKind::Read => "read",
            FileErrorKind::Task => "task",
        }
    }
}

#[derive(Clone)]
pub struct ConsumerMetrics {
    accepted: Counter<u64>,
    refused: Counter<u64>,
    truncated: Counter<u64>,
    file_errors: Counter<u64>,
    open_files: UpDownCounter<i64>,
    tags: [KeyValue; 1],
}

impl ConsumerMetrics {
    pub fn new(meter: &Meter) -> Self {
        let accepted = meter
            .u64_counter("filelog_accepted_log_records")
            .with_description("Number of log records handed to the sink.")
            .with_unit("log_records")
            .build();

        let refused = meter
            .u64_counter("filelog_refused_log_records")
            .with_description("Number of log records the sink rejected.")
            .with_unit("log_records")
            .build();

        let truncated = meter
            .u64_counter("filelog_truncated_log_records")
            .with_description("Number of log records cut at max_log_size.")
            .with_unit("log_records")
            .build();

        let file_errors = meter
            .u64_counter("filelog_file_errors")
            .with_description("Number of files that could not be fingerprinted or read.")
            .with_unit("errors")
            .build();

        let open_files = meter
            .i64_up_down_counter("filelog_open_files")
            .with_description("Number of files currently open for reading.")
            .with_unit("files")
            .build();

        Self {
            accepted,
            refused,
            truncated,
            file_errors,
            open_files,
            tags: [KeyValue::new("receiver", "file")],
        }
    }

    pub(crate) fn record_read(&self, stats: &ReadStats) {
        if stats.records > 0 {
            self.accepted.add(stats.records as u64, &self.tags);
        }
        if stats.truncated > 0 {
            self.truncated.add(stats.truncated as u64, &self.tags);
        }
        if stats.sink_error.is_some() {
            self.refused.add(1, &self.tags);
        }
    }

    pub(crate) fn file_error(&self, kind: FileErrorKind) {
        let tags = [self.tags[0].clone(), KeyValue::new("error", kind.as_str())];
        self.file_errors.add(1, &tags);
    }

    pub(crate) fn file_opened(&self) {
        self.open_files.add(1, &self.tags);
    }

    pub(crate) fn file_closed(&self) {
        self.open_files.add(-1, &self.tags);
    }
}

impl Default for ConsumerMetrics {
    fn default() -> Self {
        Self::new(&get_meter())
    }
}
