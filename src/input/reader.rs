// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::fingerprint::Fingerprint;
use crate::entry::{FileAttributes, LogEntry};
use crate::metrics::ConsumerMetrics;
use crate::sink::{LogSink, SinkError};
use crate::split::{Flusher, Splitter};

/// Size of each read from the file
const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Counts open reader file handles, current and peak, and reports them to the
/// `filelog_open_files` instrument.
#[derive(Clone, Default)]
pub struct OpenFileGauge {
    inner: Arc<GaugeInner>,
}

#[derive(Default)]
struct GaugeInner {
    current: AtomicUsize,
    peak: AtomicUsize,
    metrics: ConsumerMetrics,
}

impl OpenFileGauge {
    pub fn new(metrics: ConsumerMetrics) -> Self {
        Self {
            inner: Arc::new(GaugeInner {
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                metrics,
            }),
        }
    }

    /// Register an open handle until the returned guard is dropped
    pub fn acquire(&self) -> OpenFileGuard {
        let now = self.inner.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak.fetch_max(now, Ordering::SeqCst);
        self.inner.metrics.file_opened();
        OpenFileGuard {
            inner: self.inner.clone(),
        }
    }

    pub fn current(&self) -> usize {
        self.inner.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }
}

pub struct OpenFileGuard {
    inner: Arc<GaugeInner>,
}

impl Drop for OpenFileGuard {
    fn drop(&mut self) {
        self.inner.current.fetch_sub(1, Ordering::SeqCst);
        self.inner.metrics.file_closed();
    }
}

/// Everything a read pass needs besides the per-file state. Shared by all readers.
pub struct ReaderContext {
    pub splitter: Splitter,
    pub sink: Arc<dyn LogSink>,
    pub include_file_name: bool,
    pub include_file_path: bool,
    pub labels: BTreeMap<String, String>,
    /// Bytes a single pass may consume before it stops at the next record boundary
    pub max_read_size: u64,
    pub metrics: ConsumerMetrics,
    pub open_files: OpenFileGauge,
}

/// Outcome of one read pass
#[derive(Debug, Default)]
pub struct ReadStats {
    /// Records handed to the sink
    pub records: usize,
    /// Records cut at the maximum log size
    pub truncated: usize,
    /// Bytes the offset advanced by
    pub bytes: u64,
    /// The file was shorter than the offset and was read again from the start
    pub reset: bool,
    /// The pass stopped early because of cancellation
    pub cancelled: bool,
    /// The pass stopped early because the sink rejected a record
    pub sink_error: Option<SinkError>,
    /// The pass stopped at `max_read_size`; more data may be waiting
    pub limited: bool,
}

impl ReadStats {
    fn stopped(&self) -> bool {
        self.cancelled || self.limited || self.sink_error.is_some()
    }
}

/// Tracking state of a single file
#[derive(Debug, Clone)]
pub struct FileReader {
    path: PathBuf,
    fingerprint: Fingerprint,
    /// Start of the first record not yet emitted
    offset: u64,
    flusher: Flusher,
}

impl FileReader {
    pub fn new(
        path: impl AsRef<Path>,
        fingerprint: Fingerprint,
        offset: u64,
        force_flush_period: Duration,
    ) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            fingerprint,
            offset,
            flusher: Flusher::new(force_flush_period),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Follow the file to where it was observed this poll
    pub fn update(&mut self, path: PathBuf, fingerprint: Fingerprint) {
        self.path = path;
        self.fingerprint = fingerprint;
    }

    /// Read from the offset to the current end of the file, emitting every complete
    /// record. The offset only moves past records that reached the sink. A pass ends
    /// early at the first record boundary after `max_read_size` bytes.
    ///
    /// Errors leave the offset at the last emitted record so the next pass picks up
    /// from there.
    pub fn read_to_end(
        &mut self,
        ctx: &ReaderContext,
        cancel: &CancellationToken,
    ) -> io::Result<ReadStats> {
        let mut stats = ReadStats::default();

        let _slot = ctx.open_files.acquire();
        let mut file = File::open(&self.path)?;

        let len = file.metadata()?.len();
        if len < self.offset {
            warn!(
                path = %self.path.display(),
                offset = self.offset,
                len,
                "File was truncated, reading from the start"
            );
            self.offset = 0;
            self.flusher.reset(Instant::now());
            stats.reset = true;
        }
        file.seek(SeekFrom::Start(self.offset))?;

        let attributes = Arc::new(FileAttributes::new(
            &self.path,
            self.fingerprint.clone(),
            &ctx.labels,
            ctx.include_file_name,
            ctx.include_file_path,
        ));

        let mut pending: Vec<u8> = Vec::new();
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];
        loop {
            let n = file.read(&mut chunk)?;
            if cancel.is_cancelled() {
                stats.cancelled = true;
                return Ok(stats);
            }

            if n == 0 {
                if self.flusher.should_flush(pending.len(), Instant::now()) {
                    self.emit_ready(&pending, true, ctx, &attributes, cancel, &mut stats);
                }
                return Ok(stats);
            }

            pending.extend_from_slice(&chunk[..n]);
            let consumed = self.emit_ready(&pending, false, ctx, &attributes, cancel, &mut stats);
            pending.drain(..consumed);

            if stats.stopped() {
                return Ok(stats);
            }
        }
    }

    /// Emit the records found at the start of `data`. Returns the number of bytes
    /// consumed.
    fn emit_ready(
        &mut self,
        data: &[u8],
        force: bool,
        ctx: &ReaderContext,
        attributes: &Arc<FileAttributes>,
        cancel: &CancellationToken,
        stats: &mut ReadStats,
    ) -> usize {
        let mut pos = 0;
        while let Some(token) = ctx.splitter.split(&data[pos..], force) {
            if cancel.is_cancelled() {
                stats.cancelled = true;
                break;
            }
            if stats.bytes >= ctx.max_read_size {
                stats.limited = true;
                break;
            }

            if token.truncated {
                warn!(
                    path = %self.path.display(),
                    offset = self.offset,
                    max_log_size = ctx.splitter.max_log_size(),
                    "Log record exceeded max_log_size and was truncated"
                );
            }

            if !token.record.is_empty() {
                let entry = LogEntry::new(attributes.clone(), token.record, self.offset);
                if let Err(e) = ctx.sink.emit(entry) {
                    warn!(path = %self.path.display(), error = %e, "Sink rejected record");
                    stats.sink_error = Some(e);
                    break;
                }
                stats.records += 1;
                if token.truncated {
                    stats.truncated += 1;
                }
            }

            pos += token.advance;
            self.offset += token.advance as u64;
            stats.bytes += token.advance as u64;
            self.flusher.mark_progress(Instant::now());
        }
        pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Encoding;
    use crate::split::{MultilineConfig, SplitMode};
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    #[derive(Default)]
    struct Collect(Mutex<Vec<(String, u64)>>);

    impl LogSink for Collect {
        fn emit(&self, entry: LogEntry) -> Result<(), SinkError> {
            self.0
                .lock()
                .unwrap()
                .push((entry.body_str().into_owned(), entry.offset));
            Ok(())
        }
    }

    impl Collect {
        fn bodies(&self) -> Vec<String> {
            self.0.lock().unwrap().iter().map(|(b, _)| b.clone()).collect()
        }
    }

    fn context(mode: SplitMode, max_log_size: usize, sink: Arc<dyn LogSink>) -> ReaderContext {
        ReaderContext {
            splitter: Splitter::new(mode, Encoding::default(), max_log_size),
            sink,
            include_file_name: true,
            include_file_path: false,
            labels: BTreeMap::new(),
            max_read_size: u64::MAX,
            metrics: ConsumerMetrics::default(),
            open_files: OpenFileGauge::default(),
        }
    }

    fn reader_for(file: &NamedTempFile, period: Duration) -> FileReader {
        let mut f = File::open(file.path()).unwrap();
        let fp = Fingerprint::new(&mut f, 1000).unwrap();
        FileReader::new(file.path(), fp, 0, period)
    }

    fn append(file: &NamedTempFile, data: &str) {
        let mut f = std::fs::OpenOptions::new()
            .append(true)
            .open(file.path())
            .unwrap();
        f.write_all(data.as_bytes()).unwrap();
    }

    #[test]
    fn test_read_lines() {
        let file = NamedTempFile::new().unwrap();
        append(&file, "line 1\nline 2\nline 3\n");

        let sink = Arc::new(Collect::default());
        let ctx = context(SplitMode::LineDelimited, 1024, sink.clone());
        let mut reader = reader_for(&file, Duration::ZERO);

        let stats = reader.read_to_end(&ctx, &CancellationToken::new()).unwrap();
        assert_eq!(stats.records, 3);
        assert_eq!(sink.bodies(), vec!["line 1", "line 2", "line 3"]);
        assert_eq!(reader.offset(), 21);

        let offsets: Vec<u64> = sink.0.lock().unwrap().iter().map(|(_, o)| *o).collect();
        assert_eq!(offsets, vec![0, 7, 14]);
        assert_eq!(ctx.open_files.current(), 0);
        assert_eq!(ctx.open_files.peak(), 1);
    }

    #[test]
    fn test_incremental_read_keeps_partial_line() {
        let file = NamedTempFile::new().unwrap();
        append(&file, "line 1\nline");

        let sink = Arc::new(Collect::default());
        let ctx = context(SplitMode::LineDelimited, 1024, sink.clone());
        let mut reader = reader_for(&file, Duration::ZERO);
        let cancel = CancellationToken::new();

        reader.read_to_end(&ctx, &cancel).unwrap();
        assert_eq!(sink.bodies(), vec!["line 1"]);
        assert_eq!(reader.offset(), 7);

        append(&file, " 2\n");
        reader.read_to_end(&ctx, &cancel).unwrap();
        assert_eq!(sink.bodies(), vec!["line 1", "line 2"]);
        assert_eq!(reader.offset(), 14);
    }

    #[test]
    fn test_reread_is_idempotent() {
        let file = NamedTempFile::new().unwrap();
        append(&file, "a\nb\n");

        let sink = Arc::new(Collect::default());
        let ctx = context(SplitMode::LineDelimited, 1024, sink.clone());
        let mut reader = reader_for(&file, Duration::ZERO);
        let cancel = CancellationToken::new();

        reader.read_to_end(&ctx, &cancel).unwrap();
        let stats = reader.read_to_end(&ctx, &cancel).unwrap();
        assert_eq!(stats.records, 0);
        assert_eq!(sink.bodies(), vec!["a", "b"]);
    }

    #[test]
    fn test_truncated_file_restarts_from_zero() {
        let file = NamedTempFile::new().unwrap();
        append(&file, "first line\nsecond line\n");

        let sink = Arc::new(Collect::default());
        let ctx = context(SplitMode::LineDelimited, 1024, sink.clone());
        let mut reader = reader_for(&file, Duration::ZERO);
        let cancel = CancellationToken::new();
        reader.read_to_end(&ctx, &cancel).unwrap();

        std::fs::write(file.path(), "new\n").unwrap();
        let stats = reader.read_to_end(&ctx, &cancel).unwrap();
        assert!(stats.reset);
        assert_eq!(sink.bodies(), vec!["first line", "second line", "new"]);
        assert_eq!(reader.offset(), 4);
    }

    #[test]
    fn test_force_flush_after_period() {
        let file = NamedTempFile::new().unwrap();
        append(&file, "START a\nb\nSTART c\n");

        let sink = Arc::new(Collect::default());
        let mode = MultilineConfig {
            line_start_pattern: Some("^START".to_string()),
            line_end_pattern: None,
        }
        .build()
        .unwrap();
        let ctx = context(mode, 1024, sink.clone());
        let mut reader = reader_for(&file, Duration::from_millis(10));
        let cancel = CancellationToken::new();

        reader.read_to_end(&ctx, &cancel).unwrap();
        assert_eq!(sink.bodies(), vec!["START a\nb"]);

        std::thread::sleep(Duration::from_millis(20));
        reader.read_to_end(&ctx, &cancel).unwrap();
        assert_eq!(sink.bodies(), vec!["START a\nb", "START c"]);
        assert_eq!(reader.offset(), 18);
    }

    #[test]
    fn test_zero_period_never_forces() {
        let file = NamedTempFile::new().unwrap();
        append(&file, "no newline");

        let sink = Arc::new(Collect::default());
        let ctx = context(SplitMode::LineDelimited, 1024, sink.clone());
        let mut reader = reader_for(&file, Duration::ZERO);
        let cancel = CancellationToken::new();

        reader.read_to_end(&ctx, &cancel).unwrap();
        reader.read_to_end(&ctx, &cancel).unwrap();
        assert!(sink.bodies().is_empty());
        assert_eq!(reader.offset(), 0);
    }

    #[test]
    fn test_oversized_record_is_split() {
        let file = NamedTempFile::new().unwrap();
        append(&file, "0123456789abc\nok\n");

        let sink = Arc::new(Collect::default());
        let ctx = context(SplitMode::LineDelimited, 10, sink.clone());
        let mut reader = reader_for(&file, Duration::ZERO);

        let stats = reader.read_to_end(&ctx, &CancellationToken::new()).unwrap();
        assert_eq!(stats.truncated, 1);
        assert_eq!(sink.bodies(), vec!["0123456789", "abc", "ok"]);
    }

    #[test]
    fn test_cancelled_pass_emits_nothing() {
        let file = NamedTempFile::new().unwrap();
        append(&file, "a\nb\n");

        let sink = Arc::new(Collect::default());
        let ctx = context(SplitMode::LineDelimited, 1024, sink.clone());
        let mut reader = reader_for(&file, Duration::ZERO);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let stats = reader.read_to_end(&ctx, &cancel).unwrap();
        assert!(stats.cancelled);
        assert!(sink.bodies().is_empty());
        assert_eq!(reader.offset(), 0);
    }

    #[test]
    fn test_sink_error_stops_before_record() {
        let file = NamedTempFile::new().unwrap();
        append(&file, "a\nb\nc\n");

        struct FailOnB(Collect);
        impl LogSink for FailOnB {
            fn emit(&self, entry: LogEntry) -> Result<(), SinkError> {
                if entry.body == b"b" {
                    return Err(SinkError::Failed("full".to_string()));
                }
                self.0.emit(entry)
            }
        }

        let sink = Arc::new(FailOnB(Collect::default()));
        let ctx = context(SplitMode::LineDelimited, 1024, sink.clone());
        let mut reader = reader_for(&file, Duration::ZERO);

        let stats = reader.read_to_end(&ctx, &CancellationToken::new()).unwrap();
        assert!(stats.sink_error.is_some());
        assert_eq!(sink.0.bodies(), vec!["a"]);
        assert_eq!(reader.offset(), 2);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let sink = Arc::new(Collect::default());
        let ctx = context(SplitMode::LineDelimited, 1024, sink);
        let mut reader = FileReader::new(
            "/nonexistent/file.log",
            Fingerprint::from_bytes(b"x".to_vec()),
            0,
            Duration::ZERO,
        );
        assert!(reader.read_to_end(&ctx, &CancellationToken::new()).is_err());
        assert_eq!(ctx.open_files.current(), 0);
    }

    #[test]
    fn test_gauge_tracks_peak() {
        let gauge = OpenFileGauge::default();
        let a = gauge.acquire();
        let b = gauge.acquire();
        assert_eq!(gauge.current(), 2);
        drop(a);
        drop(b);
        let _c = gauge.acquire();
        assert_eq!(gauge.current(), 1);
        assert_eq!(gauge.peak(), 2);
    }

    #[test]
    fn test_pass_stops_at_read_limit() {
        let file = NamedTempFile::new().unwrap();
        append(&file, "aaa\nbbb\nccc\n");

        let sink = Arc::new(Collect::default());
        let mut ctx = context(SplitMode::LineDelimited, 1024, sink.clone());
        ctx.max_read_size = 5;
        let mut reader = reader_for(&file, Duration::ZERO);
        let cancel = CancellationToken::new();

        let stats = reader.read_to_end(&ctx, &cancel).unwrap();
        assert!(stats.limited);
        assert_eq!(sink.bodies(), vec!["aaa", "bbb"]);
        assert_eq!(reader.offset(), 8);

        let stats = reader.read_to_end(&ctx, &cancel).unwrap();
        assert!(!stats.limited);
        assert_eq!(sink.bodies(), vec!["aaa", "bbb", "ccc"]);
        assert_eq!(reader.offset(), 12);
    }
}
