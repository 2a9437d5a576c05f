// SPDX-License-Identifier: Apache-2.0

//! Poll loop tying discovery, identity tracking and reading together.
//!
//! Each poll:
//! - finds the matching paths and fingerprints them on the blocking pool
//! - keeps one path per fingerprint, preferring the path a file is already known at
//! - reconciles the fingerprints against the tracked files, then against the retired pool
//! - reads every tracked file, at most `max_concurrent_files` at a time
//! - saves checkpoints for tracked and retired files
//!
//! The retired pool holds files that were not seen in recent polls, plus the checkpoints
//! loaded at startup, so a file that moves out of and back into the matched set resumes
//! where it stopped instead of being read again. A matched path that cannot be opened
//! keeps its reader and checkpoint until it is readable again.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::select;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::StartAt;
use crate::error::Result;
use crate::input::{FileFinder, FileReader, Fingerprint, OpenFileGauge, ReaderContext};
use crate::metrics::FileErrorKind;
use crate::persistence::{Checkpoint, CheckpointStore};
use crate::reconcile::{Identity, reconcile};
use crate::split::Splitter;

/// Settings the poll loop needs, resolved from the configuration
#[derive(Debug, Clone)]
pub(crate) struct PollSettings {
    pub poll_interval: Duration,
    pub fingerprint_size: usize,
    pub max_concurrent_files: usize,
    pub start_at: StartAt,
    pub force_flush_period: Duration,
    pub retain_retired_polls: u32,
    pub max_checkpoint_failure_duration: Duration,
}

/// A matched path and its fingerprint at the time of the poll
#[derive(Debug)]
struct Observed {
    path: PathBuf,
    fingerprint: Fingerprint,
    len: u64,
}

/// Matched paths of one poll
#[derive(Debug, Default)]
struct Discovery {
    observed: Vec<Observed>,
    /// Paths that matched but could not be fingerprinted
    unreadable: HashSet<PathBuf>,
}

impl Observed {
    fn identity(&self) -> Identity<'_> {
        Identity {
            fingerprint: &self.fingerprint,
            path: &self.path,
        }
    }
}

/// A file that is no longer being read but may come back
#[derive(Debug, Clone)]
struct RetiredFile {
    checkpoint: Checkpoint,
    /// Polls since the file was retired
    age: u32,
}

/// What happened during one poll
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollStats {
    /// Files observed with a usable fingerprint
    pub observed: usize,
    /// Files seen for the first time
    pub new: usize,
    /// Tracked files found at a different path
    pub moved: usize,
    /// Files picked up again from a checkpoint or the retired pool
    pub resumed: usize,
    /// Tracked files that were not observed
    pub retired: usize,
    /// Records emitted
    pub records: usize,
    /// Files that could not be fingerprinted or read
    pub errors: usize,
}

pub struct Manager {
    finder: Arc<FileFinder>,
    ctx: Arc<ReaderContext>,
    store: Arc<dyn CheckpointStore>,
    settings: PollSettings,
    readers: Vec<FileReader>,
    retired: Vec<RetiredFile>,
    restored: bool,
    first_poll: bool,
    checkpoint_first_failure: Option<Instant>,
}

impl Manager {
    pub(crate) fn new(
        finder: FileFinder,
        ctx: Arc<ReaderContext>,
        store: Arc<dyn CheckpointStore>,
        settings: PollSettings,
    ) -> Self {
        Self {
            finder: Arc::new(finder),
            ctx,
            store,
            settings,
            readers: Vec::new(),
            retired: Vec::new(),
            restored: false,
            first_poll: true,
            checkpoint_first_failure: None,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.settings.poll_interval
    }

    pub fn splitter(&self) -> &Splitter {
        &self.ctx.splitter
    }

    /// Files currently being read
    pub fn tracked_files(&self) -> &[FileReader] {
        &self.readers
    }

    /// Checkpoints of files that are remembered but not currently matched
    pub fn retired_files(&self) -> Vec<Checkpoint> {
        self.retired.iter().map(|r| r.checkpoint.clone()).collect()
    }

    pub fn open_files(&self) -> &OpenFileGauge {
        &self.ctx.open_files
    }

    /// Load saved checkpoints. They are matched against files found by the next polls.
    /// Called by [`Manager::run`]; only the first call has an effect.
    pub fn restore(&mut self) -> Result<usize> {
        if self.restored {
            return Ok(0);
        }

        let checkpoints = self.store.load()?;
        let count = checkpoints.len();
        self.retired.extend(
            checkpoints
                .into_iter()
                .map(|checkpoint| RetiredFile { checkpoint, age: 0 }),
        );
        self.restored = true;

        info!(checkpoints = count, "Restored file checkpoints");
        Ok(count)
    }

    /// Poll until cancelled, then save a final checkpoint.
    ///
    /// Returns an error when the saved checkpoints cannot be loaded or when saving keeps
    /// failing for longer than `max_checkpoint_failure_duration`.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        self.restore()?;

        info!(
            poll_interval = ?self.settings.poll_interval,
            max_concurrent_files = self.settings.max_concurrent_files,
            start_at = %self.settings.start_at,
            "File consumer started"
        );

        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("File consumer cancelled, stopping poll loop");
                    break;
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.poll(&cancel).await {
                        error!("Checkpoint failures persisted beyond threshold, exiting: {}", e);
                        return Err(e);
                    }
                }
            }
        }

        match self.checkpoint() {
            Ok(()) => info!("Final checkpoint completed successfully"),
            Err(e) => warn!("Failed to perform final checkpoint: {}", e),
        }

        info!("File consumer stopped");
        Ok(())
    }

    /// Run a single poll cycle.
    ///
    /// Only fails when checkpoint saves have been failing for longer than allowed.
    pub async fn poll(&mut self, cancel: &CancellationToken) -> Result<PollStats> {
        let mut stats = PollStats::default();

        let finder = self.finder.clone();
        let fingerprint_size = self.settings.fingerprint_size;
        let discovery =
            match tokio::task::spawn_blocking(move || observe(&finder, fingerprint_size)).await {
                Ok(discovery) => discovery,
                Err(e) => {
                    error!("File discovery task failed: {}", e);
                    return Ok(stats);
                }
            };

        for _ in &discovery.unreadable {
            self.ctx.metrics.file_error(FileErrorKind::Fingerprint);
        }
        stats.errors += discovery.unreadable.len();

        let observed = self.dedupe(discovery.observed);
        stats.observed = observed.len();

        self.reconcile(observed, &discovery.unreadable, &mut stats);
        self.first_poll = false;

        if !cancel.is_cancelled() {
            self.read_all(cancel, &discovery.unreadable, &mut stats).await;
        }

        self.age_retired(&discovery.unreadable);
        self.maybe_checkpoint()?;

        debug!(
            observed = stats.observed,
            new = stats.new,
            moved = stats.moved,
            resumed = stats.resumed,
            retired = stats.retired,
            records = stats.records,
            errors = stats.errors,
            "Poll complete"
        );
        Ok(stats)
    }

    /// Keep one path per fingerprint. A path the file is already tracked or remembered
    /// at keeps it; between unknown paths the first in sorted order wins.
    fn dedupe(&self, observed: Vec<Observed>) -> Vec<Observed> {
        let known: HashSet<&Path> = self
            .readers
            .iter()
            .map(|r| r.path())
            .chain(self.retired.iter().map(|r| r.checkpoint.path.as_path()))
            .collect();

        let mut kept: Vec<Observed> = Vec::with_capacity(observed.len());
        let mut by_fingerprint: HashMap<Fingerprint, usize> = HashMap::new();
        for obs in observed {
            let Some(&index) = by_fingerprint.get(&obs.fingerprint) else {
                by_fingerprint.insert(obs.fingerprint.clone(), kept.len());
                kept.push(obs);
                continue;
            };

            let takes_over = known.contains(obs.path.as_path())
                && !known.contains(kept[index].path.as_path());
            let skipped = if takes_over {
                std::mem::replace(&mut kept[index], obs)
            } else {
                obs
            };
            warn!(
                path = %skipped.path.display(),
                kept = %kept[index].path.display(),
                fingerprint = %skipped.fingerprint,
                "Skipping file with the same fingerprint as another matched file"
            );
        }
        kept
    }

    /// Replace the tracked set with the files observed this poll. Readers on an
    /// unreadable path stay tracked.
    fn reconcile(
        &mut self,
        observed: Vec<Observed>,
        unreadable: &HashSet<PathBuf>,
        stats: &mut PollStats,
    ) {
        let matched = {
            let known: Vec<Identity<'_>> = self
                .readers
                .iter()
                .map(|r| Identity {
                    fingerprint: r.fingerprint(),
                    path: r.path(),
                })
                .collect();
            let seen: Vec<Identity<'_>> = observed.iter().map(Observed::identity).collect();
            reconcile(&known, &seen)
        };

        let mut previous: Vec<Option<FileReader>> =
            std::mem::take(&mut self.readers).into_iter().map(Some).collect();
        let mut observed: Vec<Option<Observed>> = observed.into_iter().map(Some).collect();
        let mut readers = Vec::with_capacity(observed.len());

        for (i, j) in matched.continued {
            let (Some(mut reader), Some(obs)) = (previous[i].take(), observed[j].take()) else {
                continue;
            };
            if reader.path() != obs.path {
                info!(
                    from = %reader.path().display(),
                    to = %obs.path.display(),
                    "File moved"
                );
                stats.moved += 1;
            }
            reader.update(obs.path, obs.fingerprint);
            readers.push(reader);
        }

        let mut newly_retired = Vec::with_capacity(matched.retired.len());
        for i in matched.retired {
            if let Some(reader) = previous[i].take() {
                if unreadable.contains(reader.path()) {
                    readers.push(reader);
                    continue;
                }
                debug!(
                    path = %reader.path().display(),
                    offset = reader.offset(),
                    "File no longer observed, retiring"
                );
                newly_retired.push(RetiredFile {
                    checkpoint: checkpoint_of(&reader),
                    age: 0,
                });
                stats.retired += 1;
            }
        }

        let candidates: Vec<Observed> = matched
            .new
            .into_iter()
            .filter_map(|j| observed[j].take())
            .collect();
        readers.extend(self.adopt(candidates, stats));

        self.retired.extend(newly_retired);
        readers.sort_by(|a, b| a.path().cmp(b.path()));
        self.readers = readers;
    }

    /// Start readers for files without a tracked counterpart, resuming from the retired
    /// pool when the file was seen before.
    fn adopt(&mut self, candidates: Vec<Observed>, stats: &mut PollStats) -> Vec<FileReader> {
        let matched = {
            let known: Vec<Identity<'_>> = self
                .retired
                .iter()
                .map(|r| Identity {
                    fingerprint: &r.checkpoint.fingerprint,
                    path: &r.checkpoint.path,
                })
                .collect();
            let seen: Vec<Identity<'_>> = candidates.iter().map(Observed::identity).collect();
            reconcile(&known, &seen)
        };

        let mut candidates: Vec<Option<Observed>> = candidates.into_iter().map(Some).collect();
        let mut readers = Vec::with_capacity(candidates.len());

        for &(i, j) in &matched.continued {
            let Some(obs) = candidates[j].take() else {
                continue;
            };
            let checkpoint = &self.retired[i].checkpoint;
            info!(
                path = %obs.path.display(),
                offset = checkpoint.offset,
                "Resuming file from checkpoint"
            );
            readers.push(FileReader::new(
                obs.path,
                obs.fingerprint,
                checkpoint.offset,
                self.settings.force_flush_period,
            ));
            stats.resumed += 1;
        }

        let start_at_end = self.first_poll && self.settings.start_at == StartAt::End;
        let unit = self.ctx.splitter.encoding().unit_width() as u64;
        for obs in candidates.into_iter().flatten() {
            // A writer may be halfway through a code unit
            let offset = if start_at_end {
                obs.len - obs.len % unit
            } else {
                0
            };
            info!(path = %obs.path.display(), offset, "Started watching file");
            readers.push(FileReader::new(
                obs.path,
                obs.fingerprint,
                offset,
                self.settings.force_flush_period,
            ));
            stats.new += 1;
        }

        let adopted: HashSet<usize> = matched.continued.iter().map(|&(i, _)| i).collect();
        let mut index = 0;
        self.retired.retain(|_| {
            let keep = !adopted.contains(&index);
            index += 1;
            keep
        });

        readers
    }

    /// Read every tracked file with at most `max_concurrent_files` passes in flight.
    /// Files that could not be opened this poll are left for the next one.
    async fn read_all(
        &mut self,
        cancel: &CancellationToken,
        unreadable: &HashSet<PathBuf>,
        stats: &mut PollStats,
    ) {
        let max_in_flight = self.settings.max_concurrent_files;
        let mut pending = (0..self.readers.len())
            .filter(|&index| !unreadable.contains(self.readers[index].path()))
            .collect::<Vec<_>>()
            .into_iter();
        let mut in_flight = FuturesUnordered::new();

        loop {
            while in_flight.len() < max_in_flight && !cancel.is_cancelled() {
                let Some(index) = pending.next() else {
                    break;
                };
                let mut reader = self.readers[index].clone();
                let ctx = self.ctx.clone();
                let cancel = cancel.clone();
                in_flight.push(async move {
                    let result = tokio::task::spawn_blocking(move || {
                        let outcome = reader.read_to_end(&ctx, &cancel);
                        (reader, outcome)
                    })
                    .await;
                    (index, result)
                });
            }

            let Some((index, result)) = in_flight.next().await else {
                break;
            };

            match result {
                Ok((reader, Ok(read))) => {
                    if read.records > 0 || read.reset {
                        debug!(
                            path = %reader.path().display(),
                            records = read.records,
                            truncated = read.truncated,
                            bytes = read.bytes,
                            offset = reader.offset(),
                            limited = read.limited,
                            "Read file"
                        );
                    }
                    self.ctx.metrics.record_read(&read);
                    stats.records += read.records;
                    self.readers[index] = reader;
                }
                Ok((reader, Err(e))) => {
                    warn!(
                        path = %reader.path().display(),
                        error = %e,
                        "Failed to read file, will retry next poll"
                    );
                    self.ctx.metrics.file_error(FileErrorKind::Read);
                    stats.errors += 1;
                    self.readers[index] = reader;
                }
                Err(e) => {
                    error!(
                        path = %self.readers[index].path().display(),
                        "Read task failed: {}", e
                    );
                    self.ctx.metrics.file_error(FileErrorKind::Task);
                    stats.errors += 1;
                }
            }
        }
    }

    /// Age the retired pool and drop what is past the retention window. Entries whose
    /// path could not be opened this poll do not age.
    fn age_retired(&mut self, unreadable: &HashSet<PathBuf>) {
        let retain = self.settings.retain_retired_polls;
        self.retired.retain_mut(|entry| {
            if unreadable.contains(&entry.checkpoint.path) {
                return true;
            }
            entry.age += 1;
            if entry.age > retain {
                debug!(
                    path = %entry.checkpoint.path.display(),
                    fingerprint = %entry.checkpoint.fingerprint,
                    "Forgetting retired file"
                );
                return false;
            }
            true
        });
    }

    fn checkpoints(&self) -> Vec<Checkpoint> {
        self.readers
            .iter()
            .map(checkpoint_of)
            .chain(self.retired.iter().map(|r| r.checkpoint.clone()))
            .collect()
    }

    fn checkpoint(&self) -> Result<()> {
        self.store.save(&self.checkpoints())
    }

    /// Save checkpoints, tolerating failures until they have lasted longer than
    /// `max_checkpoint_failure_duration`.
    fn maybe_checkpoint(&mut self) -> Result<()> {
        match self.checkpoint() {
            Ok(()) => {
                if self.checkpoint_first_failure.take().is_some() {
                    debug!("Checkpoint succeeded after previous failures");
                }
                Ok(())
            }
            Err(e) => {
                let first_failure = *self
                    .checkpoint_first_failure
                    .get_or_insert_with(Instant::now);
                let failure_duration = first_failure.elapsed();

                if failure_duration >= self.settings.max_checkpoint_failure_duration {
                    Err(e)
                } else {
                    warn!(
                        "Checkpoint failed (failures started {:?} ago): {}",
                        failure_duration, e
                    );
                    Ok(())
                }
            }
        }
    }
}

fn checkpoint_of(reader: &FileReader) -> Checkpoint {
    Checkpoint {
        fingerprint: reader.fingerprint().clone(),
        offset: reader.offset(),
        path: reader.path().to_path_buf(),
    }
}

/// Find and fingerprint the matching files. Files without content are skipped.
fn observe(finder: &FileFinder, fingerprint_size: usize) -> Discovery {
    let mut discovery = Discovery::default();

    for path in finder.find_files() {
        let (fingerprint, len) = match fingerprint_file(&path, fingerprint_size) {
            Ok(found) => found,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to fingerprint file, will retry next poll"
                );
                discovery.unreadable.insert(path);
                continue;
            }
        };

        if fingerprint.is_empty() {
            debug!(path = %path.display(), "Skipping empty file");
            continue;
        }

        discovery.observed.push(Observed {
            path,
            fingerprint,
            len,
        });
    }

    discovery
}

fn fingerprint_file(path: &Path, size: usize) -> std::io::Result<(Fingerprint, u64)> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let fingerprint = Fingerprint::new(&mut file, size)?;
    Ok((fingerprint, len))
}
