// SPDX-License-Identifier: Apache-2.0

//! Destinations for log records.
//!
//! The manager calls [`LogSink::emit`] from several read passes at once, so sinks must be
//! `Send + Sync`. A sink error stops the current read pass; the record and everything
//! after it are read again on the next poll.

use flume::{Receiver, Sender};
use std::fmt;
use std::io::Write;
use std::sync::Mutex;

use crate::entry::{EntryRecord, LogEntry};

#[derive(Debug, PartialEq, Eq)]
pub enum SinkError {
    /// The receiving side is gone
    Disconnected,
    /// The sink could not accept the record
    Failed(String),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Disconnected => write!(f, "sink disconnected"),
            SinkError::Failed(reason) => write!(f, "sink failed: {}", reason),
        }
    }
}

impl std::error::Error for SinkError {}

pub trait LogSink: Send + Sync {
    fn emit(&self, entry: LogEntry) -> Result<(), SinkError>;
}

impl<F> LogSink for F
where
    F: Fn(LogEntry) + Send + Sync,
{
    fn emit(&self, entry: LogEntry) -> Result<(), SinkError> {
        self(entry);
        Ok(())
    }
}

/// Sink feeding a bounded channel. Emitting blocks while the channel is full, which
/// applies backpressure to the read pass.
#[derive(Clone)]
pub struct ChannelSink {
    tx: Sender<LogEntry>,
}

impl LogSink for ChannelSink {
    fn emit(&self, entry: LogEntry) -> Result<(), SinkError> {
        self.tx.send(entry).map_err(|_| SinkError::Disconnected)
    }
}

pub struct EntryReceiver {
    rx: Receiver<LogEntry>,
}

impl EntryReceiver {
    pub async fn next(&mut self) -> Option<LogEntry> {
        self.rx.recv_async().await.ok()
    }

    /// Non-blocking receive.
    /// Returns None if no entry is available or the channel is disconnected.
    pub fn try_recv(&self) -> Option<LogEntry> {
        self.rx.try_recv().ok()
    }

    /// Take everything currently queued
    pub fn drain(&self) -> Vec<LogEntry> {
        self.rx.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

pub fn channel(size: usize) -> (ChannelSink, EntryReceiver) {
    let (tx, rx) = flume::bounded(size);
    (ChannelSink { tx }, EntryReceiver { rx })
}

/// Writes each record as one JSON object per line
pub struct WriterSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> Result<W, SinkError> {
        self.writer
            .into_inner()
            .map_err(|e| SinkError::Failed(e.to_string()))
    }
}

impl<W: Write + Send> LogSink for WriterSink<W> {
    fn emit(&self, entry: LogEntry) -> Result<(), SinkError> {
        let body = entry.body_str();
        let record = EntryRecord {
            observed_time: &entry.observed_time,
            body: &body,
            attributes: &entry.attributes.attributes,
        };
        let mut line =
            serde_json::to_vec(&record).map_err(|e| SinkError::Failed(e.to_string()))?;
        line.push(b'\n');

        let mut writer = self
            .writer
            .lock()
            .map_err(|e| SinkError::Failed(e.to_string()))?;
        writer
            .write_all(&line)
            .and_then(|_| writer.flush())
            .map_err(|e| SinkError::Failed(e.to_string()))
    }
}
