// SPDX-License-Identifier: Apache-2.0

use std::time::{Duration, Instant};

/// Forces out a pending record that has stopped growing.
///
/// A multi-line record is only complete once the next boundary shows up. When a writer
/// stops after the last record that boundary may never arrive, so the reader asks the
/// flusher at end of data whether the unterminated tail should be emitted anyway.
#[derive(Debug, Clone)]
pub struct Flusher {
    period: Duration,
    last_data_change: Instant,
    previous_len: usize,
}

impl Flusher {
    /// A zero `period` disables forced flushing.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last_data_change: Instant::now(),
            previous_len: 0,
        }
    }

    /// Record that a complete record was emitted.
    pub fn mark_progress(&mut self, now: Instant) {
        self.last_data_change = now;
        self.previous_len = 0;
    }

    /// Forget everything observed so far, e.g. after the file was truncated.
    pub fn reset(&mut self, now: Instant) {
        self.mark_progress(now);
    }

    /// Decide whether `pending_len` bytes of unterminated data should be flushed.
    ///
    /// The timer restarts whenever the pending length changes, so only a tail that has
    /// been stable for the whole period is forced out.
    pub fn should_flush(&mut self, pending_len: usize, now: Instant) -> bool {
        if pending_len != self.previous_len {
            self.previous_len = pending_len;
            self.last_data_change = now;
            return false;
        }

        !self.period.is_zero()
            && pending_len > 0
            && now.saturating_duration_since(self.last_data_change) >= self.period
    }
}
