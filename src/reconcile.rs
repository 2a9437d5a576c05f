// SPDX-License-Identifier: Apache-2.0

//! Matching tracked files against the files observed in a poll.

use std::path::Path;

use crate::input::Fingerprint;

/// A file as seen by reconciliation: its identity and where it was found
#[derive(Debug, Clone, Copy)]
pub struct Identity<'a> {
    pub fingerprint: &'a Fingerprint,
    pub path: &'a Path,
}

impl Identity<'_> {
    /// `observed` is this file, possibly after it grew
    fn continues_as(&self, observed: &Identity<'_>) -> bool {
        self.fingerprint == observed.fingerprint
            || (self.fingerprint.len() < observed.fingerprint.len()
                && observed.fingerprint.starts_with(self.fingerprint))
    }
}

/// Result of matching known fingerprints against observed ones. Every known index ends
/// up in exactly one of `continued` or `retired`, every observed index in exactly one of
/// `continued` or `new`.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// `(known, observed)` pairs that are the same file
    pub continued: Vec<(usize, usize)>,
    /// Observed files with no known counterpart
    pub new: Vec<usize>,
    /// Known files that were not observed
    pub retired: Vec<usize>,
}

/// Pair up known and observed files.
///
/// A file still at its known path with the same or a grown fingerprint is matched first,
/// so a copy elsewhere never takes over its stream. Exact fingerprint matches are taken
/// next. The remaining known fingerprints that are a strict prefix of an observed one
/// are matched last, longest known prefix first: the file grew since its fingerprint was
/// taken. `observed` must not contain duplicate fingerprints.
pub fn reconcile(known: &[Identity<'_>], observed: &[Identity<'_>]) -> Reconciliation {
    let mut known_matched = vec![false; known.len()];
    let mut observed_matched = vec![false; observed.len()];
    let mut continued = Vec::new();

    for (i, k) in known.iter().enumerate() {
        let same_path = (0..observed.len()).find(|&j| {
            !observed_matched[j] && observed[j].path == k.path && k.continues_as(&observed[j])
        });
        if let Some(j) = same_path {
            known_matched[i] = true;
            observed_matched[j] = true;
            continued.push((i, j));
        }
    }

    for (j, obs) in observed.iter().enumerate() {
        if observed_matched[j] {
            continue;
        }
        let exact = (0..known.len())
            .find(|&i| !known_matched[i] && known[i].fingerprint == obs.fingerprint);
        if let Some(i) = exact {
            known_matched[i] = true;
            observed_matched[j] = true;
            continued.push((i, j));
        }
    }

    let mut candidates: Vec<(usize, usize)> = Vec::new();
    for (i, k) in known.iter().enumerate().filter(|(i, _)| !known_matched[*i]) {
        for (j, obs) in observed
            .iter()
            .enumerate()
            .filter(|(j, _)| !observed_matched[*j])
        {
            if k.fingerprint.len() < obs.fingerprint.len()
                && obs.fingerprint.starts_with(k.fingerprint)
            {
                candidates.push((i, j));
            }
        }
    }
    candidates.sort_by(|a, b| {
        known[b.0]
            .fingerprint
            .len()
            .cmp(&known[a.0].fingerprint.len())
            .then(a.cmp(b))
    });

    for (i, j) in candidates {
        if !known_matched[i] && !observed_matched[j] {
            known_matched[i] = true;
            observed_matched[j] = true;
            continued.push((i, j));
        }
    }

    continued.sort_unstable();
    Reconciliation {
        continued,
        new: unmatched(&observed_matched),
        retired: unmatched(&known_matched),
    }
}

fn unmatched(matched: &[bool]) -> Vec<usize> {
    matched
        .iter()
        .enumerate()
        .filter_map(|(idx, &m)| (!m).then_some(idx))
        .collect()
}
