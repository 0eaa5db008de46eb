//! Replay score tables.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::target::SampleId;

/// Per-sample quality scores from one replay-selection pass.
///
/// Keeps insertion order so that ties sort the same way on every run.
#[derive(Debug, Clone, Default)]
pub struct ReplayScoreTable {
    entries: Vec<(SampleId, f64)>,
    index: HashMap<SampleId, usize>,
}

impl ReplayScoreTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the score of `id`, replacing an earlier score for the same sample.
    pub fn record(&mut self, id: SampleId, score: f64) {
        match self.index.get(&id) {
            Some(&i) => self.entries[i].1 = score,
            None => {
                self.index.insert(id.clone(), self.entries.len());
                self.entries.push((id, score));
            }
        }
    }

    /// Number of scored samples.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing was scored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Score of `id`.
    pub fn score(&self, id: &SampleId) -> Option<f64> {
        self.index.get(id).map(|&i| self.entries[i].1)
    }

    /// Entries sorted by ascending score. NaN scores sort last.
    pub fn ranked(&self) -> Vec<(SampleId, f64)> {
        let mut ranked = self.entries.clone();
        ranked.sort_by(|a, b| ascending_nan_last(a.1, b.1));
        ranked
    }

    /// The `n` worst-scoring samples, worst first.
    pub fn select_worst(&self, n: usize) -> Vec<SampleId> {
        self.ranked().into_iter().take(n).map(|(id, _)| id).collect()
    }
}

fn ascending_nan_last(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.total_cmp(&b),
    }
}
