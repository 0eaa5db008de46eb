//! Epoch-level running means keyed by loss-term name.

use std::collections::BTreeMap;

/// Running arithmetic mean.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningMean {
    sum: f64,
    count: usize,
}

impl RunningMean {
    /// Add one observation.
    #[inline]
    pub fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    /// Mean of the observations, 0 when empty.
    #[inline]
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Number of observations.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }
}

/// Running means for a dynamic set of named quantities.
///
/// Entries appear the first time a name is seen, so optional branches
/// (denoising, encoder, hybrid, auxiliary layers) only show up in runs that
/// produce them.
#[derive(Debug, Clone, Default)]
pub struct MeanTracker {
    means: BTreeMap<String, RunningMean>,
}

impl MeanTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` under `name`.
    pub fn add(&mut self, name: impl Into<String>, value: f64) {
        self.means.entry(name.into()).or_default().add(value);
    }

    /// Current mean for `name`.
    pub fn mean(&self, name: &str) -> Option<f64> {
        self.means.get(name).map(RunningMean::mean)
    }

    /// `(name, mean)` pairs in name order.
    pub fn means(&self) -> impl Iterator<Item = (&str, f64)> {
        self.means.iter().map(|(k, v)| (k.as_str(), v.mean()))
    }

    /// Number of tracked names.
    pub fn len(&self) -> usize {
        self.means.len()
    }

    /// True if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.means.is_empty()
    }

    /// Forget everything.
    pub fn reset(&mut self) {
        self.means.clear();
    }
}
