//! Evaluator metric mappings.

use std::collections::BTreeMap;

use crate::error::{CoreError, Result};

/// Primary checkpoint-selection metric.
pub const MAP_COCO: &str = "mAP_coco";

/// Metric name to value, as reported by a detection evaluator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricScores(BTreeMap<String, f64>);

impl MetricScores {
    /// Empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: f64) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    /// Insert or replace a metric.
    pub fn insert(&mut self, key: impl Into<String>, value: f64) {
        self.0.insert(key.into(), value);
    }

    /// Value of `key`.
    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied()
    }

    /// Value of `key`, or an error naming it.
    pub fn require(&self, key: &str) -> Result<f64> {
        self.get(key).ok_or_else(|| CoreError::MissingMetric {
            key: key.to_string(),
        })
    }

    /// Metrics in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Underlying map.
    pub fn as_map(&self) -> &BTreeMap<String, f64> {
        &self.0
    }
}

impl FromIterator<(String, f64)> for MetricScores {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
