//! Query-gradient distribution diagnostics.
//!
//! The query embedding of a DETR-style detector is `[queries, 2 * h]`; the
//! second half of the feature dimension is the target embedding. Its gradient
//! rows are split into queries matched to ground truth (positive) and the rest
//! (negative) to compare how much signal each side receives.

use crate::error::{CoreError, Result};

/// Target-embedding gradients split by match status.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryGradientSplit {
    /// Values of matched query rows.
    pub positive: Vec<f32>,
    /// Values of unmatched query rows.
    pub negative: Vec<f32>,
}

/// Split a row-major `[rows, cols]` gradient; NaN values become 0.
pub fn split_query_gradient(
    values: &[f32],
    rows: usize,
    cols: usize,
    positives: &[usize],
) -> Result<QueryGradientSplit> {
    if rows * cols != values.len() {
        return Err(CoreError::ShapeMismatch {
            expected: rows * cols,
            got: values.len(),
        });
    }
    if let Some(&bad) = positives.iter().find(|&&r| r >= rows) {
        return Err(CoreError::IndexOutOfBounds {
            index: bad,
            len: rows,
        });
    }

    let half = cols / 2;
    let row = |r: usize| {
        values[r * cols + half..(r + 1) * cols]
            .iter()
            .map(|v| if v.is_nan() { 0.0 } else { *v })
    };

    let mut is_positive = vec![false; rows];
    for &r in positives {
        is_positive[r] = true;
    }
    let mut split = QueryGradientSplit::default();
    for &r in positives {
        split.positive.extend(row(r));
    }
    for r in (0..rows).filter(|&r| !is_positive[r]) {
        split.negative.extend(row(r));
    }
    Ok(split)
}

/// Mean absolute value, 0 for an empty slice.
pub fn mean_abs(values: &[f32]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|v| v.abs() as f64).sum::<f64>() / values.len() as f64
}

/// Five-number summary of a distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxSummary {
    /// Minimum.
    pub min: f64,
    /// First quartile.
    pub q1: f64,
    /// Median.
    pub median: f64,
    /// Third quartile.
    pub q3: f64,
    /// Maximum.
    pub max: f64,
}

impl BoxSummary {
    /// Summarize `values` with linearly interpolated quantiles.
    pub fn from_values(values: &[f32]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = values.iter().map(|&v| v as f64).collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let q = |p: f64| {
            let pos = p * (sorted.len() - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
        };
        Some(Self {
            min: sorted[0],
            q1: q(0.25),
            median: q(0.5),
            q3: q(0.75),
            max: sorted[sorted.len() - 1],
        })
    }

    /// `(name, value)` pairs for logging.
    pub fn fields(&self) -> [(&'static str, f64); 5] {
        [
            ("min", self.min),
            ("q1", self.q1),
            ("median", self.median),
            ("q3", self.q3),
            ("max", self.max),
        ]
    }
}

/// Pools one epoch's splits and keeps the distributions of sampled epochs.
#[derive(Debug, Clone, Default)]
pub struct GradientHistory {
    current: QueryGradientSplit,
    retained: Vec<(usize, QueryGradientSplit)>,
}

impl GradientHistory {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one step's split to the current epoch.
    pub fn extend(&mut self, split: QueryGradientSplit) {
        self.current.positive.extend(split.positive);
        self.current.negative.extend(split.negative);
    }

    /// Close the epoch. If `retain`, keep its distribution and return the
    /// mean absolute positive and negative gradients.
    pub fn finish_epoch(&mut self, epoch: usize, retain: bool) -> Option<(f64, f64)> {
        let pooled = std::mem::take(&mut self.current);
        if !retain {
            return None;
        }
        let means = (mean_abs(&pooled.positive), mean_abs(&pooled.negative));
        self.retained.push((epoch, pooled));
        Some(means)
    }

    /// Box summaries `(epoch, positive, negative)` of every retained epoch.
    pub fn summaries(&self) -> Vec<(usize, Option<BoxSummary>, Option<BoxSummary>)> {
        self.retained
            .iter()
            .map(|(e, s)| {
                (
                    *e,
                    BoxSummary::from_values(&s.positive),
                    BoxSummary::from_values(&s.negative),
                )
            })
            .collect()
    }

    /// Number of retained epochs.
    pub fn retained_epochs(&self) -> usize {
        self.retained.len()
    }
}
