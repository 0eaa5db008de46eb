//! Detection targets and predictions in host memory.

use std::fmt;

/// Axis-aligned 3D box as `[x1, y1, z1, x2, y2, z2]`.
pub type Box3 = [f32; 6];

/// Background class id.
pub const BACKGROUND_CLASS: i64 = 0;

/// Identifier of a training sample (its file path).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SampleId(String);

impl SampleId {
    /// Wrap a sample path.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the underlying path.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SampleId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Ground truth of one sample as delivered by the data loader.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SampleTarget {
    /// One box per object.
    pub boxes: Vec<Box3>,
    /// One class id per object.
    pub labels: Vec<i64>,
}

impl SampleTarget {
    /// Create a sample target.
    pub fn new(boxes: Vec<Box3>, labels: Vec<i64>) -> Self {
        Self { boxes, labels }
    }
}

/// Forces class ids above a ceiling to background.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelRemap {
    /// Highest class id that is kept.
    pub ceiling: i64,
}

impl LabelRemap {
    /// Create a remap keeping ids up to `ceiling`.
    pub fn new(ceiling: i64) -> Self {
        Self { ceiling }
    }

    /// Remap a single id.
    #[inline]
    pub fn apply(&self, label: i64) -> i64 {
        if label > self.ceiling {
            BACKGROUND_CLASS
        } else {
            label
        }
    }
}

/// Target handed to the criterion for one sample.
///
/// `boxes` is `None` when only class labels supervise the sample.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionTarget {
    /// Boxes, withheld in class-only modes.
    pub boxes: Option<Vec<Box3>>,
    /// Class ids.
    pub labels: Vec<i64>,
}

impl DetectionTarget {
    /// Boxes and labels from a sample, labels remapped if requested.
    pub fn full(sample: &SampleTarget, remap: Option<LabelRemap>) -> Self {
        Self {
            boxes: Some(sample.boxes.clone()),
            labels: remap_labels(&sample.labels, remap),
        }
    }

    /// Labels only; boxes withheld.
    pub fn labels_only(sample: &SampleTarget, remap: Option<LabelRemap>) -> Self {
        Self {
            boxes: None,
            labels: remap_labels(&sample.labels, remap),
        }
    }

    /// Target with boxes and labels tiled `k` times, for one-to-many matching.
    pub fn repeated(&self, k: usize) -> Self {
        let tile = |n: usize| (0..k).flat_map(move |_| 0..n);
        Self {
            boxes: self
                .boxes
                .as_ref()
                .map(|b| tile(b.len()).map(|i| b[i]).collect()),
            labels: tile(self.labels.len()).map(|i| self.labels[i]).collect(),
        }
    }

    /// Number of labelled objects.
    pub fn num_objects(&self) -> usize {
        self.labels.len()
    }
}

fn remap_labels(labels: &[i64], remap: Option<LabelRemap>) -> Vec<i64> {
    match remap {
        Some(r) => labels.iter().map(|&l| r.apply(l)).collect(),
        None => labels.to_vec(),
    }
}

/// Post-processed prediction for one sample.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SamplePrediction {
    /// Predicted boxes.
    pub boxes: Vec<Box3>,
    /// Predicted class per box.
    pub classes: Vec<i64>,
    /// Confidence per box.
    pub scores: Vec<f32>,
}
