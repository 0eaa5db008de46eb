//! Collaborator contracts that do not depend on a tensor backend.
//!
//! The data pipeline and the evaluator's metric math live outside this
//! workspace. The trainer only sees them through these traits.

use crate::error::Result;
use crate::metrics::MetricScores;
use crate::target::{DetectionTarget, SampleId, SamplePrediction, SampleTarget};
use crate::tensor::HostTensor;

/// One batch from a data loader.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeBatch {
    /// Input volumes `[N, C, D, H, W]`.
    pub volumes: HostTensor,
    /// Ground truth per sample.
    pub targets: Vec<SampleTarget>,
    /// Segmentation maps `[N, 1, D, H, W]`, if the dataset has them.
    pub segmentation: Option<HostTensor>,
    /// Sample identifiers (file paths).
    pub sample_ids: Vec<SampleId>,
}

impl VolumeBatch {
    /// Number of samples.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// True for an empty batch.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Deterministic source of training, validation or test batches.
pub trait BatchLoader {
    /// Number of batches per pass.
    fn len(&self) -> usize;

    /// True if a pass yields no batches.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One pass over the data, in a deterministic order.
    fn batches(&self) -> Box<dyn Iterator<Item = Result<VolumeBatch>> + '_>;

    /// A loader over exactly `samples`, with the same batching.
    fn restrict_to(&self, samples: &[SampleId]) -> Result<Box<dyn BatchLoader>>;
}

/// Detection metric computation.
pub trait DetectionEvaluator {
    /// Accumulate one batch of predictions and ground truth.
    fn add(&mut self, predictions: &[SamplePrediction], targets: &[DetectionTarget]);

    /// Metrics over everything accumulated since the last reset.
    fn eval(&mut self) -> MetricScores;

    /// Drop accumulated state.
    fn reset(&mut self);

    /// Metrics for one sample in isolation, leaving accumulated state untouched.
    fn score_single(&self, prediction: &SamplePrediction, target: &DetectionTarget) -> MetricScores;
}
