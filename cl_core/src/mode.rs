//! Continual-learning batch construction modes.
//!
//! Three configuration flags collapse into one [`ClMode`], resolved once when
//! the trainer is built. Each mode owns its batch-size invariant and the way
//! it turns loader output into criterion targets.

use crate::error::{CoreError, Result};
use crate::target::{DetectionTarget, LabelRemap, SampleTarget};

/// Raw continual-learning flags from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClFlags {
    /// Supervise some samples with class labels only.
    pub only_class_labels: bool,
    /// Replay a curated subset of the previous stage.
    pub replay: bool,
    /// Interleave two datasets in each batch.
    pub mixing_datasets: bool,
}

/// Batch-construction policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClMode {
    /// Full targets and segmentation for every sample.
    Standard,
    /// Labels only, batch size 1, no segmentation.
    SingleSampleClassOnly,
    /// Batch of two from different datasets; the first keeps labels only,
    /// the second keeps its full target and its segmentation map.
    MixedPairClassOnly,
}

/// Which part of a batch's segmentation map reaches the criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentationSelection {
    /// The whole batch.
    All,
    /// A single sample, kept as a batch of one.
    Sample(usize),
    /// None of it.
    Discard,
}

impl ClMode {
    /// Resolve the mode for `flags`, failing if `batch_size` breaks its invariant.
    pub fn resolve(flags: ClFlags, batch_size: usize) -> Result<Self> {
        let mode = if !flags.only_class_labels {
            ClMode::Standard
        } else if flags.replay || flags.mixing_datasets {
            ClMode::MixedPairClassOnly
        } else {
            ClMode::SingleSampleClassOnly
        };
        mode.check_batch_size(batch_size)?;
        Ok(mode)
    }

    /// Batch size the mode requires, if any.
    pub fn required_batch_size(&self) -> Option<usize> {
        match self {
            ClMode::Standard => None,
            ClMode::SingleSampleClassOnly => Some(1),
            ClMode::MixedPairClassOnly => Some(2),
        }
    }

    /// Human-readable mode name.
    pub fn name(&self) -> &'static str {
        match self {
            ClMode::Standard => "standard",
            ClMode::SingleSampleClassOnly => "single-sample class-only",
            ClMode::MixedPairClassOnly => "mixed-pair class-only",
        }
    }

    /// True for the single-sample class-only mode.
    pub fn is_single_sample(&self) -> bool {
        matches!(self, ClMode::SingleSampleClassOnly)
    }

    /// True for the mixed-pair class-only mode.
    pub fn is_mixed_pair(&self) -> bool {
        matches!(self, ClMode::MixedPairClassOnly)
    }

    fn check_batch_size(&self, got: usize) -> Result<()> {
        match self.required_batch_size() {
            Some(required) if required != got => Err(CoreError::BatchSizeMismatch {
                mode: self.name(),
                required,
                got,
            }),
            _ => Ok(()),
        }
    }

    /// Build per-sample criterion targets for one batch.
    pub fn build_targets(
        &self,
        samples: &[SampleTarget],
        remap: Option<LabelRemap>,
    ) -> Result<Vec<DetectionTarget>> {
        self.check_batch_size_for_batch(samples.len())?;
        let targets = match self {
            ClMode::Standard => samples
                .iter()
                .map(|s| DetectionTarget::full(s, remap))
                .collect(),
            ClMode::SingleSampleClassOnly => samples
                .iter()
                .map(|s| DetectionTarget::labels_only(s, remap))
                .collect(),
            ClMode::MixedPairClassOnly => samples
                .iter()
                .enumerate()
                .map(|(i, s)| {
                    if i == 0 {
                        DetectionTarget::labels_only(s, remap)
                    } else {
                        DetectionTarget::full(s, remap)
                    }
                })
                .collect(),
        };
        Ok(targets)
    }

    fn check_batch_size_for_batch(&self, got: usize) -> Result<()> {
        if got == 0 {
            return Err(CoreError::Data("empty batch".into()));
        }
        self.check_batch_size(got)
    }

    /// Segmentation policy for training batches.
    pub fn segmentation_selection(&self) -> SegmentationSelection {
        match self {
            ClMode::Standard => SegmentationSelection::All,
            ClMode::SingleSampleClassOnly => SegmentationSelection::Discard,
            ClMode::MixedPairClassOnly => SegmentationSelection::Sample(1),
        }
    }
}
