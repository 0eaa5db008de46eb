//! Host batches to device tensors.

use burn::prelude::*;

use cl_core::{ClMode, DetectionTarget, LabelRemap, SampleId, SegmentationSelection, VolumeBatch};

use crate::error::Result;
use crate::model::{host_to_tensor, TargetTensors};

/// A batch ready for the network and the criterion.
#[derive(Debug, Clone)]
pub struct PreparedBatch<B: Backend> {
    /// `[N, C, D, H, W]`
    pub volume: Tensor<B, 5>,
    /// Host targets after mode selection and label remapping.
    pub targets: Vec<DetectionTarget>,
    /// Uploaded `targets`.
    pub target_tensors: Vec<TargetTensors<B>>,
    /// Segmentation maps that survived mode selection.
    pub segmentation: Option<Tensor<B, 5>>,
    /// Sample identifiers.
    pub sample_ids: Vec<SampleId>,
}

impl<B: Backend> PreparedBatch<B> {
    fn upload(
        batch: &VolumeBatch,
        targets: Vec<DetectionTarget>,
        segmentation: Option<cl_core::HostTensor>,
        device: &B::Device,
    ) -> Result<Self> {
        let volume = host_to_tensor::<B, 5>(&batch.volumes, device)?;
        let segmentation = segmentation
            .map(|s| host_to_tensor::<B, 5>(&s, device))
            .transpose()?;
        let target_tensors = TargetTensors::from_targets(&targets, device);
        Ok(Self {
            volume,
            targets,
            target_tensors,
            segmentation,
            sample_ids: batch.sample_ids.clone(),
        })
    }

    /// Training batch: targets and segmentation follow `mode`.
    pub fn training(
        batch: &VolumeBatch,
        mode: ClMode,
        remap: Option<LabelRemap>,
        device: &B::Device,
    ) -> Result<Self> {
        let targets = mode.build_targets(&batch.targets, remap)?;
        let segmentation = match (mode.segmentation_selection(), &batch.segmentation) {
            (_, None) | (SegmentationSelection::Discard, _) => None,
            (SegmentationSelection::All, Some(seg)) => Some(seg.clone()),
            (SegmentationSelection::Sample(i), Some(seg)) => Some(seg.select_leading(i)?),
        };
        Self::upload(batch, targets, segmentation, device)
    }

    /// Validation batch: full targets, optional label remap, and segmentation
    /// values above `seg_ceiling` set to background.
    pub fn validation(
        batch: &VolumeBatch,
        remap: Option<LabelRemap>,
        seg_ceiling: Option<i64>,
        device: &B::Device,
    ) -> Result<Self> {
        let targets = ClMode::Standard.build_targets(&batch.targets, remap)?;
        let segmentation = batch.segmentation.clone().map(|mut seg| {
            if let Some(ceiling) = seg_ceiling {
                seg.zero_above(ceiling as f32);
            }
            seg
        });
        Self::upload(batch, targets, segmentation, device)
    }

    /// Test or replay-scoring batch: targets as stored.
    pub fn evaluation(batch: &VolumeBatch, device: &B::Device) -> Result<Self> {
        let targets = ClMode::Standard.build_targets(&batch.targets, None)?;
        Self::upload(batch, targets, batch.segmentation.clone(), device)
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// True for an empty batch.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
