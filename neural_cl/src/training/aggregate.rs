//! Loss aggregation.
//!
//! One batch's scalar objective is assembled from up to five sources:
//!
//! ```text
//! criterion(output)              -> terms (hd95 removed, tracked aside)
//! criterion(one-to-many view)    -> <key>_one2many, scaled by hybrid weight
//! aux model criterion, summed    -> aux_model
//! old model criterion, summed    -> old_model
//! ─────────────────────────────────────────────────────────────
//! total = Σ coef(category(key)) · term  +  Σ contrastive
//! ```

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

use cl_core::{BranchTag, DetectionTarget, LossCategory, LossCoefficients, LossKey};

use crate::criterion::{Criterion, CriterionContext, LossDict};
use crate::error::{NeuralClError, Result};
use crate::model::{read_scalar, NetworkOutput, TargetTensors};

use super::frozen::ScoringModel;

/// One-to-many matching settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HybridMatching {
    /// Target repetitions.
    pub repeats: usize,
    /// Weight applied to every one-to-many term.
    pub weight: f64,
}

/// Which loop the aggregation serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossPass {
    /// Training: hybrid and contrastive terms included.
    Train,
    /// Validation: criterion and frozen-model terms only.
    Eval,
}

/// Inputs of one aggregation.
#[derive(Debug)]
pub struct LossInputs<'a, B: Backend> {
    /// Network input, fed to frozen models.
    pub volume: &'a Tensor<B, 5>,
    /// Network output.
    pub output: &'a NetworkOutput<B>,
    /// Host targets, repeated for one-to-many matching.
    pub targets: &'a [DetectionTarget],
    /// Uploaded `targets`.
    pub target_tensors: &'a [TargetTensors<B>],
    /// Segmentation maps, if any survive mode selection.
    pub segmentation: Option<&'a Tensor<B, 5>>,
    /// Batch facts for the criterion.
    pub ctx: CriterionContext,
}

/// The aggregated objective of one batch.
#[derive(Debug, Clone)]
pub struct BatchLoss<B: Backend> {
    /// Scalar objective.
    pub total: Tensor<B, 1>,
    /// Every weighted term before multiplication by its coefficient.
    pub terms: LossDict<B>,
    /// Sum of contrastive terms, if the network produced any.
    pub contrastive: Option<Tensor<B, 1>>,
    /// Hausdorff diagnostic, when the criterion reports it.
    pub hausdorff: Option<f64>,
    /// Matched query indices per sample.
    pub positive_queries: Vec<Vec<usize>>,
}

/// Combines criterion, hybrid, frozen-model and contrastive terms.
pub struct LossAggregator<B: AutodiffBackend> {
    criterion: Box<dyn Criterion<B>>,
    dense_hybrid: Option<Box<dyn Criterion<B>>>,
    aux_model: Option<Box<dyn ScoringModel<B>>>,
    old_model: Option<Box<dyn ScoringModel<B>>>,
    coefficients: LossCoefficients,
    hybrid: Option<HybridMatching>,
}

impl<B: AutodiffBackend> LossAggregator<B> {
    /// Aggregator around the primary criterion.
    pub fn new(criterion: Box<dyn Criterion<B>>, coefficients: LossCoefficients) -> Self {
        Self {
            criterion,
            dense_hybrid: None,
            aux_model: None,
            old_model: None,
            coefficients,
            hybrid: None,
        }
    }

    /// Enable one-to-many matching.
    pub fn with_hybrid(mut self, hybrid: HybridMatching) -> Self {
        self.hybrid = Some(hybrid);
        self
    }

    /// Dedicated criterion for the one-to-many branch; targets are then not repeated.
    pub fn with_dense_hybrid(mut self, criterion: Box<dyn Criterion<B>>) -> Self {
        self.dense_hybrid = Some(criterion);
        self
    }

    /// Frozen auxiliary and previous-stage models.
    pub fn with_frozen_models(
        mut self,
        aux_model: Box<dyn ScoringModel<B>>,
        old_model: Box<dyn ScoringModel<B>>,
    ) -> Self {
        self.aux_model = Some(aux_model);
        self.old_model = Some(old_model);
        self
    }

    /// True when the primary criterion reports a Hausdorff proxy.
    pub fn seg_proxy(&self) -> bool {
        self.criterion.seg_proxy()
    }

    /// Coefficient table.
    pub fn coefficients(&self) -> &LossCoefficients {
        &self.coefficients
    }

    /// Assemble the objective of one batch.
    pub fn aggregate(&self, pass: LossPass, inputs: LossInputs<'_, B>) -> Result<BatchLoss<B>> {
        let ctx = match pass {
            LossPass::Train => inputs.ctx,
            LossPass::Eval => CriterionContext {
                epoch: inputs.ctx.epoch,
                ..CriterionContext::default()
            },
        };

        let primary = self.criterion.compute(
            inputs.output,
            inputs.target_tensors,
            inputs.segmentation,
            &ctx,
        )?;
        let mut terms = primary.losses;
        let hd95 = terms.take_diagnostic();
        let hausdorff = match hd95 {
            Some(t) if self.criterion.seg_proxy() => Some(read_scalar(t)?),
            _ => None,
        };

        if pass == LossPass::Train {
            if let Some(hybrid) = self.hybrid {
                self.add_one_to_many(&mut terms, hybrid, &inputs)?;
            }
        }

        if let (Some(aux), Some(old)) = (&self.aux_model, &self.old_model) {
            let aux_sum = self.frozen_loss(aux.as_ref(), pass, &inputs, &ctx)?;
            let old_sum = self.frozen_loss(old.as_ref(), pass, &inputs, &ctx)?;
            if let Some(t) = aux_sum {
                terms.insert(LossKey::new(LossCategory::AuxModel), t);
            }
            if let Some(t) = old_sum {
                terms.insert(LossKey::new(LossCategory::OldModel), t);
            }
        }

        let mut total: Option<Tensor<B, 1>> = None;
        for (key, value) in terms.iter() {
            let weighted = value.clone().mul_scalar(self.coefficients.coefficient(key)?);
            total = Some(match total {
                Some(acc) => acc + weighted,
                None => weighted,
            });
        }

        let contrastive = match pass {
            LossPass::Train => inputs
                .output
                .contrastive_losses
                .values()
                .cloned()
                .reduce(|acc, v| acc + v),
            LossPass::Eval => None,
        };
        if let Some(c) = &contrastive {
            total = Some(match total {
                Some(acc) => acc + c.clone(),
                None => c.clone(),
            });
        }

        let total = total.unwrap_or_else(|| Tensor::zeros([1], &inputs.output.device()));
        Ok(BatchLoss {
            total,
            terms,
            contrastive,
            hausdorff,
            positive_queries: primary.positive_queries,
        })
    }

    fn add_one_to_many(
        &self,
        terms: &mut LossDict<B>,
        hybrid: HybridMatching,
        inputs: &LossInputs<'_, B>,
    ) -> Result<()> {
        let ctx = &CriterionContext::default();
        let view = inputs.output.one_to_many_view().ok_or_else(|| {
            NeuralClError::config("hybrid matching is enabled but the network has no one-to-many branch")
        })?;

        let mut many = match &self.dense_hybrid {
            Some(dense) => dense.compute(&view, inputs.target_tensors, inputs.segmentation, ctx)?,
            None => {
                let repeated: Vec<DetectionTarget> = inputs
                    .targets
                    .iter()
                    .map(|t| t.repeated(hybrid.repeats))
                    .collect();
                let tensors = TargetTensors::from_targets(&repeated, &inputs.volume.device());
                self.criterion
                    .compute(&view, &tensors, inputs.segmentation, ctx)?
            }
        }
        .losses;
        many.take_diagnostic();

        for (key, value) in many {
            terms.accumulate(
                key.with_branch(BranchTag::OneToMany),
                value.mul_scalar(hybrid.weight),
            );
        }
        Ok(())
    }

    fn frozen_loss(
        &self,
        model: &dyn ScoringModel<B>,
        pass: LossPass,
        inputs: &LossInputs<'_, B>,
        ctx: &CriterionContext,
    ) -> Result<Option<Tensor<B, 1>>> {
        let mut output = model.score(inputs.volume);
        let ctx = match pass {
            LossPass::Train => {
                output.denoising = inputs.output.denoising;
                *ctx
            }
            LossPass::Eval => CriterionContext::default(),
        };
        let mut losses = self
            .criterion
            .compute(&output, inputs.target_tensors, inputs.segmentation, &ctx)?
            .losses;
        losses.take_diagnostic();
        Ok(losses.sum())
    }
}

impl<B: AutodiffBackend> BatchLoss<B> {
    /// Host values for epoch bookkeeping, keyed by loss name.
    pub fn scalars(&self) -> Result<Vec<(String, f64)>> {
        let mut out: Vec<(String, f64)> = self
            .terms
            .to_host()?
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        out.push(("total_loss".to_string(), read_scalar(self.total.clone())?));
        if let Some(c) = &self.contrastive {
            out.push(("contrast_loss".to_string(), read_scalar(c.clone())?));
        }
        if let Some(h) = self.hausdorff {
            out.push(("seg_hd95".to_string(), h));
        }
        Ok(out)
    }
}
