//! Replay sample selection.
//!
//! The previous-stage model scores every training sample in isolation; the
//! worst-scoring samples form the replay subset the loader is narrowed to.

use burn::tensor::backend::AutodiffBackend;

use cl_core::{BatchLoader, DetectionEvaluator, ReplayScoreTable, SampleId};

use crate::error::{NeuralClError, Result};
use crate::model::{DetectionNetwork, NetworkOutput, PostProcessor};

use super::batch::PreparedBatch;

/// Result of one selection pass.
#[derive(Debug, Clone)]
pub struct ReplaySelection {
    /// Score of every training sample.
    pub table: ReplayScoreTable,
    /// Chosen samples, worst first.
    pub selected: Vec<SampleId>,
}

/// Chooses the samples the previous-stage model handles worst.
#[derive(Debug, Clone)]
pub struct ReplaySelector {
    samples: usize,
    metric: String,
}

impl ReplaySelector {
    /// Select `samples` samples ranked by `metric`.
    pub fn new(samples: usize, metric: impl Into<String>) -> Self {
        Self {
            samples,
            metric: metric.into(),
        }
    }

    /// Score every sample `loader` yields with `network`.
    pub fn score<B, N>(
        &self,
        network: &N,
        loader: &dyn BatchLoader,
        postprocess: &dyn PostProcessor<B>,
        evaluator: &dyn DetectionEvaluator,
        device: &B::Device,
    ) -> Result<ReplayScoreTable>
    where
        B: AutodiffBackend,
        N: DetectionNetwork<B::InnerBackend>,
    {
        let mut table = ReplayScoreTable::new();
        for batch in loader.batches() {
            let batch = PreparedBatch::<B>::evaluation(&batch?, device)?;
            let volume = batch.volume.clone().inner();
            let output = NetworkOutput::<B>::from_inner(network.forward(volume, None, 0));
            let predictions = postprocess.predict(&output)?;
            if predictions.len() != batch.len() {
                return Err(NeuralClError::Data(format!(
                    "post-processing returned {} predictions for {} samples",
                    predictions.len(),
                    batch.len()
                )));
            }
            for ((id, prediction), target) in batch
                .sample_ids
                .iter()
                .zip(&predictions)
                .zip(&batch.targets)
            {
                let score = evaluator
                    .score_single(prediction, target)
                    .require(&self.metric)?;
                log::debug!("Replay score {} = {:.4}", id, score);
                table.record(id.clone(), score);
            }
        }
        Ok(table)
    }

    /// Score all samples and keep the worst.
    pub fn select<B, N>(
        &self,
        network: &N,
        loader: &dyn BatchLoader,
        postprocess: &dyn PostProcessor<B>,
        evaluator: &dyn DetectionEvaluator,
        device: &B::Device,
    ) -> Result<ReplaySelection>
    where
        B: AutodiffBackend,
        N: DetectionNetwork<B::InnerBackend>,
    {
        let table = self.score(network, loader, postprocess, evaluator, device)?;
        let selected = table.select_worst(self.samples);
        log::info!(
            "Selected {} of {} samples for replay",
            selected.len(),
            table.len()
        );
        Ok(ReplaySelection { table, selected })
    }
}
