//! Epoch orchestration.
//!
//! ```text
//! epoch 0:   validate ─ test
//! replay:    score train set with old model ─ restrict loader
//! e = 1..N:  train ─ lr ─ grads ─ [validate] ─ [test] ─ schedule ─ model_last ─ [snapshot]
//! ```

use std::path::{Path, PathBuf};

use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

use cl_core::{
    split_query_gradient, BatchLoader, CheckpointKind, ClMode, DetectionEvaluator, EpochPhase,
    LogGroup, LossKey, LossScaler, MeanTracker, MetricScores, StepLr, TrainingState, VolumeBatch,
};
use cl_io::{write_test_metrics, ScalarLog};

use crate::config::TrainerConfig;
use crate::criterion::{Criterion, CriterionContext};
use crate::error::{NeuralClError, Result};
use crate::model::{DetectionNetwork, NamedParam, NetworkOutput, PostProcessor};

use super::aggregate::{BatchLoss, HybridMatching, LossAggregator, LossInputs, LossPass};
use super::batch::PreparedBatch;
use super::checkpoint::{load_record, restore_network, CheckpointManager};
use super::frozen::ScoringModel;
use super::grad;
use super::groups::ParamGroups;
use super::replay::{ReplaySelection, ReplaySelector};
use super::session::Session;

/// A named held-out dataset with its own evaluator.
pub struct TestSet {
    /// Dataset name, used for the metric file.
    pub name: String,
    /// Test batches.
    pub loader: Box<dyn BatchLoader>,
    /// Evaluator configured for this dataset's classes.
    pub evaluator: Box<dyn DetectionEvaluator>,
}

/// Data collaborators of a run.
pub struct TrainerData {
    /// Training batches; narrowed after replay selection.
    pub train: Box<dyn BatchLoader>,
    /// Validation batches.
    pub val: Box<dyn BatchLoader>,
    /// Validation evaluator.
    pub val_evaluator: Box<dyn DetectionEvaluator>,
    /// Held-out test sets; used only when testing is enabled.
    pub test_sets: Vec<TestSet>,
    /// Single-sample scorer for replay selection.
    pub replay_evaluator: Option<Box<dyn DetectionEvaluator>>,
}

/// Criterion-side collaborators.
pub struct TrainerLosses<B: Backend> {
    /// Primary criterion.
    pub criterion: Box<dyn Criterion<B>>,
    /// Separate criterion for the one-to-many branch.
    pub dense_hybrid: Option<Box<dyn Criterion<B>>>,
    /// Decoder output to detections.
    pub postprocess: Box<dyn PostProcessor<B>>,
}

/// Everything but the data loaders, so a loader can be iterated while the
/// rest of the trainer is mutated.
struct Engine<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    config: TrainerConfig,
    mode: ClMode,
    run_dir: PathBuf,
    model: M,
    optimizer: O,
    scheduler: StepLr,
    groups: ParamGroups,
    state: TrainingState,
    phase: EpochPhase,
    losses: LossAggregator<B>,
    postprocess: Box<dyn PostProcessor<B>>,
    checkpoints: CheckpointManager,
    scalars: ScalarLog,
    scaler: LossScaler,
    grad_history: cl_core::GradientHistory,
    summarized_epochs: usize,
    device: B::Device,
}

/// Continual-learning trainer.
pub struct ClTrainer<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    engine: Engine<B, M, O>,
    data: TrainerData,
}

impl<B, M, O> ClTrainer<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + DetectionNetwork<B> + 'static,
    M::InnerModule: DetectionNetwork<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    /// Assemble a trainer from a prepared session.
    ///
    /// The batch mode is resolved first, so a batch size the mode cannot
    /// serve fails before any data is read.
    pub fn new(
        config: TrainerConfig,
        session: Session<B, M, O>,
        losses: TrainerLosses<B>,
        data: TrainerData,
        device: B::Device,
    ) -> Result<Self> {
        let mode = ClMode::resolve(config.continual.flags(), config.batch_size)?;
        config.validate().map_err(NeuralClError::config)?;
        if config.continual.replay && data.replay_evaluator.is_none() {
            return Err(NeuralClError::config("replay is enabled but no replay evaluator was given"));
        }
        if config.test && data.test_sets.is_empty() {
            return Err(NeuralClError::config("testing is enabled but no test set was given"));
        }
        log::info!("Continual-learning mode: {}", mode.name());

        let mut aggregator = LossAggregator::new(losses.criterion, config.loss.coefficients());
        if config.loss.hybrid_matching {
            aggregator = aggregator.with_hybrid(HybridMatching {
                repeats: config.loss.hybrid_k,
                weight: config.loss.hybrid_loss_weight_one2many,
            });
        }
        if let Some(dense) = losses.dense_hybrid {
            aggregator = aggregator.with_dense_hybrid(dense);
        }
        if let (Some(aux), Some(old)) = (session.aux_model, session.old_model) {
            let aux: Box<dyn ScoringModel<B>> = Box::new(aux);
            let old: Box<dyn ScoringModel<B>> = Box::new(old);
            aggregator = aggregator.with_frozen_models(aux, old);
        }

        let checkpoints = CheckpointManager::create(&session.run_dir)?;
        let scalars = ScalarLog::open(&session.run_dir)?;
        let scaler = LossScaler::new(config.mixed_precision);

        Ok(Self {
            engine: Engine {
                config,
                mode,
                run_dir: session.run_dir,
                model: session.model,
                optimizer: session.optimizer,
                scheduler: session.scheduler,
                groups: session.groups,
                state: session.state,
                phase: EpochPhase::NotStarted,
                losses: aggregator,
                postprocess: losses.postprocess,
                checkpoints,
                scalars,
                scaler,
                grad_history: cl_core::GradientHistory::new(),
                summarized_epochs: 0,
                device,
            },
            data,
        })
    }

    /// Run directory.
    pub fn run_dir(&self) -> &Path {
        &self.engine.run_dir
    }

    /// Current epoch and best metrics.
    pub fn state(&self) -> TrainingState {
        self.engine.state
    }

    /// Current phase.
    pub fn phase(&self) -> EpochPhase {
        self.engine.phase
    }

    /// Resolved batch mode.
    pub fn mode(&self) -> ClMode {
        self.engine.mode
    }

    /// Network being trained.
    pub fn model(&self) -> &M {
        &self.engine.model
    }

    /// Learning-rate schedule.
    pub fn scheduler(&self) -> &StepLr {
        &self.engine.scheduler
    }

    /// Consume the trainer, returning the trained network.
    pub fn into_model(self) -> M {
        self.engine.model
    }

    /// Run every remaining epoch.
    pub fn run(&mut self) -> Result<TrainingState> {
        let start = self.engine.state.epoch;
        if start == 0 {
            self.validate(0)?;
            if self.testing() {
                self.test(0)?;
            }
        }

        if self.engine.config.continual.replay {
            self.select_replay()?;
        }

        for epoch in start + 1..=self.engine.config.epochs {
            self.run_epoch(epoch)?;
        }

        self.engine.set_phase(EpochPhase::Done);
        log::info!(
            "Training finished after epoch {} (best val {:.4}, best test {:.4})",
            self.engine.state.epoch,
            self.engine.state.best_val_metric,
            self.engine.state.best_test_metric
        );
        Ok(self.engine.state)
    }

    fn run_epoch(&mut self, epoch: usize) -> Result<()> {
        log::info!("Starting epoch {}", epoch);
        self.train_one_epoch(epoch)?;
        self.engine.log_learning_rates(epoch)?;
        if self.engine.config.log_grad {
            self.engine.log_gradient_diagnostics(epoch)?;
        }

        if epoch % self.engine.config.val_interval == 0 {
            self.validate(epoch)?;
        }
        if epoch % self.engine.config.test_interval == 0 && self.testing() {
            self.test(epoch)?;
        }

        self.engine.scheduler.step();
        self.engine.state.epoch = epoch;

        if !self.engine.config.debug_mode {
            self.engine.save(CheckpointKind::Last)?;
        }
        if epoch % self.engine.config.snapshot_interval == 0 {
            self.engine.save(CheckpointKind::Snapshot { epoch })?;
        }
        self.engine.set_phase(EpochPhase::Checkpointed);
        Ok(())
    }

    fn testing(&self) -> bool {
        self.engine.config.test && !self.data.test_sets.is_empty()
    }

    /// One optimization pass over the training loader; returns the mean
    /// total loss.
    pub fn train_one_epoch(&mut self, epoch: usize) -> Result<f64> {
        self.engine.set_phase(EpochPhase::Training);
        let mut tracker = MeanTracker::new();
        for batch in self.data.train.batches() {
            self.engine.train_step(&batch?, epoch, &mut tracker)?;
        }
        self.engine.grad_epoch_end(epoch)?;
        self.engine.log_loss_means(&tracker, LossPass::Train, epoch)?;
        let mean = tracker.mean("total_loss").unwrap_or(0.0);
        log::info!("Epoch {} train loss {:.4}", epoch, mean);
        Ok(mean)
    }

    /// Validation pass: losses without gradients, metrics, best checkpoint.
    pub fn validate(&mut self, epoch: usize) -> Result<MetricScores> {
        self.engine.set_phase(EpochPhase::Validating);
        let inner = self.engine.model.valid();
        let continual = &self.engine.config.continual;
        let remap = continual.label_remap();
        let seg_ceiling = continual.only_class_labels.then_some(continual.label_ceiling);
        let ctx = CriterionContext {
            epoch,
            ..CriterionContext::default()
        };

        let mut tracker = MeanTracker::new();
        for batch in self.data.val.batches() {
            let batch = PreparedBatch::<B>::validation(&batch?, remap, seg_ceiling, &self.engine.device)?;
            let output = Engine::<B, M, O>::infer(&inner, &batch.volume, epoch);
            let loss = self.engine.losses.aggregate(
                LossPass::Eval,
                LossInputs {
                    volume: &batch.volume,
                    output: &output,
                    targets: &batch.targets,
                    target_tensors: &batch.target_tensors,
                    segmentation: batch.segmentation.as_ref(),
                    ctx,
                },
            )?;
            record_losses(&mut tracker, &loss)?;
            let predictions = self.engine.postprocess.predict(&output)?;
            self.data.val_evaluator.add(&predictions, &batch.targets);
        }

        let scores = self.data.val_evaluator.eval();
        self.data.val_evaluator.reset();
        let primary = scores.require(&self.engine.config.main_metric)?;
        log::info!(
            "Epoch {} validation {} = {:.4}",
            epoch,
            self.engine.config.main_metric,
            primary
        );

        if !self.engine.config.debug_mode && self.engine.state.offer_val(primary) {
            self.engine.state.epoch = epoch;
            let path = self.engine.save(CheckpointKind::best_val(primary, epoch))?;
            log::info!("New best validation checkpoint {:?}", path);
        }

        self.engine.log_loss_means(&tracker, LossPass::Eval, epoch)?;
        let mut metric_values: Vec<(&str, f64)> = scores.iter().collect();
        if let Some(hd95) = tracker.mean("seg_hd95") {
            metric_values.push(("seg_hd95", hd95));
        }
        self.engine.scalars.add_scalars("val_metric", metric_values, epoch)?;
        Ok(scores)
    }

    /// Test pass over every held-out set; returns the mean primary metric.
    pub fn test(&mut self, epoch: usize) -> Result<f64> {
        self.engine.set_phase(EpochPhase::Testing);
        let inner = self.engine.model.valid();
        let metric = self.engine.config.main_metric.clone();

        let mut primaries = Vec::with_capacity(self.data.test_sets.len());
        for set in self.data.test_sets.iter_mut() {
            for batch in set.loader.batches() {
                let batch = PreparedBatch::<B>::evaluation(&batch?, &self.engine.device)?;
                let output = Engine::<B, M, O>::infer(&inner, &batch.volume, epoch);
                let predictions = self.engine.postprocess.predict(&output)?;
                set.evaluator.add(&predictions, &batch.targets);
            }
            let scores = set.evaluator.eval();
            set.evaluator.reset();
            let path = write_test_metrics(&self.engine.run_dir, epoch, &set.name, &scores)?;
            log::debug!("Test metrics of {} written to {:?}", set.name, path);
            primaries.push(scores.require(&metric)?);
        }

        let mean = if primaries.is_empty() {
            0.0
        } else {
            primaries.iter().sum::<f64>() / primaries.len() as f64
        };
        log::info!("Epoch {} test mean {} = {:.4}", epoch, metric, mean);

        if self.engine.state.offer_test(mean) {
            self.engine.state.epoch = epoch;
            let path = self.engine.save(CheckpointKind::best_test(mean, epoch))?;
            log::info!("New best test checkpoint {:?}", path);
        }
        Ok(mean)
    }

    /// Score the training set with the previous-stage model and narrow the
    /// training loader to the worst samples.
    pub fn select_replay(&mut self) -> Result<ReplaySelection> {
        let config = &self.engine.config;
        let path = config
            .continual
            .old_model_path
            .as_deref()
            .ok_or_else(|| NeuralClError::config("replay needs old_model_path"))?;
        let evaluator = self
            .data
            .replay_evaluator
            .as_deref()
            .ok_or_else(|| NeuralClError::config("replay needs a replay evaluator"))?;

        let record = load_record(path)?;
        let network = restore_network::<B::InnerBackend, M::InnerModule>(
            self.engine.model.valid(),
            &record,
            &self.engine.device,
        )?;
        let selection = ReplaySelector::new(config.continual.replay_samples, config.main_metric.clone())
            .select::<B, M::InnerModule>(
                &network,
                self.data.train.as_ref(),
                self.engine.postprocess.as_ref(),
                evaluator,
                &self.engine.device,
            )?;
        self.data.train = self.data.train.restrict_to(&selection.selected)?;
        Ok(selection)
    }
}

impl<B, M, O> Engine<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + DetectionNetwork<B>,
    M::InnerModule: DetectionNetwork<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    fn set_phase(&mut self, phase: EpochPhase) {
        log::debug!("Phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    fn infer(inner: &M::InnerModule, volume: &Tensor<B, 5>, epoch: usize) -> NetworkOutput<B> {
        NetworkOutput::from_inner(inner.forward(volume.clone().inner(), None, epoch))
    }

    fn train_step(&mut self, batch: &VolumeBatch, epoch: usize, tracker: &mut MeanTracker) -> Result<()> {
        let remap = self.config.continual.label_remap();
        let batch = PreparedBatch::<B>::training(batch, self.mode, remap, &self.device)?;
        let output = self
            .model
            .forward(batch.volume.clone(), Some(&batch.target_tensors), epoch);
        let ctx = CriterionContext {
            epoch,
            mixed_pair: self.mode.is_mixed_pair(),
            single_sample: self.mode.is_single_sample(),
        };
        let loss = self.losses.aggregate(
            LossPass::Train,
            LossInputs {
                volume: &batch.volume,
                output: &output,
                targets: &batch.targets,
                target_tensors: &batch.target_tensors,
                segmentation: batch.segmentation.as_ref(),
                ctx,
            },
        )?;
        record_losses(tracker, &loss)?;

        let positives = loss.positive_queries.first().cloned().unwrap_or_default();
        self.optimize(loss.total, &positives)
    }

    fn optimize(&mut self, total: Tensor<B, 1>, positives: &[usize]) -> Result<()> {
        let scale = self.scaler.scale();
        let grads = total.mul_scalar(scale).backward();
        let mut grads = GradientsParams::from_grads(grads, &self.model);
        let params = self.model.named_parameters();

        let stats = grad::unscale_and_clip::<B::InnerBackend>(
            &mut grads,
            &params,
            scale,
            self.config.clip_max_norm,
        )?;
        if !stats.is_finite() {
            log::warn!(
                "Skipping optimizer step: non-finite gradient norm at loss scale {}",
                scale
            );
            self.scaler.update(true);
            return Ok(());
        }

        if self.config.log_grad {
            self.collect_query_gradient(&grads, &params, positives)?;
        }

        let lrs = self.scheduler.lrs();
        let split = self.groups.split::<B::InnerBackend>(grads)?;
        for (group_grads, lr) in split.into_iter().zip(lrs) {
            if group_grads.is_empty() {
                continue;
            }
            self.model = self.optimizer.step(lr, self.model.clone(), group_grads);
        }
        self.scaler.update(false);
        Ok(())
    }

    fn collect_query_gradient(
        &mut self,
        grads: &GradientsParams,
        params: &[NamedParam],
        positives: &[usize],
    ) -> Result<()> {
        let Some(param) = params.iter().find(|p| p.name == self.config.query_param_name) else {
            return Ok(());
        };
        if param.rank() != 2 {
            log::debug!("{} is not a matrix; skipping gradient diagnostics", param.name);
            return Ok(());
        }
        if let Some((values, rows, cols)) = grad::read_matrix::<B::InnerBackend>(grads, param)? {
            self.grad_history
                .extend(split_query_gradient(&values, rows, cols, positives)?);
        }
        Ok(())
    }

    fn grad_epoch_end(&mut self, epoch: usize) -> Result<()> {
        if !self.config.log_grad {
            return Ok(());
        }
        let retain = epoch % self.config.log_grad_every_epoch == 0;
        if let Some((pos, neg)) = self.grad_history.finish_epoch(epoch, retain) {
            self.scalars.add_scalar("grads/avg_pos_queries_grad", pos, epoch)?;
            self.scalars.add_scalar("grads/avg_neg_queries_grad", neg, epoch)?;
        }
        Ok(())
    }

    fn log_gradient_diagnostics(&mut self, epoch: usize) -> Result<()> {
        if epoch % self.config.grad_boxplot_interval != 0 {
            return Ok(());
        }
        let summaries = self.grad_history.summaries();
        for (retained_epoch, pos, neg) in summaries.iter().skip(self.summarized_epochs) {
            for (side, summary) in [("boxplot_pos", pos), ("boxplot_neg", neg)] {
                if let Some(summary) = summary {
                    for (field, value) in summary.fields() {
                        self.scalars.add_scalar(
                            &format!("grads/{}/{}", side, field),
                            value,
                            *retained_epoch,
                        )?;
                    }
                }
            }
        }
        self.summarized_epochs = summaries.len();
        self.scalars.flush()?;
        Ok(())
    }

    fn log_learning_rates(&mut self, epoch: usize) -> Result<()> {
        let names = self.groups.names();
        let lrs = self.scheduler.lrs();
        self.scalars
            .add_scalars("lr", names.into_iter().zip(lrs), epoch)?;
        Ok(())
    }

    fn log_loss_means(&mut self, tracker: &MeanTracker, pass: LossPass, epoch: usize) -> Result<()> {
        for (name, mean) in tracker.means() {
            let category = log_category(pass, LossKey::parse(name).log_group());
            self.scalars
                .add_scalar(&format!("{}/{}", category, name), mean, epoch)?;
        }
        self.scalars.flush()?;
        Ok(())
    }

    fn save(&mut self, kind: CheckpointKind) -> Result<PathBuf> {
        let path = self.checkpoints.save::<B, M, O>(
            &kind,
            self.state,
            &self.model,
            &self.optimizer,
            &self.scheduler,
        )?;
        log::debug!("Checkpoint written to {:?}", path);
        Ok(path)
    }
}

fn record_losses<B: AutodiffBackend>(tracker: &mut MeanTracker, loss: &BatchLoss<B>) -> Result<()> {
    for (name, value) in loss.scalars()? {
        tracker.add(name, value);
    }
    Ok(())
}

fn log_category(pass: LossPass, group: LogGroup) -> &'static str {
    match (pass, group) {
        (_, LogGroup::Denoising) => "dn",
        (LossPass::Train, LogGroup::Main) => "train",
        (LossPass::Train, LogGroup::AuxLayers) => "train_aux",
        (LossPass::Train, LogGroup::Encoder) => "train_enc",
        (LossPass::Eval, LogGroup::Main) => "val",
        (LossPass::Eval, LogGroup::AuxLayers) => "val_aux",
        (LossPass::Eval, LogGroup::Encoder) => "val_enc",
    }
}
