//! Shared fixtures: a tiny detector, a toy criterion and in-memory data.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use burn::backend::{Autodiff, NdArray};
use burn::module::{Param, ParamId};
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{AdamW, AdamWConfig};
use burn::prelude::*;
use burn::tensor::{activation, Distribution};

use cl_core::{
    BatchLoader, CheckpointKind, DetectionEvaluator, DetectionTarget, HostTensor, MetricScores,
    SampleId, SamplePrediction, SampleTarget, StateDict, StepLr, TrainingState, VolumeBatch,
    MAP_COCO,
};
use neural_cl::model::{param_from_host, param_to_host};
use neural_cl::OneToManyOutput;
use neural_cl::prelude::*;

pub type TestBackend = Autodiff<NdArray>;
pub type TestOptim = OptimizerAdaptor<AdamW<NdArray>, TinyDetector<TestBackend>, TestBackend>;

pub const QUERIES: usize = 4;
pub const HIDDEN: usize = 4;

/// Queries times two linear heads, shifted by a learned volume statistic.
#[derive(Module, Debug)]
pub struct TinyDetector<B: Backend> {
    backbone: Param<Tensor<B, 2>>,
    query_embed: Param<Tensor<B, 2>>,
    class_embed: Param<Tensor<B, 2>>,
    bbox_embed: Param<Tensor<B, 2>>,
}

impl<B: Backend> TinyDetector<B> {
    pub fn new(classes: usize, device: &B::Device) -> Self {
        let init = |shape: [usize; 2]| {
            Param::initialized(
                ParamId::new(),
                Tensor::random(shape, Distribution::Normal(0.0, 0.5), device).require_grad(),
            )
        };
        Self {
            backbone: init([1, 1]),
            query_embed: init([QUERIES, HIDDEN]),
            class_embed: init([HIDDEN, classes]),
            bbox_embed: init([HIDDEN, 6]),
        }
    }

    pub fn classes(&self) -> usize {
        self.class_embed.val().dims()[1]
    }

    fn params(&self) -> [(&'static str, &Param<Tensor<B, 2>>); 4] {
        [
            ("backbone.weight", &self.backbone),
            ("query_embed.weight", &self.query_embed),
            ("class_embed.weight", &self.class_embed),
            ("bbox_embed.weight", &self.bbox_embed),
        ]
    }
}

impl<B: Backend> DetectionNetwork<B> for TinyDetector<B> {
    fn forward(
        &self,
        volume: Tensor<B, 5>,
        _targets: Option<&[TargetTensors<B>]>,
        _epoch: usize,
    ) -> NetworkOutput<B> {
        let [n, c, d, h, w] = volume.dims();
        let device = volume.device();
        let gain = volume
            .reshape([n, c * d * h * w])
            .mean_dim(1)
            .matmul(self.backbone.val());
        let logits = self.query_embed.val().matmul(self.class_embed.val());
        let boxes = activation::sigmoid(self.query_embed.val().matmul(self.bbox_embed.val()));
        let classes = logits.dims()[1];

        let mut batch_logits = Vec::with_capacity(n);
        let mut batch_boxes = Vec::with_capacity(n);
        for i in 0..n {
            let shift = Tensor::ones([QUERIES, 1], &device)
                .matmul(gain.clone().slice([i..i + 1, 0..1]))
                .matmul(Tensor::ones([1, classes], &device));
            batch_logits.push((logits.clone() + shift).unsqueeze::<3>());
            batch_boxes.push(boxes.clone().unsqueeze::<3>());
        }
        NetworkOutput::new(DecoderOutput {
            pred_logits: Tensor::cat(batch_logits, 0),
            pred_boxes: Tensor::cat(batch_boxes, 0),
        })
    }

    fn named_parameters(&self) -> Vec<NamedParam> {
        self.params()
            .iter()
            .map(|(name, param)| NamedParam::of(*name, *param))
            .collect()
    }

    fn state_dict(&self) -> neural_cl::Result<StateDict> {
        self.params()
            .iter()
            .map(|(name, param)| Ok((name.to_string(), param_to_host(*param)?)))
            .collect()
    }

    fn load_state_dict(self, state: &StateDict) -> neural_cl::Result<Self> {
        let load = |name: &str, param: Param<Tensor<B, 2>>| match state.get(name) {
            Some(host) => param_from_host(param, host),
            None => Ok(param),
        };
        Ok(Self {
            backbone: load("backbone.weight", self.backbone)?,
            query_embed: load("query_embed.weight", self.query_embed)?,
            class_embed: load("class_embed.weight", self.class_embed)?,
            bbox_embed: load("bbox_embed.weight", self.bbox_embed)?,
        })
    }
}

/// [`TinyDetector`] that also exposes its predictions as a one-to-many branch.
#[derive(Module, Debug)]
pub struct HybridDetector<B: Backend> {
    inner: TinyDetector<B>,
}

impl<B: Backend> HybridDetector<B> {
    pub fn new(classes: usize, device: &B::Device) -> Self {
        Self {
            inner: TinyDetector::new(classes, device),
        }
    }
}

impl<B: Backend> DetectionNetwork<B> for HybridDetector<B> {
    fn forward(
        &self,
        volume: Tensor<B, 5>,
        targets: Option<&[TargetTensors<B>]>,
        epoch: usize,
    ) -> NetworkOutput<B> {
        let mut output = self.inner.forward(volume, targets, epoch);
        output.one_to_many = Some(OneToManyOutput {
            main: output.main.clone(),
            aux_outputs: Vec::new(),
        });
        output
    }

    fn named_parameters(&self) -> Vec<NamedParam> {
        self.inner.named_parameters()
    }

    fn state_dict(&self) -> neural_cl::Result<StateDict> {
        self.inner.state_dict()
    }

    fn load_state_dict(self, state: &StateDict) -> neural_cl::Result<Self> {
        Ok(Self {
            inner: self.inner.load_state_dict(state)?,
        })
    }
}

/// Squared logits plus box distance from the volume centre; query 0 is
/// always the matched one.
pub struct ToyCriterion;

impl<B: Backend> Criterion<B> for ToyCriterion {
    fn compute(
        &self,
        output: &NetworkOutput<B>,
        targets: &[TargetTensors<B>],
        _segmentation: Option<&Tensor<B, 5>>,
        _ctx: &CriterionContext,
    ) -> neural_cl::Result<CriterionOutput<B>> {
        let mut losses = LossDict::new();
        losses.insert("cls", output.main.pred_logits.clone().powf_scalar(2.0).mean());
        if targets.iter().any(|t| t.boxes.is_some()) {
            losses.insert(
                "bbox",
                output.main.pred_boxes.clone().sub_scalar(0.5).abs().mean(),
            );
        }
        Ok(CriterionOutput {
            losses,
            positive_queries: vec![vec![0]; output.batch_size()],
        })
    }
}

/// One fixed detection per sample.
pub struct FixedPostProcessor;

impl<B: Backend> PostProcessor<B> for FixedPostProcessor {
    fn predict(&self, output: &NetworkOutput<B>) -> neural_cl::Result<Vec<SamplePrediction>> {
        Ok((0..output.batch_size())
            .map(|_| SamplePrediction {
                boxes: vec![[0.25, 0.25, 0.25, 0.75, 0.75, 0.75]],
                classes: vec![1],
                scores: vec![0.9],
            })
            .collect())
    }
}

/// Returns scripted `mAP_coco` values, one per `eval`; single samples score
/// a tenth of their first label.
pub struct ScriptedEvaluator {
    scores: Vec<f64>,
    calls: usize,
    added: usize,
}

impl ScriptedEvaluator {
    pub fn new(scores: Vec<f64>) -> Self {
        Self {
            scores,
            calls: 0,
            added: 0,
        }
    }
}

impl DetectionEvaluator for ScriptedEvaluator {
    fn add(&mut self, predictions: &[SamplePrediction], targets: &[DetectionTarget]) {
        assert_eq!(predictions.len(), targets.len());
        self.added += targets.len();
    }

    fn eval(&mut self) -> MetricScores {
        let score = self
            .scores
            .get(self.calls)
            .or(self.scores.last())
            .copied()
            .unwrap_or(0.0);
        self.calls += 1;
        MetricScores::new()
            .with(MAP_COCO, score)
            .with("samples", self.added as f64)
    }

    fn reset(&mut self) {
        self.added = 0;
    }

    fn score_single(&self, _prediction: &SamplePrediction, target: &DetectionTarget) -> MetricScores {
        let label = target.labels.first().copied().unwrap_or(0);
        MetricScores::new().with(MAP_COCO, label as f64 / 10.0)
    }
}

#[derive(Debug, Clone)]
struct Sample {
    id: SampleId,
    volume: Vec<f32>,
    target: SampleTarget,
    segmentation: Vec<f32>,
}

/// In-memory loader over `[1, 2, 2, 2]` volumes.
#[derive(Debug, Clone)]
pub struct VecLoader {
    samples: Vec<Sample>,
    batch_size: usize,
}

impl VecLoader {
    /// `count` samples; sample `i` has label `i + 1` and a box.
    pub fn synthetic(count: usize, batch_size: usize) -> Self {
        let samples = (0..count)
            .map(|i| Sample {
                id: SampleId::new(format!("case_{i:02}")),
                volume: (0..8).map(|v| (v + i) as f32 / 10.0).collect(),
                target: SampleTarget::new(
                    vec![[0.1, 0.1, 0.1, 0.6, 0.6, 0.6]],
                    vec![i as i64 + 1],
                ),
                segmentation: (0..8).map(|v| ((v + i) % 8) as f32).collect(),
            })
            .collect();
        Self {
            samples,
            batch_size,
        }
    }

    pub fn sample_ids(&self) -> Vec<SampleId> {
        self.samples.iter().map(|s| s.id.clone()).collect()
    }
}

fn collate(chunk: &[Sample]) -> cl_core::Result<VolumeBatch> {
    let n = chunk.len();
    Ok(VolumeBatch {
        volumes: HostTensor::new(
            vec![n, 1, 2, 2, 2],
            chunk.iter().flat_map(|s| s.volume.iter().copied()).collect(),
        )?,
        targets: chunk.iter().map(|s| s.target.clone()).collect(),
        segmentation: Some(HostTensor::new(
            vec![n, 1, 2, 2, 2],
            chunk
                .iter()
                .flat_map(|s| s.segmentation.iter().copied())
                .collect(),
        )?),
        sample_ids: chunk.iter().map(|s| s.id.clone()).collect(),
    })
}

impl BatchLoader for VecLoader {
    fn len(&self) -> usize {
        self.samples.len().div_ceil(self.batch_size)
    }

    fn batches(&self) -> Box<dyn Iterator<Item = cl_core::Result<VolumeBatch>> + '_> {
        Box::new(self.samples.chunks(self.batch_size).map(collate))
    }

    fn restrict_to(&self, samples: &[SampleId]) -> cl_core::Result<Box<dyn BatchLoader>> {
        let kept = self
            .samples
            .iter()
            .filter(|s| samples.contains(&s.id))
            .cloned()
            .collect();
        Ok(Box::new(VecLoader {
            samples: kept,
            batch_size: self.batch_size,
        }))
    }
}

pub fn device() -> <TestBackend as Backend>::Device {
    Default::default()
}

pub fn optimizer() -> TestOptim {
    AdamWConfig::new().init::<TestBackend, TinyDetector<TestBackend>>()
}

/// Small, fast run settings.
pub fn config(name: &str, epochs: usize) -> TrainerConfig {
    TrainerConfig::default()
        .with_experiment_name(name.to_string())
        .with_epochs(epochs)
        .with_batch_size(2)
}

pub fn losses() -> TrainerLosses<TestBackend> {
    TrainerLosses {
        criterion: Box::new(ToyCriterion),
        dense_hybrid: None,
        postprocess: Box::new(FixedPostProcessor),
    }
}

pub fn data(train_samples: usize, val_scores: Vec<f64>) -> TrainerData {
    TrainerData {
        train: Box::new(VecLoader::synthetic(train_samples, 2)),
        val: Box::new(VecLoader::synthetic(2, 2)),
        val_evaluator: Box::new(ScriptedEvaluator::new(val_scores)),
        test_sets: Vec::new(),
        replay_evaluator: Some(Box::new(ScriptedEvaluator::new(Vec::new()))),
    }
}

pub fn open_session(
    config: &TrainerConfig,
    root: &Path,
    classes: usize,
) -> neural_cl::Result<Session<TestBackend, TinyDetector<TestBackend>, TestOptim>> {
    prepare_session::<TestBackend, _, _>(
        config,
        root,
        TinyDetector::new(classes, &device()),
        optimizer(),
        &device(),
    )
}

/// Write a checkpoint of a fresh `classes`-class detector under `dir`.
pub fn write_model_checkpoint(dir: &Path, classes: usize) -> (PathBuf, StateDict) {
    let model = TinyDetector::<TestBackend>::new(classes, &device());
    let state = model.state_dict().unwrap();
    let manager = CheckpointManager::create(dir).unwrap();
    let path = manager
        .save::<TestBackend, _, _>(
            &CheckpointKind::Last,
            TrainingState::default(),
            &model,
            &optimizer(),
            &StepLr::new(vec![1e-4, 1e-5], 1000, 0.1),
        )
        .unwrap();
    (path, state)
}
