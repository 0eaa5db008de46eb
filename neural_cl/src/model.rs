//! Detector contract and its outputs.
//!
//! The detector architecture lives outside this crate. The trainer sees it
//! through [`DetectionNetwork`]: a burn [`Module`] with a forward pass that
//! produces a [`NetworkOutput`], plus named access to its parameters so
//! checkpoints can be compared, adapted and restored by name.

use std::collections::BTreeMap;

use burn::module::{Module, Param, ParamId};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::TensorData;

use cl_core::{CoreError, DetectionTarget, HostTensor, SamplePrediction, StateDict};

use crate::error::{NeuralClError, Result};

/// A trainable parameter by name.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedParam {
    /// Dotted parameter path, e.g. `query_embed.weight`.
    pub name: String,
    /// Identity used to address the parameter's gradient.
    pub id: ParamId,
    /// Tensor shape.
    pub shape: Vec<usize>,
}

impl NamedParam {
    /// Describe `param` under `name`.
    pub fn of<B: Backend, const D: usize>(name: impl Into<String>, param: &Param<Tensor<B, D>>) -> Self {
        Self {
            name: name.into(),
            id: param.id.clone(),
            shape: param.val().dims().to_vec(),
        }
    }

    /// Tensor rank.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Number of scalar values.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Class logits and boxes of one decoder layer.
#[derive(Debug, Clone)]
pub struct DecoderOutput<B: Backend> {
    /// `[N, queries, classes]`
    pub pred_logits: Tensor<B, 3>,
    /// `[N, queries, 6]`
    pub pred_boxes: Tensor<B, 3>,
}

impl<B: AutodiffBackend> DecoderOutput<B> {
    /// Lift an inner-backend output into the autodiff graph as a constant.
    pub fn from_inner(inner: DecoderOutput<B::InnerBackend>) -> Self {
        Self {
            pred_logits: Tensor::from_inner(inner.pred_logits),
            pred_boxes: Tensor::from_inner(inner.pred_boxes),
        }
    }
}

/// Predictions of the one-to-many (hybrid matching) branch.
#[derive(Debug, Clone)]
pub struct OneToManyOutput<B: Backend> {
    /// Last layer.
    pub main: DecoderOutput<B>,
    /// Intermediate layers.
    pub aux_outputs: Vec<DecoderOutput<B>>,
}

/// Bookkeeping of the denoising branch, consumed by the criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DenoisingMeta {
    /// Number of denoising groups.
    pub num_groups: usize,
    /// Padded query count reserved for denoising.
    pub pad_size: usize,
}

/// Everything a forward pass produces.
#[derive(Debug, Clone)]
pub struct NetworkOutput<B: Backend> {
    /// Last decoder layer.
    pub main: DecoderOutput<B>,
    /// Intermediate decoder layers.
    pub aux_outputs: Vec<DecoderOutput<B>>,
    /// Encoder proposals.
    pub enc_outputs: Option<DecoderOutput<B>>,
    /// Hybrid-matching branch.
    pub one_to_many: Option<OneToManyOutput<B>>,
    /// Segmentation logits `[N, classes, D, H, W]`.
    pub seg_logits: Option<Tensor<B, 5>>,
    /// Set on views that expose the one-to-many branch.
    pub seg_one_to_many: bool,
    /// Denoising metadata, training only.
    pub denoising: Option<DenoisingMeta>,
    /// Contrastive terms computed inside the network, already weighted.
    pub contrastive_losses: BTreeMap<String, Tensor<B, 1>>,
}

impl<B: Backend> NetworkOutput<B> {
    /// Output with only the main decoder layer.
    pub fn new(main: DecoderOutput<B>) -> Self {
        Self {
            main,
            aux_outputs: Vec::new(),
            enc_outputs: None,
            one_to_many: None,
            seg_logits: None,
            seg_one_to_many: false,
            denoising: None,
            contrastive_losses: BTreeMap::new(),
        }
    }

    /// Batch size.
    pub fn batch_size(&self) -> usize {
        self.main.pred_logits.dims()[0]
    }

    /// Device of the predictions.
    pub fn device(&self) -> B::Device {
        self.main.pred_logits.device()
    }

    /// The one-to-many branch presented as a regular output, sharing the
    /// segmentation logits and flagged with `seg_one_to_many`.
    pub fn one_to_many_view(&self) -> Option<Self> {
        let branch = self.one_to_many.as_ref()?;
        Some(Self {
            main: branch.main.clone(),
            aux_outputs: branch.aux_outputs.clone(),
            enc_outputs: None,
            one_to_many: None,
            seg_logits: self.seg_logits.clone(),
            seg_one_to_many: true,
            denoising: None,
            contrastive_losses: BTreeMap::new(),
        })
    }
}

impl<B: AutodiffBackend> NetworkOutput<B> {
    /// Lift an inner-backend output into the autodiff graph as constants.
    pub fn from_inner(inner: NetworkOutput<B::InnerBackend>) -> Self {
        Self {
            main: DecoderOutput::from_inner(inner.main),
            aux_outputs: inner
                .aux_outputs
                .into_iter()
                .map(DecoderOutput::from_inner)
                .collect(),
            enc_outputs: inner.enc_outputs.map(DecoderOutput::from_inner),
            one_to_many: inner.one_to_many.map(|o| OneToManyOutput {
                main: DecoderOutput::from_inner(o.main),
                aux_outputs: o
                    .aux_outputs
                    .into_iter()
                    .map(DecoderOutput::from_inner)
                    .collect(),
            }),
            seg_logits: inner.seg_logits.map(Tensor::from_inner),
            seg_one_to_many: inner.seg_one_to_many,
            denoising: inner.denoising,
            contrastive_losses: inner
                .contrastive_losses
                .into_iter()
                .map(|(k, v)| (k, Tensor::from_inner(v)))
                .collect(),
        }
    }
}

/// Criterion targets of one sample on a device.
#[derive(Debug, Clone)]
pub struct TargetTensors<B: Backend> {
    /// `[objects, 6]`, absent in class-only supervision.
    pub boxes: Option<Tensor<B, 2>>,
    /// `[objects]`
    pub labels: Tensor<B, 1, Int>,
}

impl<B: Backend> TargetTensors<B> {
    /// Upload one host target.
    pub fn from_target(target: &DetectionTarget, device: &B::Device) -> Self {
        let boxes = target.boxes.as_ref().map(|boxes| {
            let flat: Vec<f32> = boxes.iter().flat_map(|b| b.iter().copied()).collect();
            Tensor::from_data(TensorData::new(flat, [boxes.len(), 6]), device)
        });
        let labels = Tensor::from_data(
            TensorData::new(target.labels.clone(), [target.labels.len()]),
            device,
        );
        Self { boxes, labels }
    }

    /// Upload a batch of host targets.
    pub fn from_targets(targets: &[DetectionTarget], device: &B::Device) -> Vec<Self> {
        targets
            .iter()
            .map(|t| Self::from_target(t, device))
            .collect()
    }
}

/// A 3D detector the trainer can optimize, checkpoint and adapt.
///
/// `named_parameters` and `state_dict` must agree on names and shapes.
/// `load_state_dict` receives a complete dict whose shapes match the live
/// network; any adaptation has already happened.
pub trait DetectionNetwork<B: Backend>: Module<B> + Sized {
    /// Forward pass. `targets` feed the denoising branch during training.
    fn forward(
        &self,
        volume: Tensor<B, 5>,
        targets: Option<&[TargetTensors<B>]>,
        epoch: usize,
    ) -> NetworkOutput<B>;

    /// Every trainable parameter with its name, identity and shape.
    fn named_parameters(&self) -> Vec<NamedParam>;

    /// Host copy of every parameter by name.
    fn state_dict(&self) -> Result<StateDict>;

    /// Replace parameter values by name, keeping parameter identities.
    fn load_state_dict(self, state: &StateDict) -> Result<Self>;
}

/// Turns raw network outputs into per-sample detections.
pub trait PostProcessor<B: Backend> {
    /// One prediction per sample of the batch.
    fn predict(&self, output: &NetworkOutput<B>) -> Result<Vec<SamplePrediction>>;
}

/// Read a tensor back as `f32` values.
pub fn read_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| NeuralClError::Tensor(format!("{:?}", e)))
}

/// Read a single-element tensor back as `f64`.
pub fn read_scalar<B: Backend>(tensor: Tensor<B, 1>) -> Result<f64> {
    read_values(tensor)?
        .first()
        .map(|&v| v as f64)
        .ok_or_else(|| NeuralClError::Tensor("empty scalar tensor".into()))
}

/// Host copy of a tensor.
pub fn tensor_to_host<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<HostTensor> {
    let shape = tensor.dims().to_vec();
    Ok(HostTensor::new(shape, read_values(tensor)?)?)
}

/// Upload a host tensor of rank `D`.
pub fn host_to_tensor<B: Backend, const D: usize>(
    host: &HostTensor,
    device: &B::Device,
) -> Result<Tensor<B, D>> {
    if host.rank() != D {
        return Err(CoreError::RankMismatch {
            expected: D,
            got: host.rank(),
        }
        .into());
    }
    let data = TensorData::new(host.values().to_vec(), host.shape().to_vec());
    Ok(Tensor::from_data(data, device))
}

/// Host copy of a parameter.
pub fn param_to_host<B: Backend, const D: usize>(param: &Param<Tensor<B, D>>) -> Result<HostTensor> {
    tensor_to_host(param.val())
}

/// Replace a parameter's value with `host`, keeping its identity.
///
/// The shape of `host` must equal the parameter's shape.
pub fn param_from_host<B: Backend, const D: usize>(
    param: Param<Tensor<B, D>>,
    host: &HostTensor,
) -> Result<Param<Tensor<B, D>>> {
    let current = param.val();
    let shape = current.dims().to_vec();
    if shape != host.shape() {
        return Err(CoreError::ShapeMismatch {
            expected: shape,
            got: host.shape().to_vec(),
        }
        .into());
    }
    let tensor = host_to_tensor::<B, D>(host, &current.device())?;
    Ok(Param::initialized(param.id.clone(), tensor.require_grad()))
}

/// Fetch `name` from `state`, or fail with a data error.
pub fn state_entry<'a>(state: &'a StateDict, name: &str) -> Result<&'a HostTensor> {
    state
        .get(name)
        .ok_or_else(|| NeuralClError::Data(format!("state dict has no entry '{}'", name)))
}
