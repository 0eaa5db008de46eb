//! Checkpoint save/restore between burn modules and `cl_io` records.
//!
//! A checkpoint carries the network twice: as named host tensors (for shape
//! comparison and weight adaptation) and as a burn module record (exact
//! restore including parameter identities, so a resumed optimizer lines up
//! with the parameters it was tracking).

use std::path::{Path, PathBuf};

use burn::module::{AutodiffModule, Module};
use burn::optim::Optimizer;
use burn::prelude::*;
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::backend::AutodiffBackend;

use cl_core::{adapt_state_dict, is_exact_match, AdaptedState, CheckpointKind, StateDict, StepLr, TrainingState};
use cl_io::{CheckpointRecord, CheckpointStore};

use crate::error::{NeuralClError, Result};
use crate::model::DetectionNetwork;

type BytesRecorder = BinBytesRecorder<FullPrecisionSettings>;

/// Encode a module's record.
pub fn encode_module<B: Backend, M: Module<B>>(module: &M) -> Result<Vec<u8>> {
    Recorder::<B>::record(&BytesRecorder::default(), module.clone().into_record(), ())
        .map_err(|e| NeuralClError::Record(format!("{:?}", e)))
}

/// Load an encoded record into `module`.
pub fn decode_module<B: Backend, M: Module<B>>(module: M, bytes: Vec<u8>, device: &B::Device) -> Result<M> {
    let record: M::Record = Recorder::<B>::load(&BytesRecorder::default(), bytes, device)
        .map_err(|e| NeuralClError::Record(format!("{:?}", e)))?;
    Ok(module.load_record(record))
}

/// Encode an optimizer's state.
pub fn encode_optimizer<B, M, O>(optimizer: &O) -> Result<Vec<u8>>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    Recorder::<B>::record(&BytesRecorder::default(), optimizer.to_record(), ())
        .map_err(|e| NeuralClError::Record(format!("{:?}", e)))
}

/// Load encoded state into `optimizer`.
pub fn decode_optimizer<B, M, O>(optimizer: O, bytes: Vec<u8>, device: &B::Device) -> Result<O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    let record: O::Record = Recorder::<B>::load(&BytesRecorder::default(), bytes, device)
        .map_err(|e| NeuralClError::Record(format!("{:?}", e)))?;
    Ok(optimizer.load_record(record))
}

/// Load named weights into `network`, adapting mismatched shapes.
///
/// Every adapted layer is reported with a warning. Names missing from
/// `loaded` keep their current values.
pub fn load_adapted<B, N>(network: N, loaded: &StateDict) -> Result<(N, AdaptedState)>
where
    B: Backend,
    N: DetectionNetwork<B>,
{
    let live = network.state_dict()?;
    let adapted = adapt_state_dict(loaded, &live)?;
    for name in &adapted.adapted {
        log::warn!("Adapting weights for layer: {}", name);
    }
    if !adapted.unexpected.is_empty() {
        log::debug!("Ignoring {} unexpected checkpoint entries", adapted.unexpected.len());
    }
    if !adapted.missing.is_empty() {
        log::debug!("{} parameters not present in checkpoint", adapted.missing.len());
    }
    let network = network.load_state_dict(&adapted.state)?;
    Ok((network, adapted))
}

/// Restore `network` from a checkpoint record.
///
/// When the stored tensors match the live network exactly, the module
/// record is used; otherwise the named tensors are adapted.
pub fn restore_network<B, N>(network: N, record: &CheckpointRecord, device: &B::Device) -> Result<N>
where
    B: Backend,
    N: DetectionNetwork<B>,
{
    let live = network.state_dict()?;
    let exact = is_exact_match(&record.model, &live);
    if exact && !record.module_record.is_empty() {
        return decode_module(network, record.module_record.clone(), device);
    }
    if !exact {
        log::warn!("Some layers could not be loaded strictly. Adapting weights...");
    }
    let (network, adapted) = load_adapted(network, &record.model)?;
    if !adapted.is_exact() {
        log::info!("Model loaded with adapted weights.");
    }
    Ok(network)
}

/// Writes and reads checkpoints of one run.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    store: CheckpointStore,
}

impl CheckpointManager {
    /// Manager over `run_dir`, created if needed.
    pub fn create(run_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            store: CheckpointStore::create(run_dir)?,
        })
    }

    /// Underlying store.
    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Build a record of the current training state.
    pub fn snapshot<B, M, O>(
        state: TrainingState,
        model: &M,
        optimizer: &O,
        scheduler: &StepLr,
    ) -> Result<CheckpointRecord>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B> + DetectionNetwork<B>,
        O: Optimizer<M, B>,
    {
        Ok(CheckpointRecord {
            state,
            model: model.state_dict()?,
            module_record: encode_module::<B, M>(model)?,
            optimizer: encode_optimizer::<B, M, O>(optimizer)?,
            scheduler: scheduler.clone(),
        })
    }

    /// Write a checkpoint of `kind`. A best checkpoint replaces the previous
    /// best of its category.
    pub fn save<B, M, O>(
        &self,
        kind: &CheckpointKind,
        state: TrainingState,
        model: &M,
        optimizer: &O,
        scheduler: &StepLr,
    ) -> Result<PathBuf>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B> + DetectionNetwork<B>,
        O: Optimizer<M, B>,
    {
        let record = Self::snapshot::<B, M, O>(state, model, optimizer, scheduler)?;
        Ok(self.store.save(kind, &record)?)
    }

    /// Read a checkpoint file.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<CheckpointRecord> {
        Ok(self.store.load(path)?)
    }

    /// Read `model_last`, if present.
    pub fn load_last(&self) -> Result<Option<CheckpointRecord>> {
        match self.store.last() {
            Some(path) => Ok(Some(self.load(path)?)),
            None => Ok(None),
        }
    }
}

/// Read a checkpoint from an arbitrary path.
pub fn load_record(path: impl AsRef<Path>) -> Result<CheckpointRecord> {
    let path = path.as_ref();
    let record = cl_io::load_from_file(path)?;
    log::info!("Loaded checkpoint {:?} (epoch {})", path, record.state.epoch);
    Ok(record)
}
