//! Run bootstrap: directories, initial weights, resume, frozen models and
//! run metadata.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use burn::module::AutodiffModule;
use burn::optim::Optimizer;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

use cl_core::{StepLr, TrainingState};
use cl_io::RunMetadata;

use crate::config::TrainerConfig;
use crate::error::{NeuralClError, Result};
use crate::model::DetectionNetwork;

use super::checkpoint::{decode_optimizer, load_record, restore_network, CheckpointManager};
use super::frozen::FrozenModel;
use super::groups::{count_parameters, ParamGroups};

/// File name of the persisted trainer configuration.
pub const CONFIG_FILE: &str = "config.json";

/// Everything the trainer starts from.
pub struct Session<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    /// `<runs root>/<experiment_name>`
    pub run_dir: PathBuf,
    /// Network to train.
    pub model: M,
    /// Optimizer, restored on resume.
    pub optimizer: O,
    /// Learning-rate schedule.
    pub scheduler: StepLr,
    /// Parameter groups of `model`.
    pub groups: ParamGroups,
    /// Epoch and best metrics to continue from.
    pub state: TrainingState,
    /// Frozen auxiliary model.
    pub aux_model: Option<FrozenModel<B, M>>,
    /// Frozen previous-stage model.
    pub old_model: Option<FrozenModel<B, M>>,
}

/// Seed the backend's random generator.
pub fn seed_backend<B: Backend>(seed: u64) {
    B::seed(seed);
}

/// Prepare a run under `runs_root`.
///
/// Order: run directory, initialization from the previous-stage model,
/// resume from `model_last`, parameter groups and schedule, config and
/// metadata files, frozen models.
pub fn prepare_session<B, M, O>(
    config: &TrainerConfig,
    runs_root: &Path,
    model: M,
    optimizer: O,
    device: &B::Device,
) -> Result<Session<B, M, O>>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + DetectionNetwork<B>,
    M::InnerModule: DetectionNetwork<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    config.validate().map_err(NeuralClError::config)?;
    seed_backend::<B>(config.seed);

    let run_dir = runs_root.join(&config.experiment_name);
    let checkpoints = CheckpointManager::create(&run_dir)?;
    let continual = &config.continual;

    let mut model = model;
    let mut optimizer = optimizer;

    if continual.starts_from_old_model() {
        let path = old_model_path(config)?;
        let record = load_record(path)?;
        model = restore_network::<B, M>(model, &record, device)?;
        log::info!("Main model loaded from {}", path);
    }

    let mut resumed: Option<(StepLr, TrainingState)> = None;
    if config.resume {
        let record = checkpoints.load_last()?.ok_or_else(|| {
            NeuralClError::config(format!(
                "resume requested but {:?} has no model_last checkpoint",
                run_dir
            ))
        })?;
        model = restore_network::<B, M>(model, &record, device)?;
        if !record.optimizer.is_empty() {
            optimizer = decode_optimizer::<B, M, O>(optimizer, record.optimizer.clone(), device)?;
        }
        let mut scheduler = record.scheduler.clone();
        scheduler.set_step_size(config.optim.lr_drop);
        let best_test = if config.test {
            record.state.best_test_metric
        } else {
            0.0
        };
        let state = TrainingState::new(record.state.epoch, record.state.best_val_metric, best_test);
        log::info!("Resuming after epoch {}", state.epoch);
        resumed = Some((scheduler, state));
    }

    let params = model.named_parameters();
    let groups = ParamGroups::new(&params, &config.optim);
    let (scheduler, state) = match resumed {
        Some((scheduler, state)) => {
            if scheduler.base_lrs().len() != groups.len() {
                return Err(NeuralClError::Data(format!(
                    "checkpoint schedule has {} parameter groups, network has {}",
                    scheduler.base_lrs().len(),
                    groups.len()
                )));
            }
            (scheduler, state)
        }
        None => (
            StepLr::new(groups.base_lrs(), config.optim.lr_drop, config.optim.lr_gamma),
            TrainingState::default(),
        ),
    };

    config.save(run_dir.join(CONFIG_FILE))?;
    RunMetadata {
        parameters: count_parameters(&params, &config.optim),
        system: system_metadata(),
    }
    .save(&run_dir)?;

    let (aux_model, old_model) = if continual.uses_frozen_models() {
        let aux = load_frozen::<B, M>(&model, aux_model_path(config)?, device)?;
        log::info!("Auxiliary model loaded.");
        let old = load_frozen::<B, M>(&model, old_model_path(config)?, device)?;
        log::info!("Old model loaded.");
        (Some(aux), Some(old))
    } else {
        (None, None)
    };

    Ok(Session {
        run_dir,
        model,
        optimizer,
        scheduler,
        groups,
        state,
        aux_model,
        old_model,
    })
}

/// Inference copy of `template` with weights from `path`.
pub fn load_frozen<B, M>(template: &M, path: &str, device: &B::Device) -> Result<FrozenModel<B, M>>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    M::InnerModule: DetectionNetwork<B::InnerBackend>,
{
    let record = load_record(path)?;
    let inner = restore_network::<B::InnerBackend, M::InnerModule>(template.valid(), &record, device)?;
    Ok(FrozenModel::new(inner))
}

fn old_model_path(config: &TrainerConfig) -> Result<&str> {
    config
        .continual
        .old_model_path
        .as_deref()
        .ok_or_else(|| NeuralClError::config("old_model_path is not set"))
}

fn aux_model_path(config: &TrainerConfig) -> Result<&str> {
    config
        .continual
        .aux_model_path
        .as_deref()
        .ok_or_else(|| NeuralClError::config("aux_model_path is not set"))
}

/// Host name, revision and versions; whatever cannot be determined is skipped.
pub fn system_metadata() -> BTreeMap<String, String> {
    let mut meta = BTreeMap::new();
    meta.insert("crate_version".to_string(), env!("CARGO_PKG_VERSION").to_string());
    meta.insert("os".to_string(), std::env::consts::OS.to_string());

    match host_name() {
        Some(host) => {
            meta.insert("hostname".to_string(), host);
        }
        None => log::warn!("Could not determine host name for run metadata"),
    }
    match git_revision() {
        Some(rev) => {
            meta.insert("git_revision".to_string(), rev);
        }
        None => log::warn!("Could not determine git revision for run metadata"),
    }
    meta
}

fn host_name() -> Option<String> {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
}

fn git_revision() -> Option<String> {
    let output = Command::new("git").args(["rev-parse", "HEAD"]).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let rev = String::from_utf8(output.stdout).ok()?;
    let rev = rev.trim();
    (!rev.is_empty()).then(|| rev.to_string())
}
