//! Training infrastructure for continual learning.
//!
//! This module provides:
//! - `ClTrainer`: the epoch orchestrator
//! - `LossAggregator`: combines criterion, hybrid, frozen-model and
//!   contrastive terms into one objective
//! - `CheckpointManager`: checkpoint save/restore with weight adaptation
//! - `ReplaySelector`: worst-sample selection with the previous-stage model
//! - `prepare_session`: run bootstrap, resume and frozen-model loading
//! - Gradient unscaling, clipping and per-group splitting

mod aggregate;
mod batch;
mod checkpoint;
mod frozen;
mod grad;
mod groups;
mod replay;
mod session;
mod trainer;

pub use aggregate::{BatchLoss, HybridMatching, LossAggregator, LossInputs, LossPass};
pub use batch::PreparedBatch;
pub use checkpoint::{
    decode_module, decode_optimizer, encode_module, encode_optimizer, load_adapted, load_record,
    restore_network, CheckpointManager,
};
pub use frozen::{FrozenModel, ScoringModel};
pub use grad::{global_norm, read_matrix, scale_grads, unscale_and_clip, GradStats, CLIP_EPSILON};
pub use groups::{count_parameters, ParamGroup, ParamGroups};
pub use replay::{ReplaySelection, ReplaySelector};
pub use session::{load_frozen, prepare_session, seed_backend, system_metadata, Session, CONFIG_FILE};
pub use trainer::{ClTrainer, TestSet, TrainerData, TrainerLosses};
