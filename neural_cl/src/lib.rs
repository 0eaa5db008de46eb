//! # neural_cl
//!
//! Continual-learning training of 3D anatomical detectors with Burn.
//!
//! The network, its criterion, post-processing, data loading and metric math
//! are collaborators behind traits. This crate coordinates them: batch
//! construction per continual-learning mode, loss aggregation with frozen
//! previous-stage models, mixed-precision optimization with per-group
//! learning rates, checkpointing and replay sample selection.
//!
//! ## Quick Start
//!
//! ```ignore
//! use burn::backend::{Autodiff, NdArray};
//! use burn::optim::AdamWConfig;
//! use neural_cl::prelude::*;
//!
//! type MyBackend = Autodiff<NdArray>;
//!
//! let config = TrainerConfig::default();
//! let device = Default::default();
//! let optimizer = AdamWConfig::new()
//!     .with_weight_decay(config.optim.weight_decay as f32)
//!     .init();
//! let session = prepare_session::<MyBackend, _, _>(
//!     &config, "runs".as_ref(), my_network(&device), optimizer, &device,
//! )?;
//!
//! let mut trainer = ClTrainer::new(config, session, my_losses(), my_data(), device)?;
//! let state = trainer.run()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! cl_core (pure bookkeeping)
//!     │
//!     ├──────────────────┐
//!     ▼                  ▼
//! cl_io              neural_cl
//! (storage)          (training)
//!     │                  │
//!     └──────────────────┘
//!         .ckpt / JSON / JSONL
//! ```
//!
//! ## Feature Flags
//!
//! - `ndarray` (default): CPU backend
//! - `wgpu`: GPU acceleration via WebGPU

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod criterion;
pub mod error;
pub mod model;
pub mod training;

// Re-export key types for convenience
pub use config::{ContinualConfig, LossConfig, OptimConfig, TrainerConfig};
pub use criterion::{Criterion, CriterionContext, CriterionOutput, LossDict};
pub use error::{NeuralClError, Result};
pub use model::{
    DecoderOutput, DenoisingMeta, DetectionNetwork, NamedParam, NetworkOutput, OneToManyOutput,
    PostProcessor, TargetTensors,
};
pub use training::{
    prepare_session, CheckpointManager, ClTrainer, LossAggregator, ReplaySelector, Session,
    TestSet, TrainerData, TrainerLosses,
};

// Re-export from cl_core and cl_io for convenience
pub use cl_core::{ClMode, MetricScores, TrainingState};
pub use cl_io::CheckpointRecord;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{ContinualConfig, LossConfig, OptimConfig, TrainerConfig};
    pub use crate::criterion::{Criterion, CriterionContext, CriterionOutput, LossDict};
    pub use crate::error::{NeuralClError, Result};
    pub use crate::model::{
        DecoderOutput, DetectionNetwork, NamedParam, NetworkOutput, PostProcessor, TargetTensors,
    };
    pub use crate::training::{
        prepare_session, CheckpointManager, ClTrainer, FrozenModel, LossAggregator, LossPass,
        ReplaySelector, Session, TestSet, TrainerData, TrainerLosses,
    };

    pub use cl_core::prelude::*;
    pub use cl_io::{CheckpointRecord, CheckpointStore};
}

#[cfg(test)]
pub(crate) type TestBackend = burn::backend::Autodiff<burn::backend::NdArray>;
