//! # cl_core
//!
//! Backend-free bookkeeping for continual-learning training of 3D anatomical
//! detectors.
//!
//! Everything here works on host data: no tensors, no devices, no files. The
//! burn-facing crate (`neural_cl`) and the storage crate (`cl_io`) build on
//! these types.
//!
//! ## Feature Flags
//!
//! - `parallel` (default): adapts state dicts with rayon
//!
//! ## Modules
//!
//! - [`mode`]: Continual-learning batch modes and target construction
//! - [`loss`]: Loss-term keys and per-category coefficients
//! - [`running`]: Running means for epoch-level logging
//! - [`adapt`]: Weight adaptation for grown architectures
//! - [`naming`]: Checkpoint file names
//! - [`replay`]: Replay score tables
//! - [`schedule`]: Step learning-rate schedule
//! - [`scaler`]: Dynamic loss scaling
//! - [`diagnostics`]: Query-gradient distribution summaries
//! - [`state`]: Training state and epoch phases
//! - [`traits`]: Data loader and evaluator contracts
//!
//! ## Usage
//!
//! ```
//! use cl_core::prelude::*;
//!
//! let flags = ClFlags { only_class_labels: true, replay: false, mixing_datasets: false };
//! let mode = ClMode::resolve(flags, 1).unwrap();
//! assert_eq!(mode, ClMode::SingleSampleClassOnly);
//!
//! let coefs = LossCoefficients::default().with("bbox", 5.0);
//! assert_eq!(coefs.coefficient(&LossKey::parse("bbox_2_dn")).unwrap(), 5.0);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapt;
pub mod diagnostics;
pub mod error;
pub mod loss;
pub mod metrics;
pub mod mode;
pub mod naming;
pub mod replay;
pub mod running;
pub mod scaler;
pub mod schedule;
pub mod state;
pub mod target;
pub mod tensor;
pub mod traits;

pub use adapt::{adapt_state_dict, adapt_weights, is_exact_match, AdaptedState, MAX_ADAPT_RANK};
pub use diagnostics::{
    mean_abs, split_query_gradient, BoxSummary, GradientHistory, QueryGradientSplit,
};
pub use error::{CoreError, Result};
pub use loss::{BranchTag, LogGroup, LossCategory, LossCoefficients, LossKey};
pub use metrics::{MetricScores, MAP_COCO};
pub use mode::{ClFlags, ClMode, SegmentationSelection};
pub use naming::{BestCategory, CheckpointKind, CHECKPOINT_EXTENSION};
pub use replay::ReplayScoreTable;
pub use running::{MeanTracker, RunningMean};
pub use scaler::LossScaler;
pub use schedule::StepLr;
pub use state::{EpochPhase, TrainingState};
pub use target::{
    Box3, DetectionTarget, LabelRemap, SampleId, SamplePrediction, SampleTarget, BACKGROUND_CLASS,
};
pub use tensor::{HostTensor, StateDict};
pub use traits::{BatchLoader, DetectionEvaluator, VolumeBatch};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::adapt::{adapt_state_dict, adapt_weights};
    pub use crate::error::{CoreError, Result};
    pub use crate::loss::{LossCategory, LossCoefficients, LossKey};
    pub use crate::metrics::{MetricScores, MAP_COCO};
    pub use crate::mode::{ClFlags, ClMode};
    pub use crate::naming::CheckpointKind;
    pub use crate::replay::ReplayScoreTable;
    pub use crate::running::MeanTracker;
    pub use crate::state::TrainingState;
    pub use crate::target::{DetectionTarget, LabelRemap, SampleId, SampleTarget};
    pub use crate::tensor::{HostTensor, StateDict};
    pub use crate::traits::{BatchLoader, DetectionEvaluator, VolumeBatch};
}
