//! Configuration types for neural_cl.
//!
//! Burn-style configuration structs for the trainer, continual-learning
//! switches, loss weighting and optimization. All of them persist as JSON
//! through [`burn::config::Config`].

mod continual;
mod loss;
mod optim;
mod trainer;

pub use continual::ContinualConfig;
pub use loss::{default_coefficients, LossConfig};
pub use optim::{matches_any, OptimConfig};
pub use trainer::TrainerConfig;
