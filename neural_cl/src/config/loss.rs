//! Loss weighting configuration.

use std::collections::BTreeMap;

use burn::config::Config;
use cl_core::LossCoefficients;

/// Weights of the loss categories, keyed by coefficient name.
pub fn default_coefficients() -> BTreeMap<String, f64> {
    [
        ("bbox", 5.0),
        ("giou", 2.0),
        ("cls", 2.0),
        ("segce", 1.0),
        ("segdice", 1.0),
        ("aux", 1.0),
        ("old", 1.0),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Loss aggregation settings.
#[derive(Config, Debug)]
pub struct LossConfig {
    /// Coefficient per category (`bbox`, `giou`, `cls`, `segce`, ...).
    #[config(default = "default_coefficients()")]
    pub coefficients: BTreeMap<String, f64>,

    /// Add one-to-many matching losses on the hybrid branch.
    #[config(default = false)]
    pub hybrid_matching: bool,

    /// Target repetitions for one-to-many matching.
    #[config(default = 0)]
    pub hybrid_k: usize,

    /// Weight of every one-to-many term.
    #[config(default = 1.0)]
    pub hybrid_loss_weight_one2many: f64,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl LossConfig {
    /// Coefficient table for aggregation.
    pub fn coefficients(&self) -> LossCoefficients {
        LossCoefficients::new(self.coefficients.clone())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if let Some((name, _)) = self.coefficients.iter().find(|(_, w)| !w.is_finite()) {
            return Err(format!("coefficient '{}' must be finite", name));
        }
        if self.hybrid_matching && self.hybrid_k == 0 {
            return Err("hybrid_k must be positive when hybrid matching is on".to_string());
        }
        Ok(())
    }
}
