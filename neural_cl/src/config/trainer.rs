//! Top-level trainer configuration.

use burn::config::Config;
use cl_core::MAP_COCO;

use super::{ContinualConfig, LossConfig, OptimConfig};

/// Configuration of a continual-learning training run.
#[derive(Config, Debug)]
pub struct TrainerConfig {
    /// Continual-learning switches.
    pub continual: ContinualConfig,

    /// Loss weighting.
    pub loss: LossConfig,

    /// Optimizer and schedule.
    pub optim: OptimConfig,

    /// Run name; the run directory is `<runs root>/<experiment_name>`.
    #[config(default = "\"default\".to_string()")]
    pub experiment_name: String,

    /// Last epoch to train (inclusive).
    #[config(default = 100)]
    pub epochs: usize,

    /// Training batch size.
    #[config(default = 2)]
    pub batch_size: usize,

    /// Validate every N epochs.
    #[config(default = 1)]
    pub val_interval: usize,

    /// Test every N epochs.
    #[config(default = 10)]
    pub test_interval: usize,

    /// Debug runs write no best or last checkpoints.
    #[config(default = false)]
    pub debug_mode: bool,

    /// Global gradient-norm ceiling (0 disables clipping).
    #[config(default = 0.1)]
    pub clip_max_norm: f64,

    /// Dynamic loss scaling.
    #[config(default = false)]
    pub mixed_precision: bool,

    /// Collect query-gradient diagnostics.
    #[config(default = false)]
    pub log_grad: bool,

    /// Retain query-gradient distributions every N epochs.
    #[config(default = 10)]
    pub log_grad_every_epoch: usize,

    /// Summarize retained distributions every N epochs.
    #[config(default = 50)]
    pub grad_boxplot_interval: usize,

    /// Write an epoch snapshot every N epochs.
    #[config(default = 500)]
    pub snapshot_interval: usize,

    /// Metric that drives best-checkpoint selection.
    #[config(default = "MAP_COCO.to_string()")]
    pub main_metric: String,

    /// Parameter whose gradient feeds the query diagnostics.
    #[config(default = "\"query_embed.weight\".to_string()")]
    pub query_param_name: String,

    /// Resume from `model_last` in the run directory.
    #[config(default = false)]
    pub resume: bool,

    /// Run the held-out test sets.
    #[config(default = false)]
    pub test: bool,

    /// Backend seed.
    #[config(default = 10)]
    pub seed: u64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self::new(
            ContinualConfig::default(),
            LossConfig::default(),
            OptimConfig::default(),
        )
    }
}

impl TrainerConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        self.continual.validate()?;
        self.loss.validate()?;
        self.optim.validate()?;

        if self.experiment_name.is_empty() {
            return Err("experiment_name must not be empty".to_string());
        }
        if self.batch_size == 0 {
            return Err("batch_size must be positive".to_string());
        }
        let intervals = [
            ("val_interval", self.val_interval),
            ("test_interval", self.test_interval),
            ("log_grad_every_epoch", self.log_grad_every_epoch),
            ("grad_boxplot_interval", self.grad_boxplot_interval),
            ("snapshot_interval", self.snapshot_interval),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, v)| *v == 0) {
            return Err(format!("{} must be positive", name));
        }
        if self.clip_max_norm < 0.0 {
            return Err("clip_max_norm must not be negative".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_trainer_config() {
        let config = TrainerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.main_metric, "mAP_coco");
        assert_eq!(config.snapshot_interval, 500);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = TrainerConfig::default().with_val_interval(0);
        assert_eq!(
            config.validate().unwrap_err(),
            "val_interval must be positive"
        );
    }

    #[test]
    fn test_nested_validation_runs() {
        let mut config = TrainerConfig::default();
        config.continual = ContinualConfig::new().with_replay(true);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = TrainerConfig::default()
            .with_experiment_name("abdomen_cl".into())
            .with_epochs(3);
        config.save(&path).unwrap();

        let loaded = TrainerConfig::load(&path).unwrap();
        assert_eq!(loaded.experiment_name, "abdomen_cl");
        assert_eq!(loaded.epochs, 3);
        assert_eq!(loaded.loss.coefficients, config.loss.coefficients);
    }
}
