//! Continual-learning switches.

use burn::config::Config;
use cl_core::{ClFlags, LabelRemap};

/// How the current stage relates to the previously trained model.
#[derive(Config, Debug)]
pub struct ContinualConfig {
    /// Continual learning on: start from the previous-stage model.
    #[config(default = false)]
    pub enabled: bool,

    /// Supervise only with class labels; boxes are withheld.
    #[config(default = false)]
    pub only_class_labels: bool,

    /// Train on a replay subset chosen by the previous-stage model.
    #[config(default = false)]
    pub replay: bool,

    /// Joint training on mixed datasets; disables previous-stage loading.
    #[config(default = false)]
    pub mixing_datasets: bool,

    /// Size of the replay subset.
    #[config(default = 0)]
    pub replay_samples: usize,

    /// Remap labels above `label_ceiling` to background in targets.
    #[config(default = false)]
    pub remove_labels: bool,

    /// Highest class id kept when labels are remapped.
    #[config(default = 5)]
    pub label_ceiling: i64,

    /// Checkpoint of the previous-stage model.
    pub old_model_path: Option<String>,

    /// Checkpoint of the frozen auxiliary model.
    pub aux_model_path: Option<String>,
}

impl Default for ContinualConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ContinualConfig {
    /// Mode-selection flags.
    pub fn flags(&self) -> ClFlags {
        ClFlags {
            only_class_labels: self.only_class_labels,
            replay: self.replay,
            mixing_datasets: self.mixing_datasets,
        }
    }

    /// Label remap applied to training and validation targets, if enabled.
    pub fn label_remap(&self) -> Option<LabelRemap> {
        self.remove_labels.then(|| LabelRemap::new(self.label_ceiling))
    }

    /// True when the main model is initialized from the previous-stage model.
    pub fn starts_from_old_model(&self) -> bool {
        self.enabled && !self.mixing_datasets
    }

    /// True when the frozen auxiliary and previous-stage models take part in the loss.
    pub fn uses_frozen_models(&self) -> bool {
        self.starts_from_old_model()
            && !self.replay
            && self.aux_model_path.is_some()
            && self.old_model_path.is_some()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.starts_from_old_model() && self.old_model_path.is_none() {
            return Err("continual learning requires old_model_path".to_string());
        }
        if self.replay {
            if self.old_model_path.is_none() {
                return Err("replay requires old_model_path".to_string());
            }
            if self.replay_samples == 0 {
                return Err("replay_samples must be positive".to_string());
            }
        }
        if self.label_ceiling < 0 {
            return Err("label_ceiling must not be negative".to_string());
        }
        Ok(())
    }
}
