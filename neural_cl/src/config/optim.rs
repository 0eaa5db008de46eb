//! Optimizer and schedule configuration.

use burn::config::Config;

/// Learning rates, weight decay, step schedule and parameter-name keywords.
#[derive(Config, Debug)]
pub struct OptimConfig {
    /// Learning rate of the default group.
    #[config(default = 2e-4)]
    pub lr: f64,

    /// Learning rate of the backbone group.
    #[config(default = 2e-5)]
    pub lr_backbone: f64,

    /// Multiplier on `lr` for the linear-projection group.
    #[config(default = 0.1)]
    pub lr_linear_proj_mult: f64,

    /// AdamW weight decay.
    #[config(default = 1e-4)]
    pub weight_decay: f64,

    /// Epochs between learning-rate drops.
    #[config(default = 1000)]
    pub lr_drop: usize,

    /// Learning-rate decay factor.
    #[config(default = 0.1)]
    pub lr_gamma: f64,

    /// Name fragments of backbone parameters.
    #[config(default = "vec![\"backbone\".to_string()]")]
    pub backbone_keywords: Vec<String>,

    /// Name fragments of linear-projection parameters.
    #[config(default = "vec![\"reference_points\".to_string(), \"sampling_offsets\".to_string()]")]
    pub linear_proj_keywords: Vec<String>,

    /// Name fragments counted as backbone in run metadata.
    #[config(default = "vec![\"backbone\".to_string(), \"input_proj\".to_string(), \"skip\".to_string()]")]
    pub count_backbone_keywords: Vec<String>,

    /// Name fragments counted as neck in run metadata.
    #[config(default = "vec![\"neck\".to_string(), \"query\".to_string()]")]
    pub count_neck_keywords: Vec<String>,

    /// Name fragments counted as head in run metadata.
    #[config(default = "vec![\"head\".to_string()]")]
    pub count_head_keywords: Vec<String>,
}

impl Default for OptimConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.lr <= 0.0 || self.lr_backbone < 0.0 {
            return Err("learning rates must be positive".to_string());
        }
        if self.lr_linear_proj_mult < 0.0 {
            return Err("lr_linear_proj_mult must not be negative".to_string());
        }
        if self.lr_gamma <= 0.0 {
            return Err("lr_gamma must be positive".to_string());
        }
        Ok(())
    }
}

/// True if `name` contains any of `keywords`.
pub fn matches_any(name: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|k| name.contains(k.as_str()))
}
