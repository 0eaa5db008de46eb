//! Step learning-rate schedule over parameter groups.

/// Multiplies every group's learning rate by `gamma` each `step_size` epochs.
///
/// `lr_g = base_g * gamma^(last_epoch / step_size)` with integer division.
#[derive(Debug, Clone, PartialEq)]
pub struct StepLr {
    base_lrs: Vec<f64>,
    step_size: usize,
    gamma: f64,
    last_epoch: usize,
}

impl StepLr {
    /// Schedule starting at epoch 0.
    pub fn new(base_lrs: Vec<f64>, step_size: usize, gamma: f64) -> Self {
        Self::from_parts(base_lrs, step_size, gamma, 0)
    }

    /// Restore a schedule from its persisted parts.
    pub fn from_parts(base_lrs: Vec<f64>, step_size: usize, gamma: f64, last_epoch: usize) -> Self {
        Self {
            base_lrs,
            step_size,
            gamma,
            last_epoch,
        }
    }

    /// Advance by one epoch.
    pub fn step(&mut self) {
        self.last_epoch += 1;
    }

    /// Current learning rate of every group.
    pub fn lrs(&self) -> Vec<f64> {
        (0..self.base_lrs.len()).map(|g| self.lr(g)).collect()
    }

    /// Current learning rate of group `group` (0 for unknown groups).
    pub fn lr(&self, group: usize) -> f64 {
        let base = self.base_lrs.get(group).copied().unwrap_or(0.0);
        if self.step_size == 0 {
            return base;
        }
        base * self.gamma.powi((self.last_epoch / self.step_size) as i32)
    }

    /// Replace the step size, keeping progress.
    pub fn set_step_size(&mut self, step_size: usize) {
        self.step_size = step_size;
    }

    /// Initial learning rates.
    pub fn base_lrs(&self) -> &[f64] {
        &self.base_lrs
    }

    /// Epochs between decays.
    pub fn step_size(&self) -> usize {
        self.step_size
    }

    /// Decay factor.
    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    /// Number of steps taken.
    pub fn last_epoch(&self) -> usize {
        self.last_epoch
    }
}
