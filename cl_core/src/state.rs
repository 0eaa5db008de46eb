//! Orchestrator bookkeeping.

/// Phase of the epoch state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochPhase {
    /// Nothing has run yet.
    NotStarted,
    /// Optimizing on the training loader.
    Training,
    /// Validation pass.
    Validating,
    /// Held-out test pass.
    Testing,
    /// End-of-epoch checkpoint written.
    Checkpointed,
    /// All epochs completed.
    Done,
}

/// Scalar training state persisted with every checkpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingState {
    /// Last completed epoch.
    pub epoch: usize,
    /// Best validation primary metric so far.
    pub best_val_metric: f64,
    /// Best mean test primary metric so far.
    pub best_test_metric: f64,
}

impl TrainingState {
    /// State at `epoch` with the given maxima.
    pub fn new(epoch: usize, best_val_metric: f64, best_test_metric: f64) -> Self {
        Self {
            epoch,
            best_val_metric,
            best_test_metric,
        }
    }

    /// Accept `score` as the new validation best if it is at least as good.
    pub fn offer_val(&mut self, score: f64) -> bool {
        if score >= self.best_val_metric {
            self.best_val_metric = score;
            true
        } else {
            false
        }
    }

    /// Accept `score` as the new test best only if it is strictly better.
    pub fn offer_test(&mut self, score: f64) -> bool {
        if score > self.best_test_metric {
            self.best_test_metric = score;
            true
        } else {
            false
        }
    }
}

impl Default for TrainingState {
    fn default() -> Self {
        Self::new(0, 0.0, 0.0)
    }
}
