//! Checkpoint file naming.
//!
//! | Kind        | File name                                   |
//! |-------------|---------------------------------------------|
//! | last        | `model_last.ckpt`                           |
//! | best val    | `model_best_val_<score:.3>_in_ep<epoch>.ckpt`  |
//! | best test   | `model_best_test_<score:.3>_in_ep<epoch>.ckpt` |
//! | snapshot    | `model_epoch_<epoch>.ckpt`                  |

/// Checkpoint file extension.
pub const CHECKPOINT_EXTENSION: &str = "ckpt";

const LAST_STEM: &str = "model_last";
const SNAPSHOT_PREFIX: &str = "model_epoch_";

/// Category of "best" checkpoint; at most one file per category survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BestCategory {
    /// Best validation metric.
    Validation,
    /// Best mean test metric.
    Test,
}

impl BestCategory {
    /// File-name marker shared by all checkpoints of this category.
    pub fn marker(&self) -> &'static str {
        match self {
            BestCategory::Validation => "model_best_val",
            BestCategory::Test => "model_best_test",
        }
    }

    /// True if `file_name` belongs to this category.
    pub fn matches(&self, file_name: &str) -> bool {
        file_name.contains(self.marker())
    }
}

/// What a checkpoint file represents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CheckpointKind {
    /// Rewritten every epoch; the resume point.
    Last,
    /// New best validation score.
    Best {
        /// Validation or test.
        category: BestCategory,
        /// Score that made it best.
        score: f64,
        /// Epoch it was reached at.
        epoch: usize,
    },
    /// Durable periodic snapshot, never pruned.
    Snapshot {
        /// Epoch of the snapshot.
        epoch: usize,
    },
}

impl CheckpointKind {
    /// Best-validation checkpoint.
    pub fn best_val(score: f64, epoch: usize) -> Self {
        CheckpointKind::Best {
            category: BestCategory::Validation,
            score,
            epoch,
        }
    }

    /// Best-test checkpoint.
    pub fn best_test(score: f64, epoch: usize) -> Self {
        CheckpointKind::Best {
            category: BestCategory::Test,
            score,
            epoch,
        }
    }

    /// File name including extension.
    pub fn file_name(&self) -> String {
        match self {
            CheckpointKind::Last => format!("{}.{}", LAST_STEM, CHECKPOINT_EXTENSION),
            CheckpointKind::Best {
                category,
                score,
                epoch,
            } => format!(
                "{}_{:.3}_in_ep{}.{}",
                category.marker(),
                score,
                epoch,
                CHECKPOINT_EXTENSION
            ),
            CheckpointKind::Snapshot { epoch } => {
                format!("{}{}.{}", SNAPSHOT_PREFIX, epoch, CHECKPOINT_EXTENSION)
            }
        }
    }

    /// Category to prune before writing, if any.
    pub fn best_category(&self) -> Option<BestCategory> {
        match self {
            CheckpointKind::Best { category, .. } => Some(*category),
            _ => None,
        }
    }

    /// Recover the kind from a file name. The score is the rounded value
    /// embedded in the name.
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(CHECKPOINT_EXTENSION)?.strip_suffix('.')?;
        if stem == LAST_STEM {
            return Some(CheckpointKind::Last);
        }
        if let Some(epoch) = stem.strip_prefix(SNAPSHOT_PREFIX) {
            return epoch.parse().ok().map(|epoch| CheckpointKind::Snapshot { epoch });
        }
        for category in [BestCategory::Validation, BestCategory::Test] {
            if let Some(rest) = stem
                .strip_prefix(category.marker())
                .and_then(|r| r.strip_prefix('_'))
            {
                let (score, epoch) = rest.split_once("_in_ep")?;
                return Some(CheckpointKind::Best {
                    category,
                    score: score.parse().ok()?,
                    epoch: epoch.parse().ok()?,
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_names() {
        assert_eq!(CheckpointKind::Last.file_name(), "model_last.ckpt");
        assert_eq!(
            CheckpointKind::best_val(0.41237, 12).file_name(),
            "model_best_val_0.412_in_ep12.ckpt"
        );
        assert_eq!(
            CheckpointKind::best_test(0.5, 3).file_name(),
            "model_best_test_0.500_in_ep3.ckpt"
        );
        assert_eq!(
            CheckpointKind::Snapshot { epoch: 500 }.file_name(),
            "model_epoch_500.ckpt"
        );
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            CheckpointKind::parse("model_last.ckpt"),
            Some(CheckpointKind::Last)
        );
        assert_eq!(
            CheckpointKind::parse("model_epoch_1000.ckpt"),
            Some(CheckpointKind::Snapshot { epoch: 1000 })
        );
        assert_eq!(
            CheckpointKind::parse("model_best_val_0.412_in_ep12.ckpt"),
            Some(CheckpointKind::best_val(0.412, 12))
        );
        assert_eq!(
            CheckpointKind::parse("model_best_test_0.500_in_ep3.ckpt"),
            Some(CheckpointKind::best_test(0.5, 3))
        );
        assert_eq!(CheckpointKind::parse("scalars.jsonl"), None);
        assert_eq!(CheckpointKind::parse("model_best_val_x.ckpt"), None);
    }

    #[test]
    fn test_category_matching() {
        let val = CheckpointKind::best_val(0.1, 1);
        assert_eq!(val.best_category(), Some(BestCategory::Validation));
        assert!(BestCategory::Validation.matches(&val.file_name()));
        assert!(!BestCategory::Test.matches(&val.file_name()));
        assert_eq!(CheckpointKind::Last.best_category(), None);
    }
}
