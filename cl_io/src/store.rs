//! Checkpoint directory management.
//!
//! A run directory holds at most one best-validation and one best-test
//! checkpoint. Writing a new best first removes every file of its category.

use std::fs;
use std::path::{Path, PathBuf};

use cl_core::{BestCategory, CheckpointKind};

use crate::error::Result;
use crate::format::{load_from_file, save_to_file, CheckpointRecord};

/// Suffix of a checkpoint still being written.
const TMP_EXTENSION: &str = "tmp";

/// Checkpoint files of one run directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Store rooted at `dir`, which must exist.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted at `dir`, creating it if needed.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Run directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path a checkpoint of `kind` is written to.
    pub fn path_for(&self, kind: &CheckpointKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    /// Write `record` as `kind`, pruning the previous best of its category.
    ///
    /// The record is written to a temporary sibling and renamed into place,
    /// so an interrupted write leaves the previous file intact. I/O failures
    /// propagate; nothing is retried.
    pub fn save(&self, kind: &CheckpointKind, record: &CheckpointRecord) -> Result<PathBuf> {
        if let Some(category) = kind.best_category() {
            self.prune(category)?;
        }
        let path = self.path_for(kind);
        let tmp = self.dir.join(format!("{}.{}", kind.file_name(), TMP_EXTENSION));
        if let Err(err) = save_to_file(record, &tmp) {
            let _ = fs::remove_file(&tmp);
            return Err(err);
        }
        fs::rename(&tmp, &path)?;
        log::info!(
            "Saved checkpoint to {:?} (epoch {}, best val {:.4}, best test {:.4})",
            path,
            record.state.epoch,
            record.state.best_val_metric,
            record.state.best_test_metric
        );
        Ok(path)
    }

    /// Read a checkpoint.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<CheckpointRecord> {
        let path = path.as_ref();
        let record = load_from_file(path)?;
        log::info!(
            "Loaded checkpoint from {:?} (epoch {})",
            path,
            record.state.epoch
        );
        Ok(record)
    }

    /// Path of `model_last`, if it exists.
    pub fn last(&self) -> Option<PathBuf> {
        let path = self.path_for(&CheckpointKind::Last);
        path.exists().then_some(path)
    }

    /// Remove every file of `category`; returns how many were deleted.
    pub fn prune(&self, category: BestCategory) -> Result<usize> {
        let mut removed = 0;
        for path in self.files_matching(|name| category.matches(name))? {
            fs::remove_file(&path)?;
            log::debug!("Removed superseded checkpoint {:?}", path);
            removed += 1;
        }
        Ok(removed)
    }

    /// Best checkpoints of `category` currently on disk.
    pub fn best(&self, category: BestCategory) -> Result<Vec<PathBuf>> {
        self.files_matching(|name| category.matches(name))
    }

    /// Every file that parses as a checkpoint, with its kind, in name order.
    pub fn list(&self) -> Result<Vec<(PathBuf, CheckpointKind)>> {
        let mut found: Vec<_> = self
            .files_matching(|name| CheckpointKind::parse(name).is_some())?
            .into_iter()
            .filter_map(|p| {
                let kind = p.file_name()?.to_str().and_then(CheckpointKind::parse)?;
                Some((p, kind))
            })
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }

    fn files_matching(&self, pred: impl Fn(&str) -> bool) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(&pred);
            if matches && path.is_file() {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cl_core::{StateDict, StepLr, TrainingState};
    use tempfile::TempDir;

    fn record(epoch: usize, val: f64) -> CheckpointRecord {
        CheckpointRecord {
            state: TrainingState::new(epoch, val, 0.0),
            model: StateDict::new(),
            module_record: Vec::new(),
            optimizer: Vec::new(),
            scheduler: StepLr::new(vec![1e-4], 10, 0.1),
        }
    }

    #[test]
    fn test_at_most_one_best_per_category() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());

        for (epoch, score) in [(1, 0.1), (2, 0.2), (3, 0.25)] {
            store
                .save(&CheckpointKind::best_val(score, epoch), &record(epoch, score))
                .unwrap();
            assert_eq!(store.best(BestCategory::Validation).unwrap().len(), 1);
        }
        store
            .save(&CheckpointKind::best_test(0.3, 3), &record(3, 0.25))
            .unwrap();

        let val = store.best(BestCategory::Validation).unwrap();
        assert!(val[0].ends_with("model_best_val_0.250_in_ep3.ckpt"));
        assert_eq!(store.best(BestCategory::Test).unwrap().len(), 1);
    }

    #[test]
    fn test_snapshots_and_last_are_never_pruned() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        assert!(store.last().is_none());

        store.save(&CheckpointKind::Last, &record(1, 0.0)).unwrap();
        store
            .save(&CheckpointKind::Snapshot { epoch: 500 }, &record(500, 0.0))
            .unwrap();
        store
            .save(&CheckpointKind::best_val(0.5, 500), &record(500, 0.5))
            .unwrap();

        let kinds: Vec<_> = store.list().unwrap().into_iter().map(|(_, k)| k).collect();
        assert_eq!(kinds.len(), 3);
        assert!(kinds.contains(&CheckpointKind::Snapshot { epoch: 500 }));
        assert_eq!(store.load(store.last().unwrap()).unwrap().state.epoch, 1);
    }

    #[test]
    fn test_rewrite_replaces_last_without_leftovers() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        store.save(&CheckpointKind::Last, &record(1, 0.0)).unwrap();
        store.save(&CheckpointKind::Last, &record(2, 0.0)).unwrap();

        assert_eq!(store.load(store.last().unwrap()).unwrap().state.epoch, 2);
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![CheckpointKind::Last.file_name()]);
    }

    #[test]
    fn test_failed_write_keeps_previous_last() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        store.save(&CheckpointKind::Last, &record(3, 0.0)).unwrap();

        // a directory squatting on the temporary name makes the write fail
        let tmp = dir
            .path()
            .join(format!("{}.{}", CheckpointKind::Last.file_name(), TMP_EXTENSION));
        fs::create_dir(&tmp).unwrap();
        assert!(store.save(&CheckpointKind::Last, &record(4, 0.0)).is_err());

        assert_eq!(store.load(store.last().unwrap()).unwrap().state.epoch, 3);
    }

    #[test]
    fn test_write_error_propagates() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("missing"));
        assert!(store.save(&CheckpointKind::Last, &record(1, 0.0)).is_err());
    }
}
