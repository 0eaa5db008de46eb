//! Metric JSON files.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use cl_core::MetricScores;

use crate::error::Result;

/// Directory holding per-dataset test metrics of `epoch`.
pub fn test_metrics_dir(run_dir: &Path, epoch: usize) -> PathBuf {
    run_dir
        .join("test_during_training")
        .join(format!("{}_epoch", epoch))
}

/// Write any serializable value as pretty JSON, creating parent directories.
pub fn write_json<T: Serialize + ?Sized, P: AsRef<Path>>(value: &T, path: P) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

/// Write the metrics of one test dataset to
/// `test_during_training/<epoch>_epoch/<dataset>.json`.
pub fn write_test_metrics(
    run_dir: &Path,
    epoch: usize,
    dataset: &str,
    scores: &MetricScores,
) -> Result<PathBuf> {
    let path = test_metrics_dir(run_dir, epoch).join(format!("{}.json", dataset));
    write_json(scores.as_map(), &path)?;
    Ok(path)
}

/// Read a metric JSON file.
pub fn read_metrics<P: AsRef<Path>>(path: P) -> Result<MetricScores> {
    let reader = BufReader::new(File::open(path)?);
    let map: BTreeMap<String, f64> = serde_json::from_reader(reader)?;
    Ok(map.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_read_test_metrics() {
        let dir = TempDir::new().unwrap();
        let scores = MetricScores::new()
            .with("mAP_coco", 0.5)
            .with("AP_IoU_0.50", 0.75);

        let path = write_test_metrics(dir.path(), 20, "WORD", &scores).unwrap();
        assert!(path.ends_with("test_during_training/20_epoch/WORD.json"));
        assert_eq!(read_metrics(&path).unwrap(), scores);
    }
}
