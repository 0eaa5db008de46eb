//! Scalar event log.
//!
//! One JSON object per line: `{"tag": "train/bbox", "value": 0.12, "step": 4}`.
//! Tags are `<category>/<name>`.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// File name of the scalar log inside a run directory.
pub const SCALAR_LOG_FILE: &str = "scalars.jsonl";

/// One logged scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarEvent {
    /// `<category>/<name>`.
    pub tag: String,
    /// Value.
    pub value: f64,
    /// Epoch.
    pub step: usize,
}

/// Append-only JSONL scalar writer.
#[derive(Debug)]
pub struct ScalarLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl ScalarLog {
    /// Open (or create) the log in `run_dir`, appending to existing events.
    pub fn open(run_dir: &Path) -> Result<Self> {
        let path = run_dir.join(SCALAR_LOG_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Log one scalar.
    pub fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()> {
        log::debug!("{} = {:.6} (epoch {})", tag, value, step);
        let event = ScalarEvent {
            tag: tag.to_string(),
            value,
            step,
        };
        serde_json::to_writer(&mut self.writer, &event)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    /// Log `category/name` for every pair and flush.
    pub fn add_scalars<'a>(
        &mut self,
        category: &str,
        values: impl IntoIterator<Item = (&'a str, f64)>,
        step: usize,
    ) -> Result<()> {
        for (name, value) in values {
            self.add_scalar(&format!("{}/{}", category, name), value, step)?;
        }
        self.flush()
    }

    /// Flush buffered events to disk.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Read every event of a scalar log.
pub fn read_scalars<P: AsRef<Path>>(path: P) -> Result<Vec<ScalarEvent>> {
    let reader = BufReader::new(File::open(path)?);
    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        events.push(serde_json::from_str(&line)?);
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_scalars_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut log = ScalarLog::open(dir.path()).unwrap();
        log.add_scalars("train", [("total_loss", 1.5), ("bbox", 0.25)], 3)
            .unwrap();
        log.add_scalar("lr/backbone", 1e-5, 3).unwrap();
        log.flush().unwrap();

        let events = read_scalars(log.path()).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].tag, "train/total_loss");
        assert_eq!(events[1].value, 0.25);
        assert_eq!(events[2].step, 3);
    }

    #[test]
    fn test_reopen_appends() {
        let dir = TempDir::new().unwrap();
        {
            let mut log = ScalarLog::open(dir.path()).unwrap();
            log.add_scalars("val", [("total_loss", 1.0)], 1).unwrap();
        }
        let mut log = ScalarLog::open(dir.path()).unwrap();
        log.add_scalars("val", [("total_loss", 0.5)], 2).unwrap();
        assert_eq!(read_scalars(log.path()).unwrap().len(), 2);
    }
}
