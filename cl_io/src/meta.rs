//! Run metadata written next to the checkpoints.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::metrics::write_json;

/// File name of the run metadata.
pub const RUN_META_FILE: &str = "run_meta.json";

/// Trainable parameter counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterCounts {
    /// All trainable parameters.
    pub num_params: usize,
    /// Backbone parameters.
    pub num_backbone_params: usize,
    /// Neck parameters.
    pub num_neck_params: usize,
    /// Head parameters.
    pub num_head_params: usize,
}

/// Metadata of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Parameter counts.
    #[serde(flatten)]
    pub parameters: ParameterCounts,
    /// Best-effort system information (host, revision, ...).
    #[serde(default)]
    pub system: BTreeMap<String, String>,
}

impl RunMetadata {
    /// Write to `run_dir/run_meta.json`.
    pub fn save(&self, run_dir: &Path) -> Result<PathBuf> {
        let path = run_dir.join(RUN_META_FILE);
        write_json(self, &path)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_flattens_counts() {
        let dir = TempDir::new().unwrap();
        let mut meta = RunMetadata {
            parameters: ParameterCounts {
                num_params: 10,
                num_backbone_params: 4,
                num_neck_params: 3,
                num_head_params: 2,
            },
            ..Default::default()
        };
        meta.system.insert("hostname".into(), "node-1".into());

        let path = meta.save(dir.path()).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(json["num_params"], 10);
        assert_eq!(json["system"]["hostname"], "node-1");
    }
}
