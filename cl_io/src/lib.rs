//! cl_io - stable-storage artifacts of continual-learning runs.
//!
//! Everything a run leaves on disk goes through this crate:
//!
//! - [`format`]: the binary checkpoint record (`.ckpt`)
//! - [`store`]: checkpoint directory management (naming, pruning, discovery)
//! - [`metrics`]: per-dataset metric JSON files
//! - [`scalars`]: the JSONL scalar event log
//! - [`meta`]: run metadata
//!
//! # Example
//!
//! ```ignore
//! use cl_io::{CheckpointStore, CheckpointKind};
//!
//! let store = CheckpointStore::create("runs/abdomen_cl")?;
//! store.save(&CheckpointKind::best_val(0.41, 12), &record)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod format;
pub mod meta;
pub mod metrics;
pub mod scalars;
pub mod store;

pub use cl_core::{BestCategory, CheckpointKind};
pub use error::{ClIoError, Result};
pub use format::{load_from_file, save_to_file, CheckpointRecord};
pub use meta::{ParameterCounts, RunMetadata, RUN_META_FILE};
pub use metrics::{read_metrics, test_metrics_dir, write_json, write_test_metrics};
pub use scalars::{read_scalars, ScalarEvent, ScalarLog, SCALAR_LOG_FILE};
pub use store::CheckpointStore;
