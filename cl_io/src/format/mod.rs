//! Checkpoint file format support.
//!
//! A checkpoint is a fixed 32-byte header followed by the model state dict,
//! two opaque framework records and the learning-rate schedule.
//!
//! # Example
//!
//! ```ignore
//! use cl_io::format::{load_from_file, save_to_file};
//!
//! save_to_file(&record, "runs/exp/model_last.ckpt")?;
//! let restored = load_from_file("runs/exp/model_last.ckpt")?;
//! assert_eq!(restored.state.epoch, record.state.epoch);
//! ```

pub mod header;
pub mod record;

pub use header::{CheckpointHeader, CHECKPOINT_MAGIC, FORMAT_VERSION, HEADER_SIZE};
pub use record::{load_from_file, load_record, save_record, save_to_file, CheckpointRecord};
