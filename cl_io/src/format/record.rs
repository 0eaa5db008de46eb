//! Checkpoint record read/write implementation.
//!
//! # Layout
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │ HEADER (32 bytes)                                                  │
//! │  magic "CLCK", version, flags, epoch, metric_max_val,              │
//! │  metric_max_test                                                   │
//! ├────────────────────────────────────────────────────────────────────┤
//! │ MODEL STATE DICT                                                   │
//! │  u32 tensor count                                                  │
//! │  For each tensor (sorted by name):                                 │
//! │    u32 name length, UTF-8 name bytes                               │
//! │    u8 rank, rank × u64 dims                                        │
//! │    f32 values (LE), row-major                                      │
//! ├────────────────────────────────────────────────────────────────────┤
//! │ MODULE RECORD          u64 length, opaque bytes                    │
//! ├────────────────────────────────────────────────────────────────────┤
//! │ OPTIMIZER RECORD       u64 length, opaque bytes                    │
//! ├────────────────────────────────────────────────────────────────────┤
//! │ SCHEDULER                                                          │
//! │  u32 group count, group count × f64 base lr                        │
//! │  u64 step_size, f64 gamma, u64 last_epoch                          │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers and floats are little-endian. The module and optimizer
//! records are produced by the training framework and are not interpreted
//! here.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use cl_core::{HostTensor, StateDict, StepLr, TrainingState};

use super::header::{CheckpointHeader, FORMAT_VERSION, HEADER_SIZE};
use crate::error::{ClIoError, Result};

/// Highest tensor rank accepted when decoding.
const MAX_TENSOR_RANK: usize = 8;

/// Everything persisted in one checkpoint file.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointRecord {
    /// Epoch and best metrics.
    pub state: TrainingState,
    /// Named model parameters.
    pub model: StateDict,
    /// Framework-encoded module record, restoring parameter identities.
    pub module_record: Vec<u8>,
    /// Framework-encoded optimizer state.
    pub optimizer: Vec<u8>,
    /// Learning-rate schedule.
    pub scheduler: StepLr,
}

/// Write a checkpoint record.
pub fn save_record<W: Write>(record: &CheckpointRecord, writer: &mut W) -> Result<()> {
    let header = CheckpointHeader::new(
        record.state.epoch as u64,
        record.state.best_val_metric,
        record.state.best_test_metric,
    );
    writer.write_all(&header.to_bytes())?;

    writer.write_all(&(record.model.len() as u32).to_le_bytes())?;
    for (name, tensor) in &record.model {
        write_tensor(writer, name, tensor)?;
    }

    write_blob(writer, &record.module_record)?;
    write_blob(writer, &record.optimizer)?;

    let scheduler = &record.scheduler;
    writer.write_all(&(scheduler.base_lrs().len() as u32).to_le_bytes())?;
    for lr in scheduler.base_lrs() {
        writer.write_all(&lr.to_le_bytes())?;
    }
    writer.write_all(&(scheduler.step_size() as u64).to_le_bytes())?;
    writer.write_all(&scheduler.gamma().to_le_bytes())?;
    writer.write_all(&(scheduler.last_epoch() as u64).to_le_bytes())?;

    Ok(())
}

/// Read a checkpoint record.
///
/// # Errors
/// Returns `InvalidFormat` for bad magic bytes or malformed sections and
/// `UnsupportedVersion` for records from another format version.
pub fn load_record<R: Read>(reader: &mut R) -> Result<CheckpointRecord> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_bytes)?;
    let header = CheckpointHeader::from_bytes(&header_bytes);

    if !header.is_valid() {
        return Err(ClIoError::InvalidFormat {
            message: "invalid magic bytes (expected CLCK)",
        });
    }
    if header.version != FORMAT_VERSION {
        return Err(ClIoError::UnsupportedVersion {
            got: header.version,
        });
    }

    let count = read_u32(reader)?;
    let mut model = StateDict::new();
    for _ in 0..count {
        let (name, tensor) = read_tensor(reader)?;
        model.insert(name, tensor);
    }

    let module_record = read_blob(reader)?;
    let optimizer = read_blob(reader)?;

    let groups = read_u32(reader)?;
    let mut base_lrs = Vec::new();
    for _ in 0..groups {
        base_lrs.push(read_f64(reader)?);
    }
    let step_size = read_len(reader)?;
    let gamma = read_f64(reader)?;
    let last_epoch = read_len(reader)?;

    Ok(CheckpointRecord {
        state: TrainingState::new(
            header.epoch as usize,
            header.metric_max_val,
            header.metric_max_test,
        ),
        model,
        module_record,
        optimizer,
        scheduler: StepLr::from_parts(base_lrs, step_size, gamma, last_epoch),
    })
}

/// Save a record to a file path.
pub fn save_to_file<P: AsRef<Path>>(record: &CheckpointRecord, path: P) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    save_record(record, &mut writer)?;
    writer.flush()?;
    Ok(())
}

/// Load a record from a file path.
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<CheckpointRecord> {
    let mut reader = BufReader::new(File::open(path)?);
    load_record(&mut reader)
}

fn write_tensor<W: Write>(writer: &mut W, name: &str, tensor: &HostTensor) -> Result<()> {
    writer.write_all(&(name.len() as u32).to_le_bytes())?;
    writer.write_all(name.as_bytes())?;
    writer.write_all(&[tensor.rank() as u8])?;
    for &dim in tensor.shape() {
        writer.write_all(&(dim as u64).to_le_bytes())?;
    }
    for &value in tensor.values() {
        writer.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

fn read_tensor<R: Read>(reader: &mut R) -> Result<(String, HostTensor)> {
    let name_len = read_u32(reader)? as usize;
    let name_bytes = read_bytes(reader, name_len)?;
    let name = String::from_utf8(name_bytes).map_err(|_| ClIoError::InvalidFormat {
        message: "tensor name is not UTF-8",
    })?;

    let mut rank = [0u8; 1];
    reader.read_exact(&mut rank)?;
    let rank = rank[0] as usize;
    if rank > MAX_TENSOR_RANK {
        return Err(ClIoError::InvalidFormat {
            message: "tensor rank too large",
        });
    }
    let shape = (0..rank)
        .map(|_| read_len(reader))
        .collect::<Result<Vec<_>>>()?;

    let byte_len = shape
        .iter()
        .try_fold(4usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or(ClIoError::InvalidFormat {
            message: "tensor shape overflows",
        })?;
    let bytes = read_bytes(reader, byte_len)?;
    let values = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    Ok((name, HostTensor::new(shape, values)?))
}

fn write_blob<W: Write>(writer: &mut W, bytes: &[u8]) -> Result<()> {
    writer.write_all(&(bytes.len() as u64).to_le_bytes())?;
    writer.write_all(bytes)?;
    Ok(())
}

fn read_blob<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let len = read_len(reader)?;
    read_bytes(reader, len)
}

/// Read exactly `len` bytes, growing the buffer only as data arrives.
fn read_bytes<R: Read>(reader: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    reader.by_ref().take(len as u64).read_to_end(&mut bytes)?;
    if bytes.len() != len {
        return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
    }
    Ok(bytes)
}

fn read_len<R: Read>(reader: &mut R) -> Result<usize> {
    usize::try_from(read_u64(reader)?).map_err(|_| ClIoError::InvalidFormat {
        message: "length does not fit in memory",
    })
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut b = [0u8; 4];
    reader.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut b = [0u8; 8];
    reader.read_exact(&mut b)?;
    Ok(u64::from_le_bytes(b))
}

fn read_f64<R: Read>(reader: &mut R) -> Result<f64> {
    let mut b = [0u8; 8];
    reader.read_exact(&mut b)?;
    Ok(f64::from_le_bytes(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn make_record() -> CheckpointRecord {
        let mut model = StateDict::new();
        model.insert(
            "class_embed.weight".into(),
            HostTensor::new(vec![2, 3], vec![0.1, -0.2, 0.3, f32::MIN_POSITIVE, 1e30, -0.0])
                .unwrap(),
        );
        model.insert(
            "class_embed.bias".into(),
            HostTensor::new(vec![2], vec![1.5, -2.5]).unwrap(),
        );
        CheckpointRecord {
            state: TrainingState::new(17, 0.4125, 0.3875),
            model,
            module_record: vec![1, 2, 3, 4, 5],
            optimizer: vec![9; 17],
            scheduler: StepLr::from_parts(vec![2e-4, 2e-5, 2e-5], 1000, 0.1, 17),
        }
    }

    #[test]
    fn test_save_load_roundtrip() {
        let original = make_record();

        let mut buffer = Vec::new();
        save_record(&original, &mut buffer).unwrap();
        let loaded = load_record(&mut Cursor::new(buffer)).unwrap();

        assert_eq!(loaded.state, original.state);
        assert_eq!(loaded.module_record, original.module_record);
        assert_eq!(loaded.optimizer, original.optimizer);
        assert_eq!(loaded.scheduler, original.scheduler);
        for (name, tensor) in &original.model {
            let restored = &loaded.model[name];
            assert_eq!(restored.shape(), tensor.shape());
            let a: Vec<u32> = restored.values().iter().map(|v| v.to_bits()).collect();
            let b: Vec<u32> = tensor.values().iter().map(|v| v.to_bits()).collect();
            assert_eq!(a, b, "bit mismatch in {}", name);
        }
    }

    #[test]
    fn test_invalid_magic() {
        let mut data = vec![0u8; 32];
        data[0..4].copy_from_slice(b"BADM");
        let result = load_record(&mut Cursor::new(data));
        assert!(matches!(result, Err(ClIoError::InvalidFormat { .. })));
    }

    #[test]
    fn test_unsupported_version() {
        let mut header = CheckpointHeader::new(1, 0.0, 0.0);
        header.version = 7;
        let result = load_record(&mut Cursor::new(header.to_bytes().to_vec()));
        assert_eq!(result, Err(ClIoError::UnsupportedVersion { got: 7 }));
    }

    #[test]
    fn test_truncated_record() {
        let mut buffer = Vec::new();
        save_record(&make_record(), &mut buffer).unwrap();
        buffer.truncate(buffer.len() - 4);
        assert!(matches!(
            load_record(&mut Cursor::new(buffer)),
            Err(ClIoError::Io(_))
        ));
    }

    fn header_and_tensor_prefix(name: &str, dims: &[u64]) -> Vec<u8> {
        let mut data = CheckpointHeader::new(1, 0.0, 0.0).to_bytes().to_vec();
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&(name.len() as u32).to_le_bytes());
        data.extend_from_slice(name.as_bytes());
        data.push(dims.len() as u8);
        for dim in dims {
            data.extend_from_slice(&dim.to_le_bytes());
        }
        data
    }

    #[test]
    fn test_overflowing_tensor_shape() {
        let data = header_and_tensor_prefix("w", &[u64::MAX, 2]);
        assert_eq!(
            load_record(&mut Cursor::new(data)),
            Err(ClIoError::InvalidFormat {
                message: "tensor shape overflows"
            })
        );
    }

    #[test]
    fn test_huge_tensor_without_data() {
        let data = header_and_tensor_prefix("w", &[1 << 40]);
        assert!(matches!(
            load_record(&mut Cursor::new(data)),
            Err(ClIoError::Io(_))
        ));
    }

    #[test]
    fn test_huge_blob_length() {
        let mut data = CheckpointHeader::new(1, 0.0, 0.0).to_bytes().to_vec();
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&u64::MAX.to_le_bytes());
        data.extend_from_slice(&[7; 16]);
        assert!(load_record(&mut Cursor::new(data)).is_err());
    }

    #[test]
    fn test_huge_name_length() {
        let mut data = CheckpointHeader::new(1, 0.0, 0.0).to_bytes().to_vec();
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&u32::MAX.to_le_bytes());
        data.extend_from_slice(b"w");
        assert!(matches!(
            load_record(&mut Cursor::new(data)),
            Err(ClIoError::Io(_))
        ));
    }

    #[test]
    fn test_huge_group_count() {
        let mut record = make_record();
        record.scheduler = StepLr::from_parts(Vec::new(), 10, 0.1, 0);
        let mut buffer = Vec::new();
        save_record(&record, &mut buffer).unwrap();
        // group count sits before step_size, gamma and last_epoch
        let at = buffer.len() - 28;
        buffer[at..at + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            load_record(&mut Cursor::new(buffer)),
            Err(ClIoError::Io(_))
        ));
    }

    #[test]
    fn test_empty_state_dict_roundtrip() {
        let mut record = make_record();
        record.model.clear();
        record.module_record.clear();

        let mut buffer = Vec::new();
        save_record(&record, &mut buffer).unwrap();
        let loaded = load_record(&mut Cursor::new(buffer)).unwrap();
        assert!(loaded.model.is_empty());
        assert!(loaded.module_record.is_empty());
    }
}
