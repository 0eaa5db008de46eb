//! Checkpoint header definition.

/// Magic bytes of a checkpoint file.
pub const CHECKPOINT_MAGIC: [u8; 4] = *b"CLCK";

/// Current format version.
pub const FORMAT_VERSION: u16 = 1;

/// Header size in bytes.
pub const HEADER_SIZE: usize = 32;

/// Checkpoint header.
///
/// Layout (32 bytes total):
/// - Bytes 0-3: Magic "CLCK"
/// - Bytes 4-5: version (u16 LE)
/// - Bytes 6-7: flags (u16 LE)
/// - Bytes 8-15: epoch (u64 LE)
/// - Bytes 16-23: metric_max_val (f64 LE)
/// - Bytes 24-31: metric_max_test (f64 LE)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckpointHeader {
    /// Magic bytes "CLCK".
    pub magic: [u8; 4],
    /// Format version.
    pub version: u16,
    /// Flags (reserved for future use).
    pub flags: u16,
    /// Epoch the checkpoint was written at.
    pub epoch: u64,
    /// Best validation metric at write time.
    pub metric_max_val: f64,
    /// Best test metric at write time.
    pub metric_max_test: f64,
}

impl CheckpointHeader {
    /// Create a header for the current format version.
    pub fn new(epoch: u64, metric_max_val: f64, metric_max_test: f64) -> Self {
        Self {
            magic: CHECKPOINT_MAGIC,
            version: FORMAT_VERSION,
            flags: 0,
            epoch,
            metric_max_val,
            metric_max_test,
        }
    }

    /// Validate the header magic bytes.
    pub fn is_valid(&self) -> bool {
        self.magic == CHECKPOINT_MAGIC
    }

    /// Serialize the header to a byte array.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];

        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4..6].copy_from_slice(&self.version.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.flags.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.epoch.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.metric_max_val.to_le_bytes());
        bytes[24..32].copy_from_slice(&self.metric_max_test.to_le_bytes());

        bytes
    }

    /// Deserialize a header from a byte array.
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);

        let epoch = u64::from_le_bytes(word_at(bytes, 8));
        let metric_max_val = f64::from_le_bytes(word_at(bytes, 16));
        let metric_max_test = f64::from_le_bytes(word_at(bytes, 24));

        Self {
            magic,
            version: u16::from_le_bytes([bytes[4], bytes[5]]),
            flags: u16::from_le_bytes([bytes[6], bytes[7]]),
            epoch,
            metric_max_val,
            metric_max_test,
        }
    }
}

fn word_at(bytes: &[u8; HEADER_SIZE], offset: usize) -> [u8; 8] {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[offset..offset + 8]);
    word
}
