//! KeyDir entry definition

use crate::log::{FileId, CRC_SIZE, HEADER_SIZE};

/// Location of a key's most recent value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyDirEntry {
    /// Data file holding the value
    pub file_id: FileId,

    /// Value length in bytes
    pub value_size: u32,

    /// Absolute offset of the value within the data file
    pub value_position: u64,

    /// Milliseconds since the UNIX epoch when the record was written
    pub timestamp: f64,

    /// Set only on entries produced while replaying a removal; the live
    /// KeyDir never stores one
    pub tombstone: bool,
}

impl KeyDirEntry {
    /// Whether this entry was written after `other` in log order
    ///
    /// Log order is (file id, offset): files replay in ascending id and
    /// records within a file in offset order.
    pub fn is_newer_than(&self, other: &KeyDirEntry) -> bool {
        (self.file_id, self.value_position) > (other.file_id, other.value_position)
    }

    /// Same record on disk
    pub fn same_location(&self, other: &KeyDirEntry) -> bool {
        self.file_id == other.file_id
            && self.value_position == other.value_position
            && self.value_size == other.value_size
    }

    /// Offset of the record start within its data file
    pub fn record_position(&self, key_len: usize) -> u64 {
        self.value_position - (HEADER_SIZE + key_len) as u64
    }

    /// Bytes the full record occupies on disk
    pub fn record_len(&self, key_len: usize) -> u64 {
        (HEADER_SIZE + key_len + CRC_SIZE) as u64 + self.value_size as u64
    }
}
