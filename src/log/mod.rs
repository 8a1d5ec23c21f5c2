//! Log Module
//!
//! On-disk format of the append-only data files and their hint files.
//!
//! ## Responsibilities
//! - Encode/decode individual log records (CRC32 protected)
//! - Encode hint records and parse hint files incrementally
//! - Own data file handles (append, positional reads, sealing)
//! - Sequentially scan data files during recovery
//!
//! ## Data File Record
//! ```text
//! ┌──────────────┬─────────────┬───────────────┬──────────┬────────────┬─────────┐
//! │ Timestamp(8) │ KeySize (2) │ TotalSize (4) │   Key    │   Value    │ CRC (4) │
//! │   f64 BE     │   u16 BE    │    u32 BE     │          │            │ u32 BE  │
//! └──────────────┴─────────────┴───────────────┴──────────┴────────────┴─────────┘
//!   TotalSize = 14 + KeySize + ValueSize
//!   High bit of TotalSize set = tombstone (no value bytes)
//! ```
//!
//! ## Hint Record
//! ```text
//! ┌──────────────┬─────────────┬───────────────┬──────────────┬──────────┬─────────┐
//! │ Timestamp(8) │ KeySize (2) │ TotalSize (4) │ Position (8) │   Key    │ CRC (4) │
//! │   f64 BE     │   u16 BE    │    u32 BE     │    f64 BE    │          │ u32 BE  │
//! └──────────────┴─────────────┴───────────────┴──────────────┴──────────┴─────────┘
//!   Position = byte offset of the record start in the paired data file
//! ```

mod data_file;
mod hint;
mod iterator;
mod record;

use std::fmt;
use std::path::{Path, PathBuf};

pub use data_file::DataFile;
pub use hint::{HintEntry, HintParser, HintRecord, ParseState};
pub use iterator::{DataFileIterator, ScannedRecord};
pub use record::LogRecord;

// =============================================================================
// Shared Constants
// =============================================================================

/// Timestamp field size
pub const TIMESTAMP_SIZE: usize = 8;

/// Key size field size
pub const KEY_SIZE_SIZE: usize = 2;

/// Total size field size
pub const TOTAL_SIZE_SIZE: usize = 4;

/// Hint position field size
pub const POSITION_SIZE: usize = 8;

/// Trailing checksum size
pub const CRC_SIZE: usize = 4;

/// Record header: Timestamp (8) + KeySize (2) + TotalSize (4) = 14 bytes
pub const HEADER_SIZE: usize = TIMESTAMP_SIZE + KEY_SIZE_SIZE + TOTAL_SIZE_SIZE;

/// Hint header: record header (14) + Position (8) = 22 bytes
pub const HINT_HEADER_SIZE: usize = HEADER_SIZE + POSITION_SIZE;

/// Bit of the TotalSize field marking a tombstone record
pub const TOMBSTONE_FLAG: u32 = 0x8000_0000;

/// Largest TotalSize a record may declare
pub const MAX_TOTAL_SIZE: u32 = TOMBSTONE_FLAG - 1;

/// Data file extension
pub const DATA_EXTENSION: &str = "data";

/// Hint file extension
pub const HINT_EXTENSION: &str = "hint";

/// Suffix for files that are written then renamed into place
pub const TMP_EXTENSION: &str = "tmp";

// =============================================================================
// File Identifiers
// =============================================================================

/// Identifier of a data file (and its hint file)
///
/// Ids are assigned in increasing order; replay order during recovery is
/// ascending id order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(pub u64);

impl FileId {
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// The id following this one
    pub fn next(self) -> FileId {
        FileId(self.0 + 1)
    }

    /// `{dir}/{id}.data`
    pub fn data_path(self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.{}", self.0, DATA_EXTENSION))
    }

    /// `{dir}/{id}.hint`
    pub fn hint_path(self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.{}", self.0, HINT_EXTENSION))
    }

    /// Parse "42.data" → (42, "data"); anything else → None
    pub fn parse_filename(path: &Path) -> Option<(FileId, &str)> {
        let extension = path.extension()?.to_str()?;
        let stem = path.file_stem()?.to_str()?;
        let id = stem.parse().ok()?;
        Some((FileId(id), extension))
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Milliseconds since the UNIX epoch, as stored in record headers
pub fn now_timestamp() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as f64)
        .unwrap_or(0.0)
}
