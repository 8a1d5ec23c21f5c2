//! Error types for CaskKV
//!
//! Provides a unified error type for all operations.

use std::path::PathBuf;

use thiserror::Error;

use crate::log::FileId;

/// Result type alias using CaskError
pub type Result<T> = std::result::Result<T, CaskError>;

/// Unified error type for CaskKV operations
#[derive(Debug, Error)]
pub enum CaskError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Log Format Errors
    // -------------------------------------------------------------------------
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    #[error("Corrupt hint file {file_id}: {reason}")]
    CorruptHintFile { file_id: FileId, reason: String },

    #[error("Record too large: key {key_len} bytes, record {total_len} bytes")]
    RecordTooLarge { key_len: usize, total_len: u64 },

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Data file {0} is not registered")]
    MissingDataFile(FileId),

    #[error("Engine is closed")]
    Closed,

    #[error("Snapshot is closed")]
    SnapshotClosed,

    #[error("Directory already open: {}", .0.display())]
    DirectoryAlreadyOpen(PathBuf),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}
