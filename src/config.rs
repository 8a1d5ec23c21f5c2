//! Configuration for CaskKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{CaskError, Result};

/// Main configuration for a CaskKV instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── LOCK             (exclusive advisory lock)
    ///     ├── {id}.data        (append-only record log)
    ///     └── {id}.hint        (value-free index of {id}.data)
    pub data_dir: PathBuf,

    /// Size in bytes at which the active data file is sealed and a new one
    /// is started. A single record larger than this still gets its own file.
    pub max_file_size: u64,

    // -------------------------------------------------------------------------
    // Durability Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync the active data file
    pub sync_strategy: SyncStrategy,

    /// Write a hint file whenever the writer seals a data file
    pub write_hint_files: bool,

    // -------------------------------------------------------------------------
    // Recovery Configuration
    // -------------------------------------------------------------------------
    /// Read size used when streaming hint files and scanning data files
    pub read_chunk_size: usize,
}

/// Data file sync strategy
#[derive(Debug, Clone, Copy)]
pub enum SyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N unsynced records (balanced durability/performance)
    EveryNEntries { count: usize },
}

/// Default maximum data file size (2 GiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// Convert a file size given in MiB to bytes
///
/// Fails with `CaskError::Config` if the result does not fit in a `u64`.
pub fn mib_to_bytes(mib: u64) -> Result<u64> {
    mib.checked_mul(1024 * 1024)
        .ok_or_else(|| CaskError::Config(format!("file size of {} MiB is too large", mib)))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./caskkv_data"),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            sync_strategy: SyncStrategy::EveryNEntries { count: 100 },
            write_hint_files: true,
            read_chunk_size: 64 * 1024,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_file_size == 0 {
            return Err(CaskError::Config(
                "max_file_size must be greater than zero".to_string(),
            ));
        }
        if self.read_chunk_size == 0 {
            return Err(CaskError::Config(
                "read_chunk_size must be greater than zero".to_string(),
            ));
        }
        if let SyncStrategy::EveryNEntries { count: 0 } = self.sync_strategy {
            return Err(CaskError::Config(
                "sync count must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the maximum data file size (in bytes)
    pub fn max_file_size(mut self, size: u64) -> Self {
        self.config.max_file_size = size;
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Enable or disable hint files for sealed writer files
    pub fn write_hint_files(mut self, enabled: bool) -> Self {
        self.config.write_hint_files = enabled;
        self
    }

    /// Set the chunk size used while loading files at open
    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.config.read_chunk_size = size;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
