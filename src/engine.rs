//! Engine Module
//!
//! The store handle that coordinates all components.
//!
//! ## Responsibilities
//! - Own the data directory (lock file) for the life of the handle
//! - Rebuild the KeyDir on open
//! - Route writes through the single writer, reads through the KeyDir
//! - Hand out snapshots and run compaction

use std::collections::HashMap;
use std::fs;
use std::hash::Hash;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::batch::Batch;
use crate::config::Config;
use crate::error::{CaskError, Result};
use crate::keydir::KeyDir;
use crate::lock::DirLock;
use crate::log::FileId;
use crate::snapshot::Snapshot;
use crate::storage::{CompactionStats, Compactor, FileRegistry, Loader, RecoveryStats, Writer};

/// The main storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (put/remove/write): serialized by the `writer` mutex, which
///   fixes one total order of appends
///
/// - **Reads** (get): never touch the writer. A read resolves the key and
///   its data file under the registry read lock, then reads the value
///   without any engine-level lock held
///
/// - **Compaction**: holds the writer only long enough to rotate, then
///   copies in the background of ordinary traffic
///
/// ## Lock Order
/// writer → registry → keydir
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// In-memory index shared with the writer and compactor
    keydir: Arc<KeyDir>,

    /// Every readable data file
    files: Arc<FileRegistry>,

    /// Append side (exclusive access needed)
    writer: Mutex<Writer>,

    compactor: Compactor,

    /// What open found on disk
    recovery: RecoveryStats,

    /// Held until the engine is dropped
    _lock: DirLock,
}

impl Engine {
    /// Open or create a store in `config.data_dir`
    ///
    /// On startup:
    /// 1. Create the data directory and take its lock
    /// 2. Load every data file into the KeyDir
    /// 3. Start a fresh active file after the highest existing id
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        // Step 1: Directory and lock
        fs::create_dir_all(&config.data_dir)?;
        let lock = DirLock::acquire(&config.data_dir)?;

        // Step 2: Recovery
        let keydir = Arc::new(KeyDir::new());
        let files = Arc::new(FileRegistry::new());
        let recovery =
            Loader::new(&config.data_dir, config.read_chunk_size).load(&keydir, &files)?;

        // Step 3: Writer
        let first_id = recovery.max_file_id.map_or(FileId(0), FileId::next);
        let writer = Writer::open(&config, first_id, Arc::clone(&keydir), Arc::clone(&files))?;

        tracing::info!(
            "Opened {} with {} keys from {} files ({} via hints, {} scanned, {} truncated)",
            config.data_dir.display(),
            recovery.keys_loaded,
            recovery.files_loaded,
            recovery.hint_files_used,
            recovery.data_files_scanned,
            recovery.truncated_files
        );

        Ok(Self {
            compactor: Compactor::new(config.data_dir.clone(), config.max_file_size),
            config,
            keydir,
            files,
            writer: Mutex::new(writer),
            recovery,
            _lock: lock,
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(Config::builder().data_dir(path.as_ref()).build())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get the current value of `key`
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let (entry, file) = {
            let registered = self.files.read();
            let entry = match self.keydir.lookup(key) {
                Some(entry) => entry,
                None => return Ok(None),
            };
            let file = registered
                .get(&entry.file_id)
                .cloned()
                .ok_or(CaskError::MissingDataFile(entry.file_id))?;
            (entry, file)
        };

        file.read_value(entry.value_position, entry.value_size)
            .map(Some)
    }

    /// Get the value of `key` as of `snapshot`
    pub fn get_at(&self, key: &[u8], snapshot: &Snapshot) -> Result<Option<Vec<u8>>> {
        snapshot.get(key)
    }

    /// Every live key, in no particular order
    pub fn list_keys(&self) -> Vec<Vec<u8>> {
        self.keydir.live_keys()
    }

    /// Group and fold every live value from one consistent view
    ///
    /// `map` is called once per live key and pushes any number of pairs
    /// into its output; `reduce` folds all values emitted for one key.
    pub fn map_reduce<K, V, R, M, F>(&self, mut map: M, mut reduce: F) -> Result<HashMap<K, R>>
    where
        K: Eq + Hash,
        M: FnMut(&[u8], &[u8], &mut Vec<(K, V)>),
        F: FnMut(&K, Vec<V>) -> R,
    {
        let snapshot = self.create_snapshot()?;

        let mut groups: HashMap<K, Vec<V>> = HashMap::new();
        let mut emitted = Vec::new();
        for key in snapshot.keys()? {
            let value = match snapshot.get(&key)? {
                Some(value) => value,
                None => continue,
            };
            map(&key, &value, &mut emitted);
            for (k, v) in emitted.drain(..) {
                groups.entry(k).or_default().push(v);
            }
        }
        snapshot.close();

        Ok(groups
            .into_iter()
            .map(|(k, values)| {
                let reduced = reduce(&k, values);
                (k, reduced)
            })
            .collect())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Put a key-value pair
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.writer.lock().put(key, value)
    }

    /// Remove a key
    ///
    /// Removing an absent key is not an error.
    pub fn remove(&self, key: &[u8]) -> Result<()> {
        self.writer.lock().remove(key)
    }

    /// Start an empty batch
    pub fn create_batch(&self) -> Batch {
        Batch::new()
    }

    /// Apply a batch; readers see all of it or none of it
    pub fn write(&self, batch: &Batch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.writer.lock().write(batch)
    }

    /// fsync the active data file
    pub fn sync(&self) -> Result<()> {
        self.writer.lock().sync()
    }

    // =========================================================================
    // Snapshots & Compaction
    // =========================================================================

    /// Freeze the current state for reads with `get_at`
    pub fn create_snapshot(&self) -> Result<Snapshot> {
        Snapshot::capture(&self.keydir, &self.files)
    }

    /// Merge every sealed data file, dropping overwritten and removed data
    pub fn compact(&self) -> Result<CompactionStats> {
        self.compactor.run(&self.writer, &self.keydir, &self.files)
    }

    /// Close the engine gracefully
    ///
    /// Seals the active file (writing its hint file) and releases the
    /// directory lock.
    pub fn close(self) -> Result<()> {
        self.writer.lock().close()?;
        tracing::info!("Closed {}", self.config.data_dir.display());
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// What open found while loading the directory
    pub fn recovery_stats(&self) -> &RecoveryStats {
        &self.recovery
    }

    /// Number of live keys
    pub fn key_count(&self) -> usize {
        self.keydir.len()
    }

    /// Number of readable data files, the active one included
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Ids of the readable data files, ascending
    pub fn file_ids(&self) -> Vec<FileId> {
        self.files.ids()
    }

    /// Total size of the readable data files
    pub fn disk_size(&self) -> u64 {
        self.files.total_size()
    }

    /// Retired files still on disk because a snapshot holds them
    pub fn pending_retirements(&self) -> usize {
        self.files.pending_retirements()
    }

    /// Id of the file currently receiving writes
    pub fn active_file_id(&self) -> Option<FileId> {
        self.writer.lock().active_id()
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let mut writer = self.writer.lock();
        if writer.is_closed() {
            return;
        }
        if let Err(e) = writer.close() {
            tracing::warn!("Failed to close writer for {}: {}", self.config.data_dir.display(), e);
        }
    }
}
