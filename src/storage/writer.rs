//! Writer
//!
//! Owns the active data file and applies puts, removes and batches.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::batch::Batch;
use crate::config::{Config, SyncStrategy};
use crate::error::{CaskError, Result};
use crate::keydir::{KeyDir, KeyDirEntry};
use crate::log::{DataFile, FileId, LogRecord};

use super::FileRegistry;

/// Appends records to the active data file
///
/// Callers serialize access (the engine keeps the writer behind a mutex),
/// which gives every append a single total order: file offsets and
/// last-writer-wins in the KeyDir both follow it.
pub struct Writer {
    dir: PathBuf,
    max_file_size: u64,
    sync_strategy: SyncStrategy,
    write_hint_files: bool,

    /// None once the writer is closed
    active: Option<Arc<DataFile>>,
    next_id: FileId,
    unsynced: usize,

    keydir: Arc<KeyDir>,
    files: Arc<FileRegistry>,
}

impl Writer {
    /// Start writing to a fresh data file with id `first_id`
    pub fn open(
        config: &Config,
        first_id: FileId,
        keydir: Arc<KeyDir>,
        files: Arc<FileRegistry>,
    ) -> Result<Self> {
        let mut writer = Self {
            dir: config.data_dir.clone(),
            max_file_size: config.max_file_size,
            sync_strategy: config.sync_strategy,
            write_hint_files: config.write_hint_files,
            active: None,
            next_id: first_id,
            unsynced: 0,
            keydir,
            files,
        };
        writer.rotate_to(first_id)?;
        Ok(writer)
    }

    /// Put a key-value pair
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let record = LogRecord::put(key, value);
        let entry = self.append(&record)?;
        self.keydir.put(record.key, entry);
        Ok(())
    }

    /// Remove a key
    ///
    /// The tombstone is logged even if the key is absent, so replay after a
    /// crash sees the removal regardless of what older files contain.
    pub fn remove(&mut self, key: &[u8]) -> Result<()> {
        let record = LogRecord::tombstone(key);
        self.append(&record)?;
        self.keydir.remove(key);
        Ok(())
    }

    /// Apply every operation of `batch` in order
    ///
    /// All records are size-checked before anything is written. If an
    /// append fails part way, the log keeps the records already appended
    /// but the KeyDir is left untouched for the whole batch.
    pub fn write(&mut self, batch: &Batch) -> Result<()> {
        let records: Vec<LogRecord> = batch.ops().iter().map(|op| op.to_record()).collect();
        for record in &records {
            record.validate()?;
        }

        let mut updates = Vec::with_capacity(records.len());
        for record in records {
            let entry = self.append(&record)?;
            let update = if record.is_tombstone() { None } else { Some(entry) };
            updates.push((record.key, update));
        }

        self.keydir.apply(updates);
        Ok(())
    }

    /// Append one record, rotating first if it would overflow the file
    fn append(&mut self, record: &LogRecord) -> Result<KeyDirEntry> {
        record.validate()?;

        // A file sealed after a failed append takes no more records
        let needs_rotation = {
            let active = self.active()?;
            !active.is_writable()
                || (!active.is_empty()
                    && active.size() + record.encoded_len() > self.max_file_size)
        };
        if needs_rotation {
            self.rotate()?;
        }

        let active = Arc::clone(self.active()?);
        let value_position = active.append(record)?;
        self.after_append(&active)?;

        Ok(KeyDirEntry {
            file_id: active.id(),
            value_size: record.value_len() as u32,
            value_position,
            timestamp: record.timestamp,
            tombstone: record.is_tombstone(),
        })
    }

    fn after_append(&mut self, active: &DataFile) -> Result<()> {
        match self.sync_strategy {
            SyncStrategy::EveryWrite => active.sync(),
            SyncStrategy::EveryNEntries { count } => {
                self.unsynced += 1;
                if self.unsynced >= count {
                    self.unsynced = 0;
                    active.sync()?;
                }
                Ok(())
            }
        }
    }

    /// Seal the active file and continue in the next one
    pub fn rotate(&mut self) -> Result<FileId> {
        let id = self.next_id;
        self.rotate_to(id)?;
        Ok(id)
    }

    /// Seal the active file and skip `reserve` ids before the next one
    ///
    /// Returns the first reserved id. Reserved ids sort below every file the
    /// writer creates afterwards.
    pub(crate) fn rotate_reserving(&mut self, reserve: u64) -> Result<FileId> {
        let first_reserved = self.next_id;
        self.rotate_to(FileId(first_reserved.as_u64() + reserve))?;
        Ok(first_reserved)
    }

    fn rotate_to(&mut self, id: FileId) -> Result<()> {
        self.seal_active()?;

        let file = Arc::new(DataFile::create(&self.dir, id)?);
        self.files.insert(Arc::clone(&file));
        self.active = Some(file);
        self.next_id = id.next();
        self.unsynced = 0;

        tracing::debug!("Active data file is now {}", id);
        Ok(())
    }

    fn seal_active(&mut self) -> Result<()> {
        if let Some(active) = self.active.take() {
            if !active.close(self.write_hint_files)? {
                self.files.remove(active.id());
            }
        }
        Ok(())
    }

    /// fsync the active file
    pub fn sync(&mut self) -> Result<()> {
        self.unsynced = 0;
        self.active()?.sync()
    }

    /// Seal the active file; later writes fail
    pub fn close(&mut self) -> Result<()> {
        self.seal_active()
    }

    pub fn is_closed(&self) -> bool {
        self.active.is_none()
    }

    pub fn active_id(&self) -> Option<FileId> {
        self.active.as_ref().map(|f| f.id())
    }

    /// Whether the active file has received any record
    pub fn active_is_empty(&self) -> bool {
        self.active.as_ref().map_or(true, |f| f.is_empty())
    }

    pub fn next_id(&self) -> FileId {
        self.next_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn active(&self) -> Result<&Arc<DataFile>> {
        self.active.as_ref().ok_or(CaskError::Closed)
    }
}
