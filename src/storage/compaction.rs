//! Compaction
//!
//! Rewrites live values out of sealed data files into fresh ones and
//! retires the old files.
//!
//! ## Ordering
//! The writer is rotated first, under its lock, and a range of file ids is
//! reserved between the sealed files and the new active file. Output files
//! take their ids from that range, so on replay:
//! - output files sort after every file they replace
//! - anything written while compaction runs sorts after the outputs
//!
//! The KeyDir is only touched at the end, by one compare-and-swap repoint.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::error::{CaskError, Result};
use crate::keydir::{KeyDir, KeyDirEntry, KeyDirView, Migration};
use crate::log::{DataFile, FileId, LogRecord};

use super::{FileRegistry, Writer};

/// Outcome of one compaction run
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CompactionStats {
    /// Sealed files merged and retired
    pub files_compacted: u64,

    /// New data files written
    pub files_written: u64,

    /// Live values copied into the new files
    pub keys_copied: u64,

    /// Copied keys the KeyDir now points at
    pub keys_repointed: u64,

    /// Keys overwritten or removed while compaction ran
    pub keys_skipped: u64,

    /// Size of the merged files
    pub bytes_before: u64,

    /// Size of the new files
    pub bytes_after: u64,

    /// Merged files still held open by snapshots
    pub deferred_deletions: u64,
}

/// Merges sealed data files
///
/// ## Concurrency:
/// - `lock`: one compaction at a time; a second caller waits for the first
/// - The writer lock is held only while rotating; reads and writes carry on
///   during the copy
pub struct Compactor {
    dir: PathBuf,
    max_file_size: u64,
    lock: Mutex<()>,
}

impl Compactor {
    pub fn new(dir: impl Into<PathBuf>, max_file_size: u64) -> Self {
        Self {
            dir: dir.into(),
            max_file_size,
            lock: Mutex::new(()),
        }
    }

    /// Merge every sealed data file
    pub fn run(
        &self,
        writer: &Mutex<Writer>,
        keydir: &KeyDir,
        files: &FileRegistry,
    ) -> Result<CompactionStats> {
        let _running = self.lock.lock();
        let started = Instant::now();

        // Everything in the view lives in a sealed file once the writer has
        // rotated, and nothing the writer appends later is in the merge set
        let (view, merge, reserved) = {
            let mut writer = writer.lock();
            let view = keydir.snapshot_view();
            let reserve = self.reserve_for(&view);
            let first = writer.rotate_reserving(reserve)?;
            let merge = files.ids_below(first);
            (view, merge, first.as_u64()..first.as_u64() + reserve)
        };

        tracing::info!(
            "Compacting {} data files ({} live keys)",
            merge.len(),
            view.len()
        );

        let mut stats = CompactionStats {
            files_compacted: merge.len() as u64,
            bytes_before: merge
                .iter()
                .filter_map(|id| files.get(*id))
                .map(|f| f.size())
                .sum(),
            ..CompactionStats::default()
        };

        let mut output = OutputFiles::new(&self.dir, self.max_file_size, reserved);
        let migrations = match copy_live(&view, keydir, files, &mut output, &mut stats)
            .and_then(|migrations| output.seal(files).map(|_| migrations))
        {
            Ok(migrations) => migrations,
            Err(e) => {
                output.abandon(files);
                tracing::warn!("Compaction failed: {}", e);
                return Err(e);
            }
        };

        stats.files_written = output.written.len() as u64;
        stats.bytes_after = output.written.iter().map(|f| f.size()).sum();

        stats.keys_repointed = keydir.repoint(&migrations) as u64;
        stats.keys_skipped += stats.keys_copied - stats.keys_repointed;

        files.retire(&merge);
        stats.deferred_deletions = files.pending_retirements() as u64;

        tracing::info!(
            "Compaction finished in {:?}: {} -> {} files, {} -> {} bytes, {} keys moved, {} skipped",
            started.elapsed(),
            stats.files_compacted,
            stats.files_written,
            stats.bytes_before,
            stats.bytes_after,
            stats.keys_repointed,
            stats.keys_skipped
        );
        Ok(stats)
    }

    /// Number of file ids to set aside for output files
    ///
    /// A file is sealed only when the next record does not fit, so any two
    /// neighbouring output files together hold more than `max_file_size`
    /// bytes. That bounds the file count by `2 * ceil(bytes / max) + 1`,
    /// and every file holds at least one record.
    fn reserve_for(&self, view: &KeyDirView) -> u64 {
        let live_bytes: u64 = view
            .iter()
            .map(|(key, entry)| entry.record_len(key.len()))
            .sum();
        let by_size = 2 * live_bytes.div_ceil(self.max_file_size) + 1;
        by_size.min(view.len() as u64).max(1)
    }
}

/// Copy every entry of `view` that is still live, in log order
fn copy_live(
    view: &KeyDirView,
    keydir: &KeyDir,
    files: &FileRegistry,
    output: &mut OutputFiles,
    stats: &mut CompactionStats,
) -> Result<Vec<Migration>> {
    let mut by_file: BTreeMap<FileId, Vec<(&Vec<u8>, &KeyDirEntry)>> = BTreeMap::new();
    for (key, entry) in view.iter() {
        by_file.entry(entry.file_id).or_default().push((key, entry));
    }

    let mut migrations = Vec::with_capacity(view.len());
    for (file_id, mut entries) in by_file {
        let source = files
            .get(file_id)
            .ok_or(CaskError::MissingDataFile(file_id))?;
        entries.sort_by_key(|(_, entry)| entry.value_position);

        for (key, entry) in entries {
            let still_live = keydir
                .lookup(key)
                .is_some_and(|current| current.same_location(entry));
            if !still_live {
                stats.keys_skipped += 1;
                continue;
            }

            let value = source.read_value(entry.value_position, entry.value_size)?;
            let record = LogRecord::put(key.clone(), value).with_timestamp(entry.timestamp);
            let to = output.append(&record)?;

            migrations.push(Migration {
                key: record.key,
                from: *entry,
                to,
            });
            stats.keys_copied += 1;
        }
    }
    Ok(migrations)
}

/// Output files of one run, numbered from the reserved id range
struct OutputFiles {
    dir: PathBuf,
    max_file_size: u64,
    ids: std::ops::Range<u64>,
    current: Option<Arc<DataFile>>,
    written: Vec<Arc<DataFile>>,
}

impl OutputFiles {
    fn new(dir: &Path, max_file_size: u64, ids: std::ops::Range<u64>) -> Self {
        Self {
            dir: dir.to_path_buf(),
            max_file_size,
            ids,
            current: None,
            written: Vec::new(),
        }
    }

    fn append(&mut self, record: &LogRecord) -> Result<KeyDirEntry> {
        let full = self.current.as_ref().is_some_and(|file| {
            !file.is_empty() && file.size() + record.encoded_len() > self.max_file_size
        });
        if full {
            if let Some(file) = self.current.take() {
                file.close(true)?;
            }
        }

        let file = match &self.current {
            Some(file) => Arc::clone(file),
            None => self.open_next()?,
        };
        let value_position = file.append(record)?;

        Ok(KeyDirEntry {
            file_id: file.id(),
            value_size: record.value_len() as u32,
            value_position,
            timestamp: record.timestamp,
            tombstone: false,
        })
    }

    fn open_next(&mut self) -> Result<Arc<DataFile>> {
        let id = self
            .ids
            .next()
            .ok_or_else(|| CaskError::Storage("compaction ran out of reserved file ids".into()))?;

        let file = Arc::new(DataFile::create(&self.dir, FileId(id))?);
        self.written.push(Arc::clone(&file));
        self.current = Some(Arc::clone(&file));
        Ok(file)
    }

    /// Seal the last file and register every output
    ///
    /// Runs before the repoint, so no KeyDir entry points at an output
    /// file the registry does not know.
    fn seal(&mut self, files: &FileRegistry) -> Result<()> {
        if let Some(file) = self.current.take() {
            file.close(true)?;
        }
        for file in &self.written {
            files.insert(Arc::clone(file));
        }
        Ok(())
    }

    /// Drop everything written so far
    fn abandon(&mut self, files: &FileRegistry) {
        self.current = None;
        for file in self.written.drain(..) {
            files.remove(file.id());
            file.mark_retired();
        }
    }
}
