//! Recovery
//!
//! Rebuilds the KeyDir from the data directory at open.
//!
//! Files replay in ascending id order. A data file with a hint file is
//! loaded from the hint (no value reads); a data file without one, or
//! whose hint is corrupt or truncated, is scanned record by record. A
//! truncated or corrupt record ends the scan of its file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{CaskError, Result};
use crate::keydir::KeyDir;
use crate::log::{
    DataFile, DataFileIterator, FileId, HintEntry, HintParser, DATA_EXTENSION, HINT_EXTENSION,
    TMP_EXTENSION,
};

use super::FileRegistry;

/// Result of loading a data directory
#[derive(Debug, Default, Clone)]
pub struct RecoveryStats {
    /// Data files registered for reads
    pub files_loaded: u64,

    /// Files loaded from their hint file
    pub hint_files_used: u64,

    /// Files loaded by scanning their records
    pub data_files_scanned: u64,

    /// Zero-length data/hint files deleted
    pub empty_files_removed: u64,

    /// Hint files rejected in favour of a data scan
    pub corrupt_hint_files: u64,

    /// Data files whose scan stopped at a torn or corrupt record
    pub truncated_files: u64,

    /// Live keys after replay
    pub keys_loaded: u64,

    /// Highest file id seen, including removed empty files and leftover
    /// temporary files, so new files never reuse an id
    pub max_file_id: Option<FileId>,
}

#[derive(Debug, Default)]
struct DiscoveredFile {
    data: Option<PathBuf>,
    hint: Option<PathBuf>,
}

/// Loads every data file in a directory into a KeyDir
pub struct Loader<'a> {
    dir: &'a Path,
    chunk_size: usize,
}

impl<'a> Loader<'a> {
    pub fn new(dir: &'a Path, chunk_size: usize) -> Self {
        Self { dir, chunk_size }
    }

    /// Replay the directory into `keydir`, registering each data file
    pub fn load(&self, keydir: &KeyDir, files: &FileRegistry) -> Result<RecoveryStats> {
        let (discovered, max_tmp_id) = self.discover()?;
        let mut stats = RecoveryStats {
            max_file_id: max_tmp_id,
            ..RecoveryStats::default()
        };

        for (id, found) in discovered {
            stats.max_file_id = Some(stats.max_file_id.map_or(id, |max| max.max(id)));

            let data_path = match found.data {
                Some(path) => path,
                None => {
                    // Hint without its data file
                    if let Some(hint) = found.hint {
                        tracing::warn!("Removing orphan hint file {}", hint.display());
                        fs::remove_file(&hint)?;
                    }
                    continue;
                }
            };

            if fs::metadata(&data_path)?.len() == 0 {
                tracing::debug!("Removing empty data file {}", data_path.display());
                fs::remove_file(&data_path)?;
                stats.empty_files_removed += 1;
                if let Some(hint) = found.hint {
                    fs::remove_file(&hint)?;
                    stats.empty_files_removed += 1;
                }
                continue;
            }

            let hint = match found.hint {
                Some(hint) if fs::metadata(&hint)?.len() == 0 => {
                    tracing::debug!("Removing empty hint file {}", hint.display());
                    fs::remove_file(&hint)?;
                    stats.empty_files_removed += 1;
                    None
                }
                other => other,
            };

            self.load_file(id, &data_path, hint.as_deref(), keydir, &mut stats)?;
            files.insert(Arc::new(DataFile::open(self.dir, id)?));
            stats.files_loaded += 1;
        }

        stats.keys_loaded = keydir.len() as u64;
        Ok(stats)
    }

    /// Group data and hint files by id; delete leftover temporary files
    ///
    /// Also returns the highest id among the deleted temporary files. A
    /// retired file may still be open in a snapshot that outlived its
    /// engine, and that file removes its `.tmp` paths when dropped.
    fn discover(&self) -> Result<(BTreeMap<FileId, DiscoveredFile>, Option<FileId>)> {
        let mut found: BTreeMap<FileId, DiscoveredFile> = BTreeMap::new();
        let mut max_tmp_id: Option<FileId> = None;

        for entry in fs::read_dir(self.dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }

            if path.extension().and_then(|e| e.to_str()) == Some(TMP_EXTENSION) {
                let stem = path.file_stem().map(Path::new);
                if let Some((id, _)) = stem.and_then(FileId::parse_filename) {
                    max_tmp_id = Some(max_tmp_id.map_or(id, |max| max.max(id)));
                }
                tracing::debug!("Removing leftover temporary file {}", path.display());
                fs::remove_file(&path)?;
                continue;
            }

            let (id, extension) = match FileId::parse_filename(&path) {
                Some(parsed) => parsed,
                None => continue,
            };
            let slot = found.entry(id).or_default();
            match extension {
                DATA_EXTENSION => slot.data = Some(path.clone()),
                HINT_EXTENSION => slot.hint = Some(path.clone()),
                _ => {}
            }
        }

        Ok((found, max_tmp_id))
    }

    fn load_file(
        &self,
        id: FileId,
        data_path: &Path,
        hint_path: Option<&Path>,
        keydir: &KeyDir,
        stats: &mut RecoveryStats,
    ) -> Result<()> {
        if let Some(hint_path) = hint_path {
            match HintParser::parse_file(id, hint_path, self.chunk_size) {
                Ok(entries) => {
                    tracing::trace!("Loaded {} hints for data file {}", entries.len(), id);
                    apply_all(keydir, entries);
                    stats.hint_files_used += 1;
                    return Ok(());
                }
                Err(e @ CaskError::CorruptHintFile { .. }) => {
                    tracing::warn!("{}; scanning data file instead", e);
                    stats.corrupt_hint_files += 1;
                }
                Err(e) => return Err(e),
            }
        }

        let mut iter = DataFileIterator::open(data_path, self.chunk_size)?;
        for scanned in iter.by_ref() {
            match scanned {
                Ok(scanned) => {
                    let HintEntry { key, entry } = scanned.to_entry(id);
                    keydir.apply_recovered(key, entry);
                }
                Err(CaskError::CorruptRecord(reason)) => {
                    tracing::warn!(
                        "Data file {} ends in a torn or corrupt record ({}); ignoring the tail",
                        id,
                        reason
                    );
                    stats.truncated_files += 1;
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        tracing::trace!("Scanned data file {} up to offset {}", id, iter.position());
        stats.data_files_scanned += 1;
        Ok(())
    }
}

fn apply_all(keydir: &KeyDir, entries: Vec<HintEntry>) {
    for HintEntry { key, entry } in entries {
        keydir.apply_recovered(key, entry);
    }
}
