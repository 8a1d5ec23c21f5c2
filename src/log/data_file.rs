//! Data File
//!
//! One `{id}.data` append-only file plus its `{id}.hint` companion.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::{CaskError, Result};

use super::{FileId, HintRecord, LogRecord, TMP_EXTENSION};

/// Write side of a data file that has not been sealed yet
struct ActiveState {
    file: File,
    /// One hint per appended record, written out when the file is sealed
    hints: Vec<HintRecord>,
}

/// A single data file
///
/// ## Concurrency:
/// - Appends go through `active` (only the owning writer appends)
/// - Reads are positional on a separate `reader` handle, so they neither
///   wait on an in-progress append nor on each other
/// - A retired file deletes itself from disk when the last `Arc` holding
///   it is dropped
pub struct DataFile {
    id: FileId,
    path: PathBuf,
    hint_path: PathBuf,
    reader: File,
    active: Mutex<Option<ActiveState>>,
    size: AtomicU64,
    retired: AtomicBool,
    /// Renamed paths this file removes when dropped after retirement
    retired_paths: Mutex<Vec<PathBuf>>,
}

impl DataFile {
    /// Create a new, empty data file open for appends
    pub fn create(dir: &Path, id: FileId) -> Result<Self> {
        let path = id.data_path(dir);
        let file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)?;
        let reader = File::open(&path)?;

        tracing::debug!("Created data file {}", path.display());

        Ok(Self {
            id,
            hint_path: id.hint_path(dir),
            path,
            reader,
            active: Mutex::new(Some(ActiveState {
                file,
                hints: Vec::new(),
            })),
            size: AtomicU64::new(0),
            retired: AtomicBool::new(false),
            retired_paths: Mutex::new(Vec::new()),
        })
    }

    /// Open an existing data file read-only
    pub fn open(dir: &Path, id: FileId) -> Result<Self> {
        let path = id.data_path(dir);
        let reader = File::open(&path)?;
        let size = reader.metadata()?.len();

        Ok(Self {
            id,
            hint_path: id.hint_path(dir),
            path,
            reader,
            active: Mutex::new(None),
            size: AtomicU64::new(size),
            retired: AtomicBool::new(false),
            retired_paths: Mutex::new(Vec::new()),
        })
    }

    /// Append `record`, returning the absolute offset of its value
    pub fn append(&self, record: &LogRecord) -> Result<u64> {
        let bytes = record.encode()?;

        let mut guard = self.active.lock();
        let state = guard
            .as_mut()
            .ok_or_else(|| CaskError::Storage(format!("data file {} is sealed", self.id)))?;

        let position = self.size.load(Ordering::Acquire);
        if let Err(e) = state.file.write_all(&bytes) {
            // A torn record would end any later scan of this file, hiding
            // the records appended after it
            if let Err(rollback) = discard_tail(&mut state.file, position) {
                tracing::warn!(
                    "Failed to truncate data file {} after a failed append ({}); sealing it",
                    self.path.display(),
                    rollback
                );
                *guard = None;
            }
            return Err(e.into());
        }
        self.size
            .store(position + bytes.len() as u64, Ordering::Release);

        state.hints.push(HintRecord::for_record(record, position));

        Ok(position + record.value_offset())
    }

    /// Read `len` value bytes starting at `position`
    pub fn read_value(&self, position: u64, len: u32) -> Result<Vec<u8>> {
        let mut value = vec![0u8; len as usize];
        read_exact_at(&self.reader, &mut value, position)?;
        Ok(value)
    }

    /// fsync appended records
    pub fn sync(&self) -> Result<()> {
        if let Some(state) = self.active.lock().as_mut() {
            state.file.flush()?;
            state.file.sync_all()?;
        }
        Ok(())
    }

    /// Seal the file: no further appends
    ///
    /// A file that never received a record is deleted instead. Otherwise the
    /// file is fsynced and, if `write_hint` is set, its hint file is written.
    /// Returns `false` if the file was deleted.
    pub fn close(&self, write_hint: bool) -> Result<bool> {
        let state = match self.active.lock().take() {
            Some(state) => state,
            None => return Ok(!self.is_empty()),
        };

        if self.is_empty() {
            drop(state);
            remove_if_exists(&self.path)?;
            tracing::debug!("Removed empty data file {}", self.path.display());
            return Ok(false);
        }

        state.file.sync_all()?;
        if write_hint {
            write_hint_file(&self.hint_path, &state.hints)?;
        }

        tracing::debug!(
            "Sealed data file {} ({} bytes, {} records)",
            self.path.display(),
            self.size(),
            state.hints.len()
        );
        Ok(true)
    }

    /// Schedule deletion for when the last holder drops this file
    ///
    /// The data and hint files are renamed to their `.tmp` names right away,
    /// so a crash before the deletion cannot bring them back at next open.
    /// Open handles keep reading from the renamed file. Only the renamed
    /// paths are removed on drop: the original names may belong to a newer
    /// file by then.
    pub fn mark_retired(&self) {
        if self.retired.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut renamed = self.retired_paths.lock();
        for path in [&self.path, &self.hint_path] {
            let tmp = tmp_path(path);
            match fs::rename(path, &tmp) {
                Ok(()) => renamed.push(tmp),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    // Unlinking now still leaves open handles readable on unix
                    tracing::warn!("Failed to rename retired file {}: {}", path.display(), e);
                    if let Err(e) = remove_if_exists(path) {
                        tracing::warn!("Failed to delete retired file {}: {}", path.display(), e);
                    }
                }
            }
        }
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    pub fn id(&self) -> FileId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn hint_path(&self) -> &Path {
        &self.hint_path
    }

    /// Current size in bytes
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Whether the file still accepts appends
    pub fn is_writable(&self) -> bool {
        self.active.lock().is_some()
    }
}

impl Drop for DataFile {
    fn drop(&mut self) {
        if !self.is_retired() {
            return;
        }
        for path in self.retired_paths.get_mut().drain(..) {
            if let Err(e) = remove_if_exists(&path) {
                tracing::warn!("Failed to delete retired file {}: {}", path.display(), e);
            }
        }
        tracing::debug!("Deleted retired data file {}", self.id);
    }
}

/// Write `hints` to `path` via a temporary file and rename
fn write_hint_file(path: &Path, hints: &[HintRecord]) -> Result<()> {
    let tmp = tmp_path(path);

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)?;
    let mut writer = BufWriter::new(file);
    for hint in hints {
        writer.write_all(&hint.encode()?)?;
    }
    writer.flush()?;

    let file = writer
        .into_inner()
        .map_err(|e| CaskError::Io(e.into_error()))?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)?;
    Ok(())
}

/// `path` with `.tmp` appended; removed by recovery if left behind
fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(TMP_EXTENSION);
    PathBuf::from(name)
}

/// Cut a failed append back off the end of the file
fn discard_tail(file: &mut File, position: u64) -> io::Result<()> {
    file.set_len(position)?;
    file.seek(SeekFrom::Start(position))?;
    Ok(())
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ))
            }
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
