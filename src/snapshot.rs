//! Snapshots
//!
//! A snapshot is a frozen copy of the KeyDir plus a reference to every data
//! file that copy points into. Holding the references keeps compaction from
//! deleting those files; closing the snapshot lets them go.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{CaskError, Result};
use crate::keydir::{KeyDir, KeyDirView};
use crate::log::{DataFile, FileId};
use crate::storage::FileRegistry;

/// Point-in-time read view of the store
///
/// Writes made after the snapshot was created are not visible through it.
/// Reads after `close()` fail with `SnapshotClosed`. Dropping an open
/// snapshot closes it.
pub struct Snapshot {
    view: KeyDirView,
    /// None once closed
    files: RwLock<Option<HashMap<FileId, Arc<DataFile>>>>,
}

impl Snapshot {
    /// Freeze the KeyDir and pin the files it references
    pub(crate) fn capture(keydir: &KeyDir, registry: &FileRegistry) -> Result<Self> {
        // The registry lock keeps every file in the view registered while
        // it is pinned
        let registered = registry.read();
        let view = keydir.snapshot_view();

        let mut files = HashMap::new();
        for entry in view.values() {
            if files.contains_key(&entry.file_id) {
                continue;
            }
            let file = registered
                .get(&entry.file_id)
                .ok_or(CaskError::MissingDataFile(entry.file_id))?;
            files.insert(entry.file_id, Arc::clone(file));
        }
        drop(registered);

        tracing::trace!(
            "Snapshot captured: {} keys across {} files",
            view.len(),
            files.len()
        );

        Ok(Self {
            view,
            files: RwLock::new(Some(files)),
        })
    }

    /// Value of `key` as of snapshot creation
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let files = self.files.read();
        let files = files.as_ref().ok_or(CaskError::SnapshotClosed)?;

        let entry = match self.view.get(key) {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let file = files
            .get(&entry.file_id)
            .ok_or(CaskError::MissingDataFile(entry.file_id))?;

        file.read_value(entry.value_position, entry.value_size)
            .map(Some)
    }

    /// Keys visible through the snapshot
    pub fn keys(&self) -> Result<Vec<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self.view.keys().cloned().collect())
    }

    /// Number of keys visible through the snapshot
    pub fn len(&self) -> usize {
        self.view.len()
    }

    pub fn is_empty(&self) -> bool {
        self.view.is_empty()
    }

    /// Ids of the data files this snapshot keeps alive, ascending
    pub fn file_ids(&self) -> Vec<FileId> {
        let mut ids: Vec<FileId> = self
            .files
            .read()
            .as_ref()
            .map(|files| files.keys().copied().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Release the pinned files; later reads fail
    ///
    /// Closing twice is a no-op.
    pub fn close(&self) {
        let released = self.files.write().take();
        if let Some(files) = released {
            tracing::trace!("Snapshot closed, releasing {} files", files.len());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.files.read().is_none()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(CaskError::SnapshotClosed);
        }
        Ok(())
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("keys", &self.view.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
