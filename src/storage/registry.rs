//! File Registry
//!
//! Tracks every data file readable by the engine.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock, RwLockReadGuard};

use crate::log::{DataFile, FileId};

/// Open data files, keyed by id
///
/// ## Concurrency:
/// - `files`: RwLock; reads resolve a KeyDir entry to its file while
///   holding the read lock, so a file cannot be retired between the
///   lookup and taking a reference to it
/// - `retired`: weak handles to files removed from the registry but still
///   held elsewhere (snapshots, in-flight reads)
#[derive(Default)]
pub struct FileRegistry {
    files: RwLock<BTreeMap<FileId, Arc<DataFile>>>,
    retired: Mutex<Vec<Weak<DataFile>>>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, file: Arc<DataFile>) {
        self.files.write().insert(file.id(), file);
    }

    pub fn get(&self, id: FileId) -> Option<Arc<DataFile>> {
        self.files.read().get(&id).cloned()
    }

    /// Drop a file from the registry without retiring it
    pub fn remove(&self, id: FileId) -> Option<Arc<DataFile>> {
        self.files.write().remove(&id)
    }

    /// Hold the registry read lock
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, BTreeMap<FileId, Arc<DataFile>>> {
        self.files.read()
    }

    /// Registered ids in ascending order
    pub fn ids(&self) -> Vec<FileId> {
        self.files.read().keys().copied().collect()
    }

    /// Registered ids strictly below `bound`, ascending
    pub fn ids_below(&self, bound: FileId) -> Vec<FileId> {
        self.files.read().range(..bound).map(|(id, _)| *id).collect()
    }

    pub fn max_id(&self) -> Option<FileId> {
        self.files.read().keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }

    /// Sum of registered file sizes
    pub fn total_size(&self) -> u64 {
        self.files.read().values().map(|f| f.size()).sum()
    }

    /// Remove `ids` from the registry and schedule them for deletion
    ///
    /// Each file is deleted once its last holder lets go of it; with no
    /// outstanding snapshot or read that is immediately.
    pub fn retire(&self, ids: &[FileId]) -> usize {
        let removed: Vec<Arc<DataFile>> = {
            let mut files = self.files.write();
            ids.iter().filter_map(|id| files.remove(id)).collect()
        };

        let mut retired = self.retired.lock();
        for file in &removed {
            file.mark_retired();
            retired.push(Arc::downgrade(file));
        }
        drop(retired);

        let count = removed.len();
        drop(removed);

        let deferred = self.pending_retirements();
        if deferred > 0 {
            tracing::debug!("{} retired data files held by open snapshots", deferred);
        }
        count
    }

    /// Retired files not yet deleted because something still holds them
    pub fn pending_retirements(&self) -> usize {
        let mut retired = self.retired.lock();
        retired.retain(|weak| weak.strong_count() > 0);
        retired.len()
    }
}
