//! KeyDir Module
//!
//! In-memory index from key to the location of its most recent value.
//!
//! ## Responsibilities
//! - O(1) lookups for reads
//! - Last-writer-wins updates from the writer, recovery and compaction
//! - Cheap point-in-time views for snapshots
//!
//! ## Data Structure Choice
//! A `HashMap` behind `RwLock<Arc<..>>`:
//! - Readers clone the entry under a short read lock
//! - A view is an `Arc` clone; the first mutation after a view is taken
//!   copies the map (`Arc::make_mut`), later mutations are in place
//! - Entries are `Copy` and replaced whole, never edited in place

mod entry;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

pub use entry::KeyDirEntry;

/// Immutable point-in-time copy of the KeyDir
pub type KeyDirView = Arc<HashMap<Vec<u8>, KeyDirEntry>>;

/// A key moved by compaction from one location to another
#[derive(Debug, Clone)]
pub struct Migration {
    pub key: Vec<u8>,
    pub from: KeyDirEntry,
    pub to: KeyDirEntry,
}

/// The in-memory index
#[derive(Debug, Default)]
pub struct KeyDir {
    map: RwLock<KeyDirView>,
}

impl KeyDir {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current entry for `key`
    pub fn lookup(&self, key: &[u8]) -> Option<KeyDirEntry> {
        self.map.read().get(key).copied()
    }

    /// Point `key` at a new value
    pub fn put(&self, key: Vec<u8>, entry: KeyDirEntry) {
        let mut map = self.map.write();
        Arc::make_mut(&mut map).insert(key, entry);
    }

    /// Drop `key` from the index
    pub fn remove(&self, key: &[u8]) -> Option<KeyDirEntry> {
        let mut map = self.map.write();
        if !map.contains_key(key) {
            return None;
        }
        Arc::make_mut(&mut map).remove(key)
    }

    /// Apply a group of updates under one write lock
    ///
    /// `None` removes the key. Readers see either none or all of them.
    pub fn apply(&self, updates: Vec<(Vec<u8>, Option<KeyDirEntry>)>) {
        if updates.is_empty() {
            return;
        }
        let mut guard = self.map.write();
        let map = Arc::make_mut(&mut guard);
        for (key, entry) in updates {
            match entry {
                Some(entry) => {
                    map.insert(key, entry);
                }
                None => {
                    map.remove(&key);
                }
            }
        }
    }

    /// Replay one entry found while loading files
    ///
    /// Accepted only if no newer entry for the key is already recorded.
    /// A tombstone entry removes the key under the same rule. Returns
    /// whether the KeyDir changed.
    pub fn apply_recovered(&self, key: Vec<u8>, entry: KeyDirEntry) -> bool {
        let mut guard = self.map.write();

        if let Some(existing) = guard.get(&key) {
            if existing.is_newer_than(&entry) {
                return false;
            }
        } else if entry.tombstone {
            return false;
        }

        let map = Arc::make_mut(&mut guard);
        if entry.tombstone {
            map.remove(&key);
        } else {
            map.insert(key, entry);
        }
        true
    }

    /// Repoint migrated keys whose entry is still the one that was copied
    ///
    /// Keys overwritten or removed since the copy are left alone. Returns
    /// the number of keys repointed.
    pub fn repoint(&self, migrations: &[Migration]) -> usize {
        let mut guard = self.map.write();
        let map = Arc::make_mut(&mut guard);

        let mut repointed = 0;
        for migration in migrations {
            if let Some(current) = map.get_mut(&migration.key) {
                if current.same_location(&migration.from) {
                    *current = migration.to;
                    repointed += 1;
                }
            }
        }
        repointed
    }

    /// Immutable view of the current mapping
    pub fn snapshot_view(&self) -> KeyDirView {
        Arc::clone(&self.map.read())
    }

    /// All live keys, in no particular order
    pub fn live_keys(&self) -> Vec<Vec<u8>> {
        self.map.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}
