//! Tests for Writer
//!
//! These tests verify:
//! - Puts and removes reach both the log and the KeyDir
//! - Rotation at the configured file size
//! - Batches: all-or-nothing KeyDir updates
//! - Sealing on close

use std::sync::Arc;

use caskkv::batch::Batch;
use caskkv::config::{Config, SyncStrategy};
use caskkv::error::CaskError;
use caskkv::keydir::KeyDir;
use caskkv::log::{FileId, LogRecord};
use caskkv::storage::{FileRegistry, Writer};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

struct Fixture {
    _temp: TempDir,
    keydir: Arc<KeyDir>,
    files: Arc<FileRegistry>,
    writer: Writer,
}

fn setup_writer(max_file_size: u64) -> Fixture {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .max_file_size(max_file_size)
        .sync_strategy(SyncStrategy::EveryWrite)
        .build();
    let keydir = Arc::new(KeyDir::new());
    let files = Arc::new(FileRegistry::new());
    let writer = Writer::open(&config, FileId(0), Arc::clone(&keydir), Arc::clone(&files)).unwrap();
    Fixture {
        _temp: temp_dir,
        keydir,
        files,
        writer,
    }
}

impl Fixture {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let entry = self.keydir.lookup(key)?;
        let file = self.files.get(entry.file_id).unwrap();
        Some(file.read_value(entry.value_position, entry.value_size).unwrap())
    }
}

/// On-disk size of a put with a 2-byte key and 2-byte value
fn small_record_len() -> u64 {
    LogRecord::put(b"k0".to_vec(), b"v0".to_vec()).encoded_len()
}

// =============================================================================
// Basic Operation Tests
// =============================================================================

#[test]
fn test_put_updates_keydir() {
    let mut fx = setup_writer(1024 * 1024);

    fx.writer.put(b"key", b"value").unwrap();

    let entry = fx.keydir.lookup(b"key").unwrap();
    assert_eq!(entry.file_id, FileId(0));
    assert_eq!(entry.value_size, 5);
    assert_eq!(fx.get(b"key"), Some(b"value".to_vec()));
}

#[test]
fn test_remove_logs_tombstone() {
    let mut fx = setup_writer(1024 * 1024);
    fx.writer.put(b"key", b"value").unwrap();
    let before = fx.files.total_size();

    fx.writer.remove(b"key").unwrap();
    fx.writer.remove(b"never-existed").unwrap();

    assert_eq!(fx.keydir.lookup(b"key"), None);
    assert_eq!(
        fx.files.total_size(),
        before
            + LogRecord::tombstone(b"key".to_vec()).encoded_len()
            + LogRecord::tombstone(b"never-existed".to_vec()).encoded_len()
    );
}

// =============================================================================
// Rotation Tests
// =============================================================================

#[test]
fn test_rotation_at_size_limit() {
    let mut fx = setup_writer(small_record_len() * 2);

    fx.writer.put(b"k0", b"v0").unwrap();
    fx.writer.put(b"k1", b"v1").unwrap();
    assert_eq!(fx.writer.active_id(), Some(FileId(0)));

    fx.writer.put(b"k2", b"v2").unwrap();
    assert_eq!(fx.writer.active_id(), Some(FileId(1)));

    assert_eq!(fx.keydir.lookup(b"k1").unwrap().file_id, FileId(0));
    assert_eq!(fx.keydir.lookup(b"k2").unwrap().file_id, FileId(1));
    assert_eq!(fx.get(b"k0"), Some(b"v0".to_vec()));
    assert_eq!(fx.get(b"k2"), Some(b"v2".to_vec()));

    // The sealed file got its hint
    assert!(fx.files.get(FileId(0)).unwrap().hint_path().exists());
}

#[test]
fn test_oversized_record_gets_own_file() {
    let mut fx = setup_writer(16);

    fx.writer.put(b"a", &[1u8; 100]).unwrap();
    fx.writer.put(b"b", &[2u8; 100]).unwrap();

    assert_eq!(fx.keydir.lookup(b"a").unwrap().file_id, FileId(0));
    assert_eq!(fx.keydir.lookup(b"b").unwrap().file_id, FileId(1));
    assert_eq!(fx.get(b"b"), Some(vec![2u8; 100]));
}

#[test]
fn test_manual_rotate_skips_empty_file() {
    let mut fx = setup_writer(1024);

    let next = fx.writer.rotate().unwrap();

    assert_eq!(next, FileId(1));
    assert_eq!(fx.files.ids(), vec![FileId(1)]);
    assert!(fx.writer.active_is_empty());
}

// =============================================================================
// Batch Tests
// =============================================================================

#[test]
fn test_batch_applies_in_order() {
    let mut fx = setup_writer(1024 * 1024);
    fx.writer.put(b"old", b"1").unwrap();

    let mut batch = Batch::new();
    batch.put("a", "1").put("a", "2").remove("old").put("b", "3");
    fx.writer.write(&batch).unwrap();

    assert_eq!(fx.get(b"a"), Some(b"2".to_vec()));
    assert_eq!(fx.get(b"b"), Some(b"3".to_vec()));
    assert_eq!(fx.get(b"old"), None);
}

#[test]
fn test_batch_rotates_mid_batch() {
    let mut fx = setup_writer(small_record_len() * 2);

    let mut batch = Batch::new();
    for i in 0..5 {
        batch.put(format!("k{}", i), format!("v{}", i));
    }
    fx.writer.write(&batch).unwrap();

    assert_eq!(fx.files.len(), 3);
    for i in 0..5 {
        assert_eq!(
            fx.get(format!("k{}", i).as_bytes()),
            Some(format!("v{}", i).into_bytes())
        );
    }
}

#[test]
fn test_invalid_batch_writes_nothing() {
    let mut fx = setup_writer(1024 * 1024);
    fx.writer.put(b"keep", b"1").unwrap();
    let before = fx.files.total_size();

    let mut batch = Batch::new();
    batch
        .put("new", "value")
        .remove("keep")
        .put(vec![b'x'; u16::MAX as usize + 1], "too big");
    let result = fx.writer.write(&batch);

    assert!(matches!(result, Err(CaskError::RecordTooLarge { .. })));
    assert_eq!(fx.files.total_size(), before);
    assert_eq!(fx.get(b"keep"), Some(b"1".to_vec()));
    assert_eq!(fx.get(b"new"), None);
}

#[test]
fn test_sealed_active_file_rotates() {
    let mut fx = setup_writer(1024 * 1024);
    fx.writer.put(b"a", b"1").unwrap();

    // The active file stops taking appends, as after a failed rollback
    fx.files.get(FileId(0)).unwrap().close(false).unwrap();
    fx.writer.put(b"b", b"2").unwrap();

    assert_eq!(fx.writer.active_id(), Some(FileId(1)));
    assert_eq!(fx.keydir.lookup(b"b").unwrap().file_id, FileId(1));
    assert_eq!(fx.get(b"a"), Some(b"1".to_vec()));
    assert_eq!(fx.get(b"b"), Some(b"2".to_vec()));
}

// =============================================================================
// Close Tests
// =============================================================================

#[test]
fn test_close_seals_and_rejects_writes() {
    let mut fx = setup_writer(1024);
    fx.writer.put(b"k", b"v").unwrap();

    fx.writer.close().unwrap();

    assert!(fx.writer.is_closed());
    assert!(matches!(fx.writer.put(b"k", b"v2"), Err(CaskError::Closed)));
    assert!(fx.files.get(FileId(0)).unwrap().hint_path().exists());
    assert_eq!(fx.get(b"k"), Some(b"v".to_vec()));
}

#[test]
fn test_close_removes_unused_file() {
    let mut fx = setup_writer(1024);
    let path = FileId(0).data_path(fx.writer.dir());
    assert!(path.exists());

    fx.writer.close().unwrap();

    assert!(!path.exists());
    assert!(fx.files.is_empty());
}
