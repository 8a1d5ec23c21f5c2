//! Tests for compaction through the Engine
//!
//! These tests verify:
//! - Live data is preserved and space reclaimed
//! - Removed keys stay removed, including after reopen
//! - Writes made during compaction win over migrated copies
//! - Output files carry hint files

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use caskkv::config::Config;
use caskkv::engine::Engine;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn small_file_config(path: &Path) -> Config {
    Config::builder()
        .data_dir(path)
        .max_file_size(1024)
        .build()
}

fn setup_temp_engine() -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(small_file_config(temp_dir.path())).unwrap();
    (temp_dir, engine)
}

fn contents(engine: &Engine) -> BTreeMap<Vec<u8>, Vec<u8>> {
    engine
        .list_keys()
        .into_iter()
        .map(|k| {
            let v = engine.get(&k).unwrap().unwrap();
            (k, v)
        })
        .collect()
}

fn fill_with_overwrites(engine: &Engine, keys: usize, rounds: usize) {
    for round in 0..rounds {
        for i in 0..keys {
            let key = format!("key{:03}", i);
            let value = format!("value-{:03}-round-{}", i, round);
            engine.put(key.as_bytes(), value.as_bytes()).unwrap();
        }
    }
}

// =============================================================================
// Basic Compaction Tests
// =============================================================================

#[test]
fn test_compact_empty_store() {
    let (_temp, engine) = setup_temp_engine();

    let stats = engine.compact().unwrap();

    assert_eq!(stats.keys_copied, 0);
    assert_eq!(stats.files_written, 0);
    assert_eq!(engine.key_count(), 0);
}

#[test]
fn test_compact_preserves_live_data() {
    let (_temp, engine) = setup_temp_engine();
    fill_with_overwrites(&engine, 50, 3);
    let before = contents(&engine);
    let size_before = engine.disk_size();

    let stats = engine.compact().unwrap();

    assert_eq!(contents(&engine), before);
    assert!(engine.disk_size() <= size_before);
    assert!(engine.disk_size() < size_before / 2);
    assert_eq!(stats.keys_copied, 50);
    assert_eq!(stats.keys_repointed, 50);
    assert_eq!(stats.keys_skipped, 0);
    assert!(stats.files_compacted > stats.files_written);
    assert_eq!(engine.pending_retirements(), 0);
}

#[test]
fn test_compact_drops_removed_keys() {
    let (_temp, engine) = setup_temp_engine();
    fill_with_overwrites(&engine, 20, 1);
    for i in 0..10 {
        engine.remove(format!("key{:03}", i).as_bytes()).unwrap();
    }

    let stats = engine.compact().unwrap();

    assert_eq!(stats.keys_copied, 10);
    assert_eq!(engine.key_count(), 10);
    assert_eq!(engine.get(b"key000").unwrap(), None);
    assert!(engine.get(b"key015").unwrap().is_some());
}

#[test]
fn test_compact_twice() {
    let (_temp, engine) = setup_temp_engine();
    fill_with_overwrites(&engine, 30, 2);
    let before = contents(&engine);

    engine.compact().unwrap();
    engine.put(b"key005", b"changed").unwrap();
    engine.compact().unwrap();

    let mut expected = before;
    expected.insert(b"key005".to_vec(), b"changed".to_vec());
    assert_eq!(contents(&engine), expected);
}

#[test]
fn test_compact_writes_hint_files() {
    let (temp, engine) = setup_temp_engine();
    fill_with_overwrites(&engine, 40, 2);

    engine.compact().unwrap();

    let active = engine.active_file_id().unwrap();
    for id in engine.file_ids() {
        if id == active {
            continue;
        }
        assert!(id.hint_path(temp.path()).exists(), "file {} has no hint", id);
    }
}

#[test]
fn test_compact_keeps_timestamps_and_empty_values() {
    let (_temp, engine) = setup_temp_engine();
    engine.put(b"empty", b"").unwrap();
    engine.put(b"full", b"data").unwrap();

    engine.compact().unwrap();

    assert_eq!(engine.get(b"empty").unwrap(), Some(Vec::new()));
    assert_eq!(engine.get(b"full").unwrap(), Some(b"data".to_vec()));
}

// =============================================================================
// Reopen Tests
// =============================================================================

#[test]
fn test_compact_then_reopen() {
    let temp_dir = TempDir::new().unwrap();

    let expected = {
        let engine = Engine::open(small_file_config(temp_dir.path())).unwrap();
        fill_with_overwrites(&engine, 40, 3);
        for i in 0..5 {
            engine.remove(format!("key{:03}", i).as_bytes()).unwrap();
        }
        engine.compact().unwrap();
        engine.put(b"key010", b"after compaction").unwrap();
        engine.remove(b"key011").unwrap();
        let expected = contents(&engine);
        engine.close().unwrap();
        expected
    };

    let engine = Engine::open(small_file_config(temp_dir.path())).unwrap();
    assert_eq!(contents(&engine), expected);
    assert_eq!(engine.get(b"key000").unwrap(), None);
    assert_eq!(engine.get(b"key011").unwrap(), None);
}

#[test]
fn test_reopen_with_snapshot_open_during_compaction() {
    let temp_dir = TempDir::new().unwrap();

    {
        let engine = Engine::open(small_file_config(temp_dir.path())).unwrap();
        engine.put(b"a", b"1").unwrap();
        engine.remove(b"a").unwrap();
        engine.put(b"b", b"2").unwrap();

        // The retired file stays on disk while the snapshot lives, but
        // under a name recovery ignores
        let snapshot = engine.create_snapshot().unwrap();
        engine.compact().unwrap();
        std::mem::forget(snapshot);
        engine.close().unwrap();
    }

    let engine = Engine::open(small_file_config(temp_dir.path())).unwrap();
    assert_eq!(engine.get(b"a").unwrap(), None);
    assert_eq!(engine.get(b"b").unwrap(), Some(b"2".to_vec()));
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_writes_during_compaction() {
    let (temp, engine) = setup_temp_engine();
    let engine = Arc::new(engine);
    fill_with_overwrites(&engine, 100, 2);

    let writer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for i in 0..100 {
                let key = format!("key{:03}", i);
                if i % 10 == 0 {
                    engine.remove(key.as_bytes()).unwrap();
                } else {
                    engine.put(key.as_bytes(), b"concurrent").unwrap();
                }
            }
        })
    };
    let compactor = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.compact().unwrap())
    };

    writer.join().unwrap();
    compactor.join().unwrap();

    let check = |engine: &Engine| {
        for i in 0..100 {
            let key = format!("key{:03}", i);
            let value = engine.get(key.as_bytes()).unwrap();
            if i % 10 == 0 {
                assert_eq!(value, None, "{} should be removed", key);
            } else {
                assert_eq!(value, Some(b"concurrent".to_vec()), "{}", key);
            }
        }
    };
    check(&engine);

    let engine = Arc::try_unwrap(engine).ok().unwrap();
    engine.close().unwrap();
    let engine = Engine::open(small_file_config(temp.path())).unwrap();
    check(&engine);
}

#[test]
fn test_reads_during_compaction() {
    let (_temp, engine) = setup_temp_engine();
    let engine = Arc::new(engine);
    fill_with_overwrites(&engine, 100, 3);
    let expected = contents(&engine);

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let expected = expected.clone();
            thread::spawn(move || {
                for _ in 0..5 {
                    for (key, value) in &expected {
                        assert_eq!(engine.get(key).unwrap().as_ref(), Some(value));
                    }
                }
            })
        })
        .collect();

    engine.compact().unwrap();

    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(contents(&engine), expected);
}

#[test]
fn test_concurrent_compactions_serialize() {
    let (_temp, engine) = setup_temp_engine();
    let engine = Arc::new(engine);
    fill_with_overwrites(&engine, 50, 2);
    let expected = contents(&engine);

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || engine.compact().unwrap())
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(contents(&engine), expected);
}
