//! Tests for Snapshots
//!
//! These tests verify:
//! - Isolation from later puts and removes
//! - Reads after close fail
//! - Snapshots keep retired files alive

use caskkv::engine::Engine;
use caskkv::error::CaskError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_engine() -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open_path(temp_dir.path()).unwrap();
    (temp_dir, engine)
}

fn tmp_file_count(dir: &TempDir) -> usize {
    std::fs::read_dir(dir.path())
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .unwrap()
                .path()
                .extension()
                .and_then(|x| x.to_str())
                == Some("tmp")
        })
        .count()
}

// =============================================================================
// Isolation Tests
// =============================================================================

#[test]
fn test_snapshot_isolation() {
    let (_temp, engine) = setup_temp_engine();
    engine.put(b"beep", b"boop").unwrap();
    engine.put(b"beep2", b"boop2").unwrap();

    let snapshot = engine.create_snapshot().unwrap();
    engine.remove(b"beep").unwrap();
    engine.put(b"beep2", b"bong").unwrap();
    engine.put(b"beep3", b"new").unwrap();

    assert_eq!(
        engine.get_at(b"beep", &snapshot).unwrap(),
        Some(b"boop".to_vec())
    );
    assert_eq!(
        engine.get_at(b"beep2", &snapshot).unwrap(),
        Some(b"boop2".to_vec())
    );
    assert_eq!(engine.get_at(b"beep3", &snapshot).unwrap(), None);

    assert_eq!(engine.get(b"beep").unwrap(), None);
    assert_eq!(engine.get(b"beep2").unwrap(), Some(b"bong".to_vec()));
}

#[test]
fn test_snapshot_keys() {
    let (_temp, engine) = setup_temp_engine();
    engine.put(b"a", b"1").unwrap();
    engine.put(b"b", b"2").unwrap();

    let snapshot = engine.create_snapshot().unwrap();
    engine.put(b"c", b"3").unwrap();

    let mut keys = snapshot.keys().unwrap();
    keys.sort();
    assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
    assert_eq!(snapshot.len(), 2);
}

#[test]
fn test_empty_snapshot() {
    let (_temp, engine) = setup_temp_engine();

    let snapshot = engine.create_snapshot().unwrap();

    assert!(snapshot.is_empty());
    assert!(snapshot.file_ids().is_empty());
    assert_eq!(snapshot.get(b"anything").unwrap(), None);
}

// =============================================================================
// Close Tests
// =============================================================================

#[test]
fn test_read_after_close_fails() {
    let (_temp, engine) = setup_temp_engine();
    engine.put(b"beep", b"boop").unwrap();
    let snapshot = engine.create_snapshot().unwrap();

    snapshot.close();

    assert!(snapshot.is_closed());
    let result = engine.get_at(b"beep", &snapshot);
    match result {
        Err(e @ CaskError::SnapshotClosed) => assert_eq!(e.to_string(), "Snapshot is closed"),
        other => panic!("expected SnapshotClosed, got {:?}", other),
    }
    assert!(matches!(snapshot.keys(), Err(CaskError::SnapshotClosed)));

    // Missing keys fail too rather than reading as absent
    assert!(matches!(
        snapshot.get(b"missing"),
        Err(CaskError::SnapshotClosed)
    ));
}

#[test]
fn test_close_twice() {
    let (_temp, engine) = setup_temp_engine();
    let snapshot = engine.create_snapshot().unwrap();

    snapshot.close();
    snapshot.close();

    assert!(snapshot.is_closed());
}

// =============================================================================
// Compaction Interaction Tests
// =============================================================================

#[test]
fn test_snapshot_survives_compaction() {
    let (temp, engine) = setup_temp_engine();
    engine.put(b"beep", b"boop").unwrap();
    engine.put(b"beep2", b"boop2").unwrap();

    let snapshot = engine.create_snapshot().unwrap();
    engine.remove(b"beep").unwrap();
    engine.put(b"beep2", b"bong").unwrap();

    let stats = engine.compact().unwrap();
    assert!(stats.deferred_deletions > 0);
    assert!(engine.pending_retirements() > 0);
    assert!(tmp_file_count(&temp) > 0);

    assert_eq!(
        engine.get_at(b"beep", &snapshot).unwrap(),
        Some(b"boop".to_vec())
    );
    assert_eq!(
        engine.get_at(b"beep2", &snapshot).unwrap(),
        Some(b"boop2".to_vec())
    );
    assert_eq!(engine.get(b"beep2").unwrap(), Some(b"bong".to_vec()));

    snapshot.close();

    assert_eq!(engine.pending_retirements(), 0);
    assert_eq!(tmp_file_count(&temp), 0);
}

#[test]
fn test_dropping_snapshot_releases_files() {
    let (temp, engine) = setup_temp_engine();
    engine.put(b"k", b"v1").unwrap();
    let snapshot = engine.create_snapshot().unwrap();
    engine.put(b"k", b"v2").unwrap();

    engine.compact().unwrap();
    assert_eq!(engine.pending_retirements(), 1);

    drop(snapshot);

    assert_eq!(engine.pending_retirements(), 0);
    assert_eq!(tmp_file_count(&temp), 0);
    assert_eq!(engine.get(b"k").unwrap(), Some(b"v2".to_vec()));
}

#[test]
fn test_snapshot_pins_only_referenced_files() {
    let (_temp, engine) = setup_temp_engine();
    engine.put(b"a", b"1").unwrap();
    engine.compact().unwrap();
    engine.put(b"b", b"2").unwrap();

    let snapshot = engine.create_snapshot().unwrap();
    let pinned = snapshot.file_ids();

    assert_eq!(pinned.len(), 2);
    assert!(pinned.iter().all(|id| engine.file_ids().contains(id)));
}

#[test]
fn test_snapshot_outliving_engine_spares_new_files() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open_path(temp_dir.path()).unwrap();
    engine.put(b"k", b"v").unwrap();
    engine.remove(b"k").unwrap();
    engine.put(b"s", b"v").unwrap();

    // Compaction retires every file and writes nothing
    let snapshot = engine.create_snapshot().unwrap();
    engine.remove(b"s").unwrap();
    engine.compact().unwrap();
    engine.close().unwrap();

    let engine = Engine::open_path(temp_dir.path()).unwrap();
    let active = engine.active_file_id().unwrap();
    assert!(!snapshot.file_ids().contains(&active));
    engine.put(b"fresh", b"data").unwrap();
    engine.sync().unwrap();

    drop(snapshot);

    assert!(active.data_path(temp_dir.path()).exists());
    engine.close().unwrap();

    let engine = Engine::open_path(temp_dir.path()).unwrap();
    assert_eq!(engine.get(b"fresh").unwrap(), Some(b"data".to_vec()));
    assert_eq!(engine.get(b"s").unwrap(), None);
    assert_eq!(engine.get(b"k").unwrap(), None);
}
