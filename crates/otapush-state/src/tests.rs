use super::*;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use otapush_core::{PackageMetadata, UpdateError};

static TEST_STATE_COUNTER: AtomicU64 = AtomicU64::new(0);

fn build_test_state_path(nanos: u128) -> PathBuf {
    let mut path = std::env::temp_dir();
    let sequence = TEST_STATE_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.push(format!(
        "otapush-state-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        sequence
    ));
    path
}

fn test_store() -> SettingsStore {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    SettingsStore::new(PreferenceDir::new(build_test_state_path(nanos)))
}

fn package_with_hash(hash: &str) -> PackageMetadata {
    PackageMetadata {
        package_hash: Some(hash.to_string()),
        app_version: Some("1.0".to_string()),
        deployment_key: Some("dk".to_string()),
        label: Some("v1".to_string()),
        ..PackageMetadata::default()
    }
}

#[test]
fn pending_update_round_trip() {
    let store = test_store();

    store
        .save_pending_update("hash-1", true, "main")
        .expect("must save pending update");
    let pending = store
        .pending_update("main")
        .expect("pending update should exist");
    assert_eq!(pending.package_hash, "hash-1");
    assert!(pending.is_loading);

    store
        .remove_pending_update("main")
        .expect("must remove pending update");
    assert!(store.pending_update("main").is_none());

    let _ = fs::remove_dir_all(store.preference_dir().root());
}

#[test]
fn pending_update_entry_is_namespaced_by_instance_key() {
    let store = test_store();

    store
        .save_pending_update("hash-a", false, "A")
        .expect("must save for A");
    store
        .save_pending_update("hash-b", false, "B")
        .expect("must save for B");

    store.remove_pending_update("A").expect("must clear A");
    assert!(store.pending_update("A").is_none());
    let pending_b = store.pending_update("B").expect("B must be intact");
    assert_eq!(pending_b.package_hash, "hash-b");

    let _ = fs::remove_dir_all(store.preference_dir().root());
}

#[test]
fn corrupt_pending_update_reads_as_absent() {
    let store = test_store();

    store
        .preference_dir()
        .write("main", PENDING_UPDATE_KEY, "{not json")
        .expect("must write raw entry");
    assert!(store.pending_update("main").is_none());

    let _ = fs::remove_dir_all(store.preference_dir().root());
}

#[test]
fn is_pending_update_requires_loading_handshake_done() {
    let store = test_store();

    store
        .save_pending_update("hash-1", true, "main")
        .expect("must save");
    assert!(!store
        .is_pending_update(None, "main")
        .expect("query must succeed"));

    store
        .save_pending_update("hash-1", false, "main")
        .expect("must save");
    assert!(store
        .is_pending_update(None, "main")
        .expect("query must succeed"));
    assert!(store
        .is_pending_update(Some("hash-1"), "main")
        .expect("query must succeed"));
    assert!(!store
        .is_pending_update(Some("other"), "main")
        .expect("query must succeed"));

    let _ = fs::remove_dir_all(store.preference_dir().root());
}

#[test]
fn is_pending_update_faults_on_wrong_shape() {
    let store = test_store();

    store
        .preference_dir()
        .write("main", PENDING_UPDATE_KEY, "{\"unexpected\": 1}")
        .expect("must write raw entry");
    let err = store
        .is_pending_update(None, "main")
        .expect_err("wrong shape must be a data-integrity fault");
    assert!(matches!(
        err.downcast_ref::<UpdateError>(),
        Some(UpdateError::DataIntegrity { .. })
    ));

    let _ = fs::remove_dir_all(store.preference_dir().root());
}

#[test]
fn save_failed_update_dedups_on_hash() {
    let store = test_store();

    store
        .save_failed_update(&package_with_hash("hash-1"), "main")
        .expect("must save");
    store
        .save_failed_update(&package_with_hash("hash-2"), "main")
        .expect("must save");
    store
        .save_failed_update(&package_with_hash("hash-1"), "main")
        .expect("duplicate save must be a no-op");

    let failed = store.failed_updates("main");
    assert_eq!(failed.len(), 2);
    assert!(store
        .is_failed_hash("hash-1", "main")
        .expect("query must succeed"));
    assert!(!store
        .is_failed_hash("hash-3", "main")
        .expect("query must succeed"));

    store
        .remove_failed_updates("main")
        .expect("must remove failed updates");
    assert!(store.failed_updates("main").is_empty());

    let _ = fs::remove_dir_all(store.preference_dir().root());
}

#[test]
fn save_failed_update_rejects_snapshot_without_hash() {
    let store = test_store();

    let err = store
        .save_failed_update(&PackageMetadata::default(), "main")
        .expect_err("missing hash must fail");
    assert!(matches!(
        err.downcast_ref::<UpdateError>(),
        Some(UpdateError::DataIntegrity { .. })
    ));

    let _ = fs::remove_dir_all(store.preference_dir().root());
}

#[test]
fn corrupt_failed_updates_self_heals_on_read() {
    let store = test_store();

    store
        .preference_dir()
        .write("main", FAILED_UPDATES_KEY, "[{]")
        .expect("must write raw entry");
    assert!(store.failed_updates("main").is_empty());
    // The read path rewrote the entry; it parses cleanly now.
    let healed = store
        .preference_dir()
        .read("main", FAILED_UPDATES_KEY)
        .expect("must read")
        .expect("entry should exist");
    assert_eq!(healed, "[]");

    // A save after the reset starts from the healed empty list.
    store
        .preference_dir()
        .write("main", FAILED_UPDATES_KEY, "[{]")
        .expect("must write raw entry");
    store
        .save_failed_update(&package_with_hash("hash-1"), "main")
        .expect("dedup pre-check heals the list before the write");
    let failed = store.failed_updates("main");
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].package_hash.as_deref(), Some("hash-1"));

    let _ = fs::remove_dir_all(store.preference_dir().root());
}

#[test]
fn save_failed_update_faults_on_invalid_stored_record() {
    let store = test_store();

    // Valid JSON array, but a record with no hash: the dedup scan cannot
    // uphold its guarantee, so the save is refused rather than healed.
    store
        .preference_dir()
        .write("main", FAILED_UPDATES_KEY, "[{\"appVersion\": \"1.0\"}]")
        .expect("must write raw entry");
    let err = store
        .save_failed_update(&package_with_hash("hash-1"), "main")
        .expect_err("save over invalid record must fail");
    assert!(matches!(
        err.downcast_ref::<UpdateError>(),
        Some(UpdateError::DataIntegrity { .. })
    ));

    let _ = fs::remove_dir_all(store.preference_dir().root());
}

#[test]
fn is_failed_hash_faults_on_record_missing_hash() {
    let store = test_store();

    store
        .preference_dir()
        .write("main", FAILED_UPDATES_KEY, "[{\"appVersion\": \"1.0\"}]")
        .expect("must write raw entry");
    let err = store
        .is_failed_hash("hash-1", "main")
        .expect_err("record without hash must fail");
    assert!(matches!(
        err.downcast_ref::<UpdateError>(),
        Some(UpdateError::DataIntegrity { .. })
    ));

    let _ = fs::remove_dir_all(store.preference_dir().root());
}

#[test]
fn rollback_count_increments_for_same_hash_and_resets_for_new_hash() {
    let store = test_store();

    store
        .set_latest_rollback_info("hash-1", "main")
        .expect("must record rollback");
    let info = store
        .latest_rollback_info("main")
        .expect("rollback info should exist");
    assert_eq!(info.package_hash, "hash-1");
    assert_eq!(info.count, 1);
    assert!(info.time > 0);

    store
        .set_latest_rollback_info("hash-1", "main")
        .expect("must record rollback");
    let info = store
        .latest_rollback_info("main")
        .expect("rollback info should exist");
    assert_eq!(info.count, 2);

    store
        .set_latest_rollback_info("hash-2", "main")
        .expect("must record rollback");
    let info = store
        .latest_rollback_info("main")
        .expect("rollback info should exist");
    assert_eq!(info.package_hash, "hash-2");
    assert_eq!(info.count, 1);

    let _ = fs::remove_dir_all(store.preference_dir().root());
}

#[test]
fn corrupt_rollback_info_reads_as_absent_and_count_restarts() {
    let store = test_store();

    store
        .preference_dir()
        .write("main", LATEST_ROLLBACK_INFO_KEY, "garbage")
        .expect("must write raw entry");
    assert!(store.latest_rollback_info("main").is_none());

    store
        .set_latest_rollback_info("hash-1", "main")
        .expect("must record rollback");
    let info = store
        .latest_rollback_info("main")
        .expect("rollback info should exist");
    assert_eq!(info.count, 1);

    let _ = fs::remove_dir_all(store.preference_dir().root());
}

#[test]
fn entry_paths_are_prefixed_with_instance_key() {
    let prefs = PreferenceDir::new("/tmp/otapush-layout-probe");
    assert_eq!(
        prefs.entry_path("main", PENDING_UPDATE_KEY),
        PathBuf::from("/tmp/otapush-layout-probe/main_pending-update.json")
    );
    assert_eq!(
        prefs.entry_path("common", FAILED_UPDATES_KEY),
        PathBuf::from("/tmp/otapush-layout-probe/common_failed-updates.json")
    );
}
