// Integration tests for the retention cleaner
// Runs against the in-memory store and a real directory-backed store

use chrono::{Duration, TimeZone, Utc};
use unifi_backup::backup::{clean, generate_backup_filename, RetentionPolicy};
use unifi_backup::storage::{FileStore, MemoryStore, ObjectStore};

/// Backups one day apart, oldest first
fn backup_names(count: i64) -> Vec<String> {
    let base = Utc.with_ymd_and_hms(2025, 1, 1, 3, 0, 0).unwrap();
    (0..count)
        .map(|day| generate_backup_filename(base + Duration::days(day)))
        .collect()
}

#[tokio::test]
async fn test_keeps_newest_and_ignores_foreign_objects() {
    let store = MemoryStore::new();
    let names = backup_names(6);
    // Insert in scrambled order; listing order must not matter
    for i in [3, 0, 5, 1, 4, 2] {
        store.insert(names[i].clone(), vec![i as u8]);
    }
    // Unparseable but carrying the suffix
    store.insert("unifi-backup-latest.unf", "x");
    store.insert("manual-export.unf", "x");
    // Not listed at all
    store.insert("README.md", "x");

    let report = clean(&store, RetentionPolicy::keep_last(2)).await.unwrap();

    assert_eq!(report.deleted.len(), 4);
    assert_eq!(report.retained, 2);
    assert_eq!(report.skipped, 2);
    assert!(report.failed.is_empty());

    let mut remaining = store.keys();
    remaining.sort();
    let mut expected = vec![
        names[4].clone(),
        names[5].clone(),
        "README.md".to_string(),
        "manual-export.unf".to_string(),
        "unifi-backup-latest.unf".to_string(),
    ];
    expected.sort();
    assert_eq!(remaining, expected);
}

#[tokio::test]
async fn test_no_deletions_at_or_below_limit() {
    for count in [0, 1, 3] {
        let store = MemoryStore::new();
        for name in backup_names(count) {
            store.insert(name, "data");
        }

        let report = clean(&store, RetentionPolicy::keep_last(3)).await.unwrap();

        assert!(report.deleted.is_empty());
        assert_eq!(report.retained, count as usize);
        assert_eq!(store.delete_attempts(), 0);
    }
}

#[tokio::test]
async fn test_failed_deletion_does_not_stop_the_rest() {
    let store = MemoryStore::new();
    let names = backup_names(6);
    for name in &names {
        store.insert(name.clone(), "data");
    }
    // Second-newest deletion candidate refuses to go
    store.fail_delete(names[2].clone());

    let report = clean(&store, RetentionPolicy::keep_last(2)).await.unwrap();

    assert_eq!(store.delete_attempts(), 4);
    assert_eq!(report.deleted, vec![names[3].clone(), names[1].clone(), names[0].clone()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].filename, names[2]);
    assert_eq!(report.remaining(), 3);
    assert!(store.contains(&names[2]));
    assert!(!store.contains(&names[0]));
}

#[tokio::test]
async fn test_cleanup_on_directory_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::with_root(dir.path()).await.unwrap();
    let names = backup_names(4);
    for name in &names {
        let mut data: &[u8] = b"backup";
        store.put(name, &mut data).await.unwrap();
    }
    std::fs::write(dir.path().join("notes.txt"), "keep me").unwrap();

    let report = clean(&store, RetentionPolicy::keep_last(1)).await.unwrap();

    assert_eq!(report.deleted.len(), 3);
    assert_eq!(store.list().await.unwrap(), vec![names[3].clone()]);
    assert!(dir.path().join("notes.txt").exists());
}
