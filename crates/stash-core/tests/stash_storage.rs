use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tempfile::tempdir;

use stash_core::{
    BackupConfig, BackupManager, BulkOp, CodecConfig, FileKeystore, FsBlobStore, MemoryKeystore,
    MigrateOptions, Migration, MigrationManager, Query, QuotaConfig, RestoreOptions,
    RollbackOptions, Stash, StashConfig, StashError,
};

const PASSPHRASE: &str = "test-passphrase-secure-123";
const NO_TAGS: &[&str] = &[];

fn encrypted_config() -> StashConfig {
    StashConfig::default().with_codec(
        CodecConfig::plain()
            .with_compression(true)
            .with_encryption(true),
    )
}

fn contains_bytes(path: &Path, needle: &[u8]) -> bool {
    match fs::read(path) {
        Ok(bytes) => bytes.windows(needle.len()).any(|window| window == needle),
        Err(_) => false,
    }
}

#[test]
fn test_file_store_round_trip_with_encryption() {
    let dir = tempdir().expect("tempdir should succeed");
    let db_path = dir.path().join("stash.db");
    let keystore_path = dir.path().join("keystore.age");

    {
        let keystore = FileKeystore::open(&keystore_path, PASSPHRASE).expect("keystore should open");
        let stash = Stash::open(&db_path, encrypted_config(), &keystore).expect("open should succeed");
        stash
            .set("secret", json!({"token": "supersecret-value"}), &["creds"])
            .expect("set should succeed");
    }

    for path in [db_path.clone(), dir.path().join("stash.db-wal")] {
        assert!(!contains_bytes(&path, b"supersecret-value"));
    }

    let keystore = FileKeystore::open(&keystore_path, PASSPHRASE).expect("keystore should reopen");
    let stash = Stash::open(&db_path, encrypted_config(), &keystore).expect("reopen should succeed");
    let item = stash
        .get_item("secret")
        .expect("get should succeed")
        .expect("item should exist");
    assert_eq!(item.value, json!({"token": "supersecret-value"}));
    assert!(item.metadata.encrypted);
    assert!(item.metadata.compressed);
    assert!(item.metadata.tags.contains("creds"));
}

#[test]
fn test_wrong_keystore_passphrase_fails() {
    let dir = tempdir().expect("tempdir should succeed");
    let keystore_path = dir.path().join("keystore.age");
    {
        let keystore = FileKeystore::open(&keystore_path, PASSPHRASE).expect("keystore should open");
        Stash::open(&dir.path().join("stash.db"), encrypted_config(), &keystore)
            .expect("open should succeed");
    }

    let result = FileKeystore::open(&keystore_path, "wrong-passphrase-456");
    assert!(matches!(result, Err(StashError::IncorrectPassphrase)));
}

#[test]
fn test_differently_configured_items_coexist() {
    let dir = tempdir().expect("tempdir should succeed");
    let db_path = dir.path().join("stash.db");
    let keystore = MemoryKeystore::new();

    {
        let stash = Stash::open(&db_path, encrypted_config(), &keystore).expect("open should succeed");
        stash.set("sealed", json!([1, 2, 3]), NO_TAGS).expect("set should succeed");
    }

    let stash = Stash::open(&db_path, StashConfig::default(), &keystore).expect("reopen should succeed");
    stash.set("plain", json!("visible"), NO_TAGS).expect("set should succeed");

    assert_eq!(stash.get("sealed").expect("get should succeed"), Some(json!([1, 2, 3])));
    assert_eq!(stash.get("plain").expect("get should succeed"), Some(json!("visible")));
    let stats = stash.stats().expect("stats should succeed");
    assert_eq!(stats.item_count, 2);
    assert_eq!(stats.encrypted_items, 1);
}

#[test]
fn test_missing_data_key_is_decryption_failure() {
    let dir = tempdir().expect("tempdir should succeed");
    let db_path = dir.path().join("stash.db");
    {
        let stash = Stash::open(&db_path, encrypted_config(), &MemoryKeystore::new())
            .expect("open should succeed");
        stash.set("sealed", json!("x"), NO_TAGS).expect("set should succeed");
    }

    let stash = Stash::open(&db_path, StashConfig::default(), &MemoryKeystore::new())
        .expect("reopen should succeed");
    let err = stash.get("sealed").expect_err("decoding should fail");
    assert!(err.is_decryption_failure());
}

#[test]
fn test_restore_version_scenario() {
    let stash = Stash::open_in_memory(StashConfig::default(), &MemoryKeystore::new())
        .expect("open should succeed");
    stash.set("a", json!({"n": 1}), NO_TAGS).expect("set should succeed");
    stash.set("a", json!({"n": 2}), NO_TAGS).expect("set should succeed");

    let metadata = stash.restore_version("a", 1).expect("restore should succeed");
    assert_eq!(metadata.version, 3);
    assert_eq!(stash.get("a").expect("get should succeed"), Some(json!({"n": 1})));
}

#[test]
fn test_ledger_retains_min_of_writes_and_limit() {
    for (writes, max_versions) in [(3usize, 10usize), (12, 10), (5, 2)] {
        let stash = Stash::open_in_memory(
            StashConfig::default().with_max_versions(max_versions),
            &MemoryKeystore::new(),
        )
        .expect("open should succeed");
        for n in 0..writes {
            stash.set("k", json!(n), NO_TAGS).expect("set should succeed");
        }

        let history = stash.history("k").expect("history should succeed");
        assert_eq!(history.len(), (writes - 1).min(max_versions));
        let last = history.last().expect("history should not be empty");
        assert_eq!(last.version as usize, writes - 1);
        assert_eq!(last.snapshot.value, json!(writes - 2));
    }
}

#[test]
fn test_tag_query_returns_tagged_items_in_order() {
    let stash = Stash::open_in_memory(StashConfig::default(), &MemoryKeystore::new())
        .expect("open should succeed");
    stash.set("c", json!({"rank": 1}), &["x"]).expect("set should succeed");
    stash.set("a", json!({"rank": 3}), &["x", "y"]).expect("set should succeed");
    stash.set("b", json!({"rank": 2}), &["y"]).expect("set should succeed");

    let result = stash
        .query(&Query::new().filter("metadata.tags", "x").select(["key"]))
        .expect("query should succeed");
    assert_eq!(result.total, 2);
    assert_eq!(result.rows, vec![json!({"key": "a"}), json!({"key": "c"})]);

    let result = stash
        .query(
            &Query::new()
                .filter("tags", "y")
                .order_by("value.rank:desc")
                .select(["key", "value.rank"]),
        )
        .expect("query should succeed");
    assert_eq!(
        result.rows,
        vec![
            json!({"key": "a", "value": {"rank": 3}}),
            json!({"key": "b", "value": {"rank": 2}}),
        ]
    );
}

#[test]
fn test_value_query_with_pagination() {
    let stash = Stash::open_in_memory(StashConfig::default(), &MemoryKeystore::new())
        .expect("open should succeed");
    for n in 0..10 {
        let kind = if n % 2 == 0 { "even" } else { "odd" };
        stash
            .set(&format!("item:{:02}", n), json!({"n": n, "kind": kind}), NO_TAGS)
            .expect("set should succeed");
    }

    let query = Query::new()
        .filter("kind", "even")
        .order_by("n:desc")
        .offset(1)
        .limit(2);
    let items = stash.query_items(&query).expect("query should succeed");
    let keys: Vec<&str> = items.iter().map(|item| item.key.as_str()).collect();
    assert_eq!(keys, vec!["item:06", "item:04"]);
    assert_eq!(stash.query(&query).expect("query should succeed").total, 5);
}

#[test]
fn test_quota_rejection_leaves_store_unchanged() {
    let quota = QuotaConfig::new(64, 80).expect("quota should be valid");
    let stash = Stash::open_in_memory(StashConfig::default().with_quota(quota), &MemoryKeystore::new())
        .expect("open should succeed");
    stash.set("a", json!("small"), NO_TAGS).expect("set should succeed");
    let before = stash.export_json().expect("export should succeed");

    let err = stash
        .set("a", json!("y".repeat(100)), NO_TAGS)
        .expect_err("set should exceed quota");
    assert!(matches!(err, StashError::QuotaExceeded { .. }));
    assert_eq!(stash.export_json().expect("export should succeed"), before);
    assert!(stash.history("a").expect("history should succeed").is_empty());
}

#[test]
fn test_bulk_failure_leaves_no_partial_writes() {
    let stash = Stash::open_in_memory(StashConfig::default(), &MemoryKeystore::new())
        .expect("open should succeed");
    let ops = vec![
        BulkOp::set("one", json!(1)),
        BulkOp::set("two", json!(2)),
        BulkOp::set("bad\u{0}key", json!(3)),
    ];
    assert!(stash.bulk(&ops).is_err());
    assert!(stash.keys().expect("keys should succeed").is_empty());
    assert_eq!(stash.quota().used(), 0);
}

#[test]
fn test_migrations_apply_and_roll_back_in_order() {
    let stash = Arc::new(
        Stash::open_in_memory(StashConfig::default(), &MemoryKeystore::new())
            .expect("open should succeed"),
    );
    let mut manager = MigrationManager::new(Arc::clone(&stash));
    for version in 1..=3u32 {
        let key = format!("migrated:{}", version);
        let down_key = key.clone();
        manager
            .register(Migration::new(
                version,
                format!("add {}", key),
                move |stash| stash.set(&key, json!(version), NO_TAGS).map(|_| ()),
                move |stash| stash.delete(&down_key).map(|_| ()),
            ))
            .expect("register should succeed");
    }

    let report = manager
        .migrate(MigrateOptions::default())
        .expect("migrate should succeed");
    assert_eq!(report.completed, vec![1, 2, 3]);
    assert_eq!(stash.schema_version().expect("schema version"), 3);
    assert_eq!(stash.keys().expect("keys should succeed").len(), 3);

    let report = manager
        .rollback(1, RollbackOptions::default())
        .expect("rollback should succeed");
    assert_eq!(report.completed, vec![3, 2]);
    assert_eq!(stash.schema_version().expect("schema version"), 1);
    assert_eq!(
        stash.keys().expect("keys should succeed"),
        vec!["migrated:1".to_string()]
    );
    assert_eq!(stash.applied_migrations().expect("applied").len(), 1);
}

#[test]
fn test_schema_version_survives_reopen() {
    let dir = tempdir().expect("tempdir should succeed");
    let db_path = dir.path().join("stash.db");
    {
        let stash = Arc::new(
            Stash::open(&db_path, StashConfig::default(), &MemoryKeystore::new())
                .expect("open should succeed"),
        );
        let mut manager = MigrationManager::new(stash);
        manager
            .register(Migration::new(1, "noop", |_| Ok(()), |_| Ok(())))
            .expect("register should succeed");
        manager
            .migrate(MigrateOptions::default())
            .expect("migrate should succeed");
    }

    let stash = Stash::open(&db_path, StashConfig::default(), &MemoryKeystore::new())
        .expect("reopen should succeed");
    assert_eq!(stash.schema_version().expect("schema version"), 1);
}

#[test]
fn test_backup_round_trip_into_empty_store() {
    let dir = tempdir().expect("tempdir should succeed");
    let keystore = MemoryKeystore::new();
    let source = Arc::new(
        Stash::open(&dir.path().join("source.db"), encrypted_config(), &keystore)
            .expect("open should succeed"),
    );
    source.set("a", json!({"n": 1}), &["t"]).expect("set should succeed");
    source.set("b", json!([true, null]), NO_TAGS).expect("set should succeed");

    let blobs = Arc::new(FsBlobStore::new(dir.path().join("backups")).expect("blob dir"));
    let config = BackupConfig {
        compress: true,
        encrypt: true,
        auto_backup: false,
    };
    let backup = BackupManager::new(Arc::clone(&source), blobs.clone(), config)
        .create_backup()
        .expect("backup should succeed");
    assert!(backup.encrypted);
    assert!(dir.path().join("backups").join(format!("{}.meta.json", backup.id)).exists());

    // Same keystore, so the target can read the encrypted blob.
    let target = Arc::new(
        Stash::open(&dir.path().join("target.db"), encrypted_config(), &keystore)
            .expect("open should succeed"),
    );
    let manager = BackupManager::new(Arc::clone(&target), blobs, config);
    manager.verify(&backup.id).expect("verify should succeed");
    let report = manager
        .restore(&backup.id, &RestoreOptions::default())
        .expect("restore should succeed");
    assert_eq!(report.restored, 2);

    let exported: Vec<(String, serde_json::Value)> = target
        .items()
        .expect("items should succeed")
        .into_iter()
        .map(|item| (item.key, item.value))
        .collect();
    assert_eq!(
        exported,
        vec![
            ("a".to_string(), json!({"n": 1})),
            ("b".to_string(), json!([true, null])),
        ]
    );
}

#[test]
fn test_tampered_backup_blob_fails_verify() {
    let dir = tempdir().expect("tempdir should succeed");
    let stash = Arc::new(
        Stash::open_in_memory(StashConfig::default(), &MemoryKeystore::new())
            .expect("open should succeed"),
    );
    stash.set("a", json!(1), NO_TAGS).expect("set should succeed");

    let blobs = Arc::new(FsBlobStore::new(dir.path()).expect("blob dir"));
    let manager = BackupManager::new(
        Arc::clone(&stash),
        blobs,
        BackupConfig {
            compress: false,
            encrypt: false,
            auto_backup: false,
        },
    );
    let backup = manager.create_backup().expect("backup should succeed");

    let blob_path = dir.path().join(&backup.id);
    let mut bytes = fs::read(&blob_path).expect("read should succeed");
    let last = bytes.len() - 2;
    bytes[last] = b'9';
    fs::write(&blob_path, bytes).expect("write should succeed");

    assert!(matches!(
        manager.verify(&backup.id),
        Err(StashError::BackupCorruption { .. })
    ));
}
