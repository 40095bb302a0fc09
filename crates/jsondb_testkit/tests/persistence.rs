//! Directory handling, locking and verification of persisted state.

use jsondb_core::{verify_path, Config, CoreError, Database};
use jsondb_testkit::prelude::*;
use std::fs;
use tempfile::tempdir;

#[test]
fn second_open_of_locked_directory_fails() {
    let db = TestDatabase::file();
    let path = db.path().unwrap().to_path_buf();

    assert!(matches!(Database::open(&path), Err(CoreError::DatabaseLocked)));
    assert!(matches!(verify_path(&path), Err(CoreError::DatabaseLocked)));

    db.db.close().unwrap();
    assert!(Database::open(&path).is_ok());
}

#[test]
fn directory_layout_follows_catalog() {
    let db = TestDatabase::file_with_config(Config::new().chunk_size(2));
    register_blog(&db);
    for n in 0..3 {
        db.create("User", user(&format!("u{n}"), 20)).unwrap();
    }
    let root = db.path().unwrap().to_path_buf();

    let catalog: serde_json::Value =
        serde_json::from_slice(&fs::read(root.join("catalog.json")).unwrap()).unwrap();
    assert_eq!(catalog["meta"]["chunk_size"], 2);
    assert_eq!(catalog["meta"]["total_records"], 3);
    assert_eq!(catalog["counters"]["User"]["next_id"], 4);
    assert_eq!(
        catalog["chunks"]["User"]["chunks"]["1"],
        "data/User/chunk_1.json"
    );
    let fields: Vec<_> = catalog["schema"]["User"]["fields"]
        .as_object()
        .unwrap()
        .keys()
        .cloned()
        .collect();
    assert_eq!(fields.len(), 4);
    assert!(root.join("data/User/chunk_0.json").is_file());
    assert!(root.join("LOCK").is_file());
}

#[test]
fn verify_reports_tampering_after_close() {
    let db = TestDatabase::file_with_config(Config::new().chunk_size(2));
    register_blog(&db);
    db.create("User", user("ann", 30)).unwrap();
    db.create("Post", post(1, "hello")).unwrap();
    let root = db.path().unwrap().to_path_buf();
    db.db.close().unwrap();

    assert!(verify_path(&root).unwrap().is_ok());

    let chunk = root.join("data/Post/chunk_0.json");
    let mut doc: serde_json::Value = serde_json::from_slice(&fs::read(&chunk).unwrap()).unwrap();
    doc["records"]["1"]["author_id"] = serde_json::json!(42);
    fs::write(&chunk, serde_json::to_vec(&doc).unwrap()).unwrap();

    let report = verify_path(&root).unwrap();
    assert!(!report.is_ok());
    assert!(report.errors.iter().any(|e| e.contains("42")), "{:?}", report.errors);
}

#[test]
fn open_flags_are_honoured() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    assert!(Database::open_with_config(&path, Config::new().create_if_missing(false)).is_err());

    Database::open(&path).unwrap().close().unwrap();
    assert!(Database::open_with_config(&path, Config::new().error_if_exists(true)).is_err());
    assert!(matches!(
        Database::open_with_config(&path, Config::new().chunk_size(0)),
        Err(CoreError::InvalidConfig { .. })
    ));
}
