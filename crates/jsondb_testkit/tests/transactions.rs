//! Transaction visibility, rollback and commit failure behavior.

use jsondb_core::query::{field, Query};
use jsondb_core::{Config, CoreError, Database, Value};
use jsondb_storage::InMemoryBackend;
use jsondb_testkit::prelude::*;
use std::sync::Arc;

#[test]
fn readers_see_snapshot_until_commit() {
    with_blog_db(|db| {
        db.create("User", user("ann", 30)).unwrap();

        let txn = db.begin().unwrap();
        txn.update("User", 1_u64, serde_json::json!({"age": 31}))
            .unwrap();
        txn.create("User", user("bob", 25)).unwrap();

        assert_eq!(db.count("User").unwrap(), 1);
        assert_eq!(db.get("User", 1_u64).unwrap().get("age"), Some(&Value::Int(30)));
        assert_eq!(
            db.query_count(&Query::from("User").filter(field("age").eq(31)))
                .unwrap(),
            0
        );
        assert_eq!(txn.count("User").unwrap(), 2);

        txn.commit().unwrap();
        assert_eq!(db.count("User").unwrap(), 2);
        assert_eq!(db.get("User", 1_u64).unwrap().get("age"), Some(&Value::Int(31)));
    });
}

#[test]
fn dropped_transaction_rolls_back() {
    let db = TestDatabase::memory();
    register_blog(&db);
    {
        let txn = db.begin().unwrap();
        txn.create("User", user("ann", 30)).unwrap();
    }

    assert_eq!(db.count("User").unwrap(), 0);
    assert_eq!(db.stats().transactions_rolled_back, 1);
    // Ids handed out by a rolled back transaction were never committed.
    let ann = db.create("User", user("ann", 30)).unwrap();
    assert_eq!(ann.id.as_u64(), 1);
}

#[test]
fn only_one_writer_at_a_time() {
    with_blog_db(|db| {
        let txn = db.begin().unwrap();
        let err = db.create("User", user("ann", 30)).unwrap_err();
        assert!(matches!(err, CoreError::Transaction { .. }), "{err}");
        assert!(db.begin().is_err());
        txn.rollback().unwrap();
        assert!(db.begin().is_ok());
    });
}

#[test]
fn failed_commit_leaves_catalog_unchanged() {
    let db = TestDatabase::memory_with_config(Config::new().chunk_size(2));
    register_blog(&db);
    db.create("User", user("ann", 30)).unwrap();
    let backend = db.backend().unwrap().clone();
    let before = backend.snapshot();

    backend.fail_writes_after(0);
    assert!(db.create("User", user("bob", 25)).is_err());
    assert_eq!(backend.snapshot(), before);

    let txn = db.begin().unwrap();
    txn.create("User", user("cy", 22)).unwrap();
    txn.create("User", user("dee", 23)).unwrap();
    backend.clear_faults();
    backend.fail_writes_after(1);
    assert!(txn.commit().is_err());
    assert_eq!(backend.snapshot()["catalog.json"], before["catalog.json"]);
    assert_eq!(db.count("User").unwrap(), 1);
    assert_eq!(db.stats().failed_commits, 2);

    backend.clear_faults();
    db.create("User", user("eve", 40)).unwrap();
    let fresh = InMemoryBackend::with_blobs(backend.snapshot());
    let reopened =
        Database::open_with_backend(Arc::new(fresh), Config::new().chunk_size(2)).unwrap();
    let names: Vec<_> = reopened
        .export_records("User")
        .unwrap()
        .map(|r| r.unwrap().get("name").cloned())
        .collect();
    assert_eq!(names, [Some(Value::from("ann")), Some(Value::from("eve"))]);
    assert!(reopened.verify().unwrap().is_ok());
}

#[test]
fn flush_skips_unchanged_chunks() {
    with_blog_db(|db| {
        db.create("User", user("ann", 30)).unwrap();

        let txn = db.begin().unwrap();
        txn.update("User", 1_u64, serde_json::json!({"age": 99}))
            .unwrap();
        txn.update("User", 1_u64, serde_json::json!({"age": 30}))
            .unwrap();
        let summary = txn.commit().unwrap();
        assert_eq!(summary.operations, 2);
        assert_eq!(summary.chunks_written, 0);
        assert_eq!(summary.chunks_skipped, 1);
    });
}

#[test]
fn empty_transaction_commits_without_writes() {
    let db = TestDatabase::memory();
    register_blog(&db);
    let backend = db.backend().unwrap().clone();
    let writes = backend.write_count();

    let summary = db.begin().unwrap().commit().unwrap();
    assert_eq!(summary.chunks_written, 0);
    assert_eq!(backend.write_count(), writes);
}

#[test]
fn partially_applied_bulk_update_poisons_transaction() {
    with_blog_db(|db| {
        db.create("User", user("ann", 30)).unwrap();
        db.create("User", user("bob", 31)).unwrap();

        let txn = db.begin().unwrap();
        let everyone = field("age").ge(0);
        assert!(txn
            .update_where("User", &everyone, serde_json::json!({"email": "same@example.com"}))
            .is_err());
        assert!(txn.commit().is_err());

        assert_eq!(
            db.get("User", 1_u64).unwrap().get("email"),
            Some(&Value::from("ann@example.com"))
        );
        assert!(db.begin().is_ok());
    });
}
