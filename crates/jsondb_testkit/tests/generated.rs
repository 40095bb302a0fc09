//! Property tests over generated write sequences and data.

use jsondb_core::query::{field, not_, Direction, Query};
use jsondb_core::{Config, Database, Value};
use jsondb_storage::InMemoryBackend;
use jsondb_testkit::prelude::*;
use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn ids_increase_and_survive_reopen(
        chunk_size in chunk_size_strategy(),
        ops in write_ops_strategy(40),
    ) {
        let config = Config::new().chunk_size(chunk_size);
        let db = TestDatabase::memory_with_config(config.clone());
        register_blog(&db);

        let mut live: BTreeMap<u64, Option<i64>> = BTreeMap::new();
        let mut highest = 0;
        for (n, op) in ops.into_iter().enumerate() {
            match op {
                WriteOp::Create(mut data) => {
                    data["email"] = json!(format!("user{n}@example.com"));
                    let age = data["age"].as_i64();
                    let id = db.create("User", data).unwrap().id.as_u64();
                    prop_assert!(id > highest);
                    highest = id;
                    live.insert(id, age);
                }
                WriteOp::Update(pick, age) => {
                    let Some(&id) = live.keys().nth(pick % live.len().max(1)) else { continue };
                    db.update("User", id, json!({ "age": age })).unwrap();
                    live.insert(id, age);
                }
                WriteOp::Delete(pick) => {
                    let Some(&id) = live.keys().nth(pick % live.len().max(1)) else { continue };
                    prop_assert_eq!(db.delete("User", id).unwrap(), 1);
                    live.remove(&id);
                }
            }
        }

        let backend = db.backend().unwrap().clone();
        db.db.close().unwrap();
        let fresh = InMemoryBackend::with_blobs(backend.snapshot());
        let db = Database::open_with_backend(Arc::new(fresh), config).unwrap();

        prop_assert_eq!(db.count("User").unwrap(), live.len() as u64);
        for id in 1..=highest {
            let found = db.find("User", id).unwrap();
            match live.get(&id) {
                Some(age) => {
                    let record = found.unwrap();
                    prop_assert_eq!(record.get("age").and_then(Value::as_i64), *age);
                }
                None => prop_assert!(found.is_none()),
            }
        }
        let next = db.create("User", user("late", 1)).unwrap().id.as_u64();
        prop_assert!(next > highest);
        prop_assert!(db.verify().unwrap().is_ok());
    }

    #[test]
    fn ordered_query_sorts_nulls_first(
        ages in prop::collection::vec(age_strategy(), 0..30),
        threshold in 0..100_i64,
    ) {
        let db = TestDatabase::memory_with_config(Config::new().chunk_size(4));
        register_blog(&db);
        db.transaction(|txn| {
            for (n, age) in ages.iter().enumerate() {
                txn.create("User", json!({ "name": format!("u{n}"), "age": age }))?;
            }
            Ok(())
        })
        .unwrap();

        let sorted = db
            .query(&Query::from("User").order_by("age", Direction::Asc))
            .unwrap();
        let got: Vec<Option<i64>> = sorted
            .column("age")
            .unwrap()
            .into_iter()
            .map(Value::as_i64)
            .collect();
        let mut expected = ages.clone();
        expected.sort_unstable();
        prop_assert_eq!(got, expected);

        let at_least = db
            .query_count(&Query::from("User").filter(field("age").ge(threshold)))
            .unwrap();
        let expected = ages.iter().filter(|a| a.is_some_and(|a| a >= threshold)).count();
        prop_assert_eq!(at_least, expected);

        let below_or_missing = db
            .query_count(&Query::from("User").filter(not_(field("age").ge(threshold))))
            .unwrap();
        prop_assert_eq!(below_or_missing, ages.len() - expected);
    }
}
