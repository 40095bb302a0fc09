use super::*;
use crate::chunk::Fields;
use crate::clock::FixedClock;
use crate::error::CoreError;
use crate::record::IntoFields;
use crate::schema::{FieldDef, ModelDef, OnDelete, RelationshipDef};
use crate::value::Value;
use jsondb_storage::{InMemoryBackend, StorageBackend};
use serde_json::json;
use std::sync::Arc;

fn fields(value: serde_json::Value) -> Fields {
    value.into_fields().unwrap()
}

/// Users, posts and tags, all staged in an uncommitted transaction.
fn blog() -> RecordStore {
    let backend: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());
    let mut store =
        RecordStore::open(backend, 2, 16, Arc::new(FixedClock::at_unix(1_700_000_000))).unwrap();
    store
        .register(
            ModelDef::new("User")
                .field(FieldDef::integer("id").primary_key())
                .field(FieldDef::string("name").not_null())
                .field(FieldDef::integer("age"))
                .field(FieldDef::string("city"))
                .relationship(RelationshipDef::one_to_many("posts", "Post")),
        )
        .unwrap();
    store
        .register(
            ModelDef::new("Post")
                .field(FieldDef::integer("id").primary_key())
                .field(
                    FieldDef::integer("author_id")
                        .not_null()
                        .foreign_key("User.id")
                        .on_delete(OnDelete::Cascade),
                )
                .field(FieldDef::string("title"))
                .field(FieldDef::integer("views"))
                .field(FieldDef::float("rating"))
                .relationship(RelationshipDef::many_to_one("author", "User"))
                .relationship(RelationshipDef::many_to_many("tags", "Tag", "PostTag")),
        )
        .unwrap();
    store
        .register(
            ModelDef::new("Tag")
                .field(FieldDef::integer("id").primary_key())
                .field(FieldDef::string("label").unique()),
        )
        .unwrap();
    store
        .register(
            ModelDef::new("PostTag")
                .field(FieldDef::integer("id").primary_key())
                .field(
                    FieldDef::integer("post_id")
                        .foreign_key("Post.id")
                        .on_delete(OnDelete::Cascade),
                )
                .field(
                    FieldDef::integer("tag_id")
                        .foreign_key("Tag.id")
                        .on_delete(OnDelete::Cascade),
                ),
        )
        .unwrap();

    for user in [
        json!({"name": "ann", "age": 30, "city": "Oslo"}),
        json!({"name": "bob", "age": 25, "city": "Bergen"}),
        json!({"name": "cid", "age": 35}),
        json!({"name": "dee", "age": 25, "city": "Oslo"}),
    ] {
        store.create("User", fields(user)).unwrap();
    }
    for post in [
        json!({"author_id": 1, "title": "Intro", "views": 10, "rating": 4.5}),
        json!({"author_id": 1, "title": "Rust", "views": 30}),
        json!({"author_id": 2, "title": "Hello", "views": 5, "rating": 3}),
        json!({"author_id": 3, "title": "Notes", "views": 0, "rating": 2}),
    ] {
        store.create("Post", fields(post)).unwrap();
    }
    store.create("Tag", fields(json!({"label": "rust"}))).unwrap();
    store.create("Tag", fields(json!({"label": "intro"}))).unwrap();
    for (post, tag) in [(1, 2), (2, 1), (2, 2)] {
        store
            .create("PostTag", fields(json!({"post_id": post, "tag_id": tag})))
            .unwrap();
    }
    store
}

fn ids(store: &RecordStore, query: &Query) -> Vec<u64> {
    QueryEngine::new(store, View::Staged)
        .execute(query)
        .unwrap()
        .ids()
        .into_iter()
        .map(RecordId::as_u64)
        .collect()
}

#[test]
fn order_by_breaks_ties_by_driving_id() {
    let store = blog();
    let q = Query::from("User")
        .filter(field("age").ge(25))
        .order_by("age", Direction::Desc);
    assert_eq!(ids(&store, &q), vec![3, 1, 2, 4]);
}

#[test]
fn nulls_sort_first_ascending_and_last_descending() {
    let store = blog();
    assert_eq!(
        ids(&store, &Query::from("User").order_by("city", Direction::Asc)),
        vec![3, 2, 1, 4]
    );
    assert_eq!(
        ids(&store, &Query::from("User").order_by("city", Direction::Desc)),
        vec![1, 4, 2, 3]
    );
}

#[test]
fn predicate_forms() {
    let store = blog();
    let users = |p: Predicate| ids(&store, &Query::from("User").filter(p));

    assert_eq!(users(field("name").like("%n%")), vec![1]);
    assert_eq!(users(field("name").in_(["bob", "dee"])), vec![2, 4]);
    assert_eq!(users(field("name").not_in(["bob"])), vec![1, 3, 4]);
    assert_eq!(users(field("age").between(25, 30)), vec![1, 2, 4]);
    assert_eq!(users(field("city").is_null()), vec![3]);
    assert_eq!(users(field("city").is_not_null()), vec![1, 2, 4]);
    assert_eq!(users(field("city").ne("Oslo")), vec![2]);
    assert_eq!(users(not_(field("city").eq("Oslo"))), vec![2, 3]);
    assert_eq!(
        users(or_([field("age").gt(30), field("name").eq("bob")])),
        vec![2, 3]
    );
}

#[test]
fn primary_key_equality_uses_lookup() {
    let store = blog();
    let engine = QueryEngine::new(&store, View::Staged);
    let q = Query::from("User").filter(field("id").eq(2));
    assert!(engine.compile(&q).unwrap().uses_index());
    assert!(engine.explain(&q).unwrap().starts_with("lookup User.id"));
    assert_eq!(ids(&store, &q), vec![2]);
    assert_eq!(ids(&store, &Query::from("User").filter(field("id").eq(99))), Vec::<u64>::new());
}

#[test]
fn inner_join_drops_unmatched_rows() {
    let store = blog();
    let q = Query::select(["User", "Post"])
        .join("Post", "posts")
        .order_by("Post.id", Direction::Asc);
    let result = QueryEngine::new(&store, View::Staged).execute(&q).unwrap();
    assert_eq!(result.ids(), [1, 1, 2, 3].map(RecordId::new));
    assert_eq!(result.rows[1].get("Post.title"), Some(&Value::from("Rust")));
    assert_eq!(result.rows[1].get("User.name"), Some(&Value::from("ann")));
    assert_eq!(result.columns.len(), 9);
}

#[test]
fn left_join_keeps_unmatched_rows() {
    let store = blog();
    let q = Query::select(["User", "Post"]).left_join("Post", "posts");
    let result = QueryEngine::new(&store, View::Staged).execute(&q).unwrap();
    assert_eq!(result.len(), 5);
    let lonely = result.rows.iter().find(|r| r.id == Some(RecordId::new(4))).unwrap();
    assert_eq!(lonely.get("Post.id"), Some(&Value::Null));

    let without_posts = q.filter(field("Post.id").is_null());
    assert_eq!(ids(&store, &without_posts), vec![4]);
}

#[test]
fn reverse_and_junction_joins() {
    let store = blog();
    let by_city = Query::select(["Post", "User"])
        .join("User", "author")
        .filter(field("User.city").eq("Oslo"));
    assert_eq!(ids(&store, &by_city), vec![1, 2]);

    let tagged = Query::select(["Post", "Tag"])
        .join("Tag", "tags")
        .filter(field("Tag.label").eq("intro"));
    assert_eq!(ids(&store, &tagged), vec![1, 2]);

    let from_tag = Query::select(["Tag", "Post"])
        .join("Post", "Post.tags")
        .filter(field("label").eq("intro"))
        .order_by("Post.id", Direction::Desc);
    let result = QueryEngine::new(&store, View::Staged).execute(&from_tag).unwrap();
    let titles: Vec<_> = result.rows.iter().map(|r| r.get("Post.title").cloned()).collect();
    assert_eq!(titles, vec![Some(Value::from("Rust")), Some(Value::from("Intro"))]);
}

#[test]
fn group_by_with_aggregates_and_having() {
    let store = blog();
    let q = Query::select(["User", "Post"])
        .join("Post", "posts")
        .group_by(["User.name"])
        .aggregate(Aggregate::count(), "posts")
        .aggregate(Aggregate::sum("views"), "views")
        .aggregate(Aggregate::avg("rating"), "rating")
        .order_by("views", Direction::Desc);
    let engine = QueryEngine::new(&store, View::Staged);
    let result = engine.execute(&q).unwrap();
    assert_eq!(
        result.to_json(),
        json!([
            {"User.name": "ann", "posts": 2, "views": 40, "rating": 4.5},
            {"User.name": "bob", "posts": 1, "views": 5, "rating": 3.0},
            {"User.name": "cid", "posts": 1, "views": 0, "rating": 2.0},
        ])
    );
    assert!(result.rows.iter().all(|r| r.id.is_none()));

    let busy = q.having(field("posts").ge(2));
    let result = engine.execute(&busy).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.rows[0].get("name"), Some(&Value::from("ann")));
}

#[test]
fn groups_follow_first_occurrence() {
    let store = blog();
    let q = Query::from("User")
        .group_by(["city"])
        .aggregate(Aggregate::count(), "n")
        .aggregate(Aggregate::min("name"), "first");
    let result = QueryEngine::new(&store, View::Staged).execute(&q).unwrap();
    assert_eq!(
        result.column("User.city").unwrap(),
        vec![&Value::from("Oslo"), &Value::from("Bergen"), &Value::Null]
    );
    assert_eq!(result.column("n").unwrap(), vec![&Value::Int(2), &Value::Int(1), &Value::Int(1)]);
    assert_eq!(result.rows[0].get("first"), Some(&Value::from("ann")));
}

#[test]
fn aggregates_without_group_by_yield_one_row() {
    let store = blog();
    let engine = QueryEngine::new(&store, View::Staged);
    let q = Query::from("Post")
        .aggregate(Aggregate::count(), "n")
        .aggregate(Aggregate::count_field("rating"), "rated")
        .aggregate(Aggregate::max("title"), "last");
    let row = engine.first(&q).unwrap().unwrap();
    assert_eq!(row.get("n"), Some(&Value::Int(4)));
    assert_eq!(row.get("rated"), Some(&Value::Int(3)));
    assert_eq!(row.get("last"), Some(&Value::from("Rust")));

    let none = q.filter(field("views").gt(1000));
    let result = engine.execute(&none).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.rows[0].get("n"), Some(&Value::Int(0)));
    assert_eq!(result.rows[0].get("last"), Some(&Value::Null));
}

#[test]
fn offset_then_limit() {
    let store = blog();
    let base = Query::from("User").order_by("id", Direction::Asc);
    assert_eq!(ids(&store, &base.clone().offset(1).limit(2)), vec![2, 3]);
    assert_eq!(ids(&store, &base.clone().offset(3).limit(5)), vec![4]);
    assert_eq!(ids(&store, &base.clone().offset(10)), Vec::<u64>::new());
    assert_eq!(ids(&store, &base.limit(0)), Vec::<u64>::new());
}

#[test]
fn first_and_count() {
    let store = blog();
    let engine = QueryEngine::new(&store, View::Staged);
    let q = Query::from("User").filter(field("city").eq("Oslo"));
    assert_eq!(engine.count(&q).unwrap(), 2);
    assert_eq!(engine.first(&q).unwrap().unwrap().id, Some(RecordId::new(1)));
    assert!(engine.first(&q.limit(0)).unwrap().is_none());
}

#[test]
fn committed_view_sees_nothing_before_commit() {
    let store = blog();
    let engine = QueryEngine::new(&store, View::Committed);
    assert_eq!(engine.count(&Query::from("User")).unwrap(), 0);
}

#[test]
fn update_where_and_delete_where() {
    let mut store = blog();
    let changed = store
        .update_where("User", &field("city").eq("Oslo"), &fields(json!({"age": 40})))
        .unwrap();
    assert_eq!(changed, 2);
    assert_eq!(
        ids(&store, &Query::from("User").filter(field("age").eq(40))),
        vec![1, 4]
    );

    // bob and his one post
    assert_eq!(store.delete_where("User", &field("age").lt(30)).unwrap(), 2);
    assert_eq!(ids(&store, &Query::from("Post")), vec![1, 2, 4]);

    // ann, her two posts and their three tag links
    assert_eq!(store.delete_where("User", &field("name").eq("ann")).unwrap(), 6);
    assert_eq!(ids(&store, &Query::from("PostTag")), Vec::<u64>::new());
    assert!(!store.is_poisoned());
}

#[test]
fn partial_delete_where_poisons_the_transaction() {
    let mut store = blog();
    store
        .register(
            ModelDef::new("Profile")
                .field(FieldDef::integer("id").primary_key())
                .field(FieldDef::integer("user_id").foreign_key("User.id")),
        )
        .unwrap();
    store.create("Profile", fields(json!({"user_id": 3}))).unwrap();

    let err = store
        .delete_where("User", &field("age").gt(29))
        .unwrap_err();
    assert!(matches!(err, CoreError::ForeignKey { ref model, .. } if model == "Profile"));
    assert!(store.is_poisoned());
}

#[test]
fn unknown_names_are_query_errors() {
    let store = blog();
    let engine = QueryEngine::new(&store, View::Staged);
    for q in [
        Query::from("Nope"),
        Query::from("User").filter(field("nope").eq(1)),
        Query::from("User").join("Tag", "tags"),
        Query::from("User").order_by("Post.id", Direction::Asc),
    ] {
        assert!(matches!(engine.execute(&q), Err(CoreError::Query { .. })), "{q:?}");
    }
}
