//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up test databases
//! and common test scenarios.

use jsondb_core::{Config, Database, FieldDef, ModelDef, OnDelete, RelationshipDef};
use jsondb_storage::InMemoryBackend;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
    /// The shared backend of a memory database.
    backend: Option<Arc<InMemoryBackend>>,
    config: Config,
}

impl TestDatabase {
    /// Creates a new in-memory test database.
    pub fn memory() -> Self {
        Self::memory_with_config(Config::default())
    }

    /// Creates a new in-memory test database with a configuration.
    ///
    /// The backend stays reachable through [`TestDatabase::backend`] for
    /// fault injection and reopening.
    pub fn memory_with_config(config: Config) -> Self {
        let backend = Arc::new(InMemoryBackend::new());
        let db = Database::open_with_backend(backend.clone(), config.clone())
            .expect("Failed to open in-memory database");
        Self {
            db,
            temp_dir: None,
            backend: Some(backend),
            config,
        }
    }

    /// Creates a new file-based test database.
    pub fn file() -> Self {
        Self::file_with_config(Config::default())
    }

    /// Creates a new file-based test database with a configuration.
    pub fn file_with_config(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open_with_config(temp_dir.path(), config.clone())
            .expect("Failed to open file database");
        Self {
            db,
            temp_dir: Some(temp_dir),
            backend: None,
            config,
        }
    }

    /// Returns the database path if file-based, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.temp_dir.as_ref().map(TempDir::path)
    }

    /// Returns the backend of a memory database.
    pub fn backend(&self) -> Option<&Arc<InMemoryBackend>> {
        self.backend.as_ref()
    }

    /// Closes the database and opens a fresh instance over the same
    /// persisted state.
    pub fn reopen(self) -> Self {
        let Self {
            db,
            temp_dir,
            backend,
            config,
        } = self;
        db.close().expect("Failed to close database");
        let db = match (&temp_dir, &backend) {
            (Some(dir), _) => Database::open_with_config(dir.path(), config.clone()),
            (None, Some(backend)) => Database::open_with_backend(backend.clone(), config.clone()),
            (None, None) => unreachable!("test database without storage"),
        }
        .expect("Failed to reopen database");
        Self {
            db,
            temp_dir,
            backend,
            config,
        }
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// The `User` model of the blog schema.
///
/// `email` is unique, `age` is indexed.
pub fn user_model() -> ModelDef {
    ModelDef::new("User")
        .field(FieldDef::integer("id").primary_key())
        .field(FieldDef::string("name").not_null().max_length(64))
        .field(FieldDef::string("email").unique())
        .field(FieldDef::integer("age").index())
        .relationship(RelationshipDef::one_to_many("posts", "Post"))
}

/// The `Post` model of the blog schema.
///
/// Deleting an author is restricted while posts reference it.
pub fn post_model() -> ModelDef {
    ModelDef::new("Post")
        .field(FieldDef::integer("id").primary_key())
        .field(FieldDef::integer("author_id").not_null().foreign_key("User.id"))
        .field(FieldDef::string("title").not_null())
        .field(FieldDef::integer("views").default(0))
        .relationship(RelationshipDef::many_to_one("author", "User"))
}

/// The `Comment` model of the blog schema.
///
/// Comments are removed with their post and lose their reviewer when the
/// reviewing user is deleted.
pub fn comment_model() -> ModelDef {
    ModelDef::new("Comment")
        .field(FieldDef::integer("id").primary_key())
        .field(
            FieldDef::integer("post_id")
                .not_null()
                .foreign_key("Post.id")
                .on_delete(OnDelete::Cascade),
        )
        .field(
            FieldDef::integer("reviewer_id")
                .foreign_key("User.id")
                .on_delete(OnDelete::SetNull),
        )
        .field(FieldDef::string("body"))
}

/// Registers the blog schema.
pub fn register_blog(db: &Database) {
    for model in [user_model(), post_model(), comment_model()] {
        db.register(model).expect("Failed to register blog model");
    }
}

/// Record data for a user.
///
/// The email is derived from the name.
pub fn user(name: &str, age: i64) -> serde_json::Value {
    json!({ "name": name, "email": format!("{name}@example.com"), "age": age })
}

/// Record data for a post.
pub fn post(author_id: u64, title: &str) -> serde_json::Value {
    json!({ "author_id": author_id, "title": title })
}

/// Record data for a comment.
pub fn comment(post_id: u64, reviewer_id: Option<u64>, body: &str) -> serde_json::Value {
    json!({ "post_id": post_id, "reviewer_id": reviewer_id, "body": body })
}

/// Runs a test with a temporary in-memory database.
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db.db)
}

/// Runs a test with a temporary file-based database.
pub fn with_file_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database, &Path) -> R,
{
    let test_db = TestDatabase::file();
    let path = test_db.path().expect("File database should have a path");
    f(&test_db.db, path)
}

/// Runs a test with an in-memory database holding the blog schema.
pub fn with_blog_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    with_temp_db(|db| {
        register_blog(db);
        f(db)
    })
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates a blog database with `users` users, each authoring
    /// `posts_per_user` posts.
    ///
    /// User `n` (from 1) is `user{n}` aged `17 + n`.
    pub fn populated_blog(config: Config, users: u64, posts_per_user: u64) -> TestDatabase {
        let db = TestDatabase::memory_with_config(config);
        register_blog(&db);
        db.transaction(|txn| {
            for n in 1..=users {
                let author = txn.create("User", user(&format!("user{n}"), 17 + n as i64))?;
                for p in 0..posts_per_user {
                    txn.create("Post", post(author.id.as_u64(), &format!("post {n}.{p}")))?;
                }
            }
            Ok(())
        })
        .expect("Failed to populate database");
        db
    }
}
