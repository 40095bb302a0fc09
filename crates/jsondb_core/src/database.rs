//! Database facade.
//!
//! This module provides the main entry point for interacting with JsonDB.

use crate::config::Config;
use crate::dir::DatabaseDir;
use crate::error::{CoreError, CoreResult};
use crate::export::{ModelExport, RecordExport};
use crate::query::{Predicate, Query, QueryEngine, QueryResult, Row};
use crate::record::{IntoFields, Record};
use crate::schema::{ModelDef, ModelSchema, SchemaChange};
use crate::stats::{DatabaseStats, ModelStats, OperationCounters};
use crate::store::RecordStore;
use crate::transaction::{CommitSummary, Transaction, TransactionManager};
use crate::types::{RecordId, TransactionId, View};
use crate::verify::{self, VerifyReport};
use jsondb_storage::{FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// State guarded by the database lock.
struct Inner {
    store: RecordStore,
    txns: TransactionManager,
}

/// The main database handle.
///
/// `Database` is the primary interface for JsonDB. It provides:
/// - Model registration and schema alteration
/// - Transactional and auto-commit writes
/// - Record reads and queries over the committed state
/// - Export, statistics and verification
///
/// One write transaction runs at a time. Reads on `Database` never wait for
/// it to finish and see the state of the last commit; reads through the
/// [`Transaction`] handle also see its staged writes.
///
/// # Example
///
/// ```rust
/// use jsondb_core::{Database, FieldDef, ModelDef};
/// use jsondb_core::query::{field, Query};
/// use serde_json::json;
///
/// let db = Database::open_in_memory()?;
/// db.register(
///     ModelDef::new("User")
///         .field(FieldDef::integer("id").primary_key())
///         .field(FieldDef::string("name").not_null())
///         .field(FieldDef::integer("age")),
/// )?;
///
/// db.transaction(|txn| {
///     txn.create("User", json!({"name": "ann", "age": 30}))?;
///     txn.create("User", json!({"name": "bob", "age": 17}))?;
///     Ok(())
/// })?;
///
/// let adults = db.query(&Query::from("User").filter(field("age").ge(18)))?;
/// assert_eq!(adults.len(), 1);
/// # Ok::<(), jsondb_core::CoreError>(())
/// ```
pub struct Database {
    config: Config,
    /// Directory lock; `None` for databases over a caller-supplied backend.
    dir: Option<DatabaseDir>,
    backend: Arc<dyn StorageBackend>,
    inner: RwLock<Inner>,
    counters: OperationCounters,
}

impl Database {
    /// Opens the database stored in a directory with the default
    /// configuration, creating it if missing.
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens the database stored in a directory.
    ///
    /// Takes the directory's `LOCK` file, so a second open of the same
    /// directory fails with [`CoreError::DatabaseLocked`] until this handle
    /// is dropped.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use jsondb_core::{Config, Database};
    /// use std::path::Path;
    ///
    /// let config = Config::default().chunk_size(500).create_if_missing(false);
    /// let db = Database::open_with_config(Path::new("my_database"), config)?;
    /// # Ok::<(), jsondb_core::CoreError>(())
    /// ```
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        config.validate()?;
        let dir = DatabaseDir::open(path, config.create_if_missing)?;

        if !config.create_if_missing && !dir.has_catalog() {
            return Err(CoreError::invalid_format(
                "database does not exist and create_if_missing is false",
            ));
        }
        if config.error_if_exists && dir.has_catalog() {
            return Err(CoreError::invalid_format(
                "database already exists and error_if_exists is true",
            ));
        }

        let backend: Arc<dyn StorageBackend> = Arc::new(FileBackend::open(dir.path())?);
        let mut db = Self::open_with_backend(backend, config)?;
        db.dir = Some(dir);
        info!(path = %path.display(), "opened database");
        Ok(db)
    }

    /// Opens a database over a caller-supplied backend.
    ///
    /// No lock file is taken; the caller owns exclusive access.
    pub fn open_with_backend(backend: Arc<dyn StorageBackend>, config: Config) -> CoreResult<Self> {
        config.validate()?;
        let store = RecordStore::open(
            Arc::clone(&backend),
            config.chunk_size,
            config.max_cached_chunks,
            Arc::clone(&config.clock),
        )?;
        Ok(Self {
            config,
            dir: None,
            backend,
            inner: RwLock::new(Inner {
                store,
                txns: TransactionManager::new(),
            }),
            counters: OperationCounters::default(),
        })
    }

    /// Opens a fresh in-memory database.
    ///
    /// Data is lost when the database is dropped.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_with_backend(Arc::new(InMemoryBackend::new()), Config::default())
    }

    /// The database directory, if the database is file-backed.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(DatabaseDir::path)
    }

    /// Returns database configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    // ========================================================================
    // Schema
    // ========================================================================

    /// Registers a model and persists the catalog.
    pub fn register(&self, def: ModelDef) -> CoreResult<Arc<ModelSchema>> {
        self.schema_change(|store| store.register(def))
    }

    /// Registers a model unless an identical definition is already
    /// registered. Returns true if the model was newly registered.
    pub fn ensure(&self, def: ModelDef) -> CoreResult<bool> {
        self.schema_change(|store| store.ensure(def).map(|(_, created)| created))
    }

    /// Alters a registered model, bumping its schema version.
    pub fn alter_model(&self, model: &str, change: SchemaChange) -> CoreResult<Arc<ModelSchema>> {
        self.schema_change(|store| store.alter_model(model, change))
    }

    fn schema_change<T>(&self, op: impl FnOnce(&mut RecordStore) -> CoreResult<T>) -> CoreResult<T> {
        let mut guard = self.inner.write();
        let Inner { store, txns } = &mut *guard;
        if let Some(current) = txns.state().current() {
            return Err(CoreError::transaction(format!(
                "cannot change the schema while {current} is active"
            )));
        }
        txns.flush_stale(store)?;
        op(store)
    }

    /// Looks up a registered model.
    pub fn schema(&self, model: &str) -> CoreResult<Arc<ModelSchema>> {
        self.inner.read().store.schema(model)
    }

    /// Registered model names in registration order.
    #[must_use]
    pub fn models(&self) -> Vec<String> {
        self.inner
            .read()
            .store
            .registry()
            .models()
            .map(|m| m.name().to_string())
            .collect()
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begins a transaction.
    ///
    /// Fails with a transaction error while another transaction is active.
    pub fn begin(&self) -> CoreResult<Transaction<'_>> {
        let mut guard = self.inner.write();
        let Inner { store, txns } = &mut *guard;
        let id = txns.begin(store)?;
        Ok(Transaction::new(self, id))
    }

    /// Executes a function within a transaction.
    ///
    /// If the function returns `Ok`, the transaction is committed.
    /// If it returns `Err`, the transaction is rolled back.
    pub fn transaction<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> CoreResult<T>,
    {
        let txn = self.begin()?;
        match f(&txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                txn.rollback()?;
                Err(e)
            }
        }
    }

    fn autocommit<T>(&self, op: impl FnOnce(&mut RecordStore) -> CoreResult<T>) -> CoreResult<T> {
        let mut guard = self.inner.write();
        let Inner { store, txns } = &mut *guard;
        let id = txns.begin(store)?;
        match op(store) {
            Ok(value) => {
                txns.commit(store, id)?;
                Ok(value)
            }
            Err(e) => {
                txns.rollback(store, id)?;
                Err(e)
            }
        }
    }

    /// Runs `op` on the store on behalf of the active transaction `id`.
    pub(crate) fn staged_write<T>(
        &self,
        id: TransactionId,
        op: impl FnOnce(&mut RecordStore) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let mut guard = self.inner.write();
        let Inner { store, txns } = &mut *guard;
        txns.ensure_active(id)?;
        op(store)
    }

    /// Runs a read on the store on behalf of the active transaction `id`.
    pub(crate) fn staged_read<T>(
        &self,
        id: TransactionId,
        op: impl FnOnce(&RecordStore) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let guard = self.inner.read();
        guard.txns.ensure_active(id)?;
        op(&guard.store)
    }

    /// Runs a read on the store.
    pub(crate) fn with_store<T>(&self, op: impl FnOnce(&RecordStore) -> CoreResult<T>) -> CoreResult<T> {
        op(&self.inner.read().store)
    }

    pub(crate) fn commit_transaction(&self, id: TransactionId) -> CoreResult<CommitSummary> {
        let mut guard = self.inner.write();
        let Inner { store, txns } = &mut *guard;
        txns.commit(store, id)
    }

    pub(crate) fn rollback_transaction(&self, id: TransactionId) -> CoreResult<()> {
        let mut guard = self.inner.write();
        let Inner { store, txns } = &mut *guard;
        txns.rollback(store, id)
    }

    /// Rolls back `id` if it is still active.
    pub(crate) fn abandon_transaction(&self, id: TransactionId) {
        let mut guard = self.inner.write();
        let Inner { store, txns } = &mut *guard;
        if txns.ensure_active(id).is_ok() && txns.rollback(store, id).is_ok() {
            debug!(txn = %id, "rolled back dropped transaction");
        }
    }

    pub(crate) const fn counters(&self) -> &OperationCounters {
        &self.counters
    }

    pub(crate) fn run_query(&self, store: &RecordStore, view: View, query: &Query) -> CoreResult<QueryResult> {
        let engine = QueryEngine::new(store, view);
        let plan = engine.compile(query)?;
        self.counters.record_query(plan.uses_index());
        engine.run(&plan)
    }

    // ========================================================================
    // Auto-commit writes
    // ========================================================================

    /// Creates a record in its own transaction.
    pub fn create(&self, model: &str, data: impl IntoFields) -> CoreResult<Record> {
        let data = data.into_fields()?;
        let record = self.autocommit(|store| store.create(model, data))?;
        self.counters.record_writes(1);
        Ok(record)
    }

    /// Updates a record in its own transaction.
    pub fn update(
        &self,
        model: &str,
        id: impl Into<RecordId>,
        changes: impl IntoFields,
    ) -> CoreResult<Record> {
        let changes = changes.into_fields()?;
        let id = id.into();
        let record = self.autocommit(|store| store.update(model, id, changes))?;
        self.counters.record_writes(1);
        Ok(record)
    }

    /// Deletes a record, applying delete policies, in its own transaction.
    /// Returns the number of records deleted, cascades included.
    pub fn delete(&self, model: &str, id: impl Into<RecordId>) -> CoreResult<u64> {
        let id = id.into();
        let deleted = self.autocommit(|store| store.delete(model, id))?;
        self.counters.record_deletes(deleted);
        Ok(deleted)
    }

    /// Updates every matching record in one transaction.
    pub fn update_where(
        &self,
        model: &str,
        predicate: &Predicate,
        changes: impl IntoFields,
    ) -> CoreResult<u64> {
        let changes = changes.into_fields()?;
        let updated = self.autocommit(|store| store.update_where(model, predicate, &changes))?;
        self.counters.record_writes(updated);
        Ok(updated)
    }

    /// Deletes every matching record in one transaction.
    pub fn delete_where(&self, model: &str, predicate: &Predicate) -> CoreResult<u64> {
        let deleted = self.autocommit(|store| store.delete_where(model, predicate))?;
        self.counters.record_deletes(deleted);
        Ok(deleted)
    }

    // ========================================================================
    // Committed reads
    // ========================================================================

    /// Returns a committed record or a not-found error.
    pub fn get(&self, model: &str, id: impl Into<RecordId>) -> CoreResult<Record> {
        self.counters.record_read();
        self.inner.read().store.get(model, id.into(), View::Committed)
    }

    /// Returns a committed record, or `None` if it does not exist.
    pub fn find(&self, model: &str, id: impl Into<RecordId>) -> CoreResult<Option<Record>> {
        self.counters.record_read();
        self.inner.read().store.find(model, id.into(), View::Committed)
    }

    /// Returns true if a committed record exists.
    pub fn exists(&self, model: &str, id: impl Into<RecordId>) -> CoreResult<bool> {
        self.inner.read().store.exists(model, id.into(), View::Committed)
    }

    /// Number of committed records of a model.
    pub fn count(&self, model: &str) -> CoreResult<u64> {
        self.inner.read().store.count(model, View::Committed)
    }

    /// Runs a query over the committed state.
    pub fn query(&self, query: &Query) -> CoreResult<QueryResult> {
        self.run_query(&self.inner.read().store, View::Committed, query)
    }

    /// First row of a query over the committed state.
    pub fn query_first(&self, query: &Query) -> CoreResult<Option<Row>> {
        let limited = query.clone().limit(query.limit.map_or(1, |n| n.min(1)));
        Ok(self.query(&limited)?.rows.into_iter().next())
    }

    /// Number of rows a query returns over the committed state.
    pub fn query_count(&self, query: &Query) -> CoreResult<usize> {
        Ok(self.query(query)?.len())
    }

    /// Describes how a query would be executed.
    pub fn explain(&self, query: &Query) -> CoreResult<String> {
        QueryEngine::new(&self.inner.read().store, View::Committed).explain(query)
    }

    // ========================================================================
    // Export, statistics, verification
    // ========================================================================

    /// Exported definitions of every model, foreign key targets first and
    /// registration order otherwise.
    #[must_use]
    pub fn export_schema(&self) -> Vec<ModelExport> {
        let models = self
            .inner
            .read()
            .store
            .registry()
            .models()
            .map(|schema| ModelExport::from_schema(schema))
            .collect();
        crate::export::dependency_order(models)
    }

    /// Lazy iterator over a model's committed records.
    pub fn export_records(&self, model: &str) -> CoreResult<RecordExport<'_>> {
        RecordExport::new(self, model)
    }

    /// Snapshot of storage figures and operation counters.
    #[must_use]
    pub fn stats(&self) -> DatabaseStats {
        let inner = self.inner.read();
        let store = &inner.store;
        let models: Vec<ModelStats> = store
            .registry()
            .models()
            .map(|schema| {
                let name = schema.name();
                ModelStats {
                    name: name.to_string(),
                    version: schema.version(),
                    records: store.chunks().total_records(name, View::Committed),
                    chunks: store.chunks().chunk_ids(name, View::Committed).len(),
                    next_id: store.next_id(name, View::Committed),
                }
            })
            .collect();
        DatabaseStats {
            total_records: models.iter().map(|m| m.records).sum(),
            models,
            chunk_size: store.chunks().chunk_size(),
            cached_chunks: store.chunks().cached_chunks(),
            transactions_committed: inner.txns.committed(),
            transactions_rolled_back: inner.txns.rolled_back(),
            failed_commits: inner.txns.failed(),
            operations: self.counters.snapshot(),
        }
    }

    /// Cross-checks the persisted catalog and chunk files.
    ///
    /// Writes are held off while the check runs.
    pub fn verify(&self) -> CoreResult<VerifyReport> {
        let _guard = self.inner.read();
        verify::verify_backend(self.backend.as_ref())
    }

    /// Closes the database.
    ///
    /// Chunks left stale by a failed commit are rewritten first. The
    /// directory lock is released when this returns.
    pub fn close(self) -> CoreResult<()> {
        {
            let mut guard = self.inner.write();
            let Inner { store, txns } = &mut *guard;
            txns.flush_stale(store)?;
        }
        info!("closed database");
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Database")
            .field("path", &self.path())
            .field("models", &inner.store.registry().len())
            .field("transaction", &inner.txns.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::field;
    use crate::schema::{FieldDef, OnDelete};
    use crate::value::Value;
    use serde_json::json;
    use tempfile::tempdir;

    fn users() -> ModelDef {
        ModelDef::new("User")
            .field(FieldDef::integer("id").primary_key())
            .field(FieldDef::string("email").unique())
            .field(FieldDef::integer("age"))
    }

    fn create_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.register(users()).unwrap();
        db
    }

    #[test]
    fn database_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Database>();
    }

    #[test]
    fn autocommit_create_and_get() {
        let db = create_db();
        let record = db.create("User", json!({"email": "a@x", "age": 3})).unwrap();

        assert_eq!(record.id, RecordId::new(1));
        assert_eq!(db.get("User", 1_u64).unwrap().get("age"), Some(&Value::Int(3)));
        assert!(db.exists("User", 1_u64).unwrap());
        assert!(db.find("User", 2_u64).unwrap().is_none());
        assert!(matches!(db.get("User", 2_u64), Err(CoreError::NotFound { .. })));
    }

    #[test]
    fn failed_autocommit_leaves_nothing_behind() {
        let db = create_db();
        db.create("User", json!({"email": "a@x"})).unwrap();
        let err = db.create("User", json!({"email": "a@x"})).unwrap_err();

        assert!(matches!(err, CoreError::Uniqueness { .. }));
        assert_eq!(db.count("User").unwrap(), 1);
        assert!(db.begin().is_ok());
    }

    #[test]
    fn readers_see_committed_snapshot() {
        let db = create_db();
        db.create("User", json!({"email": "a@x", "age": 1})).unwrap();

        let txn = db.begin().unwrap();
        txn.update("User", 1_u64, json!({"age": 2})).unwrap();
        txn.create("User", json!({"email": "b@x"})).unwrap();

        assert_eq!(db.get("User", 1_u64).unwrap().get("age"), Some(&Value::Int(1)));
        assert_eq!(db.count("User").unwrap(), 1);
        assert_eq!(txn.get("User", 1_u64).unwrap().get("age"), Some(&Value::Int(2)));
        assert_eq!(txn.count("User").unwrap(), 2);

        txn.commit().unwrap();
        assert_eq!(db.get("User", 1_u64).unwrap().get("age"), Some(&Value::Int(2)));
        assert_eq!(db.count("User").unwrap(), 2);
    }

    #[test]
    fn dropping_transaction_rolls_back() {
        let db = create_db();
        {
            let txn = db.begin().unwrap();
            txn.create("User", json!({"email": "a@x"})).unwrap();
        }
        assert_eq!(db.count("User").unwrap(), 0);
        assert_eq!(db.stats().transactions_rolled_back, 1);

        let txn = db.begin().unwrap();
        txn.create("User", json!({"email": "a@x"})).unwrap();
        txn.commit().unwrap();
        assert_eq!(db.count("User").unwrap(), 1);
    }

    #[test]
    fn transaction_closure_commits_or_rolls_back() {
        let db = create_db();
        let id = db
            .transaction(|txn| Ok(txn.create("User", json!({"email": "a@x"}))?.id))
            .unwrap();
        assert_eq!(id, RecordId::new(1));

        let result: CoreResult<()> = db.transaction(|txn| {
            txn.create("User", json!({"email": "b@x"}))?;
            txn.create("User", json!({"email": "a@x"}))?;
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(db.count("User").unwrap(), 1);
    }

    #[test]
    fn second_writer_is_refused() {
        let db = create_db();
        let txn = db.begin().unwrap();

        assert!(matches!(db.begin(), Err(CoreError::Transaction { .. })));
        assert!(matches!(
            db.create("User", json!({"email": "a@x"})),
            Err(CoreError::Transaction { .. })
        ));
        assert!(matches!(
            db.register(ModelDef::new("Tag").field(FieldDef::integer("id").primary_key())),
            Err(CoreError::Transaction { .. })
        ));
        txn.rollback().unwrap();
        assert!(db.create("User", json!({"email": "a@x"})).is_ok());
    }

    #[test]
    fn poisoned_transaction_cannot_commit() {
        let db = create_db();
        db.create("User", json!({"email": "a@x"})).unwrap();
        db.create("User", json!({"email": "b@x"})).unwrap();

        let txn = db.begin().unwrap();
        let clash = txn.update_where("User", &field("id").ge(1), json!({"email": "same"}));
        assert!(clash.is_err());
        assert!(matches!(txn.commit(), Err(CoreError::Transaction { .. })));

        assert_eq!(
            db.get("User", 1_u64).unwrap().get("email"),
            Some(&Value::from("a@x"))
        );
        assert_eq!(db.stats().failed_commits, 1);
    }

    #[test]
    fn cascade_and_set_null_on_delete() {
        let db = create_db();
        db.register(
            ModelDef::new("Post")
                .field(FieldDef::integer("id").primary_key())
                .field(
                    FieldDef::integer("author_id")
                        .foreign_key("User.id")
                        .on_delete(OnDelete::Cascade),
                )
                .field(
                    FieldDef::integer("reviewer_id")
                        .foreign_key("User.id")
                        .on_delete(OnDelete::SetNull),
                ),
        )
        .unwrap();
        db.create("User", json!({"email": "a@x"})).unwrap();
        db.create("User", json!({"email": "b@x"})).unwrap();
        db.create("Post", json!({"author_id": 1, "reviewer_id": 2})).unwrap();
        db.create("Post", json!({"author_id": 2, "reviewer_id": 1})).unwrap();

        assert_eq!(db.delete("User", 1_u64).unwrap(), 2);
        assert_eq!(db.count("Post").unwrap(), 1);
        let survivor = db.get("Post", 2_u64).unwrap();
        assert_eq!(survivor.get("reviewer_id"), Some(&Value::Null));
        assert_eq!(survivor.get("author_id"), Some(&Value::Int(2)));
    }

    #[test]
    fn where_operations_autocommit() {
        let db = create_db();
        for (email, age) in [("a@x", 10), ("b@x", 20), ("c@x", 30)] {
            db.create("User", json!({"email": email, "age": age})).unwrap();
        }

        assert_eq!(db.update_where("User", &field("age").ge(20), json!({"age": 0})).unwrap(), 2);
        assert_eq!(db.delete_where("User", &field("age").eq(0)).unwrap(), 2);
        assert_eq!(db.count("User").unwrap(), 1);
    }

    #[test]
    fn queries_and_explain() {
        let db = create_db();
        for (email, age) in [("a@x", 10), ("b@x", 20), ("c@x", 30)] {
            db.create("User", json!({"email": email, "age": age})).unwrap();
        }

        let by_email = Query::from("User").filter(field("email").eq("b@x"));
        assert!(db.explain(&by_email).unwrap().contains("lookup User.email"));
        let row = db.query_first(&by_email).unwrap().unwrap();
        assert_eq!(row.get("age"), Some(&Value::Int(20)));

        let older = Query::from("User").filter(field("age").gt(15));
        assert_eq!(db.query_count(&older).unwrap(), 2);

        let ops = db.stats().operations;
        assert_eq!(ops.queries, 2);
        assert_eq!(ops.index_lookups, 1);
        assert_eq!(ops.scans, 1);
    }

    #[test]
    fn float_literals_match_integer_fields_with_or_without_index() {
        let db = Database::open_in_memory().unwrap();
        db.register(
            ModelDef::new("Player")
                .field(FieldDef::integer("id").primary_key())
                .field(FieldDef::integer("rank").index())
                .field(FieldDef::integer("score")),
        )
        .unwrap();
        db.create("Player", json!({"rank": 30, "score": 30})).unwrap();

        let indexed = Query::from("Player").filter(field("rank").eq(30.0));
        let scanned = Query::from("Player").filter(field("score").eq(30.0));
        assert!(db.explain(&indexed).unwrap().contains("lookup Player.rank"));
        assert_eq!(db.query_count(&indexed).unwrap(), 1);
        assert_eq!(db.query_count(&scanned).unwrap(), 1);
        assert_eq!(db.query_count(&Query::from("Player").filter(field("rank").eq(30.5))).unwrap(), 0);

        assert_eq!(db.update_where("Player", &field("rank").eq(30.0), json!({"score": 1})).unwrap(), 1);
        assert_eq!(db.delete_where("Player", &field("rank").eq(30.0)).unwrap(), 1);
        assert_eq!(db.count("Player").unwrap(), 0);
    }

    #[test]
    fn stats_describe_models() {
        let db = Database::open_with_backend(
            Arc::new(InMemoryBackend::new()),
            Config::new().chunk_size(2),
        )
        .unwrap();
        db.register(users()).unwrap();
        for email in ["a@x", "b@x", "c@x"] {
            db.create("User", json!({ "email": email })).unwrap();
        }

        let stats = db.stats();
        let user = stats.model("User").unwrap();
        assert_eq!(user.records, 3);
        assert_eq!(user.chunks, 2);
        assert_eq!(user.next_id, 4);
        assert_eq!(user.version, 1);
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.transactions_committed, 3);
        assert_eq!(stats.operations.writes, 3);
    }

    #[test]
    fn reopen_restores_records_and_counters() {
        let temp = tempdir().unwrap();
        {
            let db = Database::open(temp.path()).unwrap();
            db.register(users()).unwrap();
            db.create("User", json!({"email": "a@x"})).unwrap();
            db.create("User", json!({"email": "b@x"})).unwrap();
            db.delete("User", 2_u64).unwrap();
            db.close().unwrap();
        }

        let db = Database::open(temp.path()).unwrap();
        assert_eq!(db.models(), ["User"]);
        assert_eq!(db.count("User").unwrap(), 1);
        let record = db.create("User", json!({"email": "c@x"})).unwrap();
        assert_eq!(record.id, RecordId::new(3));
        assert!(matches!(
            db.create("User", json!({"email": "a@x"})),
            Err(CoreError::Uniqueness { .. })
        ));
        assert!(db.verify().unwrap().is_ok());
    }

    #[test]
    fn ensure_is_idempotent_across_reopen() {
        let temp = tempdir().unwrap();
        {
            let db = Database::open(temp.path()).unwrap();
            assert!(db.ensure(users()).unwrap());
            assert!(!db.ensure(users()).unwrap());
        }
        let db = Database::open(temp.path()).unwrap();
        assert!(!db.ensure(users()).unwrap());
        assert_eq!(db.schema("User").unwrap().version(), 1);

        let changed = users().field(FieldDef::string("name"));
        assert!(matches!(db.ensure(changed), Err(CoreError::Schema { .. })));
    }

    #[test]
    fn second_open_of_directory_is_locked() {
        let temp = tempdir().unwrap();
        let _db = Database::open(temp.path()).unwrap();

        let second = Database::open(temp.path());
        assert!(matches!(second, Err(CoreError::DatabaseLocked)));
    }

    #[test]
    fn open_flags_are_honoured() {
        let temp = tempdir().unwrap();
        let missing = Database::open_with_config(
            &temp.path().join("db"),
            Config::new().create_if_missing(false),
        );
        assert!(missing.is_err());

        drop(Database::open(temp.path()).unwrap());
        let exists =
            Database::open_with_config(temp.path(), Config::new().error_if_exists(true));
        assert!(matches!(exists, Err(CoreError::InvalidFormat { .. })));

        let invalid = Database::open_with_config(temp.path(), Config::new().chunk_size(0));
        assert!(matches!(invalid, Err(CoreError::InvalidConfig { .. })));
    }
}
