//! Transaction manager.

use super::state::{CommitSummary, TransactionState};
use crate::error::{CoreError, CoreResult};
use crate::store::RecordStore;
use crate::types::{ChunkId, TransactionId, View};
use tracing::{debug, info, warn};

/// Drives the single write transaction of a database.
///
/// The manager owns no data: staged writes live in the [`RecordStore`],
/// and the manager decides when they become committed. The commit
/// sequence is:
///
/// 1. re-verify uniqueness and foreign keys of every staged operation,
/// 2. write every dirty chunk once, in ascending (model, chunk id) order,
/// 3. write the catalog,
/// 4. make the staged state committed in memory.
///
/// The catalog is written last, so a failure in steps 1-3 leaves the
/// persisted catalog describing the previous commit.
#[derive(Debug)]
pub struct TransactionManager {
    state: TransactionState,
    next_txid: u64,
    committed: u64,
    rolled_back: u64,
    failed: u64,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    /// Creates an idle manager.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: TransactionState::Idle,
            next_txid: 1,
            committed: 0,
            rolled_back: 0,
            failed: 0,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> TransactionState {
        self.state
    }

    /// Returns true if a transaction is running.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !self.state.is_idle()
    }

    /// Number of successful commits.
    #[must_use]
    pub const fn committed(&self) -> u64 {
        self.committed
    }

    /// Number of rollbacks, explicit or by drop.
    #[must_use]
    pub const fn rolled_back(&self) -> u64 {
        self.rolled_back
    }

    /// Number of commits that failed and discarded their changes.
    #[must_use]
    pub const fn failed(&self) -> u64 {
        self.failed
    }

    /// Starts a transaction.
    pub fn begin(&mut self, store: &RecordStore) -> CoreResult<TransactionId> {
        if let Some(current) = self.state.current() {
            return Err(CoreError::transaction(format!(
                "another transaction ({current}) is active"
            )));
        }
        if store.staged_ops() > 0 {
            return Err(CoreError::transaction(
                "record store holds staged changes outside a transaction",
            ));
        }
        let id = TransactionId::new(self.next_txid);
        self.next_txid += 1;
        self.state = TransactionState::Active(id);
        debug!(txn = %id, "began transaction");
        Ok(id)
    }

    /// Fails unless `id` is the active transaction.
    pub fn ensure_active(&self, id: TransactionId) -> CoreResult<()> {
        match self.state {
            TransactionState::Active(current) if current == id => Ok(()),
            _ => Err(CoreError::transaction(format!("{id} is no longer active"))),
        }
    }

    /// Commits the active transaction.
    ///
    /// On any failure the staged state is discarded, the manager returns to
    /// idle and the error is returned. A poisoned transaction is refused the
    /// same way.
    pub fn commit(&mut self, store: &mut RecordStore, id: TransactionId) -> CoreResult<CommitSummary> {
        self.ensure_active(id)?;
        if store.is_poisoned() {
            store.discard_staged(&[]);
            self.state = TransactionState::Idle;
            self.failed += 1;
            warn!(txn = %id, "refused to commit a transaction left partial by a failed operation");
            return Err(CoreError::transaction(format!(
                "{id} was left partial by a failed operation and has been rolled back"
            )));
        }

        self.state = TransactionState::Committing(id);
        let operations = store.staged_ops();
        let mut written: Vec<(String, ChunkId)> = Vec::new();
        match Self::write_staged(store, &mut written) {
            Ok(skipped) => {
                store.commit_staged();
                self.state = TransactionState::Idle;
                self.committed += 1;
                let summary = CommitSummary {
                    txn: id,
                    operations,
                    chunks_written: written.len(),
                    chunks_skipped: skipped,
                };
                info!(
                    txn = %id,
                    operations,
                    chunks_written = summary.chunks_written,
                    chunks_skipped = skipped,
                    "committed transaction"
                );
                Ok(summary)
            }
            Err(e) => {
                store.discard_staged(&written);
                self.state = TransactionState::Idle;
                self.failed += 1;
                if written.is_empty() {
                    warn!(txn = %id, error = %e, "commit failed, changes discarded");
                } else {
                    warn!(
                        txn = %id,
                        error = %e,
                        chunks_written = written.len(),
                        "commit failed after writing chunks; on-disk state is partial, reload and verify"
                    );
                }
                Err(e)
            }
        }
    }

    /// Steps 1-3 of the commit. Returns how many dirty chunks were skipped
    /// because their bytes were unchanged.
    fn write_staged(store: &RecordStore, written: &mut Vec<(String, ChunkId)>) -> CoreResult<usize> {
        store.verify_staged()?;
        if !store.has_pending_writes() {
            return Ok(0);
        }
        let mut skipped = 0;
        for (model, chunk_id, chunk) in store.chunks().pending_flushes() {
            if store.chunks().flush(&model, chunk_id, &chunk)? {
                written.push((model, chunk_id));
            } else {
                skipped += 1;
            }
        }
        store.save_catalog(View::Staged)?;
        Ok(skipped)
    }

    /// Discards the active transaction's staged state. No I/O happens.
    pub fn rollback(&mut self, store: &mut RecordStore, id: TransactionId) -> CoreResult<()> {
        self.ensure_active(id)?;
        let operations = store.staged_ops();
        store.discard_staged(&[]);
        self.state = TransactionState::Idle;
        self.rolled_back += 1;
        debug!(txn = %id, operations, "rolled back transaction");
        Ok(())
    }

    /// Rewrites chunks left stale by an earlier failed commit, through an
    /// empty transaction. Does nothing when no chunk is stale.
    pub fn flush_stale(&mut self, store: &mut RecordStore) -> CoreResult<()> {
        if !store.chunks().has_stale_chunks() {
            return Ok(());
        }
        let id = self.begin(store)?;
        self.commit(store, id)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{chunk_key, Catalog, CATALOG_KEY};
    use crate::chunk::Chunk;
    use crate::clock::FixedClock;
    use crate::record::IntoFields;
    use crate::schema::{FieldDef, ModelDef};
    use crate::types::RecordId;
    use jsondb_storage::{InMemoryBackend, StorageBackend};
    use serde_json::json;
    use std::sync::Arc;

    fn open(backend: &Arc<InMemoryBackend>) -> RecordStore {
        let shared: Arc<dyn StorageBackend> = Arc::clone(backend) as Arc<dyn StorageBackend>;
        let mut store =
            RecordStore::open(shared, 2, 8, Arc::new(FixedClock::at_unix(1_700_000_000))).unwrap();
        if store.registry().model("User").is_none() {
            store
                .register(
                    ModelDef::new("User")
                        .field(FieldDef::integer("id").primary_key())
                        .field(FieldDef::string("name").unique()),
                )
                .unwrap();
        }
        store
    }

    fn create(store: &mut RecordStore, name: &str) {
        let fields = json!({ "name": name }).into_fields().unwrap();
        store.create("User", fields).unwrap();
    }

    fn name_of(store: &RecordStore, id: u64) -> String {
        let record = store.get("User", RecordId::new(id), View::Committed).unwrap();
        record.get("name").unwrap().as_str().unwrap().to_string()
    }

    #[test]
    fn single_active_transaction() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = open(&backend);
        let mut txns = TransactionManager::new();

        let first = txns.begin(&store).unwrap();
        assert_eq!(txns.state(), TransactionState::Active(first));
        let err = txns.begin(&store).unwrap_err();
        assert!(matches!(err, CoreError::Transaction { .. }));
        assert!(err.to_string().contains("txn:1"));
    }

    #[test]
    fn stale_handle_is_rejected() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut store = open(&backend);
        let mut txns = TransactionManager::new();

        let first = txns.begin(&store).unwrap();
        txns.rollback(&mut store, first).unwrap();
        let second = txns.begin(&store).unwrap();

        assert_ne!(first, second);
        assert!(txns.commit(&mut store, first).is_err());
        assert!(txns.ensure_active(second).is_ok());
    }

    #[test]
    fn commit_writes_chunks_then_catalog() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut store = open(&backend);
        let mut txns = TransactionManager::new();

        let id = txns.begin(&store).unwrap();
        create(&mut store, "ann");
        create(&mut store, "bob");
        create(&mut store, "cid");
        let summary = txns.commit(&mut store, id).unwrap();

        assert_eq!(summary.operations, 3);
        assert_eq!(summary.chunks_written, 2);
        assert!(txns.state().is_idle());
        assert_eq!(store.count("User", View::Committed).unwrap(), 3);

        let catalog = Catalog::load(backend.as_ref()).unwrap().unwrap();
        assert_eq!(catalog.counters.get("User").unwrap().total_records, 3);
        assert_eq!(catalog.counters.get("User").unwrap().next_id, 4);
        assert!(backend.exists(&chunk_key("User", ChunkId::new(1))).unwrap());
    }

    #[test]
    fn empty_commit_does_no_io() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut store = open(&backend);
        let mut txns = TransactionManager::new();
        let writes = backend.write_count();

        let id = txns.begin(&store).unwrap();
        let summary = txns.commit(&mut store, id).unwrap();

        assert_eq!(summary.chunks_written, 0);
        assert_eq!(backend.write_count(), writes);
    }

    #[test]
    fn rollback_discards_without_io() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut store = open(&backend);
        let mut txns = TransactionManager::new();
        let writes = backend.write_count();

        let id = txns.begin(&store).unwrap();
        create(&mut store, "ann");
        txns.rollback(&mut store, id).unwrap();

        assert_eq!(backend.write_count(), writes);
        assert_eq!(store.count("User", View::Staged).unwrap(), 0);
        assert_eq!(txns.rolled_back(), 1);
    }

    #[test]
    fn rejected_single_operation_keeps_transaction_usable() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut store = open(&backend);
        let mut txns = TransactionManager::new();

        let id = txns.begin(&store).unwrap();
        create(&mut store, "ann");
        let dup = json!({ "name": "ann" }).into_fields().unwrap();
        assert!(store.create("User", dup).is_err());
        assert!(!store.is_poisoned());

        let summary = txns.commit(&mut store, id).unwrap();
        assert_eq!(summary.operations, 1);
        assert_eq!(store.count("User", View::Committed).unwrap(), 1);
    }

    #[test]
    fn failed_commit_leaves_catalog_unchanged() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut store = open(&backend);
        let mut txns = TransactionManager::new();
        let before = backend.read(CATALOG_KEY).unwrap();

        let id = txns.begin(&store).unwrap();
        create(&mut store, "ann");
        create(&mut store, "bob");
        create(&mut store, "cid");
        backend.fail_writes_after(1);
        let err = txns.commit(&mut store, id).unwrap_err();

        assert!(err.is_storage());
        assert!(txns.state().is_idle());
        assert_eq!(txns.failed(), 1);
        assert_eq!(backend.read(CATALOG_KEY).unwrap(), before);
        assert_eq!(store.count("User", View::Staged).unwrap(), 0);
        assert_eq!(store.count("User", View::Committed).unwrap(), 0);
    }

    #[test]
    fn next_commit_repairs_stale_chunks() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut store = open(&backend);
        let mut txns = TransactionManager::new();

        let id = txns.begin(&store).unwrap();
        create(&mut store, "ann");
        create(&mut store, "bob");
        txns.commit(&mut store, id).unwrap();

        // Chunk 0 is full, so the third record links chunk 0 to a new
        // chunk 1. Only the chunk 0 write succeeds.
        let id = txns.begin(&store).unwrap();
        let changes = json!({ "name": "ANN" }).into_fields().unwrap();
        store.update("User", RecordId::new(1), changes).unwrap();
        create(&mut store, "cid");
        backend.fail_writes_after(1);
        assert!(txns.commit(&mut store, id).is_err());
        backend.clear_faults();

        assert!(store.chunks().has_stale_chunks());
        assert_eq!(name_of(&store, 1), "ann");

        txns.flush_stale(&mut store).unwrap();
        assert!(!store.chunks().has_stale_chunks());

        let key = chunk_key("User", ChunkId::FIRST);
        let data = backend.read(&key).unwrap().unwrap();
        let schema = store.schema("User").unwrap();
        let chunk = Chunk::decode(&data, &schema, ChunkId::FIRST).unwrap();
        assert_eq!(chunk.next_chunk, None);
        assert_eq!(
            chunk.record(RecordId::new(1)).unwrap().get("name"),
            Some(&crate::value::Value::from("ann"))
        );
    }

    #[test]
    fn poisoned_transaction_is_refused() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut store = open(&backend);
        let mut txns = TransactionManager::new();

        let id = txns.begin(&store).unwrap();
        create(&mut store, "ann");
        create(&mut store, "bob");
        txns.commit(&mut store, id).unwrap();

        let id = txns.begin(&store).unwrap();
        let clash = json!({ "name": "same" }).into_fields().unwrap();
        let predicate = crate::query::field("id").ge(1);
        assert!(store.update_where("User", &predicate, &clash).is_err());
        assert!(store.is_poisoned());

        let err = txns.commit(&mut store, id).unwrap_err();
        assert!(matches!(err, CoreError::Transaction { .. }));
        assert!(!store.is_poisoned());
        assert_eq!(name_of(&store, 1), "ann");
        assert!(txns.begin(&store).is_ok());
    }
}
