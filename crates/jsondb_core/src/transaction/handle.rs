//! The transaction handle.

use super::state::CommitSummary;
use crate::database::Database;
use crate::error::CoreResult;
use crate::query::{Predicate, Query, QueryResult, Row};
use crate::record::{IntoFields, Record};
use crate::types::{RecordId, TransactionId, View};
use std::fmt;

/// An active write transaction.
///
/// Writes are staged and become visible to other readers only when
/// [`Transaction::commit`] succeeds. Reads through the handle see the
/// staged writes. Dropping the handle without committing rolls back.
///
/// A multi-record operation (`delete` with cascades, `update_where`,
/// `delete_where`) that fails partway leaves the transaction unusable for
/// commit: committing it fails and discards every staged change.
pub struct Transaction<'db> {
    db: &'db Database,
    id: TransactionId,
    finished: bool,
}

impl fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl<'db> Transaction<'db> {
    pub(crate) const fn new(db: &'db Database, id: TransactionId) -> Self {
        Self {
            db,
            id,
            finished: false,
        }
    }

    /// The transaction id.
    #[must_use]
    pub const fn id(&self) -> TransactionId {
        self.id
    }

    /// Stages a new record.
    pub fn create(&self, model: &str, data: impl IntoFields) -> CoreResult<Record> {
        let data = data.into_fields()?;
        let record = self.db.staged_write(self.id, |store| store.create(model, data))?;
        self.db.counters().record_writes(1);
        Ok(record)
    }

    /// Stages changes to a record.
    pub fn update(
        &self,
        model: &str,
        id: impl Into<RecordId>,
        changes: impl IntoFields,
    ) -> CoreResult<Record> {
        let changes = changes.into_fields()?;
        let id = id.into();
        let record = self
            .db
            .staged_write(self.id, |store| store.update(model, id, changes))?;
        self.db.counters().record_writes(1);
        Ok(record)
    }

    /// Stages the deletion of a record and the delete policies it
    /// triggers. Returns the number of records deleted.
    pub fn delete(&self, model: &str, id: impl Into<RecordId>) -> CoreResult<u64> {
        let id = id.into();
        let deleted = self.db.staged_write(self.id, |store| store.delete(model, id))?;
        self.db.counters().record_deletes(deleted);
        Ok(deleted)
    }

    /// Stages changes to every matching record.
    pub fn update_where(
        &self,
        model: &str,
        predicate: &Predicate,
        changes: impl IntoFields,
    ) -> CoreResult<u64> {
        let changes = changes.into_fields()?;
        let updated = self
            .db
            .staged_write(self.id, |store| store.update_where(model, predicate, &changes))?;
        self.db.counters().record_writes(updated);
        Ok(updated)
    }

    /// Stages the deletion of every matching record.
    pub fn delete_where(&self, model: &str, predicate: &Predicate) -> CoreResult<u64> {
        let deleted = self
            .db
            .staged_write(self.id, |store| store.delete_where(model, predicate))?;
        self.db.counters().record_deletes(deleted);
        Ok(deleted)
    }

    /// Returns a record as this transaction sees it.
    pub fn get(&self, model: &str, id: impl Into<RecordId>) -> CoreResult<Record> {
        let id = id.into();
        self.db.counters().record_read();
        self.db
            .staged_read(self.id, |store| store.get(model, id, View::Staged))
    }

    /// Returns a record as this transaction sees it, or `None`.
    pub fn find(&self, model: &str, id: impl Into<RecordId>) -> CoreResult<Option<Record>> {
        let id = id.into();
        self.db.counters().record_read();
        self.db
            .staged_read(self.id, |store| store.find(model, id, View::Staged))
    }

    /// Returns true if the record exists as this transaction sees it.
    pub fn exists(&self, model: &str, id: impl Into<RecordId>) -> CoreResult<bool> {
        let id = id.into();
        self.db
            .staged_read(self.id, |store| store.exists(model, id, View::Staged))
    }

    /// Number of records as this transaction sees them.
    pub fn count(&self, model: &str) -> CoreResult<u64> {
        self.db
            .staged_read(self.id, |store| store.count(model, View::Staged))
    }

    /// Runs a query over this transaction's view.
    pub fn query(&self, query: &Query) -> CoreResult<QueryResult> {
        self.db
            .staged_read(self.id, |store| self.db.run_query(store, View::Staged, query))
    }

    /// First row of a query over this transaction's view.
    pub fn query_first(&self, query: &Query) -> CoreResult<Option<Row>> {
        let limited = query.clone().limit(query.limit.map_or(1, |n| n.min(1)));
        Ok(self.query(&limited)?.rows.into_iter().next())
    }

    /// Number of rows a query returns over this transaction's view.
    pub fn query_count(&self, query: &Query) -> CoreResult<usize> {
        Ok(self.query(query)?.len())
    }

    /// Commits the transaction.
    ///
    /// On failure every staged change is discarded and the error returned.
    pub fn commit(mut self) -> CoreResult<CommitSummary> {
        self.finished = true;
        self.db.commit_transaction(self.id)
    }

    /// Discards every staged change.
    pub fn rollback(mut self) -> CoreResult<()> {
        self.finished = true;
        self.db.rollback_transaction(self.id)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.db.abandon_transaction(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::query::{field, Query};
    use crate::schema::{FieldDef, ModelDef};
    use crate::{CoreError, Database};
    use serde_json::json;

    fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.register(
            ModelDef::new("Item")
                .field(FieldDef::integer("id").primary_key())
                .field(FieldDef::string("sku").unique())
                .field(FieldDef::integer("qty")),
        )
        .unwrap();
        db
    }

    #[test]
    fn staged_queries_see_own_writes() {
        let db = db();
        let txn = db.begin().unwrap();
        txn.create("Item", json!({"sku": "a", "qty": 1})).unwrap();
        txn.create("Item", json!({"sku": "b", "qty": 5})).unwrap();

        let big = Query::from("Item").filter(field("qty").gt(2));
        assert_eq!(txn.query_count(&big).unwrap(), 1);
        assert_eq!(db.query_count(&big).unwrap(), 0);
        let row = txn.query_first(&big).unwrap().unwrap();
        assert_eq!(row.get("sku").unwrap().as_str(), Some("b"));
        txn.commit().unwrap();
    }

    #[test]
    fn transaction_ids_are_not_reused() {
        let db = db();
        let first = db.begin().unwrap();
        let id = first.id();
        first.rollback().unwrap();

        let second = db.begin().unwrap();
        assert_ne!(second.id(), id);
        assert!(second.exists("Item", 1_u64).is_ok());
        second.rollback().unwrap();
    }

    #[test]
    fn commit_reports_chunks_written() {
        let db = db();
        let txn = db.begin().unwrap();
        txn.create("Item", json!({"sku": "a"})).unwrap();
        txn.update("Item", 1_u64, json!({"qty": 9})).unwrap();
        let summary = txn.commit().unwrap();

        assert_eq!(summary.operations, 2);
        assert_eq!(summary.chunks_written, 1);
    }

    #[test]
    fn failed_operation_keeps_transaction_open() {
        let db = db();
        let txn = db.begin().unwrap();
        txn.create("Item", json!({"sku": "a"})).unwrap();
        let err = txn.create("Item", json!({"sku": "a"})).unwrap_err();
        assert!(matches!(err, CoreError::Uniqueness { .. }));

        txn.create("Item", json!({"sku": "b"})).unwrap();
        txn.commit().unwrap();
        assert_eq!(db.count("Item").unwrap(), 2);
    }

    #[test]
    fn delete_where_in_transaction() {
        let db = db();
        db.transaction(|txn| {
            for (sku, qty) in [("a", 1), ("b", 2), ("c", 3)] {
                txn.create("Item", json!({"sku": sku, "qty": qty}))?;
            }
            Ok(())
        })
        .unwrap();

        let txn = db.begin().unwrap();
        assert_eq!(txn.delete_where("Item", &field("qty").lt(3)).unwrap(), 2);
        assert_eq!(txn.count("Item").unwrap(), 1);
        assert_eq!(db.count("Item").unwrap(), 3);
        assert!(txn.find("Item", 1_u64).unwrap().is_none());
        txn.commit().unwrap();
        assert_eq!(db.count("Item").unwrap(), 1);
    }
}
