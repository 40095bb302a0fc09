//! The query engine.
//!
//! Queries are built with [`Query`], compiled into a [`Plan`] against the
//! schema registry, then executed over record store reads:
//!
//! 1. scan (or index lookup) of the driving model with pushed-down filters,
//! 2. joins in declaration order,
//! 3. residual filters,
//! 4. grouping and aggregates, then `having`,
//! 5. sorting, offset and limit.

mod aggregate;
mod builder;
mod executor;
mod pattern;
mod plan;
mod predicate;
mod result;

pub use builder::{Aggregate, AggregateFunc, Direction, JoinKind, Query};
pub use plan::Plan;
pub use predicate::{and_, field, not_, or_, CompareOp, FieldExpr, Predicate};
pub use result::{QueryResult, Row};

use crate::error::CoreResult;
use crate::store::RecordStore;
use crate::types::{RecordId, View};

/// Compiles and runs queries against one view of a record store.
#[derive(Debug, Clone, Copy)]
pub struct QueryEngine<'a> {
    store: &'a RecordStore,
    view: View,
}

impl<'a> QueryEngine<'a> {
    /// Creates an engine reading `view`.
    #[must_use]
    pub const fn new(store: &'a RecordStore, view: View) -> Self {
        Self { store, view }
    }

    /// Resolves every name in the query and chooses an access path.
    pub fn compile(&self, query: &Query) -> CoreResult<Plan> {
        plan::compile(self.store.registry(), query)
    }

    /// Compiles and runs a query.
    pub fn execute(&self, query: &Query) -> CoreResult<QueryResult> {
        let plan = self.compile(query)?;
        self.run(&plan)
    }

    /// Runs a compiled plan.
    ///
    /// The plan must come from the current schema; a plan compiled before
    /// an alteration may reference fields that no longer exist.
    pub fn run(&self, plan: &Plan) -> CoreResult<QueryResult> {
        executor::execute(self.store, plan, self.view)
    }

    /// First row of the result, if any.
    pub fn first(&self, query: &Query) -> CoreResult<Option<Row>> {
        let mut query = query.clone();
        query.limit = Some(query.limit.map_or(1, |n| n.min(1)));
        Ok(self.execute(&query)?.rows.into_iter().next())
    }

    /// Number of rows the query returns.
    pub fn count(&self, query: &Query) -> CoreResult<usize> {
        Ok(self.execute(query)?.len())
    }

    /// Human-readable description of the compiled plan.
    pub fn explain(&self, query: &Query) -> CoreResult<String> {
        Ok(self.compile(query)?.to_string())
    }
}

/// Ids of the records of `model` matching `predicate`, in scan order.
pub(crate) fn matching_ids(
    store: &RecordStore,
    model: &str,
    predicate: &Predicate,
    view: View,
) -> CoreResult<Vec<RecordId>> {
    let query = Query::from(model).filter(predicate.clone());
    Ok(QueryEngine::new(store, view).execute(&query)?.ids())
}

#[cfg(test)]
mod tests;
