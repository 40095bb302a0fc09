//! Plan execution over record store reads.

use super::aggregate::Accumulator;
use super::builder::{AggregateFunc, Direction, JoinKind};
use super::plan::{Access, Column, JoinStep, Link, Output, Plan};
use super::result::{QueryResult, Row};
use crate::error::CoreResult;
use crate::record::Record;
use crate::store::RecordStore;
use crate::types::{RecordId, View};
use crate::value::{IndexKey, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

static NULL: Value = Value::Null;

/// One candidate row: a record (or a left-join miss) per bound slot.
type Bound = Vec<Option<Arc<Record>>>;

fn value<'r>(row: &'r [Option<Arc<Record>>], col: &Column) -> &'r Value {
    row.get(col.slot)
        .and_then(Option::as_ref)
        .and_then(|r| r.get(&col.field))
        .unwrap_or(&NULL)
}

fn driving_id(row: &[Option<Arc<Record>>]) -> Option<RecordId> {
    row.first().and_then(Option::as_ref).map(|r| r.id)
}

fn directed(ord: Ordering, direction: Direction) -> Ordering {
    match direction {
        Direction::Asc => ord,
        Direction::Desc => ord.reverse(),
    }
}

pub(crate) fn execute(store: &RecordStore, plan: &Plan, view: View) -> CoreResult<QueryResult> {
    let mut fetch = Fetcher::new(store, view);
    let driving = plan.driving_model();

    let mut rows: Vec<Bound> = Vec::new();
    let mut consider = |record: Arc<Record>| {
        let row = vec![Some(record)];
        if plan.pushed.iter().all(|c| c.eval(&|col: &Column| value(&row, col))) {
            rows.push(row);
        }
    };
    match &plan.access {
        Access::Scan => {
            for record in store.scan(driving, view)? {
                consider(Arc::new(record?));
            }
        }
        Access::Lookup { field, value: key } => {
            for record in fetch.by_field(driving, field, key)? {
                consider(record);
            }
        }
    }
    let scanned = rows.len();

    for step in &plan.joins {
        rows = join(&mut fetch, step, rows)?;
    }
    rows.retain(|row| plan.residual.iter().all(|c| c.eval(&|col: &Column| value(row, col))));

    let (names, mut out) = match &plan.output {
        Output::Records {
            columns,
            names,
            order,
        } => {
            if !order.is_empty() {
                rows.sort_by(|a, b| {
                    order
                        .iter()
                        .map(|(col, dir)| directed(value(a, col).sort_cmp(value(b, col)), *dir))
                        .find(|o| o.is_ne())
                        .unwrap_or_else(|| driving_id(a).cmp(&driving_id(b)))
                });
            }
            let out: Vec<Row> = rows
                .iter()
                .map(|row| {
                    Row::new(
                        driving_id(row),
                        Arc::clone(names),
                        columns.iter().map(|c| value(row, c).clone()).collect(),
                    )
                })
                .collect();
            (Arc::clone(names), out)
        }
        Output::Grouped {
            keys,
            aggregates,
            names,
            having,
            order,
        } => {
            let mut grouped = group(&rows, keys, aggregates);
            if let Some(having) = having {
                grouped.retain(|values| having.eval(&|i: &usize| &values[*i]));
            }
            if !order.is_empty() {
                grouped.sort_by(|a, b| {
                    order
                        .iter()
                        .map(|(i, dir)| directed(a[*i].sort_cmp(&b[*i]), *dir))
                        .find(|o| o.is_ne())
                        .unwrap_or(Ordering::Equal)
                });
            }
            let out = grouped
                .into_iter()
                .map(|values| Row::new(None, Arc::clone(names), values))
                .collect();
            (Arc::clone(names), out)
        }
    };

    let end = plan.limit.map_or(out.len(), |n| plan.offset.saturating_add(n).min(out.len()));
    let start = plan.offset.min(end);
    out.truncate(end);
    out.drain(..start);

    debug!(model = driving, scanned, returned = out.len(), "executed query");
    Ok(QueryResult {
        columns: names,
        rows: out,
    })
}

fn join(fetch: &mut Fetcher<'_>, step: &JoinStep, rows: Vec<Bound>) -> CoreResult<Vec<Bound>> {
    let mut next = Vec::with_capacity(rows.len());
    for row in rows {
        let matches = match row.get(step.bound).and_then(Option::as_ref) {
            Some(record) => fetch.linked(step, record)?,
            None => Vec::new(),
        };
        if matches.is_empty() {
            if step.kind == JoinKind::Left {
                let mut row = row;
                row.push(None);
                next.push(row);
            }
            continue;
        }
        for record in matches {
            let mut joined = row.clone();
            joined.push(Some(record));
            next.push(joined);
        }
    }
    Ok(next)
}

/// Buckets rows by key tuple in first-occurrence order and folds the
/// aggregates. Without keys there is exactly one group, even for no rows.
fn group(
    rows: &[Bound],
    keys: &[Column],
    aggregates: &[(AggregateFunc, Option<Column>)],
) -> Vec<Vec<Value>> {
    let fresh = || aggregates.iter().map(|(f, _)| Accumulator::new(*f)).collect::<Vec<_>>();
    let mut positions: HashMap<Vec<IndexKey>, usize> = HashMap::new();
    let mut groups: Vec<(Vec<Value>, Vec<Accumulator>)> = Vec::new();
    if keys.is_empty() {
        positions.insert(Vec::new(), 0);
        groups.push((Vec::new(), fresh()));
    }

    for row in rows {
        let key_values: Vec<Value> = keys.iter().map(|c| value(row, c).clone()).collect();
        let hashed: Vec<IndexKey> = key_values.iter().map(IndexKey::from).collect();
        let at = *positions.entry(hashed).or_insert_with(|| {
            groups.push((key_values, fresh()));
            groups.len() - 1
        });
        for (acc, (_, col)) in groups[at].1.iter_mut().zip(aggregates) {
            acc.push(col.as_ref().map(|c| value(row, c)));
        }
    }

    groups
        .into_iter()
        .map(|(mut values, accs)| {
            values.extend(accs.into_iter().map(Accumulator::finish));
            values
        })
        .collect()
}

/// Record lookups for one query execution.
///
/// Join keys are primary keys, foreign keys or unique fields, all of which
/// are indexed, so every lookup goes through the store's indexes. Records
/// reached more than once are shared.
struct Fetcher<'s> {
    store: &'s RecordStore,
    view: View,
    records: HashMap<(String, RecordId), Arc<Record>>,
}

impl<'s> Fetcher<'s> {
    fn new(store: &'s RecordStore, view: View) -> Self {
        Self {
            store,
            view,
            records: HashMap::new(),
        }
    }

    fn record(&mut self, model: &str, id: RecordId) -> CoreResult<Option<Arc<Record>>> {
        let key = (model.to_string(), id);
        if let Some(record) = self.records.get(&key) {
            return Ok(Some(Arc::clone(record)));
        }
        let Some(record) = self.store.find(model, id, self.view)? else {
            return Ok(None);
        };
        let record = Arc::new(record);
        self.records.insert(key, Arc::clone(&record));
        Ok(Some(record))
    }

    fn by_field(&mut self, model: &str, field: &str, value: &Value) -> CoreResult<Vec<Arc<Record>>> {
        let mut out = Vec::new();
        for id in self.store.ids_matching(model, field, value, self.view)? {
            out.extend(self.record(model, id)?);
        }
        Ok(out)
    }

    fn linked(&mut self, step: &JoinStep, record: &Record) -> CoreResult<Vec<Arc<Record>>> {
        match &step.link {
            Link::Direct {
                bound_field,
                new_field,
            } => {
                let key = record.get(bound_field).unwrap_or(&NULL);
                self.by_field(&step.model, new_field, key)
            }
            Link::Junction {
                junction,
                bound_field,
                junction_bound,
                junction_new,
                new_field,
            } => {
                let key = record.get(bound_field).unwrap_or(&NULL);
                let mut out = Vec::new();
                for link in self.by_field(junction, junction_bound, key)? {
                    let target = link.get(junction_new).unwrap_or(&NULL);
                    out.extend(self.by_field(&step.model, new_field, target)?);
                }
                Ok(out)
            }
        }
    }
}
