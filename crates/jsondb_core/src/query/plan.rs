//! Query compilation.
//!
//! A [`Query`] is resolved against the schema registry into a [`Plan`]:
//! every name becomes a slot/field pair, literals are coerced to the
//! field's kind, and the filter is split into conjuncts pushed into the
//! driving scan and conjuncts evaluated after the joins.

use super::builder::{AggregateFunc, Direction, JoinClause, JoinKind, Query};
use super::pattern::like;
use super::predicate::{CompareOp, Predicate};
use crate::error::{CoreError, CoreResult};
use crate::schema::{FieldKind, JoinPath, ModelSchema, SchemaRegistry};
use crate::value::{parse_datetime, Value};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// A model bound into the query, in binding order. Slot 0 drives.
#[derive(Debug, Clone)]
pub(crate) struct Slot {
    pub(crate) model: String,
    pub(crate) schema: Arc<ModelSchema>,
}

/// A resolved field reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Column {
    pub(crate) slot: usize,
    pub(crate) field: String,
}

/// A compiled condition over columns of type `C`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Cond<C> {
    Compare { col: C, op: CompareOp, value: Value },
    In { col: C, values: Vec<Value>, negated: bool },
    Between { col: C, low: Value, high: Value },
    Like { col: C, pattern: String },
    IsNull { col: C, negated: bool },
    And(Vec<Cond<C>>),
    Or(Vec<Cond<C>>),
    Not(Box<Cond<C>>),
}

impl<C> Cond<C> {
    /// Evaluates the condition. `get` returns a column's value.
    pub(crate) fn eval<'v, F>(&self, get: &F) -> bool
    where
        F: Fn(&C) -> &'v Value,
    {
        match self {
            Self::Compare { col, op, value } => {
                let Some(ord) = get(col).compare(value) else {
                    return false;
                };
                match op {
                    CompareOp::Eq => ord == Ordering::Equal,
                    CompareOp::Ne => ord != Ordering::Equal,
                    CompareOp::Lt => ord == Ordering::Less,
                    CompareOp::Le => ord != Ordering::Greater,
                    CompareOp::Gt => ord == Ordering::Greater,
                    CompareOp::Ge => ord != Ordering::Less,
                }
            }
            Self::In {
                col,
                values,
                negated,
            } => {
                let v = get(col);
                if v.is_null() {
                    return false;
                }
                let found = values
                    .iter()
                    .any(|c| v.compare(c) == Some(Ordering::Equal));
                found != *negated
            }
            Self::Between { col, low, high } => {
                let v = get(col);
                matches!(v.compare(low), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(v.compare(high), Some(Ordering::Less | Ordering::Equal))
            }
            Self::Like { col, pattern } => get(col).as_str().is_some_and(|s| like(s, pattern)),
            Self::IsNull { col, negated } => get(col).is_null() != *negated,
            Self::And(all) => all.iter().all(|c| c.eval(get)),
            Self::Or(any) => any.iter().any(|c| c.eval(get)),
            Self::Not(inner) => !inner.eval(get),
        }
    }

    fn visit<'a>(&'a self, out: &mut Vec<&'a C>) {
        match self {
            Self::Compare { col, .. }
            | Self::In { col, .. }
            | Self::Between { col, .. }
            | Self::Like { col, .. }
            | Self::IsNull { col, .. } => out.push(col),
            Self::And(list) | Self::Or(list) => list.iter().for_each(|c| c.visit(out)),
            Self::Not(inner) => inner.visit(out),
        }
    }

    pub(crate) fn columns(&self) -> Vec<&C> {
        let mut out = Vec::new();
        self.visit(&mut out);
        out
    }
}

/// How the driving model is read.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Access {
    Scan,
    Lookup { field: String, value: Value },
}

/// Key path of one join, oriented from the bound side to the new model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Link {
    Direct {
        bound_field: String,
        new_field: String,
    },
    Junction {
        junction: String,
        bound_field: String,
        junction_bound: String,
        junction_new: String,
        new_field: String,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct JoinStep {
    pub(crate) kind: JoinKind,
    pub(crate) bound: usize,
    pub(crate) model: String,
    pub(crate) link: Link,
}

#[derive(Debug, Clone)]
pub(crate) enum Output {
    Records {
        columns: Vec<Column>,
        names: Arc<[String]>,
        order: Vec<(Column, Direction)>,
    },
    Grouped {
        keys: Vec<Column>,
        aggregates: Vec<(AggregateFunc, Option<Column>)>,
        names: Arc<[String]>,
        having: Option<Cond<usize>>,
        order: Vec<(usize, Direction)>,
    },
}

/// A compiled query.
///
/// Its `Display` form describes the chosen access path, joins and stages.
#[derive(Debug, Clone)]
pub struct Plan {
    pub(crate) slots: Vec<Slot>,
    pub(crate) access: Access,
    pub(crate) pushed: Vec<Cond<Column>>,
    pub(crate) joins: Vec<JoinStep>,
    pub(crate) residual: Vec<Cond<Column>>,
    pub(crate) output: Output,
    pub(crate) offset: usize,
    pub(crate) limit: Option<usize>,
}

impl Plan {
    /// The driving model.
    #[must_use]
    pub fn driving_model(&self) -> &str {
        &self.slots[0].model
    }

    /// Output column names.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        match &self.output {
            Output::Records { names, .. } | Output::Grouped { names, .. } => names,
        }
    }

    /// Returns true if the driving model is read through an index instead
    /// of a full scan.
    #[must_use]
    pub const fn uses_index(&self) -> bool {
        matches!(self.access, Access::Lookup { .. })
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let driving = self.driving_model();
        match &self.access {
            Access::Scan => writeln!(f, "scan {driving}")?,
            Access::Lookup { field, value } => writeln!(f, "lookup {driving}.{field} = {value}")?,
        }
        if !self.pushed.is_empty() {
            writeln!(f, "  filter {} conjunct(s) during scan", self.pushed.len())?;
        }
        for step in &self.joins {
            let kind = match step.kind {
                JoinKind::Inner => "join",
                JoinKind::Left => "left join",
            };
            let bound = &self.slots[step.bound].model;
            match &step.link {
                Link::Direct {
                    bound_field,
                    new_field,
                } => writeln!(f, "{kind} {} on {bound}.{bound_field} = {}.{new_field}", step.model, step.model)?,
                Link::Junction {
                    junction,
                    bound_field,
                    junction_bound,
                    junction_new,
                    new_field,
                } => writeln!(
                    f,
                    "{kind} {} via {junction} ({bound}.{bound_field} = {junction}.{junction_bound}, {junction}.{junction_new} = {}.{new_field})",
                    step.model, step.model
                )?,
            }
        }
        if !self.residual.is_empty() {
            writeln!(f, "filter {} conjunct(s) after joins", self.residual.len())?;
        }
        if let Output::Grouped {
            keys,
            aggregates,
            having,
            ..
        } = &self.output
        {
            writeln!(f, "group by {} key(s), {} aggregate(s)", keys.len(), aggregates.len())?;
            if having.is_some() {
                writeln!(f, "having")?;
            }
        }
        let order_keys = match &self.output {
            Output::Records { order, .. } => order.len(),
            Output::Grouped { order, .. } => order.len(),
        };
        if order_keys > 0 {
            writeln!(f, "sort by {order_keys} key(s)")?;
        }
        if self.offset > 0 {
            writeln!(f, "offset {}", self.offset)?;
        }
        if let Some(limit) = self.limit {
            writeln!(f, "limit {limit}")?;
        }
        Ok(())
    }
}

/// Compiles a query against the registry.
pub(crate) fn compile(registry: &SchemaRegistry, query: &Query) -> CoreResult<Plan> {
    let Some(first) = query.models.first() else {
        return Err(CoreError::query("select needs at least one model"));
    };
    let mut scope = Scope {
        slots: vec![bind(registry, first)?],
    };

    let mut joins = Vec::with_capacity(query.joins.len());
    for clause in &query.joins {
        let step = resolve_join(registry, &scope, clause)?;
        scope.slots.push(bind(registry, &clause.model)?);
        joins.push(step);
    }

    let mut selected = HashSet::new();
    let mut select_slots = Vec::with_capacity(query.models.len());
    for model in &query.models {
        if !selected.insert(model.as_str()) {
            return Err(CoreError::query(format!("model {model} is selected twice")));
        }
        let slot = scope.slot_of(model).ok_or_else(|| {
            CoreError::query(format!("model {model} is selected but not joined"))
        })?;
        select_slots.push(slot);
    }

    let mut pushed = Vec::new();
    let mut residual = Vec::new();
    if let Some(filter) = &query.filter {
        for conjunct in filter.clone().into_conjuncts() {
            let cond = scope.compile(&conjunct)?;
            if cond.columns().iter().all(|c| c.slot == 0) {
                pushed.push(cond);
            } else {
                residual.push(cond);
            }
        }
    }
    let access = choose_access(&scope.slots[0].schema, &pushed);

    let grouped = !query.group_by.is_empty() || !query.aggregates.is_empty();
    let output = if grouped {
        compile_grouped(&scope, query)?
    } else {
        if query.having.is_some() {
            return Err(CoreError::query("having requires group_by or an aggregate"));
        }
        let mut columns = Vec::new();
        let mut names = Vec::new();
        for slot in select_slots {
            let bound = &scope.slots[slot];
            for field in bound.schema.fields() {
                names.push(format!("{}.{}", bound.model, field.name));
                columns.push(Column {
                    slot,
                    field: field.name.clone(),
                });
            }
        }
        let order = query
            .order
            .iter()
            .map(|(name, dir)| Ok((scope.resolve(name)?, *dir)))
            .collect::<CoreResult<Vec<_>>>()?;
        Output::Records {
            columns,
            names: names.into(),
            order,
        }
    };

    Ok(Plan {
        slots: scope.slots,
        access,
        pushed,
        joins,
        residual,
        output,
        offset: query.offset,
        limit: query.limit,
    })
}

fn bind(registry: &SchemaRegistry, model: &str) -> CoreResult<Slot> {
    let schema = registry
        .model(model)
        .ok_or_else(|| CoreError::query(format!("unknown model {model}")))?;
    Ok(Slot {
        model: model.to_string(),
        schema: Arc::clone(schema),
    })
}

/// An equality on the primary key or an indexed field of the driving
/// model turns the scan into a lookup.
fn choose_access(schema: &ModelSchema, pushed: &[Cond<Column>]) -> Access {
    let keyed = |field: &str| {
        schema.primary_key().name == field || schema.field(field).is_some_and(|f| f.is_indexed())
    };
    pushed
        .iter()
        .find_map(|cond| match cond {
            Cond::Compare {
                col,
                op: CompareOp::Eq,
                value,
            } if !value.is_null() && keyed(&col.field) => Some(Access::Lookup {
                field: col.field.clone(),
                value: value.clone(),
            }),
            _ => None,
        })
        .unwrap_or(Access::Scan)
}

fn resolve_join(registry: &SchemaRegistry, scope: &Scope, clause: &JoinClause) -> CoreResult<JoinStep> {
    let model = clause.model.as_str();
    let joining = registry
        .model(model)
        .ok_or_else(|| CoreError::query(format!("unknown model {model}")))?;
    if scope.slot_of(model).is_some() {
        return Err(CoreError::query(format!("model {model} is already part of the query")));
    }

    // (owner, relationship, bound slot, forward)
    let mut candidates: Vec<(String, String, usize, bool)> = Vec::new();
    let (owner_filter, rel) = match clause.on.split_once('.') {
        Some((owner, rel)) => (Some(owner), rel),
        None => (None, clause.on.as_str()),
    };
    for (slot, bound) in scope.slots.iter().enumerate() {
        if owner_filter.is_some_and(|o| o != bound.model) {
            continue;
        }
        if let Some(r) = bound.schema.relationship(rel) {
            if r.target == model {
                candidates.push((bound.model.clone(), rel.to_string(), slot, true));
            }
        }
    }
    if owner_filter.map_or(true, |o| o == model) {
        if let Some(r) = joining.relationship(rel) {
            if let Some(slot) = scope.slot_of(&r.target) {
                candidates.push((model.to_string(), rel.to_string(), slot, false));
            }
        }
    }

    let (owner, rel, bound, forward) = match candidates.len() {
        1 => candidates.remove(0),
        0 => {
            return Err(CoreError::query(format!(
                "no relationship {} links {model} to the models already in the query",
                clause.on
            )))
        }
        _ => {
            return Err(CoreError::query(format!(
                "relationship {} is ambiguous for {model}; qualify it as Model.relationship",
                clause.on
            )))
        }
    };

    let resolved = registry
        .resolve_join(&owner, &rel)
        .map_err(|e| match e {
            CoreError::Schema { message } => CoreError::query(message),
            other => other,
        })?;
    let link = match (resolved.path, forward) {
        (
            JoinPath::Direct {
                source_field,
                target_field,
            },
            true,
        ) => Link::Direct {
            bound_field: source_field,
            new_field: target_field,
        },
        (
            JoinPath::Direct {
                source_field,
                target_field,
            },
            false,
        ) => Link::Direct {
            bound_field: target_field,
            new_field: source_field,
        },
        (
            JoinPath::Junction {
                junction,
                source_field,
                junction_source,
                junction_target,
                target_field,
            },
            true,
        ) => Link::Junction {
            junction,
            bound_field: source_field,
            junction_bound: junction_source,
            junction_new: junction_target,
            new_field: target_field,
        },
        (
            JoinPath::Junction {
                junction,
                source_field,
                junction_source,
                junction_target,
                target_field,
            },
            false,
        ) => Link::Junction {
            junction,
            bound_field: target_field,
            junction_bound: junction_target,
            junction_new: junction_source,
            new_field: source_field,
        },
    };

    Ok(JoinStep {
        kind: clause.kind,
        bound,
        model: model.to_string(),
        link,
    })
}

fn compile_grouped(scope: &Scope, query: &Query) -> CoreResult<Output> {
    let mut names: Vec<String> = Vec::new();
    let mut kinds: Vec<Option<FieldKind>> = Vec::new();
    let mut keys = Vec::with_capacity(query.group_by.len());
    for name in &query.group_by {
        let col = scope.resolve(name)?;
        let bound = &scope.slots[col.slot];
        kinds.push(bound.schema.field(&col.field).map(|f| f.kind.clone()));
        names.push(format!("{}.{}", bound.model, col.field));
        keys.push(col);
    }

    let mut aggregates = Vec::with_capacity(query.aggregates.len());
    for (aggregate, alias) in &query.aggregates {
        if alias.is_empty() || names.iter().any(|n| n == alias) {
            return Err(CoreError::query(format!("aggregate alias {alias:?} is empty or already used")));
        }
        let col = aggregate.field.as_deref().map(|f| scope.resolve(f)).transpose()?;
        let field_kind = col
            .as_ref()
            .and_then(|c| scope.slots[c.slot].schema.field(&c.field))
            .map(|f| f.kind.clone());
        let label = aggregate.func.name();
        let kind = match aggregate.func {
            AggregateFunc::Count => Some(FieldKind::Integer),
            AggregateFunc::Sum | AggregateFunc::Avg => {
                let Some(kind) = field_kind.filter(FieldKind::is_numeric) else {
                    return Err(CoreError::query(format!("{label}({alias}) needs a numeric field")));
                };
                if aggregate.func == AggregateFunc::Avg {
                    Some(FieldKind::Float)
                } else {
                    Some(kind)
                }
            }
            AggregateFunc::Min | AggregateFunc::Max => {
                if field_kind.is_none() {
                    return Err(CoreError::query(format!("{label}({alias}) needs a field")));
                }
                field_kind
            }
        };
        names.push(alias.clone());
        kinds.push(kind);
        aggregates.push((aggregate.func, col));
    }

    let output = OutputScope {
        names: &names,
        kinds: &kinds,
    };
    let having = query.having.as_ref().map(|p| output.compile(p)).transpose()?;
    let order = query
        .order
        .iter()
        .map(|(name, dir)| Ok((output.position(name)?, *dir)))
        .collect::<CoreResult<Vec<_>>>()?;

    Ok(Output::Grouped {
        keys,
        aggregates,
        names: names.into(),
        having,
        order,
    })
}

/// Names visible to `where`, `group_by` and record `order_by`.
struct Scope {
    slots: Vec<Slot>,
}

impl Scope {
    fn slot_of(&self, model: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.model == model)
    }

    fn resolve(&self, name: &str) -> CoreResult<Column> {
        if let Some((model, field)) = name.split_once('.') {
            let slot = self.slot_of(model).ok_or_else(|| {
                CoreError::query(format!("model {model} is not part of the query"))
            })?;
            if self.slots[slot].schema.field(field).is_none() {
                return Err(CoreError::query(format!("unknown field {name}")));
            }
            return Ok(Column {
                slot,
                field: field.to_string(),
            });
        }
        let mut hits = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.schema.field(name).is_some());
        match (hits.next(), hits.next()) {
            (Some((slot, _)), None) => Ok(Column {
                slot,
                field: name.to_string(),
            }),
            (None, _) => Err(CoreError::query(format!("unknown field {name}"))),
            (Some(_), Some(_)) => Err(CoreError::query(format!(
                "field {name} is ambiguous; qualify it as Model.{name}"
            ))),
        }
    }

    fn compile(&self, predicate: &Predicate) -> CoreResult<Cond<Column>> {
        compile_predicate(predicate, &mut |name: &str| {
            let col = self.resolve(name)?;
            let kind = self.slots[col.slot]
                .schema
                .field(&col.field)
                .map(|f| f.kind.clone());
            Ok((col, kind))
        })
    }
}

/// Names visible to `having` and grouped `order_by`.
struct OutputScope<'a> {
    names: &'a [String],
    kinds: &'a [Option<FieldKind>],
}

impl OutputScope<'_> {
    fn position(&self, name: &str) -> CoreResult<usize> {
        if let Some(i) = self.names.iter().position(|n| n == name) {
            return Ok(i);
        }
        let mut hits = self
            .names
            .iter()
            .enumerate()
            .filter(|(_, n)| n.rsplit_once('.').is_some_and(|(_, f)| f == name));
        match (hits.next(), hits.next()) {
            (Some((i, _)), None) => Ok(i),
            (None, _) => Err(CoreError::query(format!("{name} is not an output column"))),
            (Some(_), Some(_)) => Err(CoreError::query(format!("output column {name} is ambiguous"))),
        }
    }

    fn compile(&self, predicate: &Predicate) -> CoreResult<Cond<usize>> {
        compile_predicate(predicate, &mut |name: &str| {
            let i = self.position(name)?;
            Ok((i, self.kinds[i].clone()))
        })
    }
}

fn compile_predicate<C>(
    predicate: &Predicate,
    resolve: &mut dyn FnMut(&str) -> CoreResult<(C, Option<FieldKind>)>,
) -> CoreResult<Cond<C>> {
    Ok(match predicate {
        Predicate::Compare { field, op, value } => {
            let (col, kind) = resolve(field)?;
            Cond::Compare {
                col,
                op: *op,
                value: coerce(field, kind.as_ref(), value)?,
            }
        }
        Predicate::In {
            field,
            values,
            negated,
        } => {
            let (col, kind) = resolve(field)?;
            Cond::In {
                col,
                values: values
                    .iter()
                    .map(|v| coerce(field, kind.as_ref(), v))
                    .collect::<CoreResult<_>>()?,
                negated: *negated,
            }
        }
        Predicate::Between { field, low, high } => {
            let (col, kind) = resolve(field)?;
            Cond::Between {
                col,
                low: coerce(field, kind.as_ref(), low)?,
                high: coerce(field, kind.as_ref(), high)?,
            }
        }
        Predicate::Like { field, pattern } => {
            let (col, kind) = resolve(field)?;
            if !matches!(kind, Some(FieldKind::String | FieldKind::Enum(_))) {
                return Err(CoreError::query(format!("like needs a string field, {field} is not one")));
            }
            Cond::Like {
                col,
                pattern: pattern.clone(),
            }
        }
        Predicate::IsNull { field, negated } => Cond::IsNull {
            col: resolve(field)?.0,
            negated: *negated,
        },
        Predicate::And(list) => Cond::And(
            list.iter()
                .map(|p| compile_predicate(p, resolve))
                .collect::<CoreResult<_>>()?,
        ),
        Predicate::Or(list) => Cond::Or(
            list.iter()
                .map(|p| compile_predicate(p, resolve))
                .collect::<CoreResult<_>>()?,
        ),
        Predicate::Not(inner) => Cond::Not(Box::new(compile_predicate(inner, resolve)?)),
    })
}

/// Coerces a literal to the kind of the field it is compared with.
#[allow(clippy::cast_precision_loss)]
fn coerce(name: &str, kind: Option<&FieldKind>, value: &Value) -> CoreResult<Value> {
    let Some(kind) = kind else {
        return Ok(value.clone());
    };
    let coerced = match (kind, value) {
        (_, Value::Null) | (FieldKind::Json, _) => Some(value.clone()),
        (FieldKind::Integer, Value::Float(f)) => Some(integral(*f).map_or(Value::Float(*f), Value::Int)),
        (FieldKind::Integer, Value::Int(_))
        | (FieldKind::Float, Value::Float(_))
        | (FieldKind::String | FieldKind::Enum(_), Value::String(_))
        | (FieldKind::Boolean, Value::Bool(_))
        | (FieldKind::DateTime, Value::DateTime(_)) => Some(value.clone()),
        (FieldKind::Float, Value::Int(i)) => Some(Value::Float(*i as f64)),
        (FieldKind::DateTime, Value::String(s)) => parse_datetime(s).ok().map(Value::DateTime),
        _ => None,
    };
    coerced.ok_or_else(|| {
        CoreError::query(format!(
            "literal {value} does not match {name}, a {} field",
            kind.name()
        ))
    })
}

/// A float with no fractional part, as the integer it equals. Index keys
/// of integer fields are integers, so such literals must compare as one.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn integral(f: f64) -> Option<i64> {
    (f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64).then_some(f as i64)
}
