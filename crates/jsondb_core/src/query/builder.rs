//! The query builder.

use super::predicate::Predicate;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Ascending, nulls first.
    #[default]
    Asc,
    /// Descending, nulls last.
    Desc,
}

/// Join flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// Drops rows without a match.
    Inner,
    /// Keeps rows without a match, with nulls for the joined model.
    Left,
}

/// Aggregate function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunc {
    /// Row count, or count of non-null values of a field.
    Count,
    /// Sum of a numeric field.
    Sum,
    /// Mean of a numeric field.
    Avg,
    /// Smallest non-null value.
    Min,
    /// Largest non-null value.
    Max,
}

impl AggregateFunc {
    /// Lowercase function name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

/// An aggregate over a field, or over rows for `count`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    /// The function.
    pub func: AggregateFunc,
    /// The aggregated field; `None` only for row counts.
    pub field: Option<String>,
}

impl Aggregate {
    /// `count(*)`
    #[must_use]
    pub const fn count() -> Self {
        Self {
            func: AggregateFunc::Count,
            field: None,
        }
    }

    /// `count(field)`, counting non-null values.
    #[must_use]
    pub fn count_field(field: impl Into<String>) -> Self {
        Self::of(AggregateFunc::Count, field)
    }

    /// `sum(field)`
    #[must_use]
    pub fn sum(field: impl Into<String>) -> Self {
        Self::of(AggregateFunc::Sum, field)
    }

    /// `avg(field)`
    #[must_use]
    pub fn avg(field: impl Into<String>) -> Self {
        Self::of(AggregateFunc::Avg, field)
    }

    /// `min(field)`
    #[must_use]
    pub fn min(field: impl Into<String>) -> Self {
        Self::of(AggregateFunc::Min, field)
    }

    /// `max(field)`
    #[must_use]
    pub fn max(field: impl Into<String>) -> Self {
        Self::of(AggregateFunc::Max, field)
    }

    fn of(func: AggregateFunc, field: impl Into<String>) -> Self {
        Self {
            func,
            field: Some(field.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct JoinClause {
    pub(crate) model: String,
    pub(crate) on: String,
    pub(crate) kind: JoinKind,
}

/// A query under construction.
///
/// Nothing is resolved until the query is compiled, so stages can be
/// chained in any order:
///
/// ```rust
/// use jsondb_core::query::{field, Aggregate, Direction, Query};
///
/// let q = Query::select(["User", "Post"])
///     .join("Post", "posts")
///     .filter(field("User.active").eq(true))
///     .group_by(["User.name"])
///     .aggregate(Aggregate::count(), "posts")
///     .having(field("posts").gt(2))
///     .order_by("posts", Direction::Desc)
///     .limit(10);
/// # let _ = q;
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    pub(crate) models: Vec<String>,
    pub(crate) filter: Option<Predicate>,
    pub(crate) joins: Vec<JoinClause>,
    pub(crate) order: Vec<(String, Direction)>,
    pub(crate) group_by: Vec<String>,
    pub(crate) aggregates: Vec<(Aggregate, String)>,
    pub(crate) having: Option<Predicate>,
    pub(crate) limit: Option<usize>,
    pub(crate) offset: usize,
}

impl Query {
    /// Starts a query. The first model drives the scan; the others must be
    /// joined.
    #[must_use]
    pub fn select<S: Into<String>>(models: impl IntoIterator<Item = S>) -> Self {
        Self {
            models: models.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Starts a query over a single model.
    #[must_use]
    pub fn from(model: impl Into<String>) -> Self {
        Self::select([model.into()])
    }

    /// Adds a filter. Repeated calls are combined with AND.
    #[must_use]
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    /// Inner join of `model` along a relationship.
    ///
    /// `on` names a relationship as `Model.relationship` or just
    /// `relationship`. It is declared either on an already bound model
    /// pointing at `model`, or on `model` pointing back at a bound model.
    #[must_use]
    pub fn join(self, model: impl Into<String>, on: impl Into<String>) -> Self {
        self.push_join(model.into(), on.into(), JoinKind::Inner)
    }

    /// Left join of `model` along a relationship.
    #[must_use]
    pub fn left_join(self, model: impl Into<String>, on: impl Into<String>) -> Self {
        self.push_join(model.into(), on.into(), JoinKind::Left)
    }

    fn push_join(mut self, model: String, on: String, kind: JoinKind) -> Self {
        self.joins.push(JoinClause { model, on, kind });
        self
    }

    /// Adds a sort key. Earlier keys take precedence.
    #[must_use]
    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order.push((field.into(), direction));
        self
    }

    /// Groups rows by the given fields.
    #[must_use]
    pub fn group_by<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.group_by.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Adds an aggregate output column named `alias`.
    #[must_use]
    pub fn aggregate(mut self, aggregate: Aggregate, alias: impl Into<String>) -> Self {
        self.aggregates.push((aggregate, alias.into()));
        self
    }

    /// Filters grouped rows. Repeated calls are combined with AND.
    #[must_use]
    pub fn having(mut self, predicate: Predicate) -> Self {
        self.having = Some(match self.having.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    /// Caps the number of returned rows.
    #[must_use]
    pub const fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Skips the first `n` rows.
    #[must_use]
    pub const fn offset(mut self, n: usize) -> Self {
        self.offset = n;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::field;

    #[test]
    fn repeated_filters_are_anded() {
        let q = Query::from("User")
            .filter(field("a").eq(1))
            .filter(field("b").eq(2));
        assert_eq!(
            q.filter,
            Some(Predicate::And(vec![field("a").eq(1), field("b").eq(2)]))
        );
    }

    #[test]
    fn stages_accumulate() {
        let q = Query::select(["User", "Post"])
            .left_join("Post", "User.posts")
            .order_by("User.name", Direction::Asc)
            .aggregate(Aggregate::sum("Post.views"), "views")
            .offset(5)
            .limit(3);
        assert_eq!(q.models, vec!["User", "Post"]);
        assert_eq!(q.joins[0].kind, JoinKind::Left);
        assert_eq!(q.aggregates[0].0.func, AggregateFunc::Sum);
        assert_eq!((q.offset, q.limit), (5, Some(3)));
    }
}
