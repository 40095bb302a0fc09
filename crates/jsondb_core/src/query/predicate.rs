//! Builder-form predicates.
//!
//! ```rust
//! use jsondb_core::query::{and_, field, not_};
//!
//! let adult_ann = and_([field("age").ge(18), field("name").like("Ann%")]);
//! let not_banned = not_(field("status").eq("banned"));
//! let both = adult_ann.and(not_banned);
//! # let _ = both;
//! ```

use crate::value::Value;
use std::ops::Not;

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CompareOp {
    /// Operator symbol.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// A filter condition over named fields.
///
/// Field names are either `field` or `Model.field`. Any comparison with a
/// null operand is false.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `field <op> value`
    Compare {
        /// Field name.
        field: String,
        /// Operator.
        op: CompareOp,
        /// Literal operand.
        value: Value,
    },
    /// `field [NOT] IN (values)`
    In {
        /// Field name.
        field: String,
        /// Candidate values.
        values: Vec<Value>,
        /// `NOT IN` when true.
        negated: bool,
    },
    /// `field BETWEEN low AND high`, inclusive.
    Between {
        /// Field name.
        field: String,
        /// Lower bound.
        low: Value,
        /// Upper bound.
        high: Value,
    },
    /// Case-sensitive `LIKE` with `%` and `_` wildcards.
    Like {
        /// Field name.
        field: String,
        /// Pattern.
        pattern: String,
    },
    /// `field IS [NOT] NULL`
    IsNull {
        /// Field name.
        field: String,
        /// `IS NOT NULL` when true.
        negated: bool,
    },
    /// All must hold.
    And(Vec<Predicate>),
    /// Any must hold.
    Or(Vec<Predicate>),
    /// Negation.
    Not(Box<Predicate>),
}

/// A field reference, the starting point of a predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldExpr {
    name: String,
}

/// Starts a predicate on a field.
#[must_use]
pub fn field(name: impl Into<String>) -> FieldExpr {
    FieldExpr { name: name.into() }
}

/// Conjunction of predicates.
#[must_use]
pub fn and_(predicates: impl IntoIterator<Item = Predicate>) -> Predicate {
    Predicate::And(predicates.into_iter().collect())
}

/// Disjunction of predicates.
#[must_use]
pub fn or_(predicates: impl IntoIterator<Item = Predicate>) -> Predicate {
    Predicate::Or(predicates.into_iter().collect())
}

/// Negation of a predicate.
#[must_use]
pub fn not_(predicate: Predicate) -> Predicate {
    Predicate::Not(Box::new(predicate))
}

impl FieldExpr {
    fn compare(self, op: CompareOp, value: impl Into<Value>) -> Predicate {
        Predicate::Compare {
            field: self.name,
            op,
            value: value.into(),
        }
    }

    /// `field = value`
    #[must_use]
    pub fn eq(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Eq, value)
    }

    /// `field != value`
    #[must_use]
    pub fn ne(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Ne, value)
    }

    /// `field < value`
    #[must_use]
    pub fn lt(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Lt, value)
    }

    /// `field <= value`
    #[must_use]
    pub fn le(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Le, value)
    }

    /// `field > value`
    #[must_use]
    pub fn gt(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Gt, value)
    }

    /// `field >= value`
    #[must_use]
    pub fn ge(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Ge, value)
    }

    /// `field IN (values)`
    #[must_use]
    pub fn in_<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Predicate {
        Predicate::In {
            field: self.name,
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    /// `field NOT IN (values)`
    #[must_use]
    pub fn not_in<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Predicate {
        Predicate::In {
            field: self.name,
            values: values.into_iter().map(Into::into).collect(),
            negated: true,
        }
    }

    /// `field BETWEEN low AND high`
    #[must_use]
    pub fn between(self, low: impl Into<Value>, high: impl Into<Value>) -> Predicate {
        Predicate::Between {
            field: self.name,
            low: low.into(),
            high: high.into(),
        }
    }

    /// `field LIKE pattern`
    #[must_use]
    pub fn like(self, pattern: impl Into<String>) -> Predicate {
        Predicate::Like {
            field: self.name,
            pattern: pattern.into(),
        }
    }

    /// `field IS NULL`
    #[must_use]
    pub fn is_null(self) -> Predicate {
        Predicate::IsNull {
            field: self.name,
            negated: false,
        }
    }

    /// `field IS NOT NULL`
    #[must_use]
    pub fn is_not_null(self) -> Predicate {
        Predicate::IsNull {
            field: self.name,
            negated: true,
        }
    }
}

impl Predicate {
    /// `self AND other`
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match self {
            Self::And(mut all) => {
                all.push(other);
                Self::And(all)
            }
            first => Self::And(vec![first, other]),
        }
    }

    /// `self OR other`
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        match self {
            Self::Or(mut any) => {
                any.push(other);
                Self::Or(any)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    /// Splits nested top-level conjunctions into a flat list.
    pub(crate) fn into_conjuncts(self) -> Vec<Self> {
        match self {
            Self::And(all) => all.into_iter().flat_map(Self::into_conjuncts).collect(),
            other => vec![other],
        }
    }
}

impl Not for Predicate {
    type Output = Self;

    fn not(self) -> Self {
        not_(self)
    }
}
