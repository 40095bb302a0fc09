//! Aggregate accumulators.

use super::builder::AggregateFunc;
use crate::value::Value;
use std::cmp::Ordering;

/// Running state of one aggregate over one group.
#[derive(Debug, Clone)]
pub(crate) enum Accumulator {
    Count(i64),
    Sum { int: i64, float: f64, all_int: bool, seen: bool, overflow: bool },
    Avg { total: f64, n: u64 },
    Extreme { best: Option<Value>, keep: Ordering },
}

impl Accumulator {
    pub(crate) const fn new(func: AggregateFunc) -> Self {
        match func {
            AggregateFunc::Count => Self::Count(0),
            AggregateFunc::Sum => Self::Sum {
                int: 0,
                float: 0.0,
                all_int: true,
                seen: false,
                overflow: false,
            },
            AggregateFunc::Avg => Self::Avg { total: 0.0, n: 0 },
            AggregateFunc::Min => Self::Extreme {
                best: None,
                keep: Ordering::Less,
            },
            AggregateFunc::Max => Self::Extreme {
                best: None,
                keep: Ordering::Greater,
            },
        }
    }

    /// Feeds one row. `value` is `None` for `count(*)`.
    pub(crate) fn push(&mut self, value: Option<&Value>) {
        match self {
            Self::Count(n) => {
                if value.map_or(true, |v| !v.is_null()) {
                    *n += 1;
                }
            }
            Self::Sum {
                int,
                float,
                all_int,
                seen,
                overflow,
            } => match value {
                Some(Value::Int(i)) => {
                    *seen = true;
                    *float += *i as f64;
                    match int.checked_add(*i) {
                        Some(sum) => *int = sum,
                        None => *overflow = true,
                    }
                }
                Some(Value::Float(f)) => {
                    *seen = true;
                    *all_int = false;
                    *float += *f;
                }
                _ => {}
            },
            Self::Avg { total, n } => {
                if let Some(v) = value.and_then(Value::as_f64) {
                    *total += v;
                    *n += 1;
                }
            }
            Self::Extreme { best, keep } => {
                let Some(v) = value.filter(|v| !v.is_null()) else {
                    return;
                };
                let replace = best.as_ref().map_or(true, |b| v.sort_cmp(b) == *keep);
                if replace {
                    *best = Some(v.clone());
                }
            }
        }
    }

    pub(crate) fn finish(self) -> Value {
        match self {
            Self::Count(n) => Value::Int(n),
            Self::Sum {
                int,
                float,
                all_int,
                seen,
                overflow,
            } => {
                if !seen {
                    Value::Null
                } else if all_int && !overflow {
                    Value::Int(int)
                } else {
                    Value::Float(float)
                }
            }
            Self::Avg { total, n } => {
                if n == 0 {
                    Value::Null
                } else {
                    Value::Float(total / n as f64)
                }
            }
            Self::Extreme { best, .. } => best.unwrap_or(Value::Null),
        }
    }
}
