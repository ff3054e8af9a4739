//! Collection query predicates
//!
//! A query is a conjunction of `(field, op, value)` filters over a small op
//! set, with optional ordering and limit. Fields address top-level document
//! fields, or nested ones with dotted paths.

use serde_json::Value;
use std::cmp::Ordering;

/// Comparison operators supported by the store port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    /// Membership in an array value
    In,
}

/// One query predicate
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: Op,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// A filtered, optionally ordered and limited collection read
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Query::default()
    }

    pub fn filter(mut self, field: impl Into<String>, op: Op, value: Value) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op,
            value,
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Resolve a possibly dotted field path inside a document payload
pub fn lookup_field<'a>(data: &'a Value, field: &str) -> Option<&'a Value> {
    let mut current = data;
    for segment in field.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Total-order comparison over the scalar JSON values documents carry.
/// Mixed types do not compare (the filter then fails closed).
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(xi), Some(yi)) = (x.as_i64(), y.as_i64()) {
                return Some(xi.cmp(&yi));
            }
            x.as_f64().and_then(|xf| y.as_f64().and_then(|yf| xf.partial_cmp(&yf)))
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Whether a document payload satisfies one filter
pub fn matches(data: &Value, filter: &Filter) -> bool {
    let Some(actual) = lookup_field(data, &filter.field) else {
        return false;
    };
    match filter.op {
        Op::Eq => actual == &filter.value,
        Op::In => match &filter.value {
            Value::Array(candidates) => candidates.iter().any(|c| c == actual),
            _ => false,
        },
        Op::Lt | Op::Le | Op::Gt | Op::Ge => {
            let Some(ordering) = compare_values(actual, &filter.value) else {
                return false;
            };
            match filter.op {
                Op::Lt => ordering == Ordering::Less,
                Op::Le => ordering != Ordering::Greater,
                Op::Gt => ordering == Ordering::Greater,
                Op::Ge => ordering != Ordering::Less,
                _ => unreachable!(),
            }
        }
    }
}
