//! Query expression evaluation for in-memory document filtering.
//!
//! This module provides the evaluation engine for query expressions and the ordering used
//! for sorting, both over document bodies held as [`Map`]s.

use chrono::{DateTime, Utc};
use std::{cmp::Ordering, collections::BTreeMap};

use docmodel_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Expr, FieldOp, QueryVisitor, Sort, SortDirection},
    value::{Map, Value},
};

/// Looks up a field of a document body; `.` separates the keys of nested maps.
pub(crate) fn lookup<'a>(data: &'a Map, field: &str) -> Option<&'a Value> {
    let mut parts = field.split('.');
    let mut current = data.get(parts.next()?)?;

    for part in parts {
        current = current.as_map()?.get(part)?;
    }

    Some(current)
}

/// Comparable representation of document values.
///
/// Numbers are normalized to f64. Values of different kinds are never equal, and are ordered
/// by kind when sorting: null, booleans, numbers, timestamps, strings, bytes, arrays, maps.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    Timestamp(DateTime<Utc>),
    String(&'a str),
    Bytes(&'a [u8]),
    Array(Vec<Comparable<'a>>),
    Map(BTreeMap<&'a str, Comparable<'a>>),
}

impl<'a> From<&'a Value> for Comparable<'a> {
    fn from(value: &'a Value) -> Self {
        match value {
            Value::Null | Value::ServerTimestamp => Comparable::Null,
            Value::Bool(value) => Comparable::Bool(*value),
            Value::Integer(value) => Comparable::Number(*value as f64),
            Value::Double(value) => Comparable::Number(*value),
            Value::Timestamp(value) => Comparable::Timestamp(*value),
            Value::String(value) => Comparable::String(value),
            Value::Bytes(value) => Comparable::Bytes(value),
            Value::Array(arr) => Comparable::Array(
                arr.iter()
                    .map(Comparable::from)
                    .collect::<Vec<_>>()
            ),
            Value::Map(map) => Comparable::Map(
                map.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect::<BTreeMap<_, _>>()
            ),
        }
    }
}

impl Comparable<'_> {
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Bool(_) => 1,
            Comparable::Number(_) => 2,
            Comparable::Timestamp(_) => 3,
            Comparable::String(_) => 4,
            Comparable::Bytes(_) => 5,
            Comparable::Array(_) => 6,
            Comparable::Map(_) => 7,
        }
    }

    /// Total order used for sorting.
    pub(crate) fn sort_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Comparable::Array(a), Comparable::Array(b)) => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| x.sort_cmp(y))
                .find(|o| o.is_ne())
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            (Comparable::Map(a), Comparable::Map(b)) => a
                .iter()
                .zip(b.iter())
                .map(|((ka, va), (kb, vb))| ka.cmp(kb).then_with(|| va.sort_cmp(vb)))
                .find(|o| o.is_ne())
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            _ => self
                .partial_cmp(other)
                .unwrap_or_else(|| self.rank().cmp(&other.rank())),
        }
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::Timestamp(a), Comparable::Timestamp(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::Bytes(a), Comparable::Bytes(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::Timestamp(a), Comparable::Timestamp(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::Bytes(a), Comparable::Bytes(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Orders two document bodies by a list of sort keys. Both must hold every sort field.
pub(crate) fn compare_documents(left: &Map, right: &Map, sort: &[Sort]) -> Ordering {
    for key in sort {
        let l = lookup(left, &key.field).map(Comparable::from).unwrap_or(Comparable::Null);
        let r = lookup(right, &key.field).map(Comparable::from).unwrap_or(Comparable::Null);

        let ordering = match key.direction {
            SortDirection::Asc => l.sort_cmp(&r),
            SortDirection::Desc => r.sort_cmp(&l),
        };
        if ordering.is_ne() {
            return ordering;
        }
    }

    Ordering::Equal
}

pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Map,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Map) -> Self {
        Self { document }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> DocumentStoreResult<bool> {
        self.visit_expr(expr)
    }
}

fn array_operand(op: FieldOp, value: &Value) -> DocumentStoreResult<&[Value]> {
    value.as_array().ok_or_else(|| {
        DocumentStoreError::InvalidDocument(format!(
            "operator {op} requires an array operand, got {}",
            value.kind_name()
        ))
    })
}

impl QueryVisitor for DocumentEvaluator<'_> {
    type Output = bool;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if !self.visit_expr(expr)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if self.visit_expr(expr)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_expr(expr)?)
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(lookup(self.document, field).is_some() == should_exist)
    }

    fn visit_field(&mut self, field: &str, op: FieldOp, value: &Value) -> Result<Self::Output, Self::Error> {
        let operands = if op.takes_array() {
            array_operand(op, value)?
        } else {
            &[]
        };

        let Some(field_value) = lookup(self.document, field) else {
            return Ok(false);
        };
        let left = Comparable::from(field_value);
        let right = Comparable::from(value);

        Ok(match op {
            FieldOp::Eq => left == right,
            FieldOp::Ne => left != right,
            FieldOp::Gt | FieldOp::Gte | FieldOp::Lt | FieldOp::Lte => {
                match left.partial_cmp(&right) {
                    Some(ordering) => match op {
                        FieldOp::Gt => ordering.is_gt(),
                        FieldOp::Gte => ordering.is_ge(),
                        FieldOp::Lt => ordering.is_lt(),
                        _ => ordering.is_le(),
                    },
                    None => false,
                }
            }
            FieldOp::ArrayContains => match left {
                Comparable::Array(items) => items.iter().any(|item| item == &right),
                _ => false,
            },
            FieldOp::ArrayContainsAny => match left {
                Comparable::Array(items) => operands
                    .iter()
                    .map(Comparable::from)
                    .any(|candidate| items.contains(&candidate)),
                _ => false,
            },
            FieldOp::In => operands
                .iter()
                .map(Comparable::from)
                .any(|candidate| candidate == left),
            FieldOp::NotIn => !operands
                .iter()
                .map(Comparable::from)
                .any(|candidate| candidate == left),
        })
    }
}
