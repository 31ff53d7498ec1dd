//! Query construction and filtering API for collections.
//!
//! This module provides query construction with filtering, multi-key sorting, windowing,
//! and a visitor pattern that backends use to evaluate or translate filters.
//!
//! # Query Building
//!
//! Queries can be constructed using the fluent builder API:
//!
//! ```ignore
//! use docmodel::query::{Query, Filter, SortDirection};
//!
//! let query = Query::builder()
//!     .filter(Filter::eq("name", "Alice"))
//!     .sort("create_time", SortDirection::Desc)
//!     .limit(10)
//!     .build();
//! ```
//!
//! Most callers go through [`QueryRef`](crate::reference::QueryRef) instead, which wraps
//! the same builder and accepts operators in their textual form:
//!
//! ```ignore
//! let query = client.collection("posts").where_("votes", ">=".parse()?, 10);
//! ```
//!
//! # Filter Expression API
//!
//! The [`Filter`] struct provides static constructors for filter expressions:
//!
//! - Comparison: `eq`, `ne`, `gt`, `gte`, `lt`, `lte`
//! - Membership: `in_`, `not_in`
//! - Array: `array_contains`, `array_contains_any`
//! - Existence: `exists`, `not_exists`
//! - Logical: `and`, `or`
//!
//! Field names address top-level keys of a document body, or nested keys joined by `.`.

use std::{fmt, str::FromStr};

use crate::{error::DocumentStoreError, value::Value};

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    #[default]
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

impl SortDirection {
    /// The opposite direction.
    pub fn reverse(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

/// One sort key for query results.
///
/// Specifies which field to sort by and in which direction.
#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    /// The field name to sort by.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

/// Field comparison operators for filter expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    /// Equal to (exact match).
    Eq,
    /// Not equal to.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal to.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal to.
    Lte,
    /// Array field contains the value.
    ArrayContains,
    /// Array field contains any of the values in an array operand.
    ArrayContainsAny,
    /// Field equals one of the values in an array operand.
    In,
    /// Field equals none of the values in an array operand.
    NotIn,
}

impl FieldOp {
    /// The textual form of the operator.
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldOp::Eq => "==",
            FieldOp::Ne => "!=",
            FieldOp::Gt => ">",
            FieldOp::Gte => ">=",
            FieldOp::Lt => "<",
            FieldOp::Lte => "<=",
            FieldOp::ArrayContains => "array-contains",
            FieldOp::ArrayContainsAny => "array-contains-any",
            FieldOp::In => "in",
            FieldOp::NotIn => "not-in",
        }
    }

    /// Whether the operator expects an array operand.
    pub fn takes_array(&self) -> bool {
        matches!(self, FieldOp::ArrayContainsAny | FieldOp::In | FieldOp::NotIn)
    }
}

impl fmt::Display for FieldOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldOp {
    type Err = DocumentStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "==" => FieldOp::Eq,
            "!=" => FieldOp::Ne,
            ">" => FieldOp::Gt,
            ">=" => FieldOp::Gte,
            "<" => FieldOp::Lt,
            "<=" => FieldOp::Lte,
            "array-contains" => FieldOp::ArrayContains,
            "array-contains-any" => FieldOp::ArrayContainsAny,
            "in" => FieldOp::In,
            "not-in" => FieldOp::NotIn,
            other => {
                return Err(DocumentStoreError::InvalidDocument(format!(
                    "unknown query operator {other:?}"
                )));
            }
        })
    }
}

/// A filter expression for querying documents.
///
/// Expressions can be combined using logical operators (`And`, `Or`, `Not`)
/// to build complex filter predicates.
///
/// # Example
///
/// ```ignore
/// use docmodel::query::Filter;
///
/// let expr = Filter::and(vec![
///     Filter::eq("status", "active"),
///     Filter::gt("age", 18),
/// ]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Logical AND of multiple expressions (all must match).
    And(Vec<Expr>),
    /// Logical OR of multiple expressions (any must match).
    Or(Vec<Expr>),
    /// Logical NOT of an expression (inverts the result).
    Not(Box<Expr>),
    /// Checks if a field exists or doesn't exist.
    Exists(String, bool),
    /// Field comparison expression.
    Field {
        /// The field name to compare.
        field: String,
        /// The comparison operator.
        op: FieldOp,
        /// The value to compare against.
        value: Value,
    },
}

impl Expr {
    /// Creates a field comparison expression.
    pub fn field(field: impl Into<String>, op: FieldOp, value: impl Into<Value>) -> Self {
        Expr::Field {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Combines this expression with another using logical AND.
    ///
    /// If this expression is already an AND, the other expression is appended
    /// to the list. Otherwise, a new AND expression is created.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut list) => {
                list.push(other);
                Expr::And(list)
            }
            _ => Expr::And(vec![self, other]),
        }
    }

    /// Combines this expression with another using logical OR.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut list) => {
                list.push(other);
                Expr::Or(list)
            }
            _ => Expr::Or(vec![self, other]),
        }
    }

    /// Negates this expression (logical NOT).
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }
}

/// A structured query for retrieving and filtering documents.
///
/// Results are filtered, then sorted by every [`Sort`] key in order, then windowed by
/// `offset` and `limit`. With `limit_to_last` set the window is taken from the end of the
/// sorted results instead, still returned in sort order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Optional filter expression to match documents.
    pub filter: Option<Expr>,
    /// Maximum number of documents to return.
    pub limit: Option<usize>,
    /// Take the last `limit` documents rather than the first.
    pub limit_to_last: bool,
    /// Number of documents to skip.
    pub offset: Option<usize>,
    /// Sort keys, most significant first.
    pub sort: Vec<Sort>,
}

impl Query {
    /// Creates a new empty query with no filters or limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new query builder for fluent construction.
    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }

    /// Applies offset, limit and `limit_to_last` to already filtered and sorted results.
    pub fn window<T>(&self, mut items: Vec<T>) -> Vec<T> {
        let offset = self.offset.unwrap_or(0).min(items.len());
        items.drain(..offset);

        if let Some(limit) = self.limit {
            if self.limit_to_last {
                let skip = items.len().saturating_sub(limit);
                items.drain(..skip);
            } else {
                items.truncate(limit);
            }
        }

        items
    }
}

/// Helper struct for constructing filter expressions.
///
/// All methods accept field names and values as `Into<String>` and `Into<Value>`.
pub struct Filter;

impl Filter {
    /// Matches documents where the field equals the value.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field, FieldOp::Eq, value)
    }

    /// Matches documents where the field does not equal the value.
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field, FieldOp::Ne, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field, FieldOp::Gt, value)
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field, FieldOp::Gte, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field, FieldOp::Lt, value)
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field, FieldOp::Lte, value)
    }

    /// Matches documents whose array field holds the value.
    pub fn array_contains(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field, FieldOp::ArrayContains, value)
    }

    /// Matches documents whose array field holds any of the values.
    pub fn array_contains_any(field: impl Into<String>, values: impl Into<Value>) -> Expr {
        Expr::field(field, FieldOp::ArrayContainsAny, values)
    }

    /// Matches documents whose field equals one of the values.
    pub fn in_(field: impl Into<String>, values: impl Into<Value>) -> Expr {
        Expr::field(field, FieldOp::In, values)
    }

    /// Matches documents whose field equals none of the values.
    pub fn not_in(field: impl Into<String>, values: impl Into<Value>) -> Expr {
        Expr::field(field, FieldOp::NotIn, values)
    }

    /// Matches documents where the field is present.
    pub fn exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), true)
    }

    /// Matches documents where the field is absent.
    pub fn not_exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), false)
    }

    /// Combines multiple expressions such that all must match.
    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::And(exprs.into_iter().collect())
    }

    /// Combines multiple expressions such that any can match.
    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Or(exprs.into_iter().collect())
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    /// Creates a new query builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the filter expression, replacing any previous one.
    pub fn filter(mut self, filter: Expr) -> Self {
        self.query.filter = Some(filter);
        self
    }

    /// ANDs an expression onto the current filter.
    pub fn and_filter(mut self, expr: Expr) -> Self {
        self.query.filter = Some(match self.query.filter.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    /// Sets the maximum number of documents to return.
    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = Some(limit);
        self.query.limit_to_last = false;
        self
    }

    /// Returns at most `limit` documents taken from the end of the sorted results.
    pub fn limit_to_last(mut self, limit: usize) -> Self {
        self.query.limit = Some(limit);
        self.query.limit_to_last = true;
        self
    }

    /// Sets the number of documents to skip.
    pub fn offset(mut self, offset: usize) -> Self {
        self.query.offset = Some(offset);
        self
    }

    /// Appends a sort key; earlier keys take precedence.
    ///
    /// # Arguments
    ///
    /// * `field` - The field name to sort by
    /// * `direction` - The sort direction (ascending or descending)
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.query.sort.push(Sort { field: field.into(), direction });
        self
    }

    /// Builds and returns the final query.
    pub fn build(self) -> Query {
        self.query
    }
}

impl From<Query> for QueryBuilder {
    fn from(query: Query) -> Self {
        Self { query }
    }
}

pub trait QueryVisitor {
    type Output;
    type Error: Into<DocumentStoreError>;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error>;
    fn visit_exists(
        &mut self,
        field: &str,
        should_exist: bool,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_field(
        &mut self,
        field: &str,
        op: FieldOp,
        value: &Value,
    ) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Not(expr) => self.visit_not(expr),
            Expr::Exists(field, should_exist) => self.visit_exists(field, *should_exist),
            Expr::Field { field, op, value } => self.visit_field(field, *op, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operators_parse_from_text() {
        let all = [
            FieldOp::Eq,
            FieldOp::Ne,
            FieldOp::Gt,
            FieldOp::Gte,
            FieldOp::Lt,
            FieldOp::Lte,
            FieldOp::ArrayContains,
            FieldOp::ArrayContainsAny,
            FieldOp::In,
            FieldOp::NotIn,
        ];

        for op in all {
            assert_eq!(op.as_str().parse::<FieldOp>().unwrap(), op);
        }
        assert!("=~".parse::<FieldOp>().is_err());
    }

    #[test]
    fn builder_accumulates_sorts_and_filters() {
        let query = Query::builder()
            .and_filter(Filter::eq("a", 1))
            .and_filter(Filter::gt("b", 2))
            .sort("a", SortDirection::Asc)
            .sort("b", SortDirection::Desc)
            .limit_to_last(3)
            .build();

        assert_eq!(
            query.filter,
            Some(Expr::And(vec![Filter::eq("a", 1), Filter::gt("b", 2)]))
        );
        assert_eq!(query.sort.len(), 2);
        assert_eq!(query.limit, Some(3));
        assert!(query.limit_to_last);
    }

    #[test]
    fn window_applies_offset_then_limit() {
        let items: Vec<u32> = (0..10).collect();

        let query = Query::builder().offset(2).limit(3).build();
        assert_eq!(query.window(items.clone()), vec![2, 3, 4]);

        let query = Query::builder().offset(2).limit_to_last(3).build();
        assert_eq!(query.window(items.clone()), vec![7, 8, 9]);

        let query = Query::builder().offset(20).build();
        assert!(query.window(items).is_empty());
    }
}
