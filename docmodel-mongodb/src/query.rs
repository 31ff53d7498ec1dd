//! Query translation from docmodel query expressions to MongoDB query syntax.
//!
//! Document bodies live under the `data` key of each stored record, so every field path is
//! rewritten to `data.<field>` with its segments sanitized.

use bson::{doc, Bson, Document};

use docmodel_core::{
    error::DocumentStoreError,
    query::{Expr, FieldOp, Query, QueryVisitor, SortDirection},
    value::Value,
};

use crate::sanitizer::KeySanitizer;

/// Key holding the document body inside a stored record.
pub(crate) const DATA: &str = "data";

pub(crate) fn data_path(field: &str) -> String {
    format!("{DATA}.{}", KeySanitizer::sanitize_path(field))
}

/// Translates docmodel query expressions into MongoDB query documents.
pub(crate) struct MongoQueryTranslator;

impl MongoQueryTranslator {
    fn array_operand(op: FieldOp, value: &Value) -> Result<Bson, DocumentStoreError> {
        match value {
            Value::Array(_) => Ok(Bson::from(value.clone())),
            other => Err(DocumentStoreError::InvalidDocument(format!(
                "operator {op} requires an array operand, got {}",
                other.kind_name()
            ))),
        }
    }
}

impl QueryVisitor for MongoQueryTranslator {
    type Output = Document;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$and": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$or": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        // `$not` only applies to operator expressions; `$nor` negates a whole filter.
        Ok(doc! {
            "$nor": [self.visit_expr(expr)?],
        })
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            data_path(field): { "$exists": should_exist },
        })
    }

    fn visit_field(&mut self, field: &str, op: FieldOp, value: &Value) -> Result<Self::Output, Self::Error> {
        let operand = if op.takes_array() {
            Self::array_operand(op, value)?
        } else {
            Bson::from(value.clone())
        };

        Ok(doc! {
            data_path(field): match op {
                FieldOp::Eq => doc! { "$eq": operand },
                FieldOp::Ne => doc! { "$exists": true, "$ne": operand },
                FieldOp::Gt => doc! { "$gt": operand },
                FieldOp::Gte => doc! { "$gte": operand },
                FieldOp::Lt => doc! { "$lt": operand },
                FieldOp::Lte => doc! { "$lte": operand },
                FieldOp::ArrayContains => doc! { "$elemMatch": { "$eq": operand } },
                FieldOp::ArrayContainsAny => doc! { "$elemMatch": { "$in": operand } },
                FieldOp::In => doc! { "$in": operand },
                FieldOp::NotIn => doc! { "$exists": true, "$nin": operand },
            }
        })
    }
}

/// How a [`Query`] is executed: the filter and sort handed to MongoDB, plus the windowing
/// left to apply to the fetched records.
#[derive(Debug)]
pub(crate) struct FindPlan {
    pub filter: Document,
    pub sort: Document,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
    /// Keep only this many records from the end of the fetched results.
    pub keep_last: Option<usize>,
}

impl FindPlan {
    pub(crate) fn new(query: &Query) -> Result<Self, DocumentStoreError> {
        let mut clauses = Vec::new();

        if let Some(expr) = &query.filter {
            clauses.push(MongoQueryTranslator.visit_expr(expr)?);
        }
        // Records without a value for a sort field are left out of sorted results.
        for key in &query.sort {
            clauses.push(doc! { data_path(&key.field): { "$exists": true } });
        }

        let filter = match clauses.len() {
            0 => doc! {},
            1 => clauses.remove(0),
            _ => doc! { "$and": clauses },
        };

        let mut sort = Document::new();
        for key in &query.sort {
            sort.insert(
                data_path(&key.field),
                match key.direction {
                    SortDirection::Asc => 1,
                    SortDirection::Desc => -1,
                },
            );
        }
        sort.insert("_id", 1);

        let (limit, keep_last) = match (query.limit, query.limit_to_last) {
            (Some(limit), false) => (Some(limit as i64), None),
            (Some(limit), true) => (None, Some(limit)),
            (None, _) => (None, None),
        };

        Ok(Self {
            filter,
            sort,
            skip: query.offset.map(|offset| offset as u64),
            limit,
            keep_last,
        })
    }

    pub(crate) fn finish<T>(&self, mut records: Vec<T>) -> Vec<T> {
        if let Some(keep) = self.keep_last {
            let skip = records.len().saturating_sub(keep);
            records.drain(..skip);
        }

        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmodel_core::query::{Filter, QueryBuilder};

    #[test]
    fn fields_are_addressed_inside_the_body() {
        let filter = MongoQueryTranslator
            .visit_expr(&Filter::and(vec![
                Filter::eq("name", "Dave"),
                Filter::array_contains("tags", "ops"),
            ]))
            .unwrap();

        assert_eq!(
            filter,
            doc! {
                "$and": [
                    { "data.name": { "$eq": "Dave" } },
                    { "data.tags": { "$elemMatch": { "$eq": "ops" } } },
                ]
            }
        );
    }

    #[test]
    fn array_operators_reject_scalars() {
        let result = MongoQueryTranslator.visit_expr(&Filter::in_("name", "Dave"));

        assert!(matches!(result, Err(DocumentStoreError::InvalidDocument(_))));
    }

    #[test]
    fn sorted_queries_require_the_sort_fields() {
        let query = QueryBuilder::default()
            .sort("age", SortDirection::Desc)
            .limit_to_last(2)
            .offset(1)
            .build();
        let plan = FindPlan::new(&query).unwrap();

        assert_eq!(plan.filter, doc! { "data.age": { "$exists": true } });
        assert_eq!(plan.sort, doc! { "data.age": -1, "_id": 1 });
        assert_eq!(plan.skip, Some(1));
        assert_eq!(plan.limit, None);
        assert_eq!(plan.finish(vec![1, 2, 3]), vec![2, 3]);
    }
}
