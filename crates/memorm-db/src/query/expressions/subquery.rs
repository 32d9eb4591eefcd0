//! Subquery, OuterRef, and Exists expressions for correlated subqueries.
//!
//! These expressions allow embedding one query inside another, referencing
//! fields of the outer row, and checking for existence of matching rows.
//! This mirrors Django's `Subquery`, `OuterRef`, and `Exists` expressions.
//!
//! # Examples
//!
//! ```
//! use memorm_db::query::compiler::Query;
//! use memorm_db::query::expressions::subquery::{Exists, OuterRef, SubqueryExpression};
//!
//! // The newest entry headline of the outer blog.
//! let mut inner = Query::new("entry");
//! inner.add_filter(memorm_db::query::lookups::Q::new("blog", OuterRef::new("pk")), false);
//! let subquery = SubqueryExpression::new(inner).into_expression();
//!
//! let exists = Exists::new(Query::new("entry")).negate().into_expression();
//! ```

use super::core::Expression;
use crate::query::compiler::Query;
use crate::query::queryset::{QuerySet, Shape};

/// A scalar subquery: evaluates to the first column of the first row of the
/// inner query, or NULL when it returns nothing.
///
/// This is the equivalent of Django's `Subquery()`.
#[derive(Debug, Clone)]
pub struct SubqueryExpression {
    query: Query,
}

impl SubqueryExpression {
    /// Creates a new subquery expression from a query.
    pub const fn new(query: Query) -> Self {
        Self { query }
    }

    /// Creates a subquery from a queryset (which is not evaluated).
    pub fn from_queryset<S: Shape>(queryset: &QuerySet<S>) -> Self {
        Self::new(queryset.query().clone())
    }

    /// Returns a reference to the inner query.
    pub const fn query(&self) -> &Query {
        &self.query
    }

    /// Converts this subquery into an Expression.
    pub fn into_expression(self) -> Expression {
        Expression::Subquery(Box::new(self.query))
    }
}

impl From<SubqueryExpression> for Expression {
    fn from(s: SubqueryExpression) -> Self {
        s.into_expression()
    }
}

/// A reference to a field path of the enclosing query's row.
///
/// This is the equivalent of Django's `OuterRef()`.
#[derive(Debug, Clone)]
pub struct OuterRef {
    path: String,
}

impl OuterRef {
    /// Creates a new outer reference to the given field path.
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the referenced path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Converts this outer reference into an Expression.
    pub fn into_expression(self) -> Expression {
        Expression::OuterRef(self.path)
    }
}

impl From<OuterRef> for Expression {
    fn from(o: OuterRef) -> Self {
        o.into_expression()
    }
}

/// An EXISTS subquery expression that checks whether a subquery returns any
/// rows.
///
/// This is the equivalent of Django's `Exists()`.
#[derive(Debug, Clone)]
pub struct Exists {
    query: Query,
    negated: bool,
}

impl Exists {
    /// Creates a new EXISTS expression from a query.
    pub const fn new(query: Query) -> Self {
        Self {
            query,
            negated: false,
        }
    }

    /// Creates an EXISTS expression from a queryset.
    pub fn from_queryset<S: Shape>(queryset: &QuerySet<S>) -> Self {
        Self::new(queryset.query().clone())
    }

    /// Negates this EXISTS to produce NOT EXISTS.
    #[must_use]
    pub const fn negate(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    /// Returns whether this is a negated (NOT EXISTS) expression.
    pub const fn is_negated(&self) -> bool {
        self.negated
    }

    /// Returns a reference to the inner query.
    pub const fn query(&self) -> &Query {
        &self.query
    }

    /// Converts this EXISTS into an Expression.
    pub fn into_expression(self) -> Expression {
        Expression::Exists {
            query: Box::new(self.query),
            negated: self.negated,
        }
    }
}

impl From<Exists> for Expression {
    fn from(e: Exists) -> Self {
        e.into_expression()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subquery_expression_creation() {
        let subquery = SubqueryExpression::new(Query::new("choice"));
        assert_eq!(subquery.query().model, "choice");
        assert!(matches!(subquery.into_expression(), Expression::Subquery(_)));
    }

    #[test]
    fn test_outer_ref() {
        let outer = OuterRef::new("pk");
        assert_eq!(outer.path(), "pk");
        assert_eq!(Expression::from(outer), Expression::OuterRef("pk".into()));
    }

    #[test]
    fn test_exists_negation() {
        let exists = Exists::new(Query::new("entry"));
        assert!(!exists.is_negated());
        let negated = exists.negate();
        assert!(negated.is_negated());
        assert!(!negated.clone().negate().is_negated());
        match negated.into_expression() {
            Expression::Exists { query, negated } => {
                assert_eq!(query.model, "entry");
                assert!(negated);
            }
            _ => panic!("Expected Exists"),
        }
    }
}
