//! Query expressions, aggregates, and F-objects.
//!
//! This module provides the [`Expression`] enum for building computed values,
//! annotations, and aggregates in queries. It mirrors Django's
//! `django.db.models.expressions` module.
//!
//! # Examples
//!
//! ```
//! use memorm_db::query::expressions::{AggregateFunc, Expression};
//!
//! // F("number_of_comments") + F("number_of_pingbacks")
//! let expr = Expression::f("number_of_comments") + Expression::f("number_of_pingbacks");
//!
//! // Count("entry")
//! let count = Expression::aggregate(AggregateFunc::Count, Expression::f("entry"));
//! assert!(count.contains_aggregate());
//! assert!(!expr.contains_aggregate());
//! ```

use std::ops;

use crate::query::compiler::Query;
use crate::query::lookups::Q;
use crate::value::Value;

/// A query expression that produces a value for a row or a group of rows.
///
/// Expressions can reference fields, literal values, functions, aggregates,
/// subqueries, and arithmetic combinations. They are used in `annotate()`,
/// `aggregate()`, `filter()` operands, `values()`, and indexes.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// A literal value.
    Value(Value),
    /// An F-expression referencing a field path of the current row.
    F(String),
    /// A reference to a field path of the enclosing query's row, used inside
    /// subqueries.
    OuterRef(String),
    /// A JSON key path extracted as text (Django's `KT`).
    KeyText(String),
    /// A function call. Registered transforms are consulted before the
    /// built-in functions.
    Func {
        /// Function name (e.g., "COALESCE", "LOWER").
        name: String,
        /// Function arguments.
        args: Vec<Expression>,
    },
    /// An aggregate function.
    Aggregate {
        /// The aggregate operation.
        func: AggregateFunc,
        /// The expression being aggregated.
        field: Box<Expression>,
        /// Whether to aggregate distinct values only.
        distinct: bool,
        /// Optional condition restricting the aggregated rows.
        filter: Option<Box<Q>>,
    },
    /// A CASE ... WHEN ... THEN ... ELSE ... END expression.
    Case {
        /// The WHEN/THEN branches.
        whens: Vec<When>,
        /// The ELSE value.
        default: Option<Box<Expression>>,
    },
    /// A scalar subquery: the first column of its first row, or NULL.
    Subquery(Box<Query>),
    /// An EXISTS (or NOT EXISTS) subquery expression.
    Exists {
        /// The inner query for the EXISTS check.
        query: Box<Query>,
        /// Whether this is NOT EXISTS.
        negated: bool,
    },
    /// Addition.
    Add(Box<Expression>, Box<Expression>),
    /// Subtraction.
    Sub(Box<Expression>, Box<Expression>),
    /// Multiplication.
    Mul(Box<Expression>, Box<Expression>),
    /// Division.
    Div(Box<Expression>, Box<Expression>),
}

/// Aggregate function types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunc {
    /// Number of non-NULL values.
    Count,
    /// Sum of the values.
    Sum,
    /// Arithmetic mean of the values.
    Avg,
    /// Smallest value.
    Min,
    /// Largest value.
    Max,
}

impl AggregateFunc {
    /// Returns the function name, as used in default aggregate aliases
    /// (`entry__count`).
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

/// A single WHEN/THEN branch in a CASE expression.
#[derive(Debug, Clone, PartialEq)]
pub struct When {
    /// The condition for this branch.
    pub condition: Q,
    /// The value to return when the condition is met.
    pub then: Expression,
}

impl When {
    /// Creates a branch.
    pub fn new(condition: impl Into<Q>, then: impl Into<Expression>) -> Self {
        Self {
            condition: condition.into(),
            then: then.into(),
        }
    }
}

impl Expression {
    /// Creates an F-expression referencing a field path.
    pub fn f(path: impl Into<String>) -> Self {
        Self::F(path.into())
    }

    /// Creates a reference to the enclosing query's row.
    pub fn outer_ref(path: impl Into<String>) -> Self {
        Self::OuterRef(path.into())
    }

    /// Creates a key-text extraction (`KT("data__owner__name")`).
    pub fn kt(path: impl Into<String>) -> Self {
        Self::KeyText(path.into())
    }

    /// Creates a literal value expression.
    pub fn value(v: impl Into<Value>) -> Self {
        Self::Value(v.into())
    }

    /// Creates a function call expression.
    pub fn func(name: impl Into<String>, args: Vec<Expression>) -> Self {
        Self::Func {
            name: name.into(),
            args,
        }
    }

    /// Creates an aggregate expression.
    pub fn aggregate(func: AggregateFunc, field: Expression) -> Self {
        Self::Aggregate {
            func,
            field: Box::new(field),
            distinct: false,
            filter: None,
        }
    }

    /// Creates an aggregate over distinct values.
    pub fn aggregate_distinct(func: AggregateFunc, field: Expression) -> Self {
        Self::Aggregate {
            func,
            field: Box::new(field),
            distinct: true,
            filter: None,
        }
    }

    /// Restricts an aggregate to the rows matching `condition`. Other
    /// expressions are returned unchanged.
    #[must_use]
    pub fn with_filter(self, condition: impl Into<Q>) -> Self {
        match self {
            Self::Aggregate {
                func,
                field,
                distinct,
                ..
            } => Self::Aggregate {
                func,
                field,
                distinct,
                filter: Some(Box::new(condition.into())),
            },
            other => other,
        }
    }

    /// Creates a CASE expression.
    pub fn case(whens: Vec<When>, default: Option<Expression>) -> Self {
        Self::Case {
            whens,
            default: default.map(Box::new),
        }
    }

    /// Returns `true` if this expression contains an aggregate outside any
    /// subquery.
    pub fn contains_aggregate(&self) -> bool {
        match self {
            Self::Aggregate { .. } => true,
            Self::Func { args, .. } => args.iter().any(Self::contains_aggregate),
            Self::Case { whens, default } => {
                whens.iter().any(|w| w.then.contains_aggregate())
                    || default.as_deref().is_some_and(Self::contains_aggregate)
            }
            Self::Add(l, r) | Self::Sub(l, r) | Self::Mul(l, r) | Self::Div(l, r) => {
                l.contains_aggregate() || r.contains_aggregate()
            }
            Self::Value(_)
            | Self::F(_)
            | Self::OuterRef(_)
            | Self::KeyText(_)
            | Self::Subquery(_)
            | Self::Exists { .. } => false,
        }
    }

    /// The alias Django would give this expression when it is passed to
    /// `aggregate()` without a name (e.g. `entry__count`).
    pub fn default_alias(&self) -> Option<String> {
        match self {
            Self::Aggregate { func, field, .. } => match field.as_ref() {
                Self::F(path) => Some(format!("{path}__{}", func.name())),
                _ => None,
            },
            _ => None,
        }
    }
}

// ── From implementations ───────────────────────────────────────────────

impl From<Value> for Expression {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

impl From<bool> for Expression {
    fn from(v: bool) -> Self {
        Self::Value(v.into())
    }
}

impl From<i32> for Expression {
    fn from(v: i32) -> Self {
        Self::Value(v.into())
    }
}

impl From<i64> for Expression {
    fn from(v: i64) -> Self {
        Self::Value(v.into())
    }
}

impl From<f64> for Expression {
    fn from(v: f64) -> Self {
        Self::Value(v.into())
    }
}

impl From<&str> for Expression {
    fn from(v: &str) -> Self {
        Self::Value(v.into())
    }
}

impl From<String> for Expression {
    fn from(v: String) -> Self {
        Self::Value(v.into())
    }
}

impl From<chrono::NaiveDate> for Expression {
    fn from(v: chrono::NaiveDate) -> Self {
        Self::Value(v.into())
    }
}

impl From<chrono::NaiveDateTime> for Expression {
    fn from(v: chrono::NaiveDateTime) -> Self {
        Self::Value(v.into())
    }
}

impl From<serde_json::Value> for Expression {
    fn from(v: serde_json::Value) -> Self {
        Self::Value(v.into())
    }
}

impl From<Vec<Value>> for Expression {
    fn from(v: Vec<Value>) -> Self {
        Self::Value(v.into())
    }
}

impl From<Vec<&str>> for Expression {
    fn from(v: Vec<&str>) -> Self {
        Self::Value(v.into())
    }
}

impl From<Vec<i64>> for Expression {
    fn from(v: Vec<i64>) -> Self {
        Self::Value(v.into())
    }
}

impl<T: Into<Value>> From<Option<T>> for Expression {
    fn from(v: Option<T>) -> Self {
        Self::Value(v.into())
    }
}

// ── Arithmetic ─────────────────────────────────────────────────────────

impl ops::Add for Expression {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self::Add(Box::new(self), Box::new(rhs))
    }
}

impl ops::Sub for Expression {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self::Sub(Box::new(self), Box::new(rhs))
    }
}

impl ops::Mul for Expression {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self::Output {
        Self::Mul(Box::new(self), Box::new(rhs))
    }
}

impl ops::Div for Expression {
    type Output = Self;
    fn div(self, rhs: Self) -> Self::Output {
        Self::Div(Box::new(self), Box::new(rhs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f_expression() {
        let expr = Expression::f("price");
        assert!(matches!(expr, Expression::F(ref s) if s == "price"));
    }

    #[test]
    fn test_value_expression() {
        let expr = Expression::value(42);
        assert!(matches!(expr, Expression::Value(Value::Int(42))));
        assert_eq!(Expression::from("x"), Expression::Value(Value::from("x")));
    }

    #[test]
    fn test_func_expression() {
        let expr = Expression::func("UPPER", vec![Expression::f("name")]);
        if let Expression::Func { name, args } = &expr {
            assert_eq!(name, "UPPER");
            assert_eq!(args.len(), 1);
        } else {
            panic!("Expected Func");
        }
    }

    #[test]
    fn test_aggregate_expression() {
        let expr = Expression::aggregate(AggregateFunc::Count, Expression::f("id"));
        if let Expression::Aggregate {
            func,
            distinct,
            filter,
            ..
        } = &expr
        {
            assert_eq!(*func, AggregateFunc::Count);
            assert!(!distinct);
            assert!(filter.is_none());
        } else {
            panic!("Expected Aggregate");
        }
    }

    #[test]
    fn test_aggregate_with_filter() {
        let expr = Expression::aggregate_distinct(AggregateFunc::Count, Expression::f("entry"))
            .with_filter(Q::new("entry__rating__gt", 3));
        if let Expression::Aggregate {
            distinct, filter, ..
        } = &expr
        {
            assert!(distinct);
            assert!(filter.is_some());
        } else {
            panic!("Expected Aggregate");
        }
    }

    #[test]
    fn test_case_expression() {
        let when = When::new(Q::new("status", "active"), 1);
        let expr = Expression::case(vec![when], Some(Expression::value(0)));
        if let Expression::Case { whens, default } = &expr {
            assert_eq!(whens.len(), 1);
            assert!(default.is_some());
        } else {
            panic!("Expected Case");
        }
    }

    #[test]
    fn test_arithmetic_operators() {
        assert!(matches!(
            Expression::f("price") + Expression::value(10),
            Expression::Add(_, _)
        ));
        assert!(matches!(
            Expression::f("price") - Expression::value(5),
            Expression::Sub(_, _)
        ));
        assert!(matches!(
            Expression::f("quantity") * Expression::f("price"),
            Expression::Mul(_, _)
        ));
        assert!(matches!(
            Expression::f("total") / Expression::value(2),
            Expression::Div(_, _)
        ));
    }

    #[test]
    fn test_contains_aggregate() {
        let agg = Expression::aggregate(AggregateFunc::Sum, Expression::f("votes"));
        assert!(agg.contains_aggregate());
        assert!(Expression::func("COALESCE", vec![agg.clone(), Expression::value(0)])
            .contains_aggregate());
        assert!((agg + Expression::value(1)).contains_aggregate());
        assert!(!Expression::kt("data__breed").contains_aggregate());
    }

    #[test]
    fn test_default_alias() {
        let agg = Expression::aggregate(AggregateFunc::Count, Expression::f("entry"));
        assert_eq!(agg.default_alias().as_deref(), Some("entry__count"));
        assert_eq!(Expression::f("entry").default_alias(), None);
    }

    #[test]
    fn test_aggregate_func_names() {
        assert_eq!(AggregateFunc::Count.name(), "count");
        assert_eq!(AggregateFunc::Avg.name(), "avg");
    }
}
