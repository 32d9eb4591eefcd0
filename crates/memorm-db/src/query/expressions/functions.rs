//! Database functions and aggregate builders.
//!
//! This module provides builder functions that create [`Expression`] values
//! for the functions the engine evaluates, mirroring Django's
//! `django.db.models.functions`, and the [`BuiltinFunc`] table that
//! evaluates them.
//!
//! Functions are organized into categories:
//! - **Comparison**: Coalesce, Greatest, Least, NullIf
//! - **Text**: Concat, Length, Lower, Upper, Trim
//! - **Math**: Abs
//! - **Aggregates**: Count, Sum, Avg, Min, Max
//!
//! A function name that matches a registered transform (e.g. `lower`) is
//! dispatched to the transform instead, so `lower(F("name"))`,
//! `values("name__lower")` and `filter(name__lower=..)` agree.
//!
//! # Examples
//!
//! ```
//! use memorm_db::query::expressions::functions::*;
//! use memorm_db::query::expressions::Expression;
//!
//! // COALESCE(COUNT(response), 0)
//! let expr = coalesce(vec![count("response"), Expression::value(0)]);
//!
//! // LOWER(entry__authors__name)
//! let lowered = lower(Expression::f("entry__authors__name"));
//! ```

use std::cmp::Ordering;

use super::core::{AggregateFunc, Expression};
use crate::value::Value;

// ═══════════════════════════════════════════════════════════════════════════
// Comparison Functions
// ═══════════════════════════════════════════════════════════════════════════

/// COALESCE(expr1, expr2, ...) - returns the first non-NULL argument.
pub fn coalesce(args: Vec<Expression>) -> Expression {
    Expression::func("COALESCE", args)
}

/// GREATEST(expr1, expr2, ...) - returns the largest argument.
pub fn greatest(args: Vec<Expression>) -> Expression {
    Expression::func("GREATEST", args)
}

/// LEAST(expr1, expr2, ...) - returns the smallest argument.
pub fn least(args: Vec<Expression>) -> Expression {
    Expression::func("LEAST", args)
}

/// NULLIF(expr1, expr2) - returns NULL if expr1 equals expr2, otherwise expr1.
pub fn nullif(expr1: Expression, expr2: Expression) -> Expression {
    Expression::func("NULLIF", vec![expr1, expr2])
}

// ═══════════════════════════════════════════════════════════════════════════
// Text Functions
// ═══════════════════════════════════════════════════════════════════════════

/// CONCAT(expr1, expr2, ...) - concatenates strings, skipping NULLs.
pub fn concat(args: Vec<Expression>) -> Expression {
    Expression::func("CONCAT", args)
}

/// LENGTH(expr) - number of characters.
pub fn length(expr: Expression) -> Expression {
    Expression::func("LENGTH", vec![expr])
}

/// LOWER(expr) - converts to lowercase.
pub fn lower(expr: Expression) -> Expression {
    Expression::func("LOWER", vec![expr])
}

/// UPPER(expr) - converts to uppercase.
pub fn upper(expr: Expression) -> Expression {
    Expression::func("UPPER", vec![expr])
}

/// TRIM(expr) - strips surrounding whitespace.
pub fn trim(expr: Expression) -> Expression {
    Expression::func("TRIM", vec![expr])
}

// ═══════════════════════════════════════════════════════════════════════════
// Math Functions
// ═══════════════════════════════════════════════════════════════════════════

/// ABS(expr) - absolute value.
pub fn abs(expr: Expression) -> Expression {
    Expression::func("ABS", vec![expr])
}

// ═══════════════════════════════════════════════════════════════════════════
// Aggregates
// ═══════════════════════════════════════════════════════════════════════════

/// Count(path) - number of non-NULL values of a field path.
pub fn count(path: impl Into<String>) -> Expression {
    Expression::aggregate(AggregateFunc::Count, Expression::f(path))
}

/// Count(path, distinct=True).
pub fn count_distinct(path: impl Into<String>) -> Expression {
    Expression::aggregate_distinct(AggregateFunc::Count, Expression::f(path))
}

/// Sum(path).
pub fn sum(path: impl Into<String>) -> Expression {
    Expression::aggregate(AggregateFunc::Sum, Expression::f(path))
}

/// Avg(path).
pub fn avg(path: impl Into<String>) -> Expression {
    Expression::aggregate(AggregateFunc::Avg, Expression::f(path))
}

/// Min(path).
pub fn min(path: impl Into<String>) -> Expression {
    Expression::aggregate(AggregateFunc::Min, Expression::f(path))
}

/// Max(path).
pub fn max(path: impl Into<String>) -> Expression {
    Expression::aggregate(AggregateFunc::Max, Expression::f(path))
}

// ═══════════════════════════════════════════════════════════════════════════
// Evaluation
// ═══════════════════════════════════════════════════════════════════════════

/// The functions the engine can evaluate natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinFunc {
    /// First non-NULL argument.
    Coalesce,
    /// Largest argument; NULL if any argument is NULL.
    Greatest,
    /// Smallest argument; NULL if any argument is NULL.
    Least,
    /// NULL when both arguments are equal.
    NullIf,
    /// String concatenation.
    Concat,
    /// Character count.
    Length,
    /// Lowercase.
    Lower,
    /// Uppercase.
    Upper,
    /// Whitespace stripping.
    Trim,
    /// Absolute value.
    Abs,
}

impl BuiltinFunc {
    /// Looks up a function by name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_uppercase().as_str() {
            "COALESCE" => Self::Coalesce,
            "GREATEST" => Self::Greatest,
            "LEAST" => Self::Least,
            "NULLIF" => Self::NullIf,
            "CONCAT" => Self::Concat,
            "LENGTH" => Self::Length,
            "LOWER" => Self::Lower,
            "UPPER" => Self::Upper,
            "TRIM" => Self::Trim,
            "ABS" => Self::Abs,
            _ => return None,
        })
    }

    /// The accepted argument counts as `(min, max)`.
    pub const fn arity(self) -> (usize, Option<usize>) {
        match self {
            Self::Coalesce | Self::Greatest | Self::Least | Self::Concat => (2, None),
            Self::NullIf => (2, Some(2)),
            Self::Length | Self::Lower | Self::Upper | Self::Trim | Self::Abs => (1, Some(1)),
        }
    }

    /// Applies the function to already-evaluated arguments.
    pub fn apply(self, args: &[Value]) -> Value {
        match self {
            Self::Coalesce => args
                .iter()
                .find(|v| !v.is_null())
                .cloned()
                .unwrap_or(Value::Null),
            Self::Greatest => extreme(args, Ordering::Greater),
            Self::Least => extreme(args, Ordering::Less),
            Self::NullIf => match args {
                [a, b] if a.loose_eq(b) => Value::Null,
                [a, _] => a.clone(),
                _ => Value::Null,
            },
            Self::Concat => Value::String(
                args.iter()
                    .filter(|v| !v.is_null())
                    .map(text_of)
                    .collect::<String>(),
            ),
            Self::Length => match args.first() {
                Some(Value::Null) | None => Value::Null,
                Some(v) => Value::Int(i64::try_from(text_of(v).chars().count()).unwrap_or(i64::MAX)),
            },
            Self::Lower => map_text(args, |s| s.to_lowercase()),
            Self::Upper => map_text(args, |s| s.to_uppercase()),
            Self::Trim => map_text(args, |s| s.trim().to_string()),
            Self::Abs => match args.first() {
                Some(Value::Int(i)) => Value::Int(i.saturating_abs()),
                Some(Value::Float(f)) => Value::Float(f.abs()),
                _ => Value::Null,
            },
        }
    }
}

/// The text form of a value as used by string functions: strings are
/// taken verbatim, JSON strings are unquoted, everything else uses its
/// display form.
pub(crate) fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Json(serde_json::Value::String(s)) => s.clone(),
        other => other.to_string(),
    }
}

fn map_text(args: &[Value], f: impl Fn(&str) -> String) -> Value {
    match args.first() {
        Some(Value::Null) | None => Value::Null,
        Some(v) => Value::String(f(&text_of(v))),
    }
}

fn extreme(args: &[Value], wanted: Ordering) -> Value {
    if args.iter().any(Value::is_null) {
        return Value::Null;
    }
    let mut best: Option<&Value> = None;
    for v in args {
        best = match best {
            Some(b) if v.compare(b) != Some(wanted) => Some(b),
            _ => Some(v),
        };
    }
    best.cloned().unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_produce_named_funcs() {
        let expr = coalesce(vec![Expression::f("a"), Expression::value(0)]);
        assert!(matches!(expr, Expression::Func { ref name, ref args } if name == "COALESCE" && args.len() == 2));
        assert!(matches!(lower(Expression::f("n")), Expression::Func { ref name, .. } if name == "LOWER"));
        assert!(matches!(nullif(Expression::f("a"), Expression::f("b")), Expression::Func { ref name, .. } if name == "NULLIF"));
    }

    #[test]
    fn test_aggregate_builders() {
        match count("response") {
            Expression::Aggregate { func, field, distinct, .. } => {
                assert_eq!(func, AggregateFunc::Count);
                assert_eq!(*field, Expression::f("response"));
                assert!(!distinct);
            }
            _ => panic!("Expected Aggregate"),
        }
        assert!(matches!(count_distinct("x"), Expression::Aggregate { distinct: true, .. }));
        assert!(matches!(sum("x"), Expression::Aggregate { func: AggregateFunc::Sum, .. }));
        assert!(matches!(avg("x"), Expression::Aggregate { func: AggregateFunc::Avg, .. }));
        assert!(matches!(min("x"), Expression::Aggregate { func: AggregateFunc::Min, .. }));
        assert!(matches!(max("x"), Expression::Aggregate { func: AggregateFunc::Max, .. }));
    }

    #[test]
    fn test_from_name() {
        assert_eq!(BuiltinFunc::from_name("coalesce"), Some(BuiltinFunc::Coalesce));
        assert_eq!(BuiltinFunc::from_name("LOWER"), Some(BuiltinFunc::Lower));
        assert_eq!(BuiltinFunc::from_name("SOUNDEX"), None);
    }

    #[test]
    fn test_coalesce() {
        let v = BuiltinFunc::Coalesce.apply(&[Value::Null, Value::Int(0), Value::Int(5)]);
        assert_eq!(v, Value::Int(0));
        assert_eq!(BuiltinFunc::Coalesce.apply(&[Value::Null, Value::Null]), Value::Null);
    }

    #[test]
    fn test_greatest_least() {
        let args = [Value::Int(3), Value::Float(7.5), Value::Int(1)];
        assert_eq!(BuiltinFunc::Greatest.apply(&args), Value::Float(7.5));
        assert_eq!(BuiltinFunc::Least.apply(&args), Value::Int(1));
        assert_eq!(
            BuiltinFunc::Greatest.apply(&[Value::Int(1), Value::Null]),
            Value::Null
        );
    }

    #[test]
    fn test_nullif() {
        assert_eq!(BuiltinFunc::NullIf.apply(&[Value::Int(1), Value::Int(1)]), Value::Null);
        assert_eq!(BuiltinFunc::NullIf.apply(&[Value::Int(1), Value::Int(2)]), Value::Int(1));
    }

    #[test]
    fn test_text_functions() {
        assert_eq!(
            BuiltinFunc::Concat.apply(&[Value::from("a"), Value::Null, Value::Int(1)]),
            Value::from("a1")
        );
        assert_eq!(BuiltinFunc::Length.apply(&[Value::from("Ærø")]), Value::Int(3));
        assert_eq!(BuiltinFunc::Lower.apply(&[Value::from("ÉCOLE")]), Value::from("école"));
        assert_eq!(BuiltinFunc::Upper.apply(&[Value::from("abc")]), Value::from("ABC"));
        assert_eq!(BuiltinFunc::Trim.apply(&[Value::from("  x ")]), Value::from("x"));
        assert_eq!(BuiltinFunc::Lower.apply(&[Value::Null]), Value::Null);
    }

    #[test]
    fn test_abs() {
        assert_eq!(BuiltinFunc::Abs.apply(&[Value::Int(-3)]), Value::Int(3));
        assert_eq!(BuiltinFunc::Abs.apply(&[Value::Float(-1.5)]), Value::Float(1.5));
        assert_eq!(BuiltinFunc::Abs.apply(&[Value::from("x")]), Value::Null);
    }

    #[test]
    fn test_arity() {
        assert_eq!(BuiltinFunc::NullIf.arity(), (2, Some(2)));
        assert_eq!(BuiltinFunc::Coalesce.arity(), (2, None));
        assert_eq!(BuiltinFunc::Lower.arity(), (1, Some(1)));
    }
}
