//! Query lookups and Q objects for building complex filters.
//!
//! This module provides the [`Lookup`] enum for typed field-level
//! comparisons, the [`LookupKind`] table of built-in operator names, and the
//! [`Q`] enum for combining filters with AND, OR, and NOT operators.
//! Together they mirror Django's `Q` objects and lookup expressions.
//!
//! A filter can be written either in keyword style, where the operator is
//! the last `__` segment of the path, or with a typed [`Lookup`]:
//!
//! ```
//! use memorm_db::query::lookups::{Lookup, Q};
//! use memorm_db::value::Value;
//!
//! // Keyword style: headline LIKE 'What%'
//! let q = Q::new("headline__startswith", "What");
//!
//! // Typed style, the same predicate
//! let typed = Q::filter("headline", Lookup::StartsWith("What".into()));
//! assert_eq!(q, typed);
//!
//! // Combining: (pub_date = '2005-05-02' OR pub_date = '2005-05-06') AND NOT rating > 3
//! let combined = (Q::new("pub_date", "2005-05-02") | Q::new("pub_date", "2005-05-06"))
//!     & !Q::new("rating__gt", 3);
//! ```

use std::ops;

use crate::query::expressions::Expression;
use crate::value::Value;

/// The built-in lookup operators.
///
/// The operator of a keyword filter is the last segment of its path; when
/// it is absent the lookup defaults to [`LookupKind::Exact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupKind {
    /// `exact`
    Exact,
    /// `iexact`
    IExact,
    /// `contains` (substring on text, structural containment on JSON)
    Contains,
    /// `icontains`
    IContains,
    /// `in`
    In,
    /// `gt`
    Gt,
    /// `gte`
    Gte,
    /// `lt`
    Lt,
    /// `lte`
    Lte,
    /// `startswith`
    StartsWith,
    /// `istartswith`
    IStartsWith,
    /// `endswith`
    EndsWith,
    /// `iendswith`
    IEndsWith,
    /// `range` (inclusive on both ends)
    Range,
    /// `isnull`
    IsNull,
    /// `regex`
    Regex,
    /// `iregex`
    IRegex,
    /// `has_key`
    HasKey,
    /// `has_keys`
    HasKeys,
    /// `has_any_keys`
    HasAnyKeys,
    /// `contained_by`
    ContainedBy,
}

impl LookupKind {
    /// Every built-in lookup, in documentation order.
    pub const ALL: [Self; 21] = [
        Self::Exact,
        Self::IExact,
        Self::Contains,
        Self::IContains,
        Self::In,
        Self::Gt,
        Self::Gte,
        Self::Lt,
        Self::Lte,
        Self::StartsWith,
        Self::IStartsWith,
        Self::EndsWith,
        Self::IEndsWith,
        Self::Range,
        Self::IsNull,
        Self::Regex,
        Self::IRegex,
        Self::HasKey,
        Self::HasKeys,
        Self::HasAnyKeys,
        Self::ContainedBy,
    ];

    /// The name used in keyword paths.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::IExact => "iexact",
            Self::Contains => "contains",
            Self::IContains => "icontains",
            Self::In => "in",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::StartsWith => "startswith",
            Self::IStartsWith => "istartswith",
            Self::EndsWith => "endswith",
            Self::IEndsWith => "iendswith",
            Self::Range => "range",
            Self::IsNull => "isnull",
            Self::Regex => "regex",
            Self::IRegex => "iregex",
            Self::HasKey => "has_key",
            Self::HasKeys => "has_keys",
            Self::HasAnyKeys => "has_any_keys",
            Self::ContainedBy => "contained_by",
        }
    }

    /// Parses a lookup name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Returns `true` for the pattern-matching text lookups.
    pub const fn is_text_pattern(self) -> bool {
        matches!(
            self,
            Self::IExact
                | Self::IContains
                | Self::StartsWith
                | Self::IStartsWith
                | Self::EndsWith
                | Self::IEndsWith
                | Self::Regex
                | Self::IRegex
        )
    }

    /// Returns `true` for the ordering comparisons.
    pub const fn is_comparison(self) -> bool {
        matches!(self, Self::Gt | Self::Gte | Self::Lt | Self::Lte | Self::Range)
    }

    /// Returns `true` for the JSON-document-only lookups.
    pub const fn is_json_only(self) -> bool {
        matches!(
            self,
            Self::HasKey | Self::HasKeys | Self::HasAnyKeys | Self::ContainedBy
        )
    }
}

/// A typed field-level lookup operation.
///
/// Each variant corresponds to a Django lookup type and carries its
/// operand. [`Q::filter`] turns it into the equivalent keyword filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Exact match.
    Exact(Value),
    /// Case-insensitive exact match.
    IExact(Value),
    /// Substring match on text, structural containment on JSON documents.
    Contains(Value),
    /// Case-insensitive substring match.
    IContains(String),
    /// Membership test.
    In(Vec<Value>),
    /// Greater than.
    Gt(Value),
    /// Greater than or equal.
    Gte(Value),
    /// Less than.
    Lt(Value),
    /// Less than or equal.
    Lte(Value),
    /// Starts with.
    StartsWith(String),
    /// Case-insensitive starts with.
    IStartsWith(String),
    /// Ends with.
    EndsWith(String),
    /// Case-insensitive ends with.
    IEndsWith(String),
    /// Inclusive range test.
    Range(Value, Value),
    /// SQL NULL test.
    IsNull(bool),
    /// Regular expression match.
    Regex(String),
    /// Case-insensitive regular expression match.
    IRegex(String),
    /// The JSON document has the given top-level key.
    HasKey(String),
    /// The JSON document has all of the given top-level keys.
    HasKeys(Vec<String>),
    /// The JSON document has any of the given top-level keys.
    HasAnyKeys(Vec<String>),
    /// The JSON document is a structural subset of the operand.
    ContainedBy(Value),
}

impl Lookup {
    /// The operator of this lookup.
    pub const fn kind(&self) -> LookupKind {
        match self {
            Self::Exact(_) => LookupKind::Exact,
            Self::IExact(_) => LookupKind::IExact,
            Self::Contains(_) => LookupKind::Contains,
            Self::IContains(_) => LookupKind::IContains,
            Self::In(_) => LookupKind::In,
            Self::Gt(_) => LookupKind::Gt,
            Self::Gte(_) => LookupKind::Gte,
            Self::Lt(_) => LookupKind::Lt,
            Self::Lte(_) => LookupKind::Lte,
            Self::StartsWith(_) => LookupKind::StartsWith,
            Self::IStartsWith(_) => LookupKind::IStartsWith,
            Self::EndsWith(_) => LookupKind::EndsWith,
            Self::IEndsWith(_) => LookupKind::IEndsWith,
            Self::Range(..) => LookupKind::Range,
            Self::IsNull(_) => LookupKind::IsNull,
            Self::Regex(_) => LookupKind::Regex,
            Self::IRegex(_) => LookupKind::IRegex,
            Self::HasKey(_) => LookupKind::HasKey,
            Self::HasKeys(_) => LookupKind::HasKeys,
            Self::HasAnyKeys(_) => LookupKind::HasAnyKeys,
            Self::ContainedBy(_) => LookupKind::ContainedBy,
        }
    }

    /// Consumes the lookup and returns its operand as a single value.
    pub fn into_operand(self) -> Value {
        match self {
            Self::Exact(v)
            | Self::IExact(v)
            | Self::Contains(v)
            | Self::Gt(v)
            | Self::Gte(v)
            | Self::Lt(v)
            | Self::Lte(v)
            | Self::ContainedBy(v) => v,
            Self::IContains(s)
            | Self::StartsWith(s)
            | Self::IStartsWith(s)
            | Self::EndsWith(s)
            | Self::IEndsWith(s)
            | Self::Regex(s)
            | Self::IRegex(s)
            | Self::HasKey(s) => Value::String(s),
            Self::In(vals) => Value::List(vals),
            Self::Range(low, high) => Value::List(vec![low, high]),
            Self::IsNull(b) => Value::Bool(b),
            Self::HasKeys(keys) | Self::HasAnyKeys(keys) => {
                Value::List(keys.into_iter().map(Value::String).collect())
            }
        }
    }
}

/// A composable query filter, equivalent to Django's `Q` object.
///
/// `Q` objects can be combined using `&` (AND), `|` (OR), and `!` (NOT)
/// operators. An empty AND is always true; an empty OR is always false.
#[derive(Debug, Clone, PartialEq)]
pub enum Q {
    /// A single lookup: a `__`-separated path (optionally ending in an
    /// operator name) compared against an operand.
    Filter {
        /// The field path, e.g. `entry__authors__name__istartswith`.
        path: String,
        /// The operand: a literal value or an expression such as `F(..)`.
        value: Expression,
    },
    /// Logical AND of multiple conditions.
    And(Vec<Q>),
    /// Logical OR of multiple conditions.
    Or(Vec<Q>),
    /// Logical negation of a condition.
    Not(Box<Q>),
}

impl Q {
    /// Creates a keyword-style filter.
    pub fn new(path: impl Into<String>, value: impl Into<Expression>) -> Self {
        Self::Filter {
            path: path.into(),
            value: value.into(),
        }
    }

    /// Creates a filter from a field path and a typed lookup.
    pub fn filter(field: impl Into<String>, lookup: Lookup) -> Self {
        let kind = lookup.kind();
        Self::Filter {
            path: format!("{}__{}", field.into(), kind.name()),
            value: Expression::Value(lookup.into_operand()),
        }
    }

    /// ANDs every condition in `conditions` together.
    pub fn and(conditions: impl IntoIterator<Item = Self>) -> Self {
        conditions
            .into_iter()
            .fold(Self::And(Vec::new()), |acc, q| acc & q)
    }

    /// ORs every condition in `conditions` together.
    pub fn or(conditions: impl IntoIterator<Item = Self>) -> Self {
        conditions
            .into_iter()
            .fold(Self::Or(Vec::new()), |acc, q| acc | q)
    }

    /// Returns `true` if this is an empty AND or OR.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::And(children) | Self::Or(children) => children.is_empty(),
            _ => false,
        }
    }

    /// Visits every `(path, operand)` leaf.
    pub fn leaves(&self) -> Vec<(&str, &Expression)> {
        match self {
            Self::Filter { path, value } => vec![(path.as_str(), value)],
            Self::And(children) | Self::Or(children) => {
                children.iter().flat_map(Self::leaves).collect()
            }
            Self::Not(inner) => inner.leaves(),
        }
    }
}

impl<V: Into<Expression>> From<(&str, V)> for Q {
    fn from((path, value): (&str, V)) -> Self {
        Self::new(path, value)
    }
}

impl From<Vec<Q>> for Q {
    fn from(conditions: Vec<Q>) -> Self {
        Self::and(conditions)
    }
}

impl ops::BitAnd for Q {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            // Flatten nested ANDs
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            }
            (Self::And(mut left), other) => {
                left.push(other);
                Self::And(left)
            }
            (other, Self::And(mut right)) => {
                right.insert(0, other);
                Self::And(right)
            }
            (left, right) => Self::And(vec![left, right]),
        }
    }
}

impl ops::BitOr for Q {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            // Flatten nested ORs
            (Self::Or(mut left), Self::Or(right)) => {
                left.extend(right);
                Self::Or(left)
            }
            (Self::Or(mut left), other) => {
                left.push(other);
                Self::Or(left)
            }
            (other, Self::Or(mut right)) => {
                right.insert(0, other);
                Self::Or(right)
            }
            (left, right) => Self::Or(vec![left, right]),
        }
    }
}

impl ops::Not for Q {
    type Output = Self;

    fn not(self) -> Self::Output {
        // Double negation cancellation
        match self {
            Self::Not(inner) => *inner,
            other => Self::Not(Box::new(other)),
        }
    }
}
