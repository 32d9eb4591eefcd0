//! Lookup operators, arithmetic, and aggregate functions over [`Value`]s.
//!
//! Everything here is a pure function of already-evaluated operands; the
//! executor decides which rows the operands come from.

use std::collections::HashMap;
use std::sync::Mutex;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as Json;

use super::compiler::{ArithOp, LookupOp};
use super::expressions::functions::text_of;
use super::expressions::AggregateFunc;
use super::lookups::LookupKind;
use crate::value::{json_eq, Value};

/// Compiled patterns for `regex` / `iregex`, keyed by pattern and case
/// sensitivity. Invalid patterns are cached as `None` and never match.
static REGEX_CACHE: Lazy<Mutex<HashMap<(String, bool), Option<Regex>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn regex_matches(pattern: &str, insensitive: bool, haystack: &str) -> bool {
    let mut cache = REGEX_CACHE
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let compiled = cache
        .entry((pattern.to_string(), insensitive))
        .or_insert_with(|| {
            let source = if insensitive {
                format!("(?i){pattern}")
            } else {
                pattern.to_string()
            };
            Regex::new(&source).ok()
        });
    compiled.as_ref().is_some_and(|re| re.is_match(haystack))
}

fn fold(value: &Value) -> String {
    text_of(value).to_lowercase()
}

/// Returns `true` if `lhs op rhs` holds.
pub(crate) fn matches(op: &LookupOp, lhs: &Value, rhs: &Value) -> bool {
    match op {
        LookupOp::Custom(lookup) => lookup.matches(lhs, rhs),
        LookupOp::Builtin(kind) => builtin(*kind, lhs, rhs),
    }
}

fn builtin(kind: LookupKind, lhs: &Value, rhs: &Value) -> bool {
    if kind == LookupKind::IsNull {
        return rhs.as_bool().is_some_and(|wanted| lhs.is_null() == wanted);
    }
    if lhs.is_null() {
        return false;
    }
    match kind {
        LookupKind::Exact => match (lhs, rhs) {
            (Value::Json(doc), Value::Null) => doc.is_null(),
            _ => lhs.loose_eq(rhs),
        },
        LookupKind::IExact => !rhs.is_null() && fold(lhs) == fold(rhs),
        LookupKind::Contains => match lhs {
            Value::Json(doc) => !rhs.is_null() && json_contains(doc, &rhs.to_json()),
            _ => !rhs.is_null() && fold(lhs).contains(&fold(rhs)),
        },
        LookupKind::IContains => !rhs.is_null() && fold(lhs).contains(&fold(rhs)),
        LookupKind::ContainedBy => match lhs {
            Value::Json(doc) => !rhs.is_null() && json_contains(&rhs.to_json(), doc),
            _ => false,
        },
        LookupKind::In => match rhs {
            Value::List(items) => items.iter().any(|item| lhs.loose_eq(item)),
            _ => false,
        },
        LookupKind::Gt => lhs.compare(rhs).is_some_and(std::cmp::Ordering::is_gt),
        LookupKind::Gte => lhs.compare(rhs).is_some_and(std::cmp::Ordering::is_ge),
        LookupKind::Lt => lhs.compare(rhs).is_some_and(std::cmp::Ordering::is_lt),
        LookupKind::Lte => lhs.compare(rhs).is_some_and(std::cmp::Ordering::is_le),
        LookupKind::Range => match rhs {
            Value::List(bounds) if bounds.len() == 2 => {
                lhs.compare(&bounds[0]).is_some_and(std::cmp::Ordering::is_ge)
                    && lhs.compare(&bounds[1]).is_some_and(std::cmp::Ordering::is_le)
            }
            _ => false,
        },
        LookupKind::StartsWith => !rhs.is_null() && text_of(lhs).starts_with(&text_of(rhs)),
        LookupKind::IStartsWith => !rhs.is_null() && fold(lhs).starts_with(&fold(rhs)),
        LookupKind::EndsWith => !rhs.is_null() && text_of(lhs).ends_with(&text_of(rhs)),
        LookupKind::IEndsWith => !rhs.is_null() && fold(lhs).ends_with(&fold(rhs)),
        LookupKind::Regex => !rhs.is_null() && regex_matches(&text_of(rhs), false, &text_of(lhs)),
        LookupKind::IRegex => !rhs.is_null() && regex_matches(&text_of(rhs), true, &text_of(lhs)),
        LookupKind::HasKey => has_key(lhs, &text_of(rhs)),
        LookupKind::HasKeys => match rhs {
            Value::List(keys) => keys.iter().all(|k| has_key(lhs, &text_of(k))),
            _ => false,
        },
        LookupKind::HasAnyKeys => match rhs {
            Value::List(keys) => keys.iter().any(|k| has_key(lhs, &text_of(k))),
            _ => false,
        },
        LookupKind::IsNull => false,
    }
}

fn has_key(value: &Value, key: &str) -> bool {
    match value {
        Value::Json(Json::Object(map)) => map.contains_key(key),
        Value::Json(Json::Array(items)) => key
            .parse::<usize>()
            .is_ok_and(|idx| idx < items.len()),
        _ => false,
    }
}

/// Structural containment: objects contain every key of `needle` with a
/// contained value; arrays contain every element of `needle` somewhere
/// (order and duplicates ignored); scalars contain equal scalars. A
/// top-level array also contains a scalar equal to one of its elements.
pub(crate) fn json_contains(haystack: &Json, needle: &Json) -> bool {
    contains_at(haystack, needle, true)
}

fn contains_at(haystack: &Json, needle: &Json, top: bool) -> bool {
    match (haystack, needle) {
        (Json::Object(h), Json::Object(n)) => n
            .iter()
            .all(|(k, nv)| h.get(k).is_some_and(|hv| contains_at(hv, nv, false))),
        (Json::Array(h), Json::Array(n)) => n
            .iter()
            .all(|nv| h.iter().any(|hv| contains_at(hv, nv, false))),
        (Json::Array(h), scalar) if top && !scalar.is_object() => h.iter().any(|hv| json_eq(hv, scalar)),
        (Json::Object(_) | Json::Array(_), _) | (_, Json::Object(_) | Json::Array(_)) => false,
        (h, n) => json_eq(h, n),
    }
}

/// Follows object keys (and array indices) into a document. Returns `None`
/// when a key is missing.
pub(crate) fn key_lookup<'a>(doc: &'a Json, keys: &[String]) -> Option<&'a Json> {
    keys.iter().try_fold(doc, |current, key| match current {
        Json::Object(map) => map.get(key),
        Json::Array(items) => key.parse::<usize>().ok().and_then(|idx| items.get(idx)),
        _ => None,
    })
}

/// Arithmetic with SQL NULL propagation. Division by zero yields NULL;
/// integer division truncates.
pub(crate) fn arith(op: ArithOp, lhs: &Value, rhs: &Value) -> Value {
    let (l, r) = (numeric(lhs), numeric(rhs));
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => match op {
            ArithOp::Add => a.checked_add(b).map_or(Value::Null, Value::Int),
            ArithOp::Sub => a.checked_sub(b).map_or(Value::Null, Value::Int),
            ArithOp::Mul => a.checked_mul(b).map_or(Value::Null, Value::Int),
            ArithOp::Div => a.checked_div(b).map_or(Value::Null, Value::Int),
        },
        (a, b) => match (a.as_float(), b.as_float()) {
            (Some(a), Some(b)) => match op {
                ArithOp::Add => Value::Float(a + b),
                ArithOp::Sub => Value::Float(a - b),
                ArithOp::Mul => Value::Float(a * b),
                ArithOp::Div if b == 0.0 => Value::Null,
                ArithOp::Div => Value::Float(a / b),
            },
            _ => Value::Null,
        },
    }
}

fn numeric(value: &Value) -> Value {
    match value {
        Value::Json(doc) => Value::from_json_scalar(doc),
        other => other.clone(),
    }
}

/// Folds the non-NULL input values of an aggregate.
pub(crate) fn aggregate(func: AggregateFunc, values: Vec<Value>, distinct: bool) -> Value {
    let mut inputs: Vec<Value> = values
        .iter()
        .map(numeric)
        .filter(|v| !v.is_null())
        .collect();
    if distinct {
        let mut unique: Vec<Value> = Vec::with_capacity(inputs.len());
        for value in inputs {
            if !unique.iter().any(|u| u.loose_eq(&value)) {
                unique.push(value);
            }
        }
        inputs = unique;
    }
    match func {
        AggregateFunc::Count => Value::Int(i64::try_from(inputs.len()).unwrap_or(i64::MAX)),
        AggregateFunc::Sum => {
            if inputs.is_empty() {
                return Value::Null;
            }
            if inputs.iter().all(|v| matches!(v, Value::Int(_))) {
                Value::Int(inputs.iter().filter_map(Value::as_int).fold(0_i64, i64::saturating_add))
            } else {
                Value::Float(inputs.iter().filter_map(Value::as_float).sum())
            }
        }
        AggregateFunc::Avg => {
            let numbers: Vec<f64> = inputs.iter().filter_map(Value::as_float).collect();
            if numbers.is_empty() {
                Value::Null
            } else {
                Value::Float(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        AggregateFunc::Min => inputs
            .into_iter()
            .min_by(Value::sort_cmp)
            .unwrap_or(Value::Null),
        AggregateFunc::Max => inputs
            .into_iter()
            .max_by(Value::sort_cmp)
            .unwrap_or(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(kind: LookupKind, lhs: impl Into<Value>, rhs: impl Into<Value>) -> bool {
        builtin(kind, &lhs.into(), &rhs.into())
    }

    #[test]
    fn test_text_operators() {
        assert!(check(LookupKind::Contains, "Lennon", "ENN"));
        assert!(check(LookupKind::IContains, "Lennon", "enn"));
        assert!(check(LookupKind::IExact, "Beatles", "beatles"));
        assert!(check(LookupKind::StartsWith, "Lennon", "Len"));
        assert!(!check(LookupKind::StartsWith, "Lennon", "len"));
        assert!(check(LookupKind::IStartsWith, "Lennon", "len"));
        assert!(check(LookupKind::EndsWith, "Lennon", "non"));
        assert!(check(LookupKind::IEndsWith, "Lennon", "NON"));
        assert!(check(LookupKind::Regex, "Lennon", r"^L.n+on$"));
        assert!(!check(LookupKind::Regex, "lennon", r"^L"));
        assert!(check(LookupKind::IRegex, "lennon", r"^L"));
        assert!(!check(LookupKind::Regex, "x", "("));
    }

    #[test]
    fn test_null_never_matches_except_isnull() {
        for kind in LookupKind::ALL {
            if kind == LookupKind::IsNull {
                continue;
            }
            assert!(!builtin(kind, &Value::Null, &Value::from("x")), "{kind:?}");
        }
        assert!(check(LookupKind::IsNull, Value::Null, true));
        assert!(check(LookupKind::IsNull, 3, false));
        assert!(!check(LookupKind::IsNull, Value::Json(Json::Null), true));
    }

    #[test]
    fn test_comparisons_and_range() {
        assert!(check(LookupKind::Gt, 5, 4));
        assert!(check(LookupKind::Gte, 4.0, 4));
        assert!(!check(LookupKind::Lt, "b", "a"));
        assert!(check(LookupKind::Range, 5, vec![1_i64, 5]));
        assert!(!check(LookupKind::Range, 6, vec![1_i64, 5]));
        assert!(check(LookupKind::In, 2, vec![1_i64, 2]));
        assert!(!check(LookupKind::Gt, "5", 4));
    }

    #[test]
    fn test_exact_json_null_is_not_sql_null() {
        assert!(check(LookupKind::Exact, Value::Json(Json::Null), Value::Null));
        assert!(!check(LookupKind::Exact, Value::Json(json!({})), Value::Null));
        assert!(check(LookupKind::Exact, Value::Json(json!("collie")), "collie"));
        assert!(check(LookupKind::Exact, Value::Json(json!(6)), 6));
    }

    #[test]
    fn test_json_containment() {
        assert!(json_contains(&json!({"a": 1, "b": 2}), &json!({"a": 1})));
        assert!(!json_contains(&json!({"a": 1}), &json!({"a": 1, "b": 2})));
        assert!(json_contains(&json!([1, 2, 3]), &json!([3, 1])));
        assert!(json_contains(&json!([1, 2, 3]), &json!(2)));
        assert!(json_contains(&json!({"t": [1, [2, 3]]}), &json!({"t": [[3]]})));
        assert!(!json_contains(&json!({"a": [1]}), &json!({"a": 1})));
        assert!(json_contains(&json!({}), &json!({})));
        assert!(check(
            LookupKind::ContainedBy,
            Value::Json(json!({"a": 1})),
            Value::Json(json!({"a": 1, "b": 2}))
        ));
    }

    #[test]
    fn test_has_key() {
        let doc = Value::Json(json!({"owner": null, "breed": "collie"}));
        assert!(check(LookupKind::HasKey, doc.clone(), "owner"));
        assert!(check(LookupKind::HasKeys, doc.clone(), vec!["owner", "breed"]));
        assert!(!check(LookupKind::HasKeys, doc.clone(), vec!["owner", "age"]));
        assert!(check(LookupKind::HasAnyKeys, doc, vec!["age", "breed"]));
    }

    #[test]
    fn test_key_lookup() {
        let doc = json!({"owner": {"name": "Bob"}, "tags": ["a", "b"]});
        assert_eq!(
            key_lookup(&doc, &["owner".into(), "name".into()]),
            Some(&json!("Bob"))
        );
        assert_eq!(key_lookup(&doc, &["tags".into(), "1".into()]), Some(&json!("b")));
        assert_eq!(key_lookup(&doc, &["missing".into()]), None);
        assert_eq!(key_lookup(&json!(null), &["x".into()]), None);
    }

    #[test]
    fn test_arith() {
        assert_eq!(arith(ArithOp::Add, &Value::Int(2), &Value::Int(3)), Value::Int(5));
        assert_eq!(arith(ArithOp::Div, &Value::Int(7), &Value::Int(2)), Value::Int(3));
        assert_eq!(arith(ArithOp::Div, &Value::Int(7), &Value::Int(0)), Value::Null);
        assert_eq!(arith(ArithOp::Mul, &Value::Float(1.5), &Value::Int(2)), Value::Float(3.0));
        assert_eq!(arith(ArithOp::Sub, &Value::Null, &Value::Int(2)), Value::Null);
    }

    #[test]
    fn test_aggregates() {
        let values = vec![Value::Int(1), Value::Null, Value::Int(3), Value::Int(3)];
        assert_eq!(aggregate(AggregateFunc::Count, values.clone(), false), Value::Int(3));
        assert_eq!(aggregate(AggregateFunc::Count, values.clone(), true), Value::Int(2));
        assert_eq!(aggregate(AggregateFunc::Sum, values.clone(), false), Value::Int(7));
        assert_eq!(aggregate(AggregateFunc::Min, values.clone(), false), Value::Int(1));
        assert_eq!(aggregate(AggregateFunc::Max, values.clone(), false), Value::Int(3));
        assert_eq!(
            aggregate(AggregateFunc::Avg, vec![Value::Int(1), Value::Int(2)], false),
            Value::Float(1.5)
        );
        assert_eq!(aggregate(AggregateFunc::Sum, vec![], false), Value::Null);
        assert_eq!(aggregate(AggregateFunc::Count, vec![], false), Value::Int(0));
    }
}
