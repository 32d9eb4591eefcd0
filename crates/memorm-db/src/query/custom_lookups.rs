//! Custom lookup and transform registry.
//!
//! This module provides the ability to register custom field lookups and
//! transforms that extend the built-in lookup system. This mirrors Django's
//! `register_lookup` API.
//!
//! # Architecture
//!
//! - **Lookups** compare a field value with an operand and produce a boolean
//!   (e.g., `rating__ne=3`).
//! - **Transforms** map a field value before a lookup is applied
//!   (e.g., `name__lower`, `pub_date__year`).
//! - Transforms can be chained: `name__lower__startswith` applies `lower`
//!   then the `startswith` lookup.
//!
//! The registry is consulted before the built-in lookup names, and the same
//! transform is used by filters, by `values("name__lower")`, and by the
//! `LOWER` expression function.
//!
//! # Examples
//!
//! ```
//! use memorm_db::query::custom_lookups::*;
//! use memorm_db::value::Value;
//!
//! let mut registry = LookupRegistry::with_defaults();
//! registry.register_transform(Transform::lower());
//! registry.register_lookup(CustomLookup::new("ne", |lhs, rhs| !lhs.loose_eq(rhs)));
//!
//! let (transforms, lookup) = registry.resolve_chain(&["lower", "startswith"]);
//! assert_eq!(transforms.len(), 1);
//! assert_eq!(lookup, Some("startswith"));
//! assert_eq!(transforms[0].apply(&Value::from("Ringo")), Value::from("ringo"));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::Datelike;

use crate::query::expressions::functions::text_of;
use crate::value::Value;

/// The function behind a transform.
pub type TransformFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// The predicate behind a custom lookup: `(field value, operand) -> matches`.
pub type LookupFn = Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>;

/// A custom lookup that compares a field value with an operand.
#[derive(Clone)]
pub struct CustomLookup {
    /// The name of this lookup (e.g., "ne").
    pub name: String,
    func: LookupFn,
}

impl CustomLookup {
    /// Creates a new custom lookup.
    pub fn new(
        name: impl Into<String>,
        func: impl Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// Evaluates the lookup. A SQL NULL field value never matches.
    pub fn matches(&self, lhs: &Value, rhs: &Value) -> bool {
        !lhs.is_null() && (self.func)(lhs, rhs)
    }
}

impl fmt::Debug for CustomLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomLookup")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// The output type of a transform, used to determine which lookups are
/// valid after the transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformOutput {
    /// The transform produces a string value.
    String,
    /// The transform produces an integer value.
    Integer,
    /// The transform produces a float value.
    Float,
    /// The transform produces a date value.
    Date,
    /// The transform produces a boolean value.
    Boolean,
    /// The transform output type matches the input type.
    SameAsInput,
}

/// A transform that maps a field value before a lookup is applied.
///
/// Transforms are pure functions. NULL input yields NULL output for every
/// transform provided here.
#[derive(Clone)]
pub struct Transform {
    /// The name of this transform (e.g., "lower", "year").
    pub name: String,
    /// The output type of this transform.
    pub output_type: TransformOutput,
    func: TransformFn,
}

impl Transform {
    /// Creates a new transform.
    pub fn new(
        name: impl Into<String>,
        output_type: TransformOutput,
        func: impl Fn(&Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            output_type,
            func: Arc::new(func),
        }
    }

    /// Applies the transform to a value.
    pub fn apply(&self, value: &Value) -> Value {
        (self.func)(value)
    }

    /// Lowercases text using Unicode default case mapping.
    pub fn lower() -> Self {
        Self::new("lower", TransformOutput::String, |v| {
            text_map(v, str::to_lowercase)
        })
    }

    /// Uppercases text using Unicode default case mapping.
    pub fn upper() -> Self {
        Self::new("upper", TransformOutput::String, |v| {
            text_map(v, str::to_uppercase)
        })
    }

    /// Number of characters.
    pub fn length() -> Self {
        Self::new("length", TransformOutput::Integer, |v| match v {
            Value::Null => Value::Null,
            other => Value::Int(i64::try_from(text_of(other).chars().count()).unwrap_or(i64::MAX)),
        })
    }

    /// Strips surrounding whitespace.
    pub fn trim() -> Self {
        Self::new("trim", TransformOutput::String, |v| {
            text_map(v, |s| s.trim().to_string())
        })
    }

    /// The year of a date or datetime.
    pub fn year() -> Self {
        Self::new("year", TransformOutput::Integer, |v| {
            date_part(v, |d| i64::from(d.year()))
        })
    }

    /// The month (1-12) of a date or datetime.
    pub fn month() -> Self {
        Self::new("month", TransformOutput::Integer, |v| {
            date_part(v, |d| i64::from(d.month()))
        })
    }

    /// The day of the month of a date or datetime.
    pub fn day() -> Self {
        Self::new("day", TransformOutput::Integer, |v| {
            date_part(v, |d| i64::from(d.day()))
        })
    }

    /// The date part of a datetime.
    pub fn date() -> Self {
        Self::new("date", TransformOutput::Date, |v| match v {
            Value::DateTime(dt) => Value::Date(dt.date()),
            Value::Date(d) => Value::Date(*d),
            _ => Value::Null,
        })
    }

    /// Absolute value.
    pub fn abs() -> Self {
        Self::new("abs", TransformOutput::SameAsInput, |v| match v {
            Value::Int(i) => Value::Int(i.saturating_abs()),
            Value::Float(f) => Value::Float(f.abs()),
            _ => Value::Null,
        })
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform")
            .field("name", &self.name)
            .field("output_type", &self.output_type)
            .finish_non_exhaustive()
    }
}

fn text_map(value: &Value, f: impl Fn(&str) -> String) -> Value {
    match value {
        Value::Null => Value::Null,
        other => Value::String(f(&text_of(other))),
    }
}

fn date_part(value: &Value, f: impl Fn(chrono::NaiveDate) -> i64) -> Value {
    match value {
        Value::Date(d) => Value::Int(f(*d)),
        Value::DateTime(dt) => Value::Int(f(dt.date())),
        _ => Value::Null,
    }
}

/// A registry of custom lookups and transforms.
///
/// Each store owns one registry; names registered here shadow built-in
/// lookup names.
#[derive(Debug, Clone, Default)]
pub struct LookupRegistry {
    /// Registered custom lookups, keyed by name.
    lookups: HashMap<String, Arc<CustomLookup>>,
    /// Registered transforms, keyed by name.
    transforms: HashMap<String, Arc<Transform>>,
}

impl LookupRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the date transforms (`year`, `month`, `day`,
    /// `date`) and the `ne` lookup.
    ///
    /// Case transforms are not included; register them explicitly with
    /// [`Transform::lower`] and friends.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_transform(Transform::year());
        registry.register_transform(Transform::month());
        registry.register_transform(Transform::day());
        registry.register_transform(Transform::date());
        registry.register_lookup(CustomLookup::new("ne", |lhs, rhs| {
            !rhs.is_null() && !lhs.loose_eq(rhs)
        }));
        registry
    }

    /// Registers a custom lookup under its name, replacing any previous one.
    pub fn register_lookup(&mut self, lookup: CustomLookup) {
        self.lookups.insert(lookup.name.clone(), Arc::new(lookup));
    }

    /// Registers a transform under its name, replacing any previous one.
    pub fn register_transform(&mut self, transform: Transform) {
        self.transforms
            .insert(transform.name.clone(), Arc::new(transform));
    }

    /// Unregisters a lookup by name.
    pub fn unregister_lookup(&mut self, name: &str) -> Option<Arc<CustomLookup>> {
        self.lookups.remove(name)
    }

    /// Unregisters a transform by name.
    pub fn unregister_transform(&mut self, name: &str) -> Option<Arc<Transform>> {
        self.transforms.remove(name)
    }

    /// Returns a registered lookup.
    pub fn get_lookup(&self, name: &str) -> Option<Arc<CustomLookup>> {
        self.lookups.get(name).cloned()
    }

    /// Returns a registered transform.
    pub fn get_transform(&self, name: &str) -> Option<Arc<Transform>> {
        self.transforms.get(name).cloned()
    }

    /// Returns true if a lookup with the given name is registered.
    pub fn has_lookup(&self, name: &str) -> bool {
        self.lookups.contains_key(name)
    }

    /// Returns true if a transform with the given name is registered.
    pub fn has_transform(&self, name: &str) -> bool {
        self.transforms.contains_key(name)
    }

    /// Returns all registered transform names, sorted.
    pub fn transform_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.transforms.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolves a chain of transforms and a final lookup from a list of
    /// path segments (the parts after the field name split by `__`).
    ///
    /// For example, given segments `["lower", "contains"]`:
    /// - `lower` is resolved as a transform
    /// - `contains` is returned as the final lookup name
    ///
    /// Returns `(transforms, final_lookup_name)`; the final name is `None`
    /// when every segment was a transform.
    pub fn resolve_chain<'a>(
        &self,
        segments: &[&'a str],
    ) -> (Vec<Arc<Transform>>, Option<&'a str>) {
        let mut transforms = Vec::new();
        for segment in segments {
            match self.transforms.get(*segment) {
                Some(transform) => transforms.push(Arc::clone(transform)),
                // Stops at the first non-transform; trailing segments are the
                // caller's to reject.
                None => return (transforms, Some(segment)),
            }
        }
        (transforms, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> Value {
        Value::Date(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    #[test]
    fn test_defaults() {
        let registry = LookupRegistry::with_defaults();
        assert!(registry.has_transform("year"));
        assert!(registry.has_transform("month"));
        assert!(registry.has_transform("day"));
        assert!(registry.has_transform("date"));
        assert!(!registry.has_transform("lower"));
        assert!(registry.has_lookup("ne"));
        assert_eq!(registry.transform_names(), vec!["date", "day", "month", "year"]);
    }

    #[test]
    fn test_register_and_unregister() {
        let mut registry = LookupRegistry::new();
        registry.register_transform(Transform::lower());
        assert!(registry.has_transform("lower"));
        assert!(registry.unregister_transform("lower").is_some());
        assert!(!registry.has_transform("lower"));

        registry.register_lookup(CustomLookup::new("same", |a, b| a == b));
        assert!(registry.get_lookup("same").is_some());
        assert!(registry.unregister_lookup("same").is_some());
        assert!(registry.get_lookup("same").is_none());
    }

    #[test]
    fn test_resolve_chain() {
        let mut registry = LookupRegistry::with_defaults();
        registry.register_transform(Transform::lower());

        let (transforms, lookup) = registry.resolve_chain(&["lower", "contains"]);
        assert_eq!(transforms.len(), 1);
        assert_eq!(lookup, Some("contains"));

        let (transforms, lookup) = registry.resolve_chain(&["lower"]);
        assert_eq!(transforms.len(), 1);
        assert_eq!(lookup, None);

        let (transforms, lookup) = registry.resolve_chain(&["gte"]);
        assert!(transforms.is_empty());
        assert_eq!(lookup, Some("gte"));
    }

    #[test]
    fn test_case_transforms() {
        assert_eq!(Transform::lower().apply(&Value::from("ÀB")), Value::from("àb"));
        assert_eq!(Transform::upper().apply(&Value::from("straße")), Value::from("STRASSE"));
        assert_eq!(Transform::lower().apply(&Value::Null), Value::Null);
        assert_eq!(Transform::trim().apply(&Value::from(" a ")), Value::from("a"));
        assert_eq!(Transform::length().apply(&Value::from("abc")), Value::Int(3));
    }

    #[test]
    fn test_date_transforms() {
        let d = date(2005, 5, 2);
        assert_eq!(Transform::year().apply(&d), Value::Int(2005));
        assert_eq!(Transform::month().apply(&d), Value::Int(5));
        assert_eq!(Transform::day().apply(&d), Value::Int(2));

        let dt = Value::DateTime(
            NaiveDate::from_ymd_opt(2008, 1, 3)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
        );
        assert_eq!(Transform::date().apply(&dt), date(2008, 1, 3));
        assert_eq!(Transform::year().apply(&Value::from("2005")), Value::Null);
    }

    #[test]
    fn test_abs_transform() {
        assert_eq!(Transform::abs().apply(&Value::Int(-4)), Value::Int(4));
        assert_eq!(Transform::abs().output_type, TransformOutput::SameAsInput);
    }

    #[test]
    fn test_ne_lookup() {
        let registry = LookupRegistry::with_defaults();
        let ne = registry.get_lookup("ne").unwrap();
        assert!(ne.matches(&Value::Int(1), &Value::Int(2)));
        assert!(!ne.matches(&Value::Int(1), &Value::Int(1)));
        assert!(!ne.matches(&Value::Null, &Value::Int(1)));
    }

    #[test]
    fn test_debug_hides_closures() {
        let t = Transform::lower();
        let s = format!("{t:?}");
        assert!(s.contains("lower"));
        let l = CustomLookup::new("ne", |_, _| true);
        assert!(format!("{l:?}").contains("ne"));
    }
}
