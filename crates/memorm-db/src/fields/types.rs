//! Field type definitions.
//!
//! This module defines the field type system used by schema definitions.
//! Each [`FieldType`] variant corresponds to a Django model field type, and
//! [`FieldDef`] captures the metadata the engine needs about one field.

use memorm_core::{OrmError, OrmResult};

use crate::value::Value;

/// The type of a model field, determining which values it accepts and which
/// lookups apply to it.
///
/// Relational fields (`ForeignKey`, `ManyToManyField`) carry the target
/// model name and the name used for the reverse relation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum FieldType {
    /// Auto-incrementing integer primary key.
    AutoField,
    /// Bounded string.
    CharField,
    /// Unbounded text.
    TextField,
    /// Email address (a `CharField` for query purposes).
    EmailField,
    /// 64-bit signed integer.
    IntegerField,
    /// 64-bit floating-point number.
    FloatField,
    /// Boolean (true/false).
    BooleanField,
    /// Date without time.
    DateField,
    /// Date and time.
    DateTimeField,
    /// JSON document.
    JsonField,
    /// Many-to-one relationship. The stored value is the target's pk.
    ForeignKey {
        /// The target model name, or `"self"`.
        to: String,
        /// Behaviour when the referenced row is deleted.
        on_delete: OnDelete,
        /// The name used for the reverse relation.
        related_name: Option<String>,
    },
    /// Many-to-many relationship through an implicit junction table.
    ManyToManyField {
        /// The target model name, or `"self"`.
        to: String,
        /// The name used for the reverse relation.
        related_name: Option<String>,
    },
}

/// Behaviour when a referenced row is deleted.
///
/// This mirrors Django's `on_delete` parameter for `ForeignKey`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OnDelete {
    /// Delete all dependent rows.
    Cascade,
    /// Refuse the delete while dependent rows exist.
    Protect,
    /// Set the foreign key to NULL.
    SetNull,
    /// Leave the dangling key in place.
    DoNothing,
}

/// The default of a field: a fixed value or a function evaluated at insert
/// time (e.g. today's date).
#[derive(Debug, Clone)]
pub enum FieldDefault {
    /// A constant value.
    Value(Value),
    /// A function called for every insert that leaves the field unset.
    Callable(fn() -> Value),
}

impl FieldDefault {
    /// Produces the default value.
    pub fn produce(&self) -> Value {
        match self {
            Self::Value(v) => v.clone(),
            Self::Callable(f) => f(),
        }
    }
}

// Function pointer addresses are not stable across codegen units, so two
// callable defaults never compare equal.
impl PartialEq for FieldDefault {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Value(a), Self::Value(b)) => a == b,
            _ => false,
        }
    }
}

/// Complete definition of a model field.
///
/// # Examples
///
/// ```
/// use memorm_db::fields::{FieldDef, FieldType};
///
/// let f = FieldDef::new("headline", FieldType::CharField).max_length(255);
/// assert_eq!(f.name, "headline");
/// assert_eq!(f.max_length, Some(255));
/// assert!(!f.null);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// The attribute name of this field.
    pub name: String,
    /// The type of this field.
    pub field_type: FieldType,
    /// Whether this field is the primary key.
    pub primary_key: bool,
    /// Whether SQL NULL is allowed.
    pub null: bool,
    /// Default value for new rows.
    pub default: Option<FieldDefault>,
    /// Whether values must be unique across the table.
    pub unique: bool,
    /// Maximum character length (for `CharField` and similar).
    pub max_length: Option<usize>,
}

impl FieldDef {
    /// Creates a new `FieldDef`. All other attributes take their defaults
    /// (non-null, not unique, no default).
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            primary_key: false,
            null: false,
            default: None,
            unique: false,
            max_length: None,
        }
    }

    /// A foreign key to `to` with the given delete behaviour.
    pub fn foreign_key(name: impl Into<String>, to: impl Into<String>, on_delete: OnDelete) -> Self {
        Self::new(
            name,
            FieldType::ForeignKey {
                to: to.into(),
                on_delete,
                related_name: None,
            },
        )
    }

    /// A many-to-many relation to `to`.
    pub fn many_to_many(name: impl Into<String>, to: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldType::ManyToManyField {
                to: to.into(),
                related_name: None,
            },
        )
    }

    /// Marks this field as the primary key.
    #[must_use]
    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Allows SQL NULL values.
    #[must_use]
    pub const fn null(mut self) -> Self {
        self.null = true;
        self
    }

    /// Sets the maximum character length.
    #[must_use]
    pub const fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Requires values to be unique across the table.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Sets a constant default value.
    #[must_use]
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(FieldDefault::Value(value.into()));
        self
    }

    /// Sets a default computed at insert time.
    #[must_use]
    pub fn default_fn(mut self, f: fn() -> Value) -> Self {
        self.default = Some(FieldDefault::Callable(f));
        self
    }

    /// Sets the reverse relation name of a relational field.
    #[must_use]
    pub fn related_name(mut self, name: impl Into<String>) -> Self {
        match &mut self.field_type {
            FieldType::ForeignKey { related_name, .. }
            | FieldType::ManyToManyField { related_name, .. } => {
                *related_name = Some(name.into());
            }
            _ => {}
        }
        self
    }

    /// Returns `true` if this field represents a relation.
    pub const fn is_relation(&self) -> bool {
        matches!(
            self.field_type,
            FieldType::ForeignKey { .. } | FieldType::ManyToManyField { .. }
        )
    }

    /// Returns `true` for many-to-many fields, which have no column.
    pub const fn is_many_to_many(&self) -> bool {
        matches!(self.field_type, FieldType::ManyToManyField { .. })
    }

    /// The name under which the raw key of a foreign key can also be
    /// addressed (e.g. `blog_id`).
    pub fn attname(&self) -> String {
        match self.field_type {
            FieldType::ForeignKey { .. } => format!("{}_id", self.name),
            _ => self.name.clone(),
        }
    }

    /// Validates and normalises a value about to be stored in this field.
    ///
    /// Strings are parsed into dates for date fields, integers widen to
    /// floats, and any value stored in a JSON field becomes a document
    /// (SQL NULL stays SQL NULL).
    pub fn clean(&self, table: &str, value: Value) -> OrmResult<Value> {
        if value.is_null() {
            if self.null || self.primary_key {
                return Ok(Value::Null);
            }
            return Err(OrmError::IntegrityError(format!(
                "NOT NULL constraint failed: {table}.{}",
                self.name
            )));
        }
        let mismatch = |v: &Value| {
            OrmError::ValueError(format!(
                "Field '{}' expected a {} value but got {}.",
                self.name,
                self.field_type.kind_name(),
                v.repr()
            ))
        };
        match (&self.field_type, value) {
            (FieldType::CharField | FieldType::EmailField, Value::String(s)) => {
                if let Some(max) = self.max_length {
                    if s.chars().count() > max {
                        return Err(OrmError::ValueError(format!(
                            "Field '{}' value is longer than {max} characters.",
                            self.name
                        )));
                    }
                }
                Ok(Value::String(s))
            }
            (FieldType::TextField, v @ Value::String(_))
            | (FieldType::BooleanField, v @ Value::Bool(_))
            | (FieldType::DateField, v @ Value::Date(_))
            | (FieldType::DateTimeField, v @ Value::DateTime(_))
            | (FieldType::FloatField, v @ Value::Float(_))
            | (
                FieldType::AutoField
                | FieldType::IntegerField
                | FieldType::ForeignKey { .. },
                v @ Value::Int(_),
            ) => Ok(v),
            #[allow(clippy::cast_precision_loss)]
            (FieldType::FloatField, Value::Int(i)) => Ok(Value::Float(i as f64)),
            (FieldType::DateField, Value::String(s)) => s
                .parse::<chrono::NaiveDate>()
                .map(Value::Date)
                .map_err(|_| mismatch(&Value::String(s))),
            (FieldType::DateTimeField, Value::Date(d)) => {
                Ok(Value::DateTime(d.and_time(chrono::NaiveTime::MIN)))
            }
            (FieldType::DateTimeField, Value::String(s)) => s
                .parse::<chrono::NaiveDateTime>()
                .map(Value::DateTime)
                .map_err(|_| mismatch(&Value::String(s))),
            (FieldType::JsonField, v) => Ok(Value::Json(v.to_json())),
            (_, v) => Err(mismatch(&v)),
        }
    }
}

impl FieldType {
    /// A short human-readable type name used in error messages.
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::AutoField => "AutoField",
            Self::CharField => "CharField",
            Self::TextField => "TextField",
            Self::EmailField => "EmailField",
            Self::IntegerField => "IntegerField",
            Self::FloatField => "FloatField",
            Self::BooleanField => "BooleanField",
            Self::DateField => "DateField",
            Self::DateTimeField => "DateTimeField",
            Self::JsonField => "JSONField",
            Self::ForeignKey { .. } => "ForeignKey",
            Self::ManyToManyField { .. } => "ManyToManyField",
        }
    }

    /// Returns `true` for text-like fields.
    pub const fn is_text(&self) -> bool {
        matches!(self, Self::CharField | Self::TextField | Self::EmailField)
    }

    /// Returns `true` for numeric fields, including keys.
    pub const fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::AutoField | Self::IntegerField | Self::FloatField | Self::ForeignKey { .. }
        )
    }

    /// Returns `true` for date and datetime fields.
    pub const fn is_temporal(&self) -> bool {
        matches!(self, Self::DateField | Self::DateTimeField)
    }

    /// The target model of a relational field.
    pub fn related_model(&self) -> Option<&str> {
        match self {
            Self::ForeignKey { to, .. } | Self::ManyToManyField { to, .. } => Some(to),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_def_new_defaults() {
        let f = FieldDef::new("first_name", FieldType::CharField);
        assert_eq!(f.name, "first_name");
        assert!(!f.primary_key);
        assert!(!f.null);
        assert!(f.default.is_none());
        assert!(!f.unique);
        assert!(f.max_length.is_none());
    }

    #[test]
    fn test_field_def_builder() {
        let f = FieldDef::new("email", FieldType::EmailField)
            .unique()
            .max_length(254)
            .null();
        assert!(f.unique);
        assert!(f.null);
        assert_eq!(f.max_length, Some(254));
    }

    #[test]
    fn test_field_def_default() {
        let f = FieldDef::new("rating", FieldType::IntegerField).default(5);
        assert_eq!(f.default.map(|d| d.produce()), Some(Value::Int(5)));
    }

    #[test]
    fn test_field_def_default_fn() {
        fn seven() -> Value {
            Value::Int(7)
        }
        let f = FieldDef::new("n", FieldType::IntegerField).default_fn(seven);
        assert_eq!(f.default.map(|d| d.produce()), Some(Value::Int(7)));
    }

    #[test]
    fn test_callable_defaults_never_compare_equal() {
        fn seven() -> Value {
            Value::Int(7)
        }
        let callable = FieldDefault::Callable(seven);
        assert_ne!(callable, callable.clone());
        assert_ne!(callable, FieldDefault::Value(Value::Int(7)));
        assert_eq!(FieldDefault::Value(Value::Int(7)), FieldDefault::Value(Value::Int(7)));

        let a = FieldDef::new("n", FieldType::IntegerField).default_fn(seven);
        assert_ne!(a, a.clone());
        let b = FieldDef::new("n", FieldType::IntegerField).default(7);
        assert_eq!(b, b.clone());
    }

    #[test]
    fn test_field_def_is_relation() {
        let fk = FieldDef::foreign_key("blog", "blog", OnDelete::Cascade);
        assert!(fk.is_relation());
        assert!(!fk.is_many_to_many());
        assert_eq!(fk.attname(), "blog_id");

        let m2m = FieldDef::many_to_many("authors", "author");
        assert!(m2m.is_relation());
        assert!(m2m.is_many_to_many());

        let text = FieldDef::new("title", FieldType::CharField);
        assert!(!text.is_relation());
        assert_eq!(text.attname(), "title");
    }

    #[test]
    fn test_related_name() {
        let fk = FieldDef::foreign_key("question", "question", OnDelete::Cascade)
            .related_name("choices");
        assert!(matches!(
            fk.field_type,
            FieldType::ForeignKey { related_name: Some(ref n), .. } if n == "choices"
        ));
    }

    #[test]
    fn test_clean_not_null() {
        let f = FieldDef::new("headline", FieldType::CharField);
        let err = f.clean("entry", Value::Null).unwrap_err();
        assert!(matches!(err, OrmError::IntegrityError(_)));
        assert!(err.to_string().contains("entry.headline"));
    }

    #[test]
    fn test_clean_max_length() {
        let f = FieldDef::new("name", FieldType::CharField).max_length(3);
        assert!(f.clean("t", Value::from("abc")).is_ok());
        assert!(matches!(
            f.clean("t", Value::from("abcd")),
            Err(OrmError::ValueError(_))
        ));
    }

    #[test]
    fn test_clean_parses_dates() {
        let f = FieldDef::new("pub_date", FieldType::DateField);
        assert_eq!(
            f.clean("t", Value::from("2005-05-02")).unwrap(),
            Value::Date(chrono::NaiveDate::from_ymd_opt(2005, 5, 2).unwrap())
        );
        assert!(f.clean("t", Value::from("yesterday")).is_err());
    }

    #[test]
    fn test_clean_json_keeps_sql_null_distinct() {
        let f = FieldDef::new("data", FieldType::JsonField).null();
        assert_eq!(f.clean("dog", Value::Null).unwrap(), Value::Null);
        assert_eq!(
            f.clean("dog", Value::Json(json!(null))).unwrap(),
            Value::Json(json!(null))
        );
        assert_eq!(
            f.clean("dog", Value::from("x")).unwrap(),
            Value::Json(json!("x"))
        );
    }

    #[test]
    fn test_clean_type_mismatch() {
        let f = FieldDef::new("rating", FieldType::IntegerField);
        assert!(matches!(
            f.clean("t", Value::from("five")),
            Err(OrmError::ValueError(_))
        ));
        let f = FieldDef::new("score", FieldType::FloatField);
        assert_eq!(f.clean("t", Value::Int(2)).unwrap(), Value::Float(2.0));
    }

    #[test]
    fn test_field_type_predicates() {
        assert!(FieldType::CharField.is_text());
        assert!(FieldType::IntegerField.is_numeric());
        assert!(FieldType::DateField.is_temporal());
        assert_eq!(
            FieldType::ManyToManyField {
                to: "author".into(),
                related_name: None
            }
            .related_model(),
            Some("author")
        );
        assert_eq!(FieldType::JsonField.kind_name(), "JSONField");
    }
}
