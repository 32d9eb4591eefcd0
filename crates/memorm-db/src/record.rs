//! Rows and model instances.
//!
//! [`Row`] is a named tuple of values, produced by `values()` querysets and
//! by `aggregate()`. [`Record`] is a model instance: a schema plus one value
//! per column. Both provide typed access through [`FromValue`].

use std::fmt;
use std::sync::Arc;

use memorm_core::{OrmError, OrmResult};

use crate::model::ModelSchema;
use crate::query::expressions::Expression;
use crate::value::Value;

/// A named tuple of values.
///
/// `Row` holds a list of column names and their corresponding values. It
/// provides typed access via the [`get`](Row::get) method.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Creates a new row from column names and values. Extra columns or
    /// values beyond the shorter of the two are dropped.
    pub fn new(columns: Vec<String>, mut values: Vec<Value>) -> Self {
        let mut columns = columns;
        let len = columns.len().min(values.len());
        columns.truncate(len);
        values.truncate(len);
        Self { columns, values }
    }

    /// Returns the column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the values, in column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns `true` if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Gets a typed value by column name.
    pub fn get<T: FromValue>(&self, column: &str) -> OrmResult<T> {
        let value = self
            .get_value(column)
            .ok_or_else(|| OrmError::FieldError(format!("Column '{column}' not found in row")))?;
        T::from_value(value)
    }

    /// Gets a typed value by column index.
    pub fn get_by_index<T: FromValue>(&self, idx: usize) -> OrmResult<T> {
        let value = self.values.get(idx).ok_or_else(|| {
            OrmError::IndexError(format!(
                "Column index {idx} out of bounds (row has {} columns)",
                self.values.len()
            ))
        })?;
        T::from_value(value)
    }

    /// Returns a reference to the raw value at the given column name.
    pub fn get_value(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|idx| self.values.get(idx))
    }

    /// Iterates over `(column, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(String::as_str).zip(&self.values)
    }

    /// A Python-dict-like rendering: `{'id': 1, 'headline': 'x'}`.
    pub fn repr(&self) -> String {
        let parts: Vec<String> = self
            .iter()
            .map(|(column, value)| format!("'{column}': {}", value.repr()))
            .collect();
        format!("{{{}}}", parts.join(", "))
    }
}

/// Trait for converting a [`Value`] to a concrete Rust type.
pub trait FromValue: Sized {
    /// Attempts to convert a value reference to this type.
    fn from_value(value: &Value) -> OrmResult<Self>;
}

fn type_error(expected: &str, value: &Value) -> OrmError {
    OrmError::TypeError(format!("Expected {expected}, got {value:?}"))
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> OrmResult<Self> {
        match value {
            Value::Int(i) => Ok(*i),
            Value::Json(serde_json::Value::Number(n)) if n.is_i64() => {
                n.as_i64().ok_or_else(|| type_error("Int", value))
            }
            _ => Err(type_error("Int", value)),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> OrmResult<Self> {
        let wide = i64::from_value(value)?;
        Self::try_from(wide)
            .map_err(|e| OrmError::ValueError(format!("Int value out of i32 range: {e}")))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> OrmResult<Self> {
        value.as_float().ok_or_else(|| type_error("Float", value))
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> OrmResult<Self> {
        match value {
            Value::Bool(b) | Value::Json(serde_json::Value::Bool(b)) => Ok(*b),
            _ => Err(type_error("Bool", value)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> OrmResult<Self> {
        match value {
            Value::String(s) | Value::Json(serde_json::Value::String(s)) => Ok(s.clone()),
            _ => Err(type_error("String", value)),
        }
    }
}

impl FromValue for chrono::NaiveDate {
    fn from_value(value: &Value) -> OrmResult<Self> {
        match value {
            Value::Date(d) => Ok(*d),
            Value::DateTime(dt) => Ok(dt.date()),
            _ => Err(type_error("Date", value)),
        }
    }
}

impl FromValue for chrono::NaiveDateTime {
    fn from_value(value: &Value) -> OrmResult<Self> {
        match value {
            Value::DateTime(dt) => Ok(*dt),
            _ => Err(type_error("DateTime", value)),
        }
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: &Value) -> OrmResult<Self> {
        Ok(value.to_json())
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> OrmResult<Self> {
        Ok(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> OrmResult<Self> {
        match value {
            Value::Null => Ok(None),
            _ => T::from_value(value).map(Some),
        }
    }
}

// ============================================================================
// Record
// ============================================================================

/// A model instance: one value per column of its schema.
///
/// Two records are equal when they live in the same table and have the same
/// non-null primary key. Proxy instances therefore equal their concrete
/// counterparts, while multi-table children never equal their parents. A
/// record without a primary key equals only itself.
#[derive(Debug, Clone)]
pub struct Record {
    schema: Arc<ModelSchema>,
    values: Vec<Value>,
    annotations: Vec<(String, Value)>,
}

impl Record {
    /// Builds a record from column values in schema column order. Missing
    /// trailing values are filled with NULL.
    pub fn new(schema: Arc<ModelSchema>, mut values: Vec<Value>) -> Self {
        let width = schema.columns().count();
        values.resize(width, Value::Null);
        Self {
            schema,
            values,
            annotations: Vec::new(),
        }
    }

    /// Attaches computed annotation values.
    #[must_use]
    pub fn with_annotations(mut self, annotations: Vec<(String, Value)>) -> Self {
        self.annotations = annotations;
        self
    }

    /// Annotation values, in annotation order.
    pub fn annotations(&self) -> &[(String, Value)] {
        &self.annotations
    }

    /// The schema of this instance.
    pub fn schema(&self) -> &Arc<ModelSchema> {
        &self.schema
    }

    /// The model's object name (e.g., "Entry").
    pub fn model(&self) -> &str {
        &self.schema.name
    }

    /// The primary key, or `None` for an unsaved instance.
    pub fn pk(&self) -> Option<i64> {
        self.values.get(self.schema.pk_index()).and_then(Value::as_int)
    }

    /// Sets (or clears) the primary key. Clearing it and saving again
    /// inserts a copy.
    pub fn set_pk(&mut self, pk: Option<i64>) {
        let idx = self.schema.pk_index();
        if let Some(slot) = self.values.get_mut(idx) {
            *slot = pk.map_or(Value::Null, Value::Int);
        }
    }

    /// The column values, in schema column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    fn column_of(&self, name: &str) -> Option<usize> {
        if name == "pk" {
            return Some(self.schema.pk_index());
        }
        self.schema.column_index(name).or_else(|| {
            self.schema
                .field_by_attname(name)
                .and_then(|f| self.schema.column_index(&f.name))
        })
    }

    /// Returns the raw value of a field (`pk` and `<fk>_id` are accepted)
    /// or of an annotation.
    pub fn get_value(&self, name: &str) -> Option<&Value> {
        self.column_of(name)
            .and_then(|idx| self.values.get(idx))
            .or_else(|| {
                self.annotations
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, v)| v)
            })
    }

    /// Gets a typed field value.
    pub fn get<T: FromValue>(&self, name: &str) -> OrmResult<T> {
        let value = self.get_value(name).ok_or_else(|| {
            OrmError::FieldError(format!("{} has no field named '{name}'", self.schema.name))
        })?;
        T::from_value(value)
    }

    /// Sets a field value in memory. Call `Store::save` to persist it.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> OrmResult<()> {
        let idx = self.column_of(name).ok_or_else(|| {
            OrmError::FieldError(format!("{} has no field named '{name}'", self.schema.name))
        })?;
        self.values[idx] = value.into();
        Ok(())
    }

    /// The values as a [`Row`] keyed by column name.
    pub fn to_row(&self) -> Row {
        Row::new(self.schema.column_names(), self.values.clone())
    }

    /// Django-style representation: `<Entry: New Lennon Biography>`.
    pub fn repr(&self) -> String {
        format!("<{}: {self}>", self.schema.name)
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        if self.schema.db_table != other.schema.db_table {
            return false;
        }
        match (self.pk(), other.pk()) {
            (Some(a), Some(b)) => a == b,
            _ => std::ptr::eq(self, other),
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let display = self
            .schema
            .display_field
            .as_deref()
            .and_then(|field| self.get_value(field));
        match display {
            Some(Value::String(s)) => write!(f, "{s}"),
            Some(other) if !other.is_null() => write!(f, "{other}"),
            _ => {
                let pk = self
                    .pk()
                    .map_or_else(|| "None".to_string(), |pk| pk.to_string());
                write!(f, "{} object ({pk})", self.schema.name)
            }
        }
    }
}

impl From<&Record> for Value {
    fn from(record: &Record) -> Self {
        record.pk().map_or(Self::Null, Self::Int)
    }
}

impl From<&Record> for Expression {
    fn from(record: &Record) -> Self {
        Self::Value(record.into())
    }
}
