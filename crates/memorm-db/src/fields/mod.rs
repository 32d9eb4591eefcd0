//! Field definitions and types.
//!
//! This module provides the [`FieldDef`] struct and [`FieldType`] enum that
//! describe the fields of a schema. These mirror Django's
//! `django.db.models.fields` module.

pub mod types;

pub use types::{FieldDef, FieldDefault, FieldType, OnDelete};
