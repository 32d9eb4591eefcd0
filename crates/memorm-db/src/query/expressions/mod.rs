//! Query expressions, aggregates, subqueries, and database functions.
//!
//! This module provides the [`Expression`] enum for building computed values,
//! annotations, and aggregates in queries. It mirrors Django's
//! `django.db.models.expressions` module.
//!
//! # Submodules
//!
//! - [`core`] - Core expression types: F, KT, Value, Func, Aggregate, Case/When, arithmetic
//! - [`subquery`] - Subquery, OuterRef, Exists expressions for correlated subqueries
//! - [`functions`] - Functions (Coalesce, Lower, Upper, Concat, ...) and aggregate builders

pub mod core;
pub mod functions;
pub mod subquery;

pub use self::core::{AggregateFunc, Expression, When};
pub use self::functions::*;
pub use self::subquery::{Exists, OuterRef, SubqueryExpression};
