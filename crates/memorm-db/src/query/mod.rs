//! Query building, compilation, and evaluation.
//!
//! This module contains the complete query pipeline:
//!
//! - [`lookups`] - Q objects and lookup types for filtering
//! - [`expressions`] - F-objects, aggregates, subqueries, and functions
//! - [`compiler`] - Query AST and name resolution against the catalog
//! - [`queryset`] - QuerySet and Manager for lazy, cached queries
//! - [`custom_lookups`] - Custom lookup and transform registry
//!
//! Compiled queries are evaluated row by row by the store's executor,
//! using the lookup operators implemented in `evaluator`.

pub mod compiler;
pub mod custom_lookups;
pub(crate) mod evaluator;
pub mod expressions;
pub mod lookups;
pub mod queryset;

pub use compiler::{OrderBy, Query, SelectColumn, WhereClause};
pub use expressions::{AggregateFunc, Exists, Expression, OuterRef, SubqueryExpression, When};
pub use lookups::{Lookup, LookupKind, Q};
pub use queryset::{Dicts, Flat, Manager, QuerySet, Records, Shape, Tuples};
