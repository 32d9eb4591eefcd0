//! # memorm-db
//!
//! The query engine of memorm: an in-memory record store with a Django-style
//! QuerySet API. Models are described by [`ModelSchema`](model::ModelSchema)
//! values registered on a [`Store`](store::Store); querysets filter, order,
//! annotate, group, and slice their rows, following foreign keys and
//! many-to-many relations and descending into JSON documents.
//!
//! ## Architecture
//!
//! A [`QuerySet`](query::QuerySet) builds a [`Query`](query::Query) AST
//! through method chaining without touching the store. When results are
//! needed the AST is compiled against the model catalog (resolving every
//! `__` path into relation hops, a column, JSON keys, and transforms) and
//! evaluated by the executor under a read lock on the store. The results
//! are cached on the queryset.
//!
//! ## Module Overview
//!
//! - [`model`] - Schemas, indexes, and the catalog of relations
//! - [`fields`] - Field definitions ([`FieldDef`](fields::FieldDef)) and types
//! - [`value`] - The dynamically typed [`Value`](value::Value) enum
//! - [`record`] - Model instances and value rows
//! - [`store`] - The store: registration, writes, deletion, managers
//! - [`related`] - Related managers for many-to-many and reverse relations
//! - [`query`] - Query building, lookups, expressions, and compilation

// These clippy lints are intentionally allowed for the query engine:
// - struct_excessive_bools: FieldDef and Query mirror Django's option flags
// - too_many_lines: the compiler and executor dispatch over many variants
// - cast_precision_loss: i64-to-f64 casts are expected in numeric comparisons
// - result_large_err: OrmError is the error type used across the crate
// - doc_markdown: backtick requirements for documentation items are too strict
// - needless_pass_by_value: some API signatures match Django's patterns
// - return_self_not_must_use: builder pattern methods are self-documenting
// - use_self: explicit type names are clearer in some contexts
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::result_large_err)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::use_self)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::match_same_arms)]
// significant_drop_tightening: store guards are held for a whole evaluation
#![allow(clippy::significant_drop_tightening)]

pub(crate) mod executor;
pub mod fields;
pub mod model;
pub mod query;
pub mod record;
pub mod related;
pub mod store;
pub mod value;

// Re-export the most commonly used types at the crate root.
pub use memorm_core::{OrmError, OrmResult};
pub use fields::{FieldDef, FieldDefault, FieldType, OnDelete};
pub use model::{Catalog, Index, IndexType, InheritanceType, ModelSchema};
pub use query::custom_lookups::{CustomLookup, LookupRegistry, Transform, TransformOutput};
pub use query::expressions::functions;
pub use query::{
    AggregateFunc, Dicts, Exists, Expression, Flat, Lookup, LookupKind, Manager, OrderBy,
    OuterRef, Query, QuerySet, Records, SelectColumn, Shape, SubqueryExpression, Tuples, When, Q,
};
pub use record::{FromValue, Record, Row};
pub use related::RelatedManager;
pub use store::{DeleteCounts, ManagerScope, Store};
pub use value::Value;
