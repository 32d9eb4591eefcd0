//! # memorm
//!
//! An in-memory ORM query engine with a Django-style API: lazy, cached
//! querysets; `__` lookups across foreign keys, many-to-many relations, and
//! JSON documents; annotations, grouping, and aggregation.
//!
//! This is the meta-crate that re-exports the sub-crates. Depend on
//! `memorm` to get everything, or on the individual crates for finer-grained
//! control.
//!
//! # Examples
//!
//! ```
//! use memorm::db::{FieldDef, FieldType, ModelSchema, Store, Q};
//!
//! let store = Store::new();
//! store
//!     .register(ModelSchema::new("Blog").field(FieldDef::new("name", FieldType::CharField)))
//!     .unwrap();
//! store.create("Blog", [("name", "Beatles Blog")]).unwrap();
//!
//! let blogs = store.objects("Blog").unwrap().filter(Q::new("name__contains", "beatles")).unwrap();
//! assert_eq!(blogs.count().unwrap(), 1);
//! ```

/// Error types, settings, and logging setup.
pub use memorm_core as core;

/// The record store, querysets, lookups, and expressions.
#[cfg(feature = "db")]
pub use memorm_db as db;

/// Commonly used items.
pub mod prelude {
    pub use memorm_core::{OrmError, OrmResult, Settings, SETTINGS};

    #[cfg(feature = "db")]
    pub use memorm_db::functions::*;
    #[cfg(feature = "db")]
    pub use memorm_db::{
        AggregateFunc, Exists, Expression, FieldDef, FieldType, ModelSchema, OnDelete, OrderBy,
        OuterRef, QuerySet, Record, Row, Store, SubqueryExpression, Value, When, Q,
    };
}

// Third-party re-exports for user convenience.
pub use chrono;
pub use serde_json;
pub use tracing;
pub use tracing_subscriber;
