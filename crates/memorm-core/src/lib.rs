//! # memorm-core
//!
//! Error types, settings, and logging integration for memorm.
//! This crate has no engine dependencies and provides the foundation the
//! query engine builds on.
//!
//! ## Modules
//!
//! - [`error`] - Error types and result aliases
//! - [`settings`] - Engine settings and global configuration
//! - [`settings_loader`] - Loading settings from TOML, JSON, and the environment
//! - [`logging`] - Tracing-based logging integration

pub mod error;
pub mod logging;
pub mod settings;
pub mod settings_loader;

// Re-export the most commonly used types at the crate root.
pub use error::{OrmError, OrmResult};
pub use settings::{Settings, SETTINGS};
