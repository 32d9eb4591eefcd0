//! Settings for memorm.
//!
//! This module provides the [`Settings`] struct, which holds the engine's
//! configuration, and [`LazySettings`], a globally-accessible, lazily
//! initialised settings instance. The design mirrors Django's
//! `django.conf.settings` with sensible defaults.

use std::collections::HashMap;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::{OrmError, OrmResult};

/// The complete set of engine settings.
///
/// # Examples
///
/// ```
/// use memorm_core::settings::Settings;
///
/// let settings = Settings::default();
/// assert!(settings.debug);
/// assert_eq!(settings.repr_output_size, 20);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Whether debug mode is enabled (pretty logs instead of JSON logs).
    pub debug: bool,

    /// The `tracing` filter directive (e.g. "info", "memorm_db=debug").
    pub log_level: String,

    /// The number of results shown by a queryset's `Display` preview.
    pub repr_output_size: usize,

    /// The number of rows a single-result fetch inspects before giving up
    /// on counting the extra matches it reports.
    pub max_get_results: usize,

    /// Escape hatch for application-defined values.
    pub extra: HashMap<String, serde_json::Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: true,
            log_level: "info".to_string(),
            repr_output_size: 20,
            max_get_results: 21,
            extra: HashMap::new(),
        }
    }
}

/// A lazily-initialised, write-once settings holder.
pub struct LazySettings {
    inner: OnceLock<Settings>,
}

impl Default for LazySettings {
    fn default() -> Self {
        Self::new()
    }
}

impl LazySettings {
    /// Creates a new, unconfigured `LazySettings`.
    pub const fn new() -> Self {
        Self {
            inner: OnceLock::new(),
        }
    }

    /// Configures the global settings. May be called at most once, and only
    /// before the first [`get`](Self::get).
    pub fn configure(&self, settings: Settings) -> OrmResult<()> {
        self.inner.set(settings).map_err(|_| {
            OrmError::ConfigurationError("Settings have already been configured".to_string())
        })
    }

    /// Returns the configured settings, falling back to (and freezing) the
    /// defaults when nothing was configured.
    pub fn get(&self) -> &Settings {
        self.inner.get_or_init(Settings::default)
    }

    /// Returns `true` if settings have been configured or read.
    pub fn is_configured(&self) -> bool {
        self.inner.get().is_some()
    }
}

/// The global settings instance.
pub static SETTINGS: LazySettings = LazySettings::new();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let s = Settings::default();
        assert!(s.debug);
        assert_eq!(s.log_level, "info");
        assert_eq!(s.repr_output_size, 20);
        assert_eq!(s.max_get_results, 21);
        assert!(s.extra.is_empty());
    }

    #[test]
    fn test_lazy_settings_configure_and_get() {
        let lazy = LazySettings::new();
        assert!(!lazy.is_configured());

        let settings = Settings {
            debug: false,
            repr_output_size: 3,
            ..Settings::default()
        };

        lazy.configure(settings).unwrap();
        assert!(lazy.is_configured());
        assert!(!lazy.get().debug);
        assert_eq!(lazy.get().repr_output_size, 3);
    }

    #[test]
    fn test_lazy_settings_double_configure_fails() {
        let lazy = LazySettings::new();
        lazy.configure(Settings::default()).unwrap();
        let err = lazy.configure(Settings::default()).unwrap_err();
        assert!(matches!(err, OrmError::ConfigurationError(_)));
    }

    #[test]
    fn test_lazy_settings_get_before_configure_uses_defaults() {
        let lazy = LazySettings::new();
        assert_eq!(lazy.get().max_get_results, 21);
        assert!(lazy.configure(Settings::default()).is_err());
    }
}
