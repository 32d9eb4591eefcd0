//! Logging integration for memorm.
//!
//! Provides helpers for configuring [`tracing`]-based logging from
//! [`Settings`](crate::settings::Settings) and for creating per-query spans.

use crate::settings::Settings;

/// Sets up the global tracing subscriber based on the given settings.
///
/// The filter is read from `settings.log_level` (e.g. "debug",
/// "memorm_db=trace"). In debug mode a pretty, human-readable format is used;
/// otherwise a structured JSON format is used. Calling this more than once is
/// harmless: only the first subscriber is installed.
pub fn setup_logging(settings: &Settings) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&settings.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if settings.debug {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .pretty()
            .try_init()
            .ok();
    } else {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init()
            .ok();
    }
}

/// Creates a tracing span for the evaluation of one query.
///
/// Every log entry emitted while a queryset materialises carries the table
/// it was run against.
///
/// # Examples
///
/// ```
/// use memorm_core::logging::query_span;
///
/// let span = query_span("blog");
/// let _guard = span.enter();
/// tracing::debug!("evaluating");
/// ```
pub fn query_span(table: &str) -> tracing::Span {
    tracing::info_span!("query", table = table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_logging_is_idempotent() {
        let settings = Settings::default();
        setup_logging(&settings);
        setup_logging(&settings);
    }

    #[test]
    fn test_setup_logging_bad_filter_falls_back() {
        let settings = Settings {
            log_level: "[[not a filter".to_string(),
            debug: false,
            ..Settings::default()
        };
        setup_logging(&settings);
    }

    #[test]
    fn test_query_span_enters() {
        let span = query_span("entry");
        let _guard = span.enter();
        tracing::trace!("inside span");
    }
}
