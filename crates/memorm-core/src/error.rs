//! Core error types for memorm.
//!
//! This module provides the [`OrmError`] enum that covers every failure the
//! query engine can report: unknown fields, operator/operand mismatches,
//! invalid reshape options, bad indexes, single-result fetch failures, and
//! the ambient configuration and I/O errors. It mirrors the exception
//! hierarchy found in Django's ORM.

use thiserror::Error;

/// The primary error type for memorm.
///
/// All errors are raised synchronously by the call that detects them; there
/// is no deferred or batched error reporting.
///
/// # Examples
///
/// ```
/// use memorm_core::error::OrmError;
///
/// let err = OrmError::DoesNotExist("Blog matching query does not exist.".into());
/// assert!(err.is_not_found());
/// assert_eq!(err.to_string(), "Blog matching query does not exist.");
/// ```
#[derive(Error, Debug)]
pub enum OrmError {
    // ── Query construction ───────────────────────────────────────────

    /// An unknown field, relation, transform, or lookup name.
    #[error("Field error: {0}")]
    FieldError(String),

    /// An operator was applied to an operand or field of the wrong type.
    #[error("Lookup type error: {0}")]
    LookupTypeError(String),

    /// An invalid combination of options (e.g. `flat` with several fields).
    #[error("Value error: {0}")]
    ValueError(String),

    /// A negative or out-of-range index or slice bound.
    #[error("Index error: {0}")]
    IndexError(String),

    /// An operation that is not allowed in the queryset's current state.
    #[error("Type error: {0}")]
    TypeError(String),

    // ── Single-result fetches ────────────────────────────────────────

    /// A query expected exactly one result but found none.
    #[error("{0}")]
    DoesNotExist(String),

    /// A query expected exactly one result but found several.
    #[error("{0}")]
    MultipleObjectsReturned(String),

    // ── Store ────────────────────────────────────────────────────────

    /// A relational or uniqueness invariant of the store was violated.
    #[error("Integrity error: {0}")]
    IntegrityError(String),

    /// A delete was blocked by a protecting foreign key.
    #[error("Protected error: {0}")]
    ProtectedError(String),

    // ── Configuration ────────────────────────────────────────────────

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    // ── Serialization ────────────────────────────────────────────────

    /// An error occurred during serialization or deserialization.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    // ── IO ───────────────────────────────────────────────────────────

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl OrmError {
    /// Returns `true` for [`OrmError::DoesNotExist`].
    ///
    /// Callers that want "fetch or default" semantics match on this instead
    /// of treating every failure as a missing row.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::DoesNotExist(_))
    }

    /// Returns `true` for errors caused by the shape of the query itself
    /// rather than by the data it ran against.
    pub const fn is_query_error(&self) -> bool {
        matches!(
            self,
            Self::FieldError(_)
                | Self::LookupTypeError(_)
                | Self::ValueError(_)
                | Self::IndexError(_)
                | Self::TypeError(_)
        )
    }
}

/// A convenience type alias for `Result<T, OrmError>`.
pub type OrmResult<T> = Result<T, OrmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_not_found() {
        assert!(OrmError::DoesNotExist("x".into()).is_not_found());
        assert!(!OrmError::MultipleObjectsReturned("x".into()).is_not_found());
        assert!(!OrmError::FieldError("x".into()).is_not_found());
    }

    #[test]
    fn test_is_query_error() {
        assert!(OrmError::FieldError("x".into()).is_query_error());
        assert!(OrmError::LookupTypeError("x".into()).is_query_error());
        assert!(OrmError::ValueError("x".into()).is_query_error());
        assert!(OrmError::IndexError("x".into()).is_query_error());
        assert!(OrmError::TypeError("x".into()).is_query_error());
        assert!(!OrmError::DoesNotExist("x".into()).is_query_error());
        assert!(!OrmError::IntegrityError("x".into()).is_query_error());
    }

    #[test]
    fn test_display() {
        let err = OrmError::FieldError("Cannot resolve keyword 'nope' into field.".into());
        assert_eq!(
            err.to_string(),
            "Field error: Cannot resolve keyword 'nope' into field."
        );
        let err = OrmError::MultipleObjectsReturned(
            "get() returned more than one Entry -- it returned 2!".into(),
        );
        assert_eq!(
            err.to_string(),
            "get() returned more than one Entry -- it returned 2!"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: OrmError = io_err.into();
        assert!(matches!(err, OrmError::IoError(_)));
        assert!(err.to_string().contains("file missing"));
    }
}
