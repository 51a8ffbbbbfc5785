//! Storage error types and result alias.
//!
//! This module defines the error types that can occur during state store
//! operations. Every store implementation maps its internal errors (for
//! example, table client failures) to these standardized variants.
//!
//! # Error Types
//!
//! - [`StorageError::Connection`] - Network or connection-related failures
//! - [`StorageError::Timeout`] - Operation exceeded its time limit
//! - [`StorageError::Serialization`] - A stored record could not be decoded
//! - [`StorageError::SizeLimitExceeded`] - A key or value exceeds a backend limit
//! - [`StorageError::Unsupported`] - The operation is not offered by this store
//! - [`StorageError::NotOpen`] - The store has not been initialized or was closed
//! - [`StorageError::Internal`] - Backend-specific internal errors
//!
//! # Example
//!
//! ```
//! use tablekv_storage::{StorageError, StorageResult};
//!
//! fn scan() -> StorageResult<()> {
//!     Err(StorageError::unsupported("range"))
//! }
//!
//! assert!(matches!(scan(), Err(StorageError::Unsupported { .. })));
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// Errors preserve their source chain via the `#[source]` attribute, so the
/// original backend failure stays available for diagnosis.
///
/// # Non-exhaustive
///
/// New variants may be added in future minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// Connection or network error.
    ///
    /// The backend could not be reached or refused the request for a
    /// transient reason (throttling, service unavailable). Callers may retry.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
        /// The underlying error that caused this connection failure.
        #[source]
        source: Option<BoxError>,
    },

    /// Operation timed out.
    #[error("Operation timeout")]
    Timeout,

    /// A stored record could not be decoded, or the backend rejected the
    /// shape of a request.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
        /// The underlying error that caused serialization to fail.
        #[source]
        source: Option<BoxError>,
    },

    /// A key or value exceeds a size limit of the backend.
    #[error("{kind} size {actual} exceeds limit of {limit} bytes")]
    SizeLimitExceeded {
        /// Which payload exceeded its limit (`"key"` or `"value"`).
        kind: String,
        /// Actual size in bytes.
        actual: usize,
        /// Configured limit in bytes.
        limit: usize,
    },

    /// The operation is not supported by this store.
    ///
    /// Raised immediately, before any network call.
    #[error("Unsupported operation: {operation}")]
    Unsupported {
        /// Name of the rejected operation.
        operation: String,
    },

    /// The store is not open: it was never initialized or has been closed.
    #[error("Store '{store}' is not open")]
    NotOpen {
        /// Name of the store.
        store: String,
    },

    /// Internal storage backend error.
    ///
    /// Catch-all for backend-specific errors that don't fit other categories.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error that caused this internal failure.
        #[source]
        source: Option<BoxError>,
    },
}

impl StorageError {
    /// Creates a new `Connection` error with the given message.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Creates a new `Connection` error with a message and source error.
    #[must_use]
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout() -> Self {
        Self::Timeout
    }

    /// Creates a new `Serialization` error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `SizeLimitExceeded` error.
    #[must_use]
    pub fn size_limit_exceeded(kind: impl Into<String>, actual: usize, limit: usize) -> Self {
        Self::SizeLimitExceeded { kind: kind.into(), actual, limit }
    }

    /// Creates a new `Unsupported` error for the named operation.
    #[must_use]
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported { operation: operation.into() }
    }

    /// Creates a new `NotOpen` error for the named store.
    #[must_use]
    pub fn not_open(store: impl Into<String>) -> Self {
        Self::NotOpen { store: store.into() }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a new `Internal` error with a message and source error.
    #[must_use]
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Returns `true` if the failure is transient and the caller may retry
    /// the same operation.
    ///
    /// Only connection failures and timeouts qualify. The store layer itself
    /// never retries them.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout)
    }
}

/// Errors raised while validating configuration values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// A numeric field is below its minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// Name of the field.
        field: &'static str,
        /// Minimum allowed value.
        min: String,
        /// Value that was supplied.
        value: String,
    },

    /// A numeric field is above its maximum.
    #[error("{field} must be at most {max}, got {value}")]
    AboveMaximum {
        /// Name of the field.
        field: &'static str,
        /// Maximum allowed value.
        max: String,
        /// Value that was supplied.
        value: String,
    },

    /// A required string field is empty.
    #[error("{field} cannot be empty")]
    Empty {
        /// Name of the field.
        field: &'static str,
    },

    /// A field is otherwise invalid.
    #[error("{field} is invalid: {reason}")]
    Invalid {
        /// Name of the field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StorageError::connection("refused").is_transient());
        assert!(StorageError::timeout().is_transient());
        assert!(!StorageError::unsupported("all").is_transient());
        assert!(!StorageError::not_open("s").is_transient());
        assert!(!StorageError::internal("boom").is_transient());
        assert!(!StorageError::serialization("bad").is_transient());
        assert!(!StorageError::size_limit_exceeded("key", 3000, 2048).is_transient());
    }

    #[test]
    fn test_source_chain_is_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err = StorageError::connection_with_source("request failed", io);

        let source = err.source().expect("source should be attached");
        assert_eq!(source.to_string(), "reset by peer");
    }

    #[test]
    fn test_error_display() {
        assert_eq!(StorageError::unsupported("range").to_string(), "Unsupported operation: range");
        assert_eq!(StorageError::not_open("counts").to_string(), "Store 'counts' is not open");
        assert_eq!(
            StorageError::size_limit_exceeded("key", 2049, 2048).to_string(),
            "key size 2049 exceeds limit of 2048 bytes"
        );
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::BelowMinimum { field: "threshold", min: "1".into(), value: "0".into() };
        assert_eq!(err.to_string(), "threshold must be at least 1, got 0");

        let err = ConfigError::Empty { field: "table" };
        assert_eq!(err.to_string(), "table cannot be empty");
    }
}
