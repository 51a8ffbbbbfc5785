//! Error types for the table-backed store.
//!
//! [`TableError`] is the error vocabulary of a [`TableClient`](crate::TableClient).
//! Store operations convert it to the generic
//! [`StorageError`](tablekv_storage::StorageError) at the trait boundary.

use tablekv_storage::{BoxError, StorageError};
use thiserror::Error;

/// Result type alias for table client calls.
pub type Result<T> = std::result::Result<T, TableError>;

/// Errors reported by a table service.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TableError {
    /// The precondition of a conditional write was not met.
    #[error("Conditional check failed")]
    ConditionalCheckFailed,

    /// `create_table` found a table of that name.
    #[error("Table '{table}' already exists")]
    TableAlreadyExists {
        /// Name of the table.
        table: String,
    },

    /// The addressed table does not exist.
    #[error("Table '{table}' not found")]
    TableNotFound {
        /// Name of the table.
        table: String,
    },

    /// The request was malformed (bad key shape, empty binary attribute,
    /// oversized key, too many batch items).
    #[error("Validation error: {message}")]
    Validation {
        /// What the service rejected.
        message: String,
    },

    /// The service is throttling requests.
    #[error("Throughput exceeded: {message}")]
    ThroughputExceeded {
        /// Service-provided detail.
        message: String,
    },

    /// The service could not be reached.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the failure.
        message: String,
        /// The underlying transport error.
        #[source]
        source: Option<BoxError>,
    },

    /// The request did not complete in time.
    #[error("Request timed out after {duration_ms}ms")]
    Timeout {
        /// Elapsed time before giving up.
        duration_ms: u64,
    },

    /// The client was used after `close`.
    #[error("Table client is closed")]
    ClientClosed,

    /// Any other service failure.
    #[error("Internal table service error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl TableError {
    /// Creates a `Validation` error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    /// Creates a `Connection` error without a source.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Returns `true` for the conditional-write precondition failure.
    #[must_use]
    pub fn is_conditional_check_failed(&self) -> bool {
        matches!(self, Self::ConditionalCheckFailed)
    }
}

impl From<TableError> for StorageError {
    fn from(err: TableError) -> Self {
        match err {
            TableError::Connection { message, source } => {
                StorageError::Connection { message, source }
            },
            TableError::ThroughputExceeded { message } => {
                StorageError::connection(format!("Throughput exceeded: {message}"))
            },
            TableError::ClientClosed => StorageError::connection("Table client is closed"),
            TableError::Timeout { duration_ms } => {
                tracing::warn!(duration_ms = duration_ms, "Table request timed out");
                StorageError::timeout()
            },
            TableError::Validation { message } => StorageError::serialization(message),
            TableError::TableNotFound { table } => {
                StorageError::internal(format!("Table '{table}' not found"))
            },
            TableError::TableAlreadyExists { table } => {
                StorageError::internal(format!("Table '{table}' already exists"))
            },
            // Only put-if-absent issues conditional writes, and it consumes this.
            TableError::ConditionalCheckFailed => {
                StorageError::internal("Unexpected conditional check failure")
            },
            TableError::Internal { message } => StorageError::internal(message),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::{error::Error as _, sync::Arc};

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::connection(TableError::connection("refused"))]
    #[case::throttled(TableError::ThroughputExceeded { message: "slow down".into() })]
    #[case::closed(TableError::ClientClosed)]
    #[case::timeout(TableError::Timeout { duration_ms: 30_000 })]
    fn test_transient_errors_stay_transient(#[case] err: TableError) {
        let storage_err: StorageError = err.into();
        assert!(storage_err.is_transient(), "expected transient, got {storage_err:?}");
    }

    #[rstest]
    #[case::validation(TableError::validation("empty binary"))]
    #[case::missing_table(TableError::TableNotFound { table: "kv".into() })]
    #[case::internal(TableError::Internal { message: "boom".into() })]
    #[case::conditional(TableError::ConditionalCheckFailed)]
    fn test_permanent_errors_are_not_transient(#[case] err: TableError) {
        let storage_err: StorageError = err.into();
        assert!(!storage_err.is_transient(), "expected permanent, got {storage_err:?}");
    }

    #[test]
    fn test_timeout_mapping() {
        let storage_err: StorageError = TableError::Timeout { duration_ms: 5 }.into();
        assert!(matches!(storage_err, StorageError::Timeout));
    }

    #[test]
    fn test_validation_maps_to_serialization() {
        let storage_err: StorageError = TableError::validation("key too large").into();
        assert!(matches!(storage_err, StorageError::Serialization { .. }));
    }

    #[test]
    fn test_connection_source_is_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err = TableError::Connection { message: "send failed".into(), source: Some(Arc::new(io)) };
        let storage_err: StorageError = err.into();

        assert!(matches!(storage_err, StorageError::Connection { .. }));
        assert_eq!(storage_err.source().unwrap().to_string(), "reset by peer");
    }
}
