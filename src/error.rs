//! Error types for the database access layer.
//!
//! Errors fall into three classes:
//! - fatal: the instance cannot reach its database (pool open, connectivity
//!   probe, tunnel registration, configuration). See [`DbError::is_fatal`].
//! - propagated: query, scan and shutdown failures returned to the caller.
//! - tolerated: per-field coercion failures during materialization. These are
//!   not errors at all; see [`crate::db::SkippedField`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Connectivity probe failed: {message}")]
    Ping { message: String },

    #[error("Tunnel registration failed for '{network}': {message}")]
    Tunnel { network: String, message: String },

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "1146" for a missing MySQL table
        code: Option<String>,
        suggestion: String,
    },

    #[error("Scan failed for column '{column}': {message}")]
    Scan { column: String, message: String },

    #[error("Query returned no rows")]
    NoRows,

    #[error("Timeout: {operation} did not complete in time")]
    Timeout { operation: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a connectivity probe error.
    pub fn ping(message: impl Into<String>) -> Self {
        Self::Ping {
            message: message.into(),
        }
    }

    /// Create a tunnel registration error.
    pub fn tunnel(network: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tunnel {
            network: network.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a database error with an optional driver error code.
    pub fn database(
        message: impl Into<String>,
        code: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            code,
            suggestion: suggestion.into(),
        }
    }

    /// Create a scan error for a single column.
    pub fn scan(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Scan {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::Timeout { .. } => {
                Some("Raise DATABASE_ACQUIRE_TIMEOUT_SECS or DATABASE_MAX_CONNECTIONS")
            }
            _ => None,
        }
    }

    /// True for errors that leave the instance without a usable database.
    ///
    /// Callers should abort the current invocation on these rather than retry.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Ping { .. } | Self::Tunnel { .. } | Self::Config { .. }
        )
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the DATABASE_* environment variables",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::NoRows,
            sqlx::Error::PoolTimedOut => DbError::timeout("connection pool acquire"),
            sqlx::Error::PoolClosed => DbError::connection(
                "Connection pool is closed",
                "Call get_pool again to re-initialise the slot",
            ),
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::scan(col.clone(), format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::scan(
                index.to_string(),
                format!("Column index {} out of bounds (len: {})", index, len),
            ),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::scan(index.clone(), source.to_string())
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::database("Syntax error", Some("1064".to_string()), "Check SQL syntax");
        assert_eq!(err.suggestion(), Some("Check SQL syntax"));
        assert_eq!(DbError::NoRows.suggestion(), None);
    }

    #[test]
    fn test_fatal_classification() {
        assert!(DbError::connection("err", "sugg").is_fatal());
        assert!(DbError::ping("unreachable").is_fatal());
        assert!(DbError::tunnel("tunnel_read", "bind failed").is_fatal());
        assert!(DbError::config("bad mode").is_fatal());
        assert!(!DbError::NoRows.is_fatal());
        assert!(!DbError::scan("id", "bad").is_fatal());
        assert!(!DbError::database("x", None, "y").is_fatal());
    }

    #[test]
    fn test_row_not_found_maps_to_no_rows() {
        let err: DbError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, DbError::NoRows));
    }

    #[test]
    fn test_pool_timeout_does_not_claim_a_duration() {
        let err: DbError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, DbError::Timeout { .. }));
        assert_eq!(
            err.to_string(),
            "Timeout: connection pool acquire did not complete in time"
        );
        assert!(err.suggestion().unwrap().contains("DATABASE_ACQUIRE_TIMEOUT_SECS"));
    }

    #[test]
    fn test_pool_closed_maps_to_connection() {
        let err: DbError = sqlx::Error::PoolClosed.into();
        assert!(matches!(err, DbError::Connection { .. }));
    }
}
