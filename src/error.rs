//! Error types for the connection factory.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Registration and lookup errors are caller bugs; open/close errors come from the
//! driver layer and are surfaced as-is, never retried here.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Unknown connection: '{name}' is not registered")]
    UnknownConnection { name: String },

    #[error("Duplicate connection name: '{name}' is already registered")]
    DuplicateName { name: String },

    #[error("Failed to open connection: {message}")]
    ConnectionOpen { message: String, suggestion: String },

    #[error("Failed to close connection '{name}': {message}")]
    ConnectionClose { name: String, message: String },

    #[error("Connection '{name}' is still in use ({ref_count} open scopes)")]
    ConnectionInUse { name: String, ref_count: usize },

    #[error("Connection '{name}' is already borrowed by another handle")]
    ConnectionBusy { name: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create an unknown connection error.
    pub fn unknown_connection(name: impl Into<String>) -> Self {
        Self::UnknownConnection { name: name.into() }
    }

    /// Create a duplicate name error.
    pub fn duplicate_name(name: impl Into<String>) -> Self {
        Self::DuplicateName { name: name.into() }
    }

    /// Create a connection open error with a helpful suggestion.
    pub fn connection_open(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConnectionOpen {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a connection close error.
    pub fn connection_close(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectionClose {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn connection_in_use(name: impl Into<String>, ref_count: usize) -> Self {
        Self::ConnectionInUse {
            name: name.into(),
            ref_count,
        }
    }

    pub fn connection_busy(name: impl Into<String>) -> Self {
        Self::ConnectionBusy { name: name.into() }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
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
            Self::ConnectionOpen { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::UnknownConnection { .. } => {
                Some("Register the connection with register_connection before opening it")
            }
            Self::DuplicateName { .. } => Some("Choose a different connection name"),
            Self::ConnectionInUse { .. } => {
                Some("Release every open handle for this connection first")
            }
            _ => None,
        }
    }

    /// Check if this error is retryable.
    ///
    /// Only driver-level open failures are worth retrying; the factory itself never does.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionOpen { .. })
    }
}

/// Convert sqlx errors raised on an open connection to DbError.
///
/// Failures while connecting are mapped to `ConnectionOpen` by the dialect
/// itself, so nothing converted here is reported as retryable.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => {
                DbError::invalid_input(format!("Invalid driver configuration: {}", msg))
            }
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::Io(io_err) => DbError::database(
                format!("I/O error: {}", io_err),
                None,
                "The connection may be broken; invalidate it and open a new one",
            ),
            sqlx::Error::Tls(tls_err) => DbError::database(
                format!("TLS error: {}", tls_err),
                None,
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::database(
                format!("Protocol error: {}", msg),
                None,
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::database(format!("Column not found: {}", col), None, "Check the column name")
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for factory operations.
pub type DbResult<T> = Result<T, DbError>;
