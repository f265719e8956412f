//! Failure modes of the monitor store.

use std::fmt;

/// Result type alias for monitor store operations
pub type StorageResult<T> = Result<T, StorageError>;

/// What went wrong while reading or writing monitoring state.
///
/// A tick that hits any of these keeps the service's previous status; the
/// engine logs the error and moves on to the next scheduled occurrence.
#[derive(Debug)]
pub enum StorageError {
    /// The monitoring database could not be reached, or no pooled
    /// connection became free within the acquire ceiling
    Unavailable(String),

    /// An inventory read, tick write, or metric upsert failed mid-flight;
    /// any open tick transaction was rolled back
    OperationFailed(String),

    /// The monitoring schema could not be created or migrated at startup
    SchemaSetup(String),

    /// A stored row (service definition, recipient, metric sample) did not
    /// match its typed shape
    DecodeError(String),

    /// I/O failure underneath the database file
    Io(std::io::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Unavailable(msg) => {
                write!(f, "monitoring database unavailable: {}", msg)
            }
            StorageError::OperationFailed(msg) => {
                write!(f, "monitor store operation failed: {}", msg)
            }
            StorageError::SchemaSetup(msg) => {
                write!(f, "monitoring schema setup failed: {}", msg)
            }
            StorageError::DecodeError(msg) => {
                write!(f, "stored row did not match its typed shape: {}", msg)
            }
            StorageError::Io(err) => write!(f, "database file I/O failed: {}", err),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err)
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(io_err) => StorageError::Io(io_err),
            sqlx::Error::PoolTimedOut => {
                StorageError::Unavailable("connection pool exhausted".to_string())
            }
            sqlx::Error::RowNotFound => {
                StorageError::OperationFailed("no matching rows".to_string())
            }
            _ => StorageError::OperationFailed(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StorageError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StorageError::SchemaSetup(err.to_string())
    }
}
