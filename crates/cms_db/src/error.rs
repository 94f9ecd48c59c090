//! Error types for the database layer.

use thiserror::Error;

/// Database operation result type.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors from database backend operations.
///
/// Driver errors are classified on conversion so callers can tell a rejected
/// statement (constraint violation) apart from a store that could not be
/// reached at all.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Statement rejected by the database for any other reason
    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    /// Constraint violation (unique, foreign key, not null, check)
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// Pool exhausted, closed, or connection I/O failed
    #[error("Database unavailable: {0}")]
    Unavailable(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Type conversion error: {0}")]
    TypeConversion(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error (file system operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    /// Create an invalid input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// True for failures where the statement never reached a healthy store.
    ///
    /// Nothing in this workspace retries on its own; the flag is for callers.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// True when the store rejected the statement on a declared constraint.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Self::Constraint(_))
    }
}

impl From<sqlx::Error> for BackendError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::error::ErrorKind;

        match err {
            sqlx::Error::Database(db_err) => match db_err.kind() {
                ErrorKind::UniqueViolation
                | ErrorKind::ForeignKeyViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation => Self::Constraint(db_err.message().to_string()),
                _ => Self::Database(sqlx::Error::Database(db_err)),
            },
            sqlx::Error::PoolTimedOut => Self::Unavailable("connection pool timed out".to_string()),
            sqlx::Error::PoolClosed => Self::Unavailable("connection pool is closed".to_string()),
            sqlx::Error::WorkerCrashed => {
                Self::Unavailable("database worker thread crashed".to_string())
            }
            sqlx::Error::Io(io) => Self::Unavailable(io.to_string()),
            other => Self::Database(other),
        }
    }
}
