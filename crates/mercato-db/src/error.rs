//! # Database Error Types
//!
//! Error types for database operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbError (this module) ← Adds context and categorization               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  StockError (mercato-core)                                             │
//! │       ├── Busy        → Conflict  (retried by the ledger)              │
//! │       └── everything  → Storage   (propagated immediately)             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use mercato_core::StockError;
use thiserror::Error;

/// SQLite primary result codes that mean "another writer holds the lock".
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Receiving a lot with an id that already exists
    /// - Two lines for the same product on one sale
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// CHECK constraint violation (e.g. a negative lot quantity).
    #[error("Check constraint violated: {message}")]
    CheckViolation { message: String },

    /// Another connection holds a conflicting lock.
    ///
    /// ## When This Occurs
    /// - Two transactions try to upgrade to a write lock at the same time
    /// - A WAL snapshot went stale under a concurrent commit
    #[error("Database busy: {0}")]
    Busy(String),

    /// Database connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Converts into a `StockError`, attributing contention to `subject`
    /// (usually the lot or product being touched).
    pub fn into_stock_error(self, subject: &str) -> StockError {
        match self {
            DbError::Busy(_) => StockError::conflict(subject, 1),
            other => StockError::storage(other.to_string()),
        }
    }
}

/// Maps the SQLite extended result code to its primary code.
fn primary_code(code: &str) -> Option<i32> {
    code.parse::<i32>().ok().map(|c| c & 0xff)
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → result code / message decides
///     BUSY, LOCKED (+ext)     → DbError::Busy
///     UNIQUE                  → DbError::UniqueViolation
///     FOREIGN KEY             → DbError::ForeignKeyViolation
///     CHECK                   → DbError::CheckViolation
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("Record", "unknown"),

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();
                let code = db_err.code().and_then(|c| primary_code(&c));

                if matches!(code, Some(SQLITE_BUSY) | Some(SQLITE_LOCKED))
                    || msg.contains("database is locked")
                {
                    DbError::Busy(msg.to_string())
                } else if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation {
                        field,
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else if msg.contains("CHECK constraint failed") {
                    DbError::CheckViolation {
                        message: msg.to_string(),
                    }
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Database errors reaching the ledger without lot context.
impl From<DbError> for StockError {
    fn from(err: DbError) -> Self {
        err.into_stock_error("database")
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_code_strips_extended_bits() {
        // SQLITE_BUSY_SNAPSHOT = 517
        assert_eq!(primary_code("517"), Some(SQLITE_BUSY));
        assert_eq!(primary_code("5"), Some(SQLITE_BUSY));
        assert_eq!(primary_code("6"), Some(SQLITE_LOCKED));
        // SQLITE_CONSTRAINT_UNIQUE = 2067
        assert_eq!(primary_code("2067"), Some(19));
        assert_eq!(primary_code("not-a-code"), None);
    }

    #[test]
    fn test_busy_becomes_conflict() {
        let err = DbError::Busy("database is locked".into()).into_stock_error("lot-1");
        assert_eq!(err, StockError::conflict("lot-1", 1));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_other_errors_become_storage() {
        let err: StockError = DbError::PoolExhausted.into();
        assert!(matches!(err, StockError::Storage(_)));
        assert!(!err.is_retryable());
    }
}
