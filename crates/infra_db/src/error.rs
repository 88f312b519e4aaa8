//! Database error types
//!
//! This module defines the error types that can occur during database operations,
//! providing meaningful error messages and proper error chaining.

use thiserror::Error;

/// Errors that can occur during database operations
///
/// This enum captures all possible database-related errors, including
/// connection issues, query failures, constraint violations and misuse of
/// the nested transaction stack.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to establish a database connection
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Entity not found in database
    #[error("Entity not found: {0}")]
    NotFound(String),

    /// Unique constraint violation
    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    /// Foreign key constraint violation
    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// Check constraint violation
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Transaction error
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Transaction frames were opened or closed out of order
    #[error("Transaction discipline violated: {0}")]
    TransactionDiscipline(String),

    /// Generic SQL error
    #[error("SQL error: {0}")]
    SqlError(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Creates a not found error for a specific table and identifier
    ///
    /// # Arguments
    ///
    /// * `entity` - The table or type of entity (e.g., "authors")
    /// * `id` - The identifier that was not found
    ///
    /// # Example
    ///
    /// ```rust
    /// use infra_db::DatabaseError;
    ///
    /// let error = DatabaseError::not_found("authors", 42);
    /// assert!(error.to_string().contains("authors"));
    /// ```
    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        DatabaseError::NotFound(format!("{} with id '{}' not found", entity, id))
    }

    /// Creates a transaction discipline error
    pub fn discipline(message: impl Into<String>) -> Self {
        DatabaseError::TransactionDiscipline(message.into())
    }

    /// Checks if this error indicates a record was not found
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DatabaseError::NotFound(_) | DatabaseError::SqlError(sqlx::Error::RowNotFound)
        )
    }

    /// Checks if this error is a constraint violation
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            DatabaseError::DuplicateEntry(_)
                | DatabaseError::ForeignKeyViolation(_)
                | DatabaseError::ConstraintViolation(_)
        )
    }

    /// Checks if this error reports misuse of the transaction stack
    pub fn is_discipline_violation(&self) -> bool {
        matches!(self, DatabaseError::TransactionDiscipline(_))
    }
}

/// Converts SQLx errors to more specific DatabaseError variants
///
/// PostgreSQL reports SQLSTATE codes, SQLite reports extended result codes;
/// both are mapped onto the same variants.
impl From<&sqlx::Error> for DatabaseError {
    fn from(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => {
                DatabaseError::NotFound("Record not found".to_string())
            }
            sqlx::Error::PoolTimedOut => {
                DatabaseError::ConnectionFailed("Timed out acquiring connection".to_string())
            }
            sqlx::Error::Database(db_err) => {
                // https://www.postgresql.org/docs/current/errcodes-appendix.html
                // https://www.sqlite.org/rescode.html
                let message = db_err.message().to_string();
                match db_err.code().as_deref() {
                    Some("23505") | Some("2067") | Some("1555") => {
                        DatabaseError::DuplicateEntry(message)
                    }
                    Some("23503") | Some("787") => DatabaseError::ForeignKeyViolation(message),
                    Some("23514") | Some("275") => DatabaseError::ConstraintViolation(message),
                    _ => DatabaseError::QueryFailed(message),
                }
            }
            _ => DatabaseError::QueryFailed(error.to_string()),
        }
    }
}
