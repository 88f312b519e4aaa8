//! Seed and fixture error types

use infra_db::DatabaseError;
use thiserror::Error;

/// Errors raised while loading, binding or activating seeded fixtures
///
/// Every variant is surfaced to the running test as its failure; the only
/// place errors are handled locally is rollback during cleanup, which logs a
/// secondary failure and returns the primary one.
#[derive(Debug, Error)]
pub enum SeedError {
    /// A fixture was resolved but no entity class is attached to it
    #[error("No class attached to find fixture '{table}.{name}'")]
    UnboundFixtureClass { table: String, name: String },

    /// A seed attribute holds something other than a persisted entity
    #[error("Seed '{key}' must be a persisted entity, got {found}")]
    InvalidSeedValue { key: String, found: String },

    /// Transaction frames were not opened and closed in pairs
    #[error("Transaction discipline violated: expected {expected} open transaction(s), found {actual}")]
    TransactionDisciplineViolation { expected: usize, actual: usize },

    /// No fixture is registered under the accessor
    #[error("Fixture not found: {table}.{name}")]
    FixtureNotFound { table: String, name: String },

    /// A fixture accessor was bound twice
    #[error("Fixture '{table}.{name}' is already defined")]
    DuplicateFixture { table: String, name: String },

    /// The fixture resolved to a different entity type than requested
    #[error("Fixture '{table}.{name}' is a {found}, not a {expected}")]
    FixtureTypeMismatch {
        table: String,
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    /// A fixture file could not be read or parsed
    #[error("Fixture file error: {0}")]
    FixtureFile(String),

    #[error("Configuration error: {0}")]
    Configuration(#[from] config::ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl SeedError {
    pub fn not_found(table: impl Into<String>, name: impl Into<String>) -> Self {
        SeedError::FixtureNotFound {
            table: table.into(),
            name: name.into(),
        }
    }

    pub fn duplicate(table: impl Into<String>, name: impl Into<String>) -> Self {
        SeedError::DuplicateFixture {
            table: table.into(),
            name: name.into(),
        }
    }

    pub fn discipline(expected: usize, actual: usize) -> Self {
        SeedError::TransactionDisciplineViolation { expected, actual }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            SeedError::FixtureNotFound { .. } => true,
            SeedError::Database(err) => err.is_not_found(),
            _ => false,
        }
    }

    pub fn is_discipline_violation(&self) -> bool {
        match self {
            SeedError::TransactionDisciplineViolation { .. } => true,
            SeedError::Database(err) => err.is_discipline_violation(),
            _ => false,
        }
    }
}

impl From<sqlx::Error> for SeedError {
    fn from(error: sqlx::Error) -> Self {
        SeedError::Database(DatabaseError::from(&error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_seed_value_display() {
        let error = SeedError::InvalidSeedValue {
            key: "hmm".to_string(),
            found: "i32".to_string(),
        };
        assert_eq!(error.to_string(), "Seed 'hmm' must be a persisted entity, got i32");
    }

    #[test]
    fn test_not_found_covers_database_errors() {
        assert!(SeedError::not_found("authors", "nobody").is_not_found());
        assert!(SeedError::from(DatabaseError::not_found("authors", 1)).is_not_found());
        assert!(!SeedError::duplicate("authors", "tolkien").is_not_found());
    }

    #[test]
    fn test_discipline_covers_database_errors() {
        assert!(SeedError::discipline(2, 3).is_discipline_violation());
        assert!(SeedError::from(DatabaseError::discipline("out of order")).is_discipline_violation());
    }

    #[test]
    fn test_sqlx_errors_are_classified() {
        let error = SeedError::from(sqlx::Error::RowNotFound);
        assert!(matches!(error, SeedError::Database(DatabaseError::NotFound(_))));
    }
}
