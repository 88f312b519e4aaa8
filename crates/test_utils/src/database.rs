//! Database Test Utilities
//!
//! Provides the demo schema and the databases the suites run against: an
//! in-memory SQLite database for everyday tests and a PostgreSQL container
//! for the backend the fixtures are meant for in production.

use infra_db::{DatabaseConfig, DatabaseError, TransactionalConnection};
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;

/// Demo schema for SQLite
pub const SQLITE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS authors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS books (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    author_id INTEGER NOT NULL REFERENCES authors (id),
    title TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'published'
);
CREATE TABLE IF NOT EXISTS tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    label TEXT NOT NULL
);
";

/// Demo schema for PostgreSQL
pub const POSTGRES_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS authors (
    id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS books (
    id BIGSERIAL PRIMARY KEY,
    author_id BIGINT NOT NULL REFERENCES authors (id),
    title TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'published'
);
CREATE TABLE IF NOT EXISTS tags (
    id BIGSERIAL PRIMARY KEY,
    label TEXT NOT NULL
);
";

/// A database the suites can open connections to
///
/// Every connection to the in-memory database is a fresh, empty database.
/// The Postgres variant keeps its container alive for as long as the value
/// lives.
pub struct TestDatabase {
    config: DatabaseConfig,
    _container: Option<ContainerAsync<Postgres>>,
}

impl TestDatabase {
    /// In-memory SQLite
    pub fn in_memory() -> Self {
        Self {
            config: DatabaseConfig::new("sqlite::memory:"),
            _container: None,
        }
    }

    /// Starts a PostgreSQL container
    ///
    /// # Errors
    ///
    /// Returns an error if Docker is unavailable or the container fails to start
    pub async fn postgres() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let container = Postgres::default().start().await?;
        let host = container.get_host().await?;
        let port = container.get_host_port_ipv4(5432).await?;

        Ok(Self {
            config: DatabaseConfig::new(format!(
                "postgres://postgres:postgres@{}:{}/postgres",
                host, port
            )),
            _container: Some(container),
        })
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Opens a connection and makes sure the demo schema exists
    pub async fn connect(&self) -> Result<TransactionalConnection, DatabaseError> {
        let mut conn = TransactionalConnection::connect(&self.config).await?;

        let schema = if self.config.backend() == "postgres" {
            POSTGRES_SCHEMA
        } else {
            SQLITE_SCHEMA
        };
        sqlx::raw_sql(schema).execute(conn.connection()).await?;

        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Author, Book};

    #[tokio::test]
    async fn test_in_memory_database_has_schema() {
        let db = TestDatabase::in_memory();
        let mut conn = db.connect().await.expect("Failed to connect");

        let author = Author::create(conn.connection(), "Ursula").await.unwrap();
        assert_eq!(author.name, "Ursula");
        assert_eq!(Author::count(conn.connection()).await.unwrap(), 1);

        let book = Book::new(&author, "The Dispossessed");
        assert_eq!(book.id, None);
        let saved = book.save(conn.connection()).await.unwrap();
        assert!(saved.id.is_some());
        assert_eq!(saved.status, "published");
    }

    #[tokio::test]
    async fn test_each_in_memory_connection_is_isolated() {
        let db = TestDatabase::in_memory();
        let mut first = db.connect().await.unwrap();
        let mut second = db.connect().await.unwrap();

        Author::create(first.connection(), "Only here").await.unwrap();

        assert_eq!(Author::count(second.connection()).await.unwrap(), 0);
        assert!(Author::find_by_name(first.connection(), "Only here").await.unwrap().is_some());
    }
}
