//! Demo entities
//!
//! `Author` is a plain entity. `Book` carries a default scope hiding archived
//! books, and starts out unsaved until `save` is called.

use infra_db::{DatabaseError, Entity};
use sqlx::{Any, AnyConnection};

/// A row in `authors`
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Author {
    pub id: i64,
    pub name: String,
}

impl Entity for Author {
    const TABLE_NAME: &'static str = "authors";

    fn id(&self) -> Option<i64> {
        Some(self.id)
    }
}

impl Author {
    /// Inserts an author and returns the persisted row
    pub async fn create(conn: &mut AnyConnection, name: &str) -> Result<Self, DatabaseError> {
        let author = sqlx::query_as::<Any, Author>(
            "INSERT INTO authors (name) VALUES ($1) RETURNING id, name",
        )
        .bind(name.to_string())
        .fetch_one(&mut *conn)
        .await?;

        Ok(author)
    }

    pub async fn find_by_name(conn: &mut AnyConnection, name: &str) -> Result<Option<Self>, DatabaseError> {
        let author = sqlx::query_as::<Any, Author>("SELECT id, name FROM authors WHERE name = $1")
            .bind(name.to_string())
            .fetch_optional(&mut *conn)
            .await?;

        Ok(author)
    }

    pub async fn count(conn: &mut AnyConnection) -> Result<i64, DatabaseError> {
        let count = sqlx::query_scalar::<Any, i64>("SELECT COUNT(*) FROM authors")
            .fetch_one(&mut *conn)
            .await?;

        Ok(count)
    }
}

/// A row in `books`
///
/// Archived books are hidden by the default scope.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Book {
    pub id: Option<i64>,
    pub author_id: i64,
    pub title: String,
    pub status: String,
}

impl Entity for Book {
    const TABLE_NAME: &'static str = "books";

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn default_scope() -> Option<&'static str> {
        Some("status <> 'archived'")
    }
}

impl Book {
    /// Builds an unsaved, published book
    pub fn new(author: &Author, title: impl Into<String>) -> Self {
        Self {
            id: None,
            author_id: author.id,
            title: title.into(),
            status: "published".to_string(),
        }
    }

    pub fn archived(mut self) -> Self {
        self.status = "archived".to_string();
        self
    }

    /// Inserts the book and returns the persisted row
    pub async fn save(self, conn: &mut AnyConnection) -> Result<Self, DatabaseError> {
        let book = sqlx::query_as::<Any, Book>(
            "INSERT INTO books (author_id, title, status) VALUES ($1, $2, $3) \
             RETURNING id, author_id, title, status",
        )
        .bind(self.author_id)
        .bind(self.title)
        .bind(self.status)
        .fetch_one(&mut *conn)
        .await?;

        Ok(book)
    }
}
