//! Entity lookups by primary key
//!
//! `find` honours the entity's default scope. `find_unscoped` is the
//! exclusive-scope lookup used to resolve fixtures: it ignores the default
//! scope so that fixture rows stay reachable whatever filtering the entity
//! applies to ordinary queries.

use sqlx::{Any, AnyConnection};

use crate::entity::Entity;
use crate::error::DatabaseError;

/// Fetches an entity by primary key, applying its default scope
///
/// # Errors
///
/// Returns `DatabaseError::NotFound` if no row matches, including rows
/// excluded by the default scope.
pub async fn find<E: Entity>(conn: &mut AnyConnection, id: i64) -> Result<E, DatabaseError> {
    let sql = match E::default_scope() {
        Some(scope) => format!(
            "SELECT * FROM {} WHERE {} = $1 AND ({})",
            E::TABLE_NAME,
            E::PRIMARY_KEY,
            scope
        ),
        None => select_by_id::<E>(),
    };
    fetch_by_id(conn, &sql, id).await
}

/// Fetches an entity by primary key, ignoring its default scope
pub async fn find_unscoped<E: Entity>(conn: &mut AnyConnection, id: i64) -> Result<E, DatabaseError> {
    fetch_by_id(conn, &select_by_id::<E>(), id).await
}

fn select_by_id<E: Entity>() -> String {
    format!("SELECT * FROM {} WHERE {} = $1", E::TABLE_NAME, E::PRIMARY_KEY)
}

async fn fetch_by_id<E: Entity>(conn: &mut AnyConnection, sql: &str, id: i64) -> Result<E, DatabaseError> {
    sqlx::query_as::<Any, E>(sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DatabaseError::not_found(E::TABLE_NAME, id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{connect, DatabaseConfig};

    #[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
    struct Ticket {
        id: i64,
        status: String,
    }

    impl Entity for Ticket {
        const TABLE_NAME: &'static str = "tickets";

        fn id(&self) -> Option<i64> {
            Some(self.id)
        }

        fn default_scope() -> Option<&'static str> {
            Some("status <> 'closed'")
        }
    }

    async fn seeded_connection() -> AnyConnection {
        let mut conn = connect(&DatabaseConfig::default()).await.unwrap();
        sqlx::raw_sql(
            "CREATE TABLE tickets (id INTEGER PRIMARY KEY, status TEXT NOT NULL);
             INSERT INTO tickets (id, status) VALUES (1, 'open'), (2, 'closed');",
        )
        .execute(&mut conn)
        .await
        .unwrap();
        conn
    }

    #[tokio::test]
    async fn test_find_applies_default_scope() {
        let mut conn = seeded_connection().await;

        let open: Ticket = find(&mut conn, 1).await.unwrap();
        assert_eq!(open.status, "open");

        let closed = find::<Ticket>(&mut conn, 2).await;
        assert!(matches!(closed, Err(DatabaseError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_find_unscoped_ignores_default_scope() {
        let mut conn = seeded_connection().await;

        let closed: Ticket = find_unscoped(&mut conn, 2).await.unwrap();
        assert_eq!(closed, Ticket { id: 2, status: "closed".into() });

        let missing = find_unscoped::<Ticket>(&mut conn, 3).await;
        assert!(matches!(missing, Err(DatabaseError::NotFound(_))));
    }
}
