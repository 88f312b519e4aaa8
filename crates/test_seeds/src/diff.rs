//! Attribute differ
//!
//! Runs a seed body against a bag and reports which attributes the body
//! introduced. Errors from the body are returned untouched.

use sqlx::AnyConnection;

use crate::bag::SeedBag;
use crate::error::SeedError;
use crate::registry::SeedBody;

/// Runs `body` and returns the non-scratch attribute names it added to `bag`
///
/// Scratch attributes (leading `_`) are left in the bag but not reported.
/// Names that already existed before the body ran are not reported either,
/// even if the body replaced their values.
pub async fn diff(
    bag: &mut SeedBag,
    conn: &mut AnyConnection,
    body: &SeedBody,
) -> Result<Vec<String>, SeedError> {
    let before = bag.snapshot();
    (body.as_ref())(&mut *bag, &mut *conn).await?;
    Ok(bag.introduced_since(&before))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use infra_db::DatabaseError;
    use test_utils::{Author, TestDatabase};

    use crate::registry::SeedFuture;

    fn create_two<'a>(bag: &'a mut SeedBag, conn: &'a mut AnyConnection) -> SeedFuture<'a> {
        Box::pin(async move {
            let first = Author::create(conn, "first").await?;
            bag.stash("_helper", first.name.clone());
            bag.insert("first", first);
            bag.insert("second", Author::create(conn, "second").await?);
            Ok(())
        })
    }

    fn fail<'a>(_bag: &'a mut SeedBag, _conn: &'a mut AnyConnection) -> SeedFuture<'a> {
        Box::pin(async move { Err(SeedError::from(DatabaseError::QueryFailed("boom".into()))) })
    }

    #[tokio::test]
    async fn test_diff_reports_new_public_attributes() {
        let db = TestDatabase::in_memory();
        let mut conn = db.connect().await.unwrap();
        let mut bag = SeedBag::new();
        bag.stash("existing", 1u8);

        let body: SeedBody = Arc::new(create_two);
        let introduced = diff(&mut bag, conn.connection(), &body).await.unwrap();

        assert_eq!(introduced, vec!["first", "second"]);
        assert_eq!(bag.get_plain::<String>("_helper").map(String::as_str), Some("first"));
        assert_eq!(bag.get::<Author>("second").map(|a| a.name.as_str()), Some("second"));
    }

    #[tokio::test]
    async fn test_diff_propagates_body_errors() {
        let db = TestDatabase::in_memory();
        let mut conn = db.connect().await.unwrap();
        let mut bag = SeedBag::new();

        let body: SeedBody = Arc::new(fail);
        let err = diff(&mut bag, conn.connection(), &body).await.unwrap_err();

        assert!(matches!(err, SeedError::Database(DatabaseError::QueryFailed(_))));
        assert!(bag.is_empty());
    }
}
