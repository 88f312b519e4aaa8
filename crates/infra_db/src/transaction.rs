//! Nested transaction stack
//!
//! `TransactionalConnection` wraps the single test connection and tracks every
//! transaction frame it opens: the outer `BEGIN` and each `SAVEPOINT` above it.
//! The depth of that stack is the connection's open-transaction counter, and
//! frames must be closed strictly in reverse order of opening.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut conn = TransactionalConnection::connect(&DatabaseConfig::default()).await?;
//! conn.begin_db_transaction().await?;
//! let sp = conn.create_savepoint("test").await?;
//! // ... statements that must not survive ...
//! conn.rollback_to_savepoint(sp).await?;
//! assert_eq!(conn.open_transactions(), 1);
//! ```

use sqlx::AnyConnection;
use tracing::debug;

use crate::connection::{connect, DatabaseConfig};
use crate::error::DatabaseError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Frame {
    Transaction,
    Savepoint(String),
}

/// An open savepoint on a `TransactionalConnection`
///
/// Consumed by `release_savepoint` or `rollback_to_savepoint`.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a savepoint must be released or rolled back"]
pub struct Savepoint {
    name: String,
    depth: usize,
}

impl Savepoint {
    /// SQL identifier of the savepoint
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Open-transaction count right after the savepoint was created
    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// Result of `begin_transaction`, telling commit/rollback what to undo
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a transaction must be committed or rolled back"]
pub enum TransactionHandle {
    /// A real `BEGIN` was issued
    Root(usize),
    /// A savepoint was created inside the enclosing transaction
    Nested(Savepoint),
    /// The enclosing transaction was joined; nothing was opened
    Joined,
}

/// A database connection with an explicit transaction frame stack
pub struct TransactionalConnection {
    conn: AnyConnection,
    frames: Vec<Frame>,
    counter: u64,
}

impl std::fmt::Debug for TransactionalConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionalConnection")
            .field("frames", &self.frames)
            .finish_non_exhaustive()
    }
}

impl TransactionalConnection {
    /// Wraps an already open connection that has no transaction in progress
    pub fn new(conn: AnyConnection) -> Self {
        Self {
            conn,
            frames: Vec::new(),
            counter: 0,
        }
    }

    /// Opens a connection with the given configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        Ok(Self::new(connect(config).await?))
    }

    /// Number of transaction frames currently open
    pub fn open_transactions(&self) -> usize {
        self.frames.len()
    }

    pub fn in_transaction(&self) -> bool {
        !self.frames.is_empty()
    }

    /// The underlying connection, for running queries
    pub fn connection(&mut self) -> &mut AnyConnection {
        &mut self.conn
    }

    pub fn into_inner(self) -> AnyConnection {
        self.conn
    }

    async fn execute(&mut self, sql: &str) -> Result<(), DatabaseError> {
        debug!(depth = self.frames.len(), sql, "transaction control");
        sqlx::query(sql).persistent(false).execute(&mut self.conn).await?;
        Ok(())
    }

    /// Issues `BEGIN`
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::TransactionDiscipline` if a transaction is
    /// already open on this connection.
    pub async fn begin_db_transaction(&mut self) -> Result<(), DatabaseError> {
        if self.in_transaction() {
            return Err(DatabaseError::discipline(format!(
                "BEGIN issued with {} transaction frame(s) already open",
                self.frames.len()
            )));
        }
        self.execute("BEGIN").await?;
        self.frames.push(Frame::Transaction);
        Ok(())
    }

    /// Issues `COMMIT`; only valid when no savepoint is open
    pub async fn commit_db_transaction(&mut self) -> Result<(), DatabaseError> {
        if self.frames.len() != 1 {
            return Err(DatabaseError::discipline(format!(
                "COMMIT issued with {} transaction frame(s) open",
                self.frames.len()
            )));
        }
        self.execute("COMMIT").await?;
        self.frames.clear();
        Ok(())
    }

    /// Issues `ROLLBACK`, discarding every open frame
    ///
    /// Does nothing when no transaction is open. The frame stack is cleared
    /// even if the statement fails, since the server ends the transaction on
    /// its side in either case.
    pub async fn rollback_db_transaction(&mut self) -> Result<(), DatabaseError> {
        if !self.in_transaction() {
            return Ok(());
        }
        let result = self.execute("ROLLBACK").await;
        self.frames.clear();
        result
    }

    /// Creates a savepoint on top of the stack
    ///
    /// # Arguments
    ///
    /// * `label` - Prefix for the savepoint name; non-identifier characters are dropped
    pub async fn create_savepoint(&mut self, label: &str) -> Result<Savepoint, DatabaseError> {
        if !self.in_transaction() {
            return Err(DatabaseError::discipline(
                "SAVEPOINT requires an open transaction",
            ));
        }

        self.counter += 1;
        let label: String = label
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        let name = format!("{}_{}", if label.is_empty() { "sp" } else { label.as_str() }, self.counter);

        self.execute(&format!("SAVEPOINT {}", name)).await?;
        self.frames.push(Frame::Savepoint(name.clone()));

        Ok(Savepoint {
            name,
            depth: self.frames.len(),
        })
    }

    fn position(&self, savepoint: &Savepoint) -> Result<usize, DatabaseError> {
        self.frames
            .iter()
            .rposition(|frame| matches!(frame, Frame::Savepoint(name) if name == &savepoint.name))
            .ok_or_else(|| {
                DatabaseError::discipline(format!("savepoint {} is not open", savepoint.name))
            })
    }

    /// Releases a savepoint, keeping its changes in the enclosing transaction
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::TransactionDiscipline` if the savepoint is not
    /// the innermost open frame.
    pub async fn release_savepoint(&mut self, savepoint: Savepoint) -> Result<(), DatabaseError> {
        let index = self.position(&savepoint)?;
        if index + 1 != self.frames.len() {
            return Err(DatabaseError::discipline(format!(
                "savepoint {} released with {} nested frame(s) still open",
                savepoint.name,
                self.frames.len() - index - 1
            )));
        }

        self.execute(&format!("RELEASE SAVEPOINT {}", savepoint.name)).await?;
        self.frames.pop();
        Ok(())
    }

    /// Rolls back to a savepoint and releases it
    ///
    /// Any savepoints opened after this one are discarded along with it.
    ///
    /// # Returns
    ///
    /// The number of nested frames that were still open above the savepoint.
    /// Zero means the stack was closed in order.
    pub async fn rollback_to_savepoint(&mut self, savepoint: Savepoint) -> Result<usize, DatabaseError> {
        let index = self.position(&savepoint)?;
        let discarded = self.frames.len() - index - 1;

        self.execute(&format!("ROLLBACK TO SAVEPOINT {}", savepoint.name)).await?;
        self.frames.truncate(index + 1);

        self.execute(&format!("RELEASE SAVEPOINT {}", savepoint.name)).await?;
        self.frames.truncate(index);

        Ok(discarded)
    }

    /// Begins a transaction, nesting it when one is already open
    ///
    /// At depth zero this issues `BEGIN`. Inside a transaction it creates a
    /// savepoint when `requires_new` is set and otherwise joins the enclosing
    /// transaction.
    pub async fn begin_transaction(&mut self, requires_new: bool) -> Result<TransactionHandle, DatabaseError> {
        if !self.in_transaction() {
            self.begin_db_transaction().await?;
            Ok(TransactionHandle::Root(self.frames.len()))
        } else if requires_new {
            Ok(TransactionHandle::Nested(self.create_savepoint("nested").await?))
        } else {
            Ok(TransactionHandle::Joined)
        }
    }

    pub async fn commit_transaction(&mut self, handle: TransactionHandle) -> Result<(), DatabaseError> {
        match handle {
            TransactionHandle::Root(_) => self.commit_db_transaction().await,
            TransactionHandle::Nested(savepoint) => self.release_savepoint(savepoint).await,
            TransactionHandle::Joined => Ok(()),
        }
    }

    /// Undoes a transaction opened by `begin_transaction`
    ///
    /// A joined transaction leaves the decision to its enclosing transaction.
    pub async fn rollback_transaction(&mut self, handle: TransactionHandle) -> Result<(), DatabaseError> {
        match handle {
            TransactionHandle::Root(_) => self.rollback_db_transaction().await,
            TransactionHandle::Nested(savepoint) => {
                self.rollback_to_savepoint(savepoint).await.map(|_| ())
            }
            TransactionHandle::Joined => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn scratch_connection() -> TransactionalConnection {
        let mut conn = TransactionalConnection::connect(&DatabaseConfig::default())
            .await
            .expect("Failed to open in-memory database");
        sqlx::raw_sql("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT NOT NULL)")
            .execute(conn.connection())
            .await
            .expect("Failed to create table");
        conn
    }

    async fn insert_note(conn: &mut TransactionalConnection, body: &str) {
        sqlx::query("INSERT INTO notes (body) VALUES ($1)")
            .bind(body.to_string())
            .execute(conn.connection())
            .await
            .expect("Failed to insert note");
    }

    async fn note_count(conn: &mut TransactionalConnection) -> i64 {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM notes")
            .fetch_one(conn.connection())
            .await
            .expect("Failed to count notes")
    }

    #[tokio::test]
    async fn test_savepoint_rollback_discards_changes() {
        let mut conn = scratch_connection().await;
        conn.begin_db_transaction().await.unwrap();
        insert_note(&mut conn, "kept").await;

        let savepoint = conn.create_savepoint("test").await.unwrap();
        assert_eq!(savepoint.depth(), 2);
        insert_note(&mut conn, "discarded").await;
        assert_eq!(note_count(&mut conn).await, 2);

        let discarded = conn.rollback_to_savepoint(savepoint).await.unwrap();
        assert_eq!(discarded, 0);
        assert_eq!(conn.open_transactions(), 1);
        assert_eq!(note_count(&mut conn).await, 1);

        conn.rollback_db_transaction().await.unwrap();
        assert_eq!(conn.open_transactions(), 0);
        assert_eq!(note_count(&mut conn).await, 0);
    }

    #[tokio::test]
    async fn test_release_keeps_changes_in_enclosing_transaction() {
        let mut conn = scratch_connection().await;
        conn.begin_db_transaction().await.unwrap();

        let savepoint = conn.create_savepoint("seeds").await.unwrap();
        insert_note(&mut conn, "seed").await;
        conn.release_savepoint(savepoint).await.unwrap();

        assert_eq!(conn.open_transactions(), 1);
        assert_eq!(note_count(&mut conn).await, 1);
    }

    #[tokio::test]
    async fn test_rollback_to_outer_savepoint_reports_nested_frames() {
        let mut conn = scratch_connection().await;
        conn.begin_db_transaction().await.unwrap();

        let outer = conn.create_savepoint("outer").await.unwrap();
        let _inner = conn.create_savepoint("inner").await.unwrap();
        insert_note(&mut conn, "nested").await;
        assert_eq!(conn.open_transactions(), 3);

        let discarded = conn.rollback_to_savepoint(outer).await.unwrap();
        assert_eq!(discarded, 1);
        assert_eq!(conn.open_transactions(), 1);
        assert_eq!(note_count(&mut conn).await, 0);
    }

    #[tokio::test]
    async fn test_release_out_of_order_is_rejected() {
        let mut conn = scratch_connection().await;
        conn.begin_db_transaction().await.unwrap();

        let outer = conn.create_savepoint("outer").await.unwrap();
        let inner = conn.create_savepoint("inner").await.unwrap();

        let err = conn.release_savepoint(outer).await.unwrap_err();
        assert!(err.is_discipline_violation());
        assert_eq!(conn.open_transactions(), 3);

        conn.release_savepoint(inner).await.unwrap();
        assert_eq!(conn.open_transactions(), 2);
    }

    #[tokio::test]
    async fn test_savepoint_requires_transaction() {
        let mut conn = scratch_connection().await;
        let err = conn.create_savepoint("orphan").await.unwrap_err();
        assert!(err.is_discipline_violation());
    }

    #[tokio::test]
    async fn test_double_begin_is_rejected() {
        let mut conn = scratch_connection().await;
        conn.begin_db_transaction().await.unwrap();
        let err = conn.begin_db_transaction().await.unwrap_err();
        assert!(err.is_discipline_violation());
        assert_eq!(conn.open_transactions(), 1);
    }

    #[tokio::test]
    async fn test_begin_transaction_nests_or_joins() {
        let mut conn = scratch_connection().await;

        let root = conn.begin_transaction(true).await.unwrap();
        assert!(matches!(root, TransactionHandle::Root(1)));

        let nested = conn.begin_transaction(true).await.unwrap();
        assert!(matches!(nested, TransactionHandle::Nested(_)));
        assert_eq!(conn.open_transactions(), 2);

        let joined = conn.begin_transaction(false).await.unwrap();
        assert_eq!(joined, TransactionHandle::Joined);
        assert_eq!(conn.open_transactions(), 2);

        insert_note(&mut conn, "inside").await;
        conn.commit_transaction(joined).await.unwrap();
        conn.rollback_transaction(nested).await.unwrap();
        assert_eq!(note_count(&mut conn).await, 0);

        conn.commit_transaction(root).await.unwrap();
        assert_eq!(conn.open_transactions(), 0);
    }
}
