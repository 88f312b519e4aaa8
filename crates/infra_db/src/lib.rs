//! Infrastructure Database Layer
//!
//! This crate provides the database boundary used by seeded test fixtures:
//! a single connection with an explicit nested-transaction stack, entity
//! class metadata, and primary-key lookups that can bypass an entity's
//! default scope. SQLx's `Any` driver lets the same code run against
//! PostgreSQL and SQLite.
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{DatabaseConfig, TransactionalConnection};
//!
//! let mut conn = TransactionalConnection::connect(&DatabaseConfig::new("sqlite::memory:")).await?;
//! conn.begin_db_transaction().await?;
//! let savepoint = conn.create_savepoint("test").await?;
//! ```

pub mod connection;
pub mod entity;
pub mod error;
pub mod repository;
pub mod transaction;

pub use connection::{connect, DatabaseConfig};
pub use entity::{DynEntity, Entity, EntityFuture, ModelClass, ModelRegistry};
pub use error::DatabaseError;
pub use repository::{find, find_unscoped};
pub use transaction::{Savepoint, TransactionHandle, TransactionalConnection};
