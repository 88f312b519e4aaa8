//! Test Utilities Crate
//!
//! Provides shared test infrastructure for the seeded fixture suite.
//!
//! # Modules
//!
//! - `models`: Demo entities (`Author`, `Book`) used by the test suites
//! - `database`: Demo schema, in-memory SQLite and Postgres container databases
//! - `logging`: One-time tracing subscriber setup for tests

pub mod database;
pub mod logging;
pub mod models;

pub use database::*;
pub use logging::*;
pub use models::*;
