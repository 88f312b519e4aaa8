//! Test Seeds - Named seed sets for database-backed tests
//!
//! A suite declares seed sets: bodies that create entities and write them
//! into a `SeedBag` under logical names. Seeds run once per suite inside the
//! class transaction and become named fixtures, looked up by
//! `(table, name)` like file-based fixtures. Each test runs inside its own
//! savepoint with the default set active; named sets are activated on
//! demand and everything is rolled back at teardown.
//!
//! # Modules
//!
//! - `registry`: Seed set declarations and the entries they produce
//! - `bag`: The seed bag bodies write into, and attribute diffing support
//! - `diff`: Runs a body and reports which names it introduced
//! - `bridge`: Turns seeded entities into named fixtures
//! - `cache` / `loader`: The fixture cache and file-based fixtures
//! - `executor`: Runs every seed body in one nested transaction
//! - `lifecycle` / `activation`: Per-test savepoints and seed set activation
//!
//! # Example
//!
//! ```rust,ignore
//! use test_seeds::{FixtureLifecycle, SeedError, SeedRegistry, SeedSetName};
//!
//! let registry = SeedRegistry::new()
//!     .seeds(SeedSetName::Default, |bag, conn| Box::pin(async move {
//!         bag.insert("default_1", Author::create(conn, "default first").await?);
//!         Ok::<(), SeedError>(())
//!     }))
//!     .seeds("foo", |bag, conn| Box::pin(async move {
//!         bag.insert("foo_1", Author::create(conn, "foo first").await?);
//!         Ok::<(), SeedError>(())
//!     }));
//!
//! let mut lifecycle = FixtureLifecycle::new(conn, registry).with_model::<Author>();
//! let mut ctx = lifecycle.setup().await?;
//! ctx.activate_seeds(&["foo"]).await?;
//! assert_eq!(ctx.seed::<Author>("foo_1").map(|a| a.name.as_str()), Some("foo first"));
//! ctx.teardown().await?;
//! ```

pub mod activation;
pub mod bag;
pub mod bridge;
pub mod cache;
pub mod config;
pub mod diff;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod loader;
pub mod registry;

pub use bag::{is_internal, symbolic_name, BagSnapshot, SeedBag, SeedValue, INTERNAL_PREFIX};
pub use bridge::bind;
pub use cache::{FixtureAccessor, FixtureCache, FixtureDescriptor};
pub use config::SeedConfig;
pub use diff::diff;
pub use error::SeedError;
pub use executor::SeedExecutor;
pub use lifecycle::{FixtureLifecycle, TestContext, TestFuture};
pub use loader::{EmptyFixtureLoader, FixtureLoader, JsonFixtureLoader};
pub use registry::{SeedBody, SeedDefinition, SeedEntry, SeedFuture, SeedRegistry, SeedSetName};
