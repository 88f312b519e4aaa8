//! Fixture lifecycle
//!
//! `FixtureLifecycle` owns the suite's connection and its class-level state:
//! the file fixtures, the seed entries and the transaction depth they were
//! loaded at. Every test runs between `setup` and `TestContext::teardown`:
//!
//! ```text
//! Idle -> setup -> TransactionOpen -> teardown -> TornDown
//! ```
//!
//! `setup` loads the class fixtures on first use, opens the test savepoint
//! and activates the default seed set. `teardown` deactivates every active
//! set and rolls the savepoint back, leaving the connection at the depth it
//! had before the test.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut lifecycle = FixtureLifecycle::new(conn, registry).with_model::<Author>();
//!
//! lifecycle
//!     .run_test(|ctx| Box::pin(async move {
//!         assert!(ctx.seed::<Author>("default_1").is_some());
//!         ctx.activate_seeds(&["foo"]).await?;
//!         Ok::<(), SeedError>(())
//!     }))
//!     .await?;
//! ```

use std::any::type_name;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use infra_db::{DynEntity, Entity, ModelRegistry, Savepoint, TransactionalConnection};
use sqlx::AnyConnection;
use tracing::{debug, error, info, warn};

use crate::bag::{symbolic_name, SeedValue};
use crate::bridge;
use crate::cache::{FixtureAccessor, FixtureCache};
use crate::config::SeedConfig;
use crate::error::SeedError;
use crate::executor::SeedExecutor;
use crate::loader::{EmptyFixtureLoader, FixtureLoader, JsonFixtureLoader};
use crate::registry::{SeedRegistry, SeedSetName};

/// Future returned by a test body passed to `run_test`
pub type TestFuture<'c> = Pin<Box<dyn Future<Output = Result<(), SeedError>> + Send + 'c>>;

/// Class-level fixture state; reset by `invalidate`
#[derive(Debug, Default)]
pub(crate) struct ClassFixtures {
    pub(crate) cache: FixtureCache,
    loaded: bool,
    /// Open transactions once the class fixtures are in place
    baseline: usize,
}

/// Drives the per-test transaction and seed activation cycle for one suite
pub struct FixtureLifecycle {
    pub(crate) conn: TransactionalConnection,
    pub(crate) registry: SeedRegistry,
    models: ModelRegistry,
    loader: Box<dyn FixtureLoader>,
    pub(crate) state: ClassFixtures,
}

impl std::fmt::Debug for FixtureLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixtureLifecycle")
            .field("conn", &self.conn)
            .field("registry", &self.registry)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl FixtureLifecycle {
    /// Creates a lifecycle with no file fixtures
    ///
    /// The connection must not be shared with another running suite.
    pub fn new(conn: TransactionalConnection, registry: SeedRegistry) -> Self {
        Self {
            conn,
            registry,
            models: ModelRegistry::new(),
            loader: Box::new(EmptyFixtureLoader),
            state: ClassFixtures::default(),
        }
    }

    /// Connects with `config` and loads JSON fixtures from its fixture path
    pub async fn from_config(config: &SeedConfig, registry: SeedRegistry) -> Result<Self, SeedError> {
        let conn = TransactionalConnection::connect(&config.database_config()).await?;
        Ok(Self::new(conn, registry).with_loader(JsonFixtureLoader::directory(&config.fixture_path)))
    }

    /// Attaches `E` to fixtures loaded for its table
    pub fn with_model<E: Entity>(mut self) -> Self {
        self.models.register::<E>();
        self
    }

    pub fn with_loader(mut self, loader: impl FixtureLoader + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    pub fn registry(&self) -> &SeedRegistry {
        &self.registry
    }

    /// Fixtures loaded for the class, file-based and seeded
    pub fn fixtures(&self) -> &FixtureCache {
        &self.state.cache
    }

    pub fn is_loaded(&self) -> bool {
        self.state.loaded
    }

    /// The suite connection, for schema setup outside of any test
    pub fn connection(&mut self) -> &mut AnyConnection {
        self.conn.connection()
    }

    pub fn open_transactions(&self) -> usize {
        self.conn.open_transactions()
    }

    /// Loads file fixtures and seeds inside the class transaction
    ///
    /// Does nothing while the class state is valid. On failure the class
    /// transaction is rolled back, recorded seed entries are dropped, and the
    /// original error is returned.
    pub async fn load_fixtures(&mut self) -> Result<(), SeedError> {
        if self.state.loaded {
            return Ok(());
        }

        if self.conn.in_transaction() {
            warn!(
                depth = self.conn.open_transactions(),
                "Rolling back stale transaction before loading fixtures"
            );
            self.conn.rollback_db_transaction().await?;
        }
        self.conn.begin_db_transaction().await?;

        match self.populate().await {
            Ok(cache) => {
                self.state = ClassFixtures {
                    cache,
                    loaded: true,
                    baseline: self.conn.open_transactions(),
                };
                info!(
                    fixtures = self.state.cache.len(),
                    seed_sets = self.registry.set_names().len(),
                    "Loaded class fixtures"
                );
                Ok(())
            }
            Err(err) => {
                if let Err(cleanup) = self.conn.rollback_db_transaction().await {
                    warn!(error = %cleanup, "Failed to roll back class transaction");
                }
                self.registry.reset();
                self.state = ClassFixtures::default();
                Err(err)
            }
        }
    }

    async fn populate(&mut self) -> Result<FixtureCache, SeedError> {
        // Entries from an earlier load point into a cache that no longer exists.
        self.registry.reset();

        let mut cache = self
            .loader
            .load_named_fixtures(self.conn.connection(), &self.models)
            .await?;
        SeedExecutor::new(&mut self.conn)
            .run_all(&mut self.registry, &mut cache)
            .await?;

        Ok(cache)
    }

    /// Drops the class state; the next `setup` reloads everything
    pub async fn invalidate(&mut self) -> Result<(), SeedError> {
        self.registry.reset();
        self.state = ClassFixtures::default();
        self.conn.rollback_db_transaction().await?;
        info!("Invalidated class fixtures");
        Ok(())
    }

    /// Invalidates after a discipline violation; cleanup errors are logged
    async fn discard_class_state(&mut self) {
        if let Err(cleanup) = self.invalidate().await {
            warn!(error = %cleanup, "Failed to invalidate class fixtures");
        }
    }

    /// Starts a test: savepoint taken, default seed set active
    ///
    /// # Errors
    ///
    /// `TransactionDisciplineViolation` if the connection is not at the depth
    /// the class fixtures were loaded at, e.g. after a test context was
    /// dropped without teardown. The class state is invalidated first so the
    /// following setup starts clean. If activating the default set fails, the
    /// savepoint is rolled back and the activation error returned.
    pub async fn setup(&mut self) -> Result<TestContext<'_>, SeedError> {
        self.load_fixtures().await?;

        let expected = self.state.baseline;
        let actual = self.conn.open_transactions();
        if actual != expected {
            error!(expected, actual, "Test started with unbalanced transactions");
            self.discard_class_state().await;
            return Err(SeedError::discipline(expected, actual));
        }

        let savepoint = self.conn.create_savepoint("test").await?;
        debug!(savepoint = savepoint.name(), "Opened test savepoint");

        let mut ctx = TestContext {
            lifecycle: self,
            savepoint: Some(savepoint),
            depth_before: expected,
            attributes: HashMap::new(),
            active: Vec::new(),
            local_fixtures: FixtureCache::new(),
        };

        if let Err(err) = ctx.activate_seeds(&[SeedSetName::Default]).await {
            if let Some(savepoint) = ctx.savepoint.take() {
                if let Err(cleanup) = ctx.lifecycle.conn.rollback_to_savepoint(savepoint).await {
                    warn!(error = %cleanup, "Failed to roll back test savepoint");
                }
            }
            return Err(err);
        }

        Ok(ctx)
    }

    /// Runs `body` between `setup` and `teardown`
    ///
    /// An error from the body wins over a teardown error, which is logged.
    pub async fn run_test<F>(&mut self, body: F) -> Result<(), SeedError>
    where
        F: for<'c, 'l> FnOnce(&'c mut TestContext<'l>) -> TestFuture<'c>,
    {
        let mut ctx = self.setup().await?;
        let outcome = body(&mut ctx).await;
        let teardown = ctx.teardown().await;

        match (outcome, teardown) {
            (Err(err), Err(cleanup)) => {
                warn!(error = %cleanup, "Teardown failed after test error");
                Err(err)
            }
            (Err(err), Ok(())) => Err(err),
            (Ok(()), teardown) => teardown,
        }
    }
}

/// A running test: the seed attributes and fixtures it can see
///
/// Obtained from `FixtureLifecycle::setup` and closed with `teardown`.
pub struct TestContext<'l> {
    pub(crate) lifecycle: &'l mut FixtureLifecycle,
    pub(crate) savepoint: Option<Savepoint>,
    pub(crate) depth_before: usize,
    /// Seed attributes by symbolic name; `None` once deactivated
    pub(crate) attributes: HashMap<String, Option<Box<dyn DynEntity>>>,
    pub(crate) active: Vec<SeedSetName>,
    /// Fixtures bound during this test only
    pub(crate) local_fixtures: FixtureCache,
}

impl std::fmt::Debug for TestContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestContext")
            .field("savepoint", &self.savepoint)
            .field("active", &self.active)
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}

impl<'l> TestContext<'l> {
    /// The seed attribute `key` as an `E`, if its set is active
    pub fn seed<E: Entity>(&self, key: &str) -> Option<&E> {
        self.attribute(key)?.downcast_ref::<E>()
    }

    pub fn attribute(&self, key: &str) -> Option<&dyn DynEntity> {
        self.attributes.get(symbolic_name(key))?.as_deref()
    }

    /// True if `key` currently holds a live entity
    pub fn is_seeded(&self, key: &str) -> bool {
        self.attribute(key).is_some()
    }

    pub fn active_seed_sets(&self) -> &[SeedSetName] {
        &self.active
    }

    /// Looks up a file-based or seeded fixture by table and name
    ///
    /// Always re-fetches the row, ignoring the entity's default scope.
    ///
    /// # Errors
    ///
    /// * `FixtureNotFound` if nothing is registered under the accessor
    /// * `UnboundFixtureClass` if the fixture has no entity class
    /// * `FixtureTypeMismatch` if the fixture is not an `E`
    pub async fn fixture<E: Entity>(&mut self, table_name: &str, symbolic_name: &str) -> Result<E, SeedError> {
        let lifecycle = &mut *self.lifecycle;
        let descriptor = self
            .local_fixtures
            .get(table_name, symbolic_name)
            .or_else(|| lifecycle.state.cache.get(table_name, symbolic_name))
            .cloned()
            .ok_or_else(|| SeedError::not_found(table_name, symbolic_name))?;

        let accessor = FixtureAccessor::new(table_name, symbolic_name);
        let entity = descriptor.resolve(lifecycle.conn.connection(), &accessor).await?;
        let found = entity.model_class().type_name();

        entity.downcast::<E>().ok_or_else(|| SeedError::FixtureTypeMismatch {
            table: accessor.table_name,
            name: accessor.symbolic_name,
            expected: type_name::<E>(),
            found,
        })
    }

    /// Binds an entity created during the test as a named fixture
    ///
    /// The binding is visible to `fixture` until teardown only.
    ///
    /// # Errors
    ///
    /// `InvalidSeedValue` for non-entities or unsaved entities, and
    /// `DuplicateFixture` if the name is taken for that table.
    pub fn set_seed_fixture(
        &mut self,
        name: &str,
        value: impl Into<SeedValue>,
    ) -> Result<FixtureAccessor, SeedError> {
        let value = value.into();
        if let Some(entity) = value.as_entity() {
            let accessor = FixtureAccessor::new(entity.model_class().table_name(), symbolic_name(name));
            if self.lifecycle.state.cache.contains(&accessor) {
                return Err(SeedError::duplicate(accessor.table_name, accessor.symbolic_name));
            }
        }

        bridge::bind(&mut self.local_fixtures, &SeedSetName::Default, name, &value)
    }

    /// The connection, for queries inside the test savepoint
    pub fn connection(&mut self) -> &mut AnyConnection {
        self.lifecycle.conn.connection()
    }

    /// The transaction stack, for tests that manage their own savepoints
    pub fn db(&mut self) -> &mut TransactionalConnection {
        &mut self.lifecycle.conn
    }

    /// Ends the test and rolls back everything it wrote
    ///
    /// # Errors
    ///
    /// `TransactionDisciplineViolation` if the test left transactions open
    /// (they are rolled back anyway) or closed the test savepoint itself.
    /// In the latter case the class transaction is gone too, so the class
    /// fixtures are invalidated and the next setup reloads them.
    pub async fn teardown(mut self) -> Result<(), SeedError> {
        let active = self.active.clone();
        self.deactivate_seeds(&active);
        self.local_fixtures.clear();

        let Some(savepoint) = self.savepoint.take() else {
            return Err(SeedError::discipline(self.depth_before + 1, self.depth_before));
        };
        let expected = savepoint.depth();
        let conn = &mut self.lifecycle.conn;
        let actual = conn.open_transactions();

        if actual < expected {
            error!(expected, actual, "Test closed its own savepoint");
            self.lifecycle.discard_class_state().await;
            return Err(SeedError::discipline(expected, actual));
        }

        let discarded = match conn.rollback_to_savepoint(savepoint).await {
            Ok(discarded) => discarded,
            Err(err) => {
                error!(error = %err, "Test savepoint could not be rolled back");
                self.lifecycle.discard_class_state().await;
                return Err(err.into());
            }
        };
        debug!(depth = conn.open_transactions(), "Rolled back test savepoint");

        if discarded > 0 {
            error!(expected, actual, "Test left transactions open");
            return Err(SeedError::discipline(expected, actual));
        }
        let depth = conn.open_transactions();
        if depth != self.depth_before {
            self.lifecycle.discard_class_state().await;
            return Err(SeedError::discipline(self.depth_before, depth));
        }

        Ok(())
    }
}

impl Drop for TestContext<'_> {
    fn drop(&mut self) {
        if let Some(savepoint) = &self.savepoint {
            warn!(
                savepoint = savepoint.name(),
                "Test context dropped without teardown; the next setup will fail"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bag::SeedBag;
    use crate::registry::SeedFuture;
    use test_utils::{Author, TestDatabase};

    fn defaults<'a>(bag: &'a mut SeedBag, conn: &'a mut AnyConnection) -> SeedFuture<'a> {
        Box::pin(async move {
            bag.insert("default_1", Author::create(conn, "default first").await?);
            Ok(())
        })
    }

    async fn lifecycle() -> FixtureLifecycle {
        let conn = TestDatabase::in_memory().connect().await.unwrap();
        FixtureLifecycle::new(conn, SeedRegistry::new().seeds(SeedSetName::Default, defaults))
            .with_model::<Author>()
    }

    #[tokio::test]
    async fn test_setup_loads_once_and_keeps_baseline() {
        let mut lifecycle = lifecycle().await;

        let ctx = lifecycle.setup().await.unwrap();
        assert_eq!(ctx.depth_before, 1);
        assert!(ctx.is_seeded("default_1"));
        ctx.teardown().await.unwrap();

        assert!(lifecycle.is_loaded());
        assert_eq!(lifecycle.open_transactions(), 1);
        assert_eq!(lifecycle.registry().lookup(SeedSetName::Default).len(), 1);

        let ctx = lifecycle.setup().await.unwrap();
        ctx.teardown().await.unwrap();
        assert_eq!(Author::count(lifecycle.connection()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_rolls_back_class_state() {
        let mut lifecycle = lifecycle().await;
        lifecycle.load_fixtures().await.unwrap();

        lifecycle.invalidate().await.unwrap();

        assert!(!lifecycle.is_loaded());
        assert!(lifecycle.fixtures().is_empty());
        assert!(!lifecycle.registry().is_loaded());
        assert_eq!(lifecycle.open_transactions(), 0);
        assert_eq!(Author::count(lifecycle.connection()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dropped_context_fails_next_setup_then_recovers() {
        let mut lifecycle = lifecycle().await;

        let ctx = lifecycle.setup().await.unwrap();
        drop(ctx);
        assert_eq!(lifecycle.open_transactions(), 2);

        let err = lifecycle.setup().await.unwrap_err();
        assert!(matches!(
            err,
            SeedError::TransactionDisciplineViolation { expected: 1, actual: 2 }
        ));
        assert!(!lifecycle.is_loaded());

        let ctx = lifecycle.setup().await.unwrap();
        assert!(ctx.is_seeded("default_1"));
        ctx.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_fixture_type_mismatch() {
        #[allow(dead_code)]
        #[derive(Debug, sqlx::FromRow)]
        struct Pseudonym {
            id: i64,
            name: String,
        }

        impl Entity for Pseudonym {
            const TABLE_NAME: &'static str = "authors";

            fn id(&self) -> Option<i64> {
                Some(self.id)
            }
        }

        let mut lifecycle = lifecycle().await;
        let mut ctx = lifecycle.setup().await.unwrap();

        let err = ctx.fixture::<Pseudonym>("authors", "default_1").await.unwrap_err();
        assert!(matches!(err, SeedError::FixtureTypeMismatch { .. }), "{err}");

        let author = ctx.fixture::<Author>("authors", "default_1").await.unwrap();
        assert_eq!(author.name, "default first");
        ctx.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_set_seed_fixture_rejects_class_fixture_names() {
        let mut lifecycle = lifecycle().await;
        let mut ctx = lifecycle.setup().await.unwrap();

        let author = Author::create(ctx.connection(), "impostor").await.unwrap();
        let err = ctx.set_seed_fixture("default_1", author).unwrap_err();

        assert!(matches!(err, SeedError::DuplicateFixture { .. }));
        ctx.teardown().await.unwrap();
    }
}
