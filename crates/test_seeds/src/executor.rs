//! Seed executor
//!
//! Runs every registered seed body once per suite, inside one nested
//! transaction, and turns each introduced attribute into a named fixture.

use infra_db::TransactionalConnection;
use tracing::{debug, info, warn};

use crate::bag::SeedBag;
use crate::bridge;
use crate::cache::FixtureCache;
use crate::diff::diff;
use crate::error::SeedError;
use crate::registry::{SeedDefinition, SeedEntry, SeedRegistry};

pub struct SeedExecutor<'c> {
    conn: &'c mut TransactionalConnection,
}

impl<'c> SeedExecutor<'c> {
    pub fn new(conn: &'c mut TransactionalConnection) -> Self {
        Self { conn }
    }

    /// Runs all seed definitions and records their entries in `registry`
    ///
    /// The whole run happens in a `requires_new` transaction: it is released
    /// into the enclosing transaction on success and rolled back on the first
    /// error, which is then returned unchanged. Does nothing if the registry
    /// already holds entries from an earlier run.
    ///
    /// # Returns
    ///
    /// The number of seed entries recorded.
    pub async fn run_all(
        &mut self,
        registry: &mut SeedRegistry,
        cache: &mut FixtureCache,
    ) -> Result<usize, SeedError> {
        if registry.is_loaded() {
            debug!("Seeds already loaded for this suite");
            return Ok(0);
        }

        let handle = self.conn.begin_transaction(true).await?;
        let outcome = self.plant(registry.definitions(), cache).await;

        match outcome {
            Ok(entries) => {
                self.conn.commit_transaction(handle).await?;
                let count = entries.len();
                registry.complete_load(entries);
                info!(
                    seeds = count,
                    sets = registry.set_names().len(),
                    "Loaded seed fixtures"
                );
                Ok(count)
            }
            Err(err) => {
                if let Err(cleanup) = self.conn.rollback_transaction(handle).await {
                    warn!(error = %cleanup, "Failed to roll back seed transaction");
                }
                Err(err)
            }
        }
    }

    async fn plant(
        &mut self,
        definitions: &[SeedDefinition],
        cache: &mut FixtureCache,
    ) -> Result<Vec<SeedEntry>, SeedError> {
        let mut bag = SeedBag::new();
        let mut entries = Vec::new();

        for definition in definitions {
            let introduced = diff(&mut bag, self.conn.connection(), definition.body()).await?;

            for key in introduced {
                // Seeds are reached by name from here on; drop the live value.
                let value = bag.clear(&key).ok_or_else(|| SeedError::InvalidSeedValue {
                    key: key.clone(),
                    found: "an empty value".to_string(),
                })?;
                let accessor = bridge::bind(cache, definition.set_name(), &key, &value)?;

                entries.push(SeedEntry {
                    set_name: definition.set_name().clone(),
                    attribute_key: key,
                    accessor,
                });
            }
        }

        Ok(entries)
    }
}
