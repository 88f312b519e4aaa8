//! Seed set activation
//!
//! Activating a set re-fetches every entity it seeded and exposes it on the
//! running test under its attribute name. Deactivating clears those names.

use tracing::debug;

use crate::bag::symbolic_name;
use crate::error::SeedError;
use crate::lifecycle::TestContext;
use crate::registry::SeedSetName;

impl TestContext<'_> {
    /// Makes the named seed sets visible to the test
    ///
    /// Every entity is re-queried, so it reflects the database as the test
    /// sees it now. Names that were never registered are skipped. A set whose
    /// re-fetch fails exposes none of its attributes and stays inactive.
    ///
    /// # Errors
    ///
    /// Database errors from re-fetching, or `FixtureNotFound` if a seeded
    /// fixture is missing from the class fixtures.
    pub async fn activate_seeds<N>(&mut self, names: &[N]) -> Result<(), SeedError>
    where
        N: Clone + Into<SeedSetName>,
    {
        for name in names {
            let name: SeedSetName = name.clone().into();
            let lifecycle = &mut *self.lifecycle;

            if !lifecycle.registry.is_registered(&name) {
                debug!(set = %name, "Skipping unregistered seed set");
                continue;
            }

            let entries = lifecycle.registry.lookup(&name).to_vec();
            let mut fetched = Vec::with_capacity(entries.len());
            for entry in &entries {
                let accessor = &entry.accessor;
                let descriptor = lifecycle
                    .state
                    .cache
                    .get(&accessor.table_name, &accessor.symbolic_name)
                    .cloned()
                    .ok_or_else(|| {
                        SeedError::not_found(accessor.table_name.clone(), accessor.symbolic_name.clone())
                    })?;

                let entity = descriptor.resolve(lifecycle.conn.connection(), accessor).await?;
                fetched.push((symbolic_name(&entry.attribute_key).to_string(), entity));
            }

            // A set becomes visible only once every entity in it resolved
            for (key, entity) in fetched {
                self.attributes.insert(key, Some(entity));
            }

            debug!(set = %name, seeds = entries.len(), "Activated seed set");
            if !self.active.contains(&name) {
                self.active.push(name);
            }
        }
        Ok(())
    }

    /// Clears every attribute of the named sets and marks them inactive
    pub fn deactivate_seeds<N>(&mut self, names: &[N])
    where
        N: Clone + Into<SeedSetName>,
    {
        for name in names {
            let name: SeedSetName = name.clone().into();
            for entry in self.lifecycle.registry.lookup(&name) {
                self.attributes
                    .insert(symbolic_name(&entry.attribute_key).to_string(), None);
            }
            self.active.retain(|active| active != &name);
            debug!(set = %name, "Deactivated seed set");
        }
    }
}
