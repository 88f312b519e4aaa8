//! Fixture bridge
//!
//! Turns a seeded entity into a named fixture so it can be looked up through
//! the same accessor as file-based fixtures. Only the primary key is kept;
//! the entity itself is dropped and re-fetched on every lookup.

use tracing::debug;

use crate::bag::{symbolic_name, SeedValue};
use crate::cache::{FixtureAccessor, FixtureCache, FixtureDescriptor};
use crate::error::SeedError;
use crate::registry::SeedSetName;

/// Registers `value` as the fixture `(table of value, attribute_key)`
///
/// # Errors
///
/// * `InvalidSeedValue` if `value` is not an entity or has not been persisted;
///   the cache is left untouched.
/// * `DuplicateFixture` if the accessor is already taken.
pub fn bind(
    cache: &mut FixtureCache,
    set_name: &SeedSetName,
    attribute_key: &str,
    value: &SeedValue,
) -> Result<FixtureAccessor, SeedError> {
    let invalid = |found: String| SeedError::InvalidSeedValue {
        key: attribute_key.to_string(),
        found,
    };

    let entity = value
        .as_entity()
        .ok_or_else(|| invalid(value.type_name().to_string()))?;
    let primary_key = entity
        .primary_key_value()
        .ok_or_else(|| invalid(format!("unsaved {}", value.type_name())))?;

    let class = entity.model_class();
    let accessor = FixtureAccessor::new(class.table_name(), symbolic_name(attribute_key));
    cache.insert(&accessor, FixtureDescriptor::new(primary_key, Some(class)))?;

    debug!(set = %set_name, fixture = %accessor, primary_key, "Bound seed fixture");
    Ok(accessor)
}
