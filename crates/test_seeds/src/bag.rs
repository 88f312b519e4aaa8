//! Seed bag
//!
//! A seed body writes every object it creates into a `SeedBag` under a
//! logical name. The bag is the context the body runs against: names added
//! by a body are what the executor turns into fixtures.

use std::any::{type_name, Any};
use std::collections::HashSet;
use std::fmt;

use infra_db::{DynEntity, Entity};

/// Marker prefix for scratch attributes that never become seeds
pub const INTERNAL_PREFIX: char = '_';

/// Returns true if the attribute is scratch state rather than a seed
pub fn is_internal(key: &str) -> bool {
    symbolic_name(key).starts_with(INTERNAL_PREFIX)
}

/// Fixture name for an attribute key, without its leading `@` sigil
pub fn symbolic_name(key: &str) -> &str {
    key.strip_prefix('@').unwrap_or(key)
}

/// A value written into a seed bag
pub enum SeedValue {
    /// A mapped entity
    Entity(Box<dyn DynEntity>),
    /// Anything else, e.g. helper state kept under a scratch name
    Plain {
        type_name: &'static str,
        value: Box<dyn Any + Send + Sync>,
    },
}

impl SeedValue {
    pub fn entity<E: Entity>(entity: E) -> Self {
        SeedValue::Entity(Box::new(entity))
    }

    pub fn plain<T: Any + Send + Sync>(value: T) -> Self {
        SeedValue::Plain {
            type_name: type_name::<T>(),
            value: Box::new(value),
        }
    }

    pub fn as_entity(&self) -> Option<&dyn DynEntity> {
        match self {
            SeedValue::Entity(entity) => Some(entity.as_ref()),
            SeedValue::Plain { .. } => None,
        }
    }

    /// Rust type name of the value, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            SeedValue::Entity(entity) => entity.model_class().type_name(),
            SeedValue::Plain { type_name, .. } => *type_name,
        }
    }
}

impl<E: Entity> From<E> for SeedValue {
    fn from(entity: E) -> Self {
        SeedValue::entity(entity)
    }
}

impl fmt::Debug for SeedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeedValue::Entity(entity) => f.debug_tuple("Entity").field(entity).finish(),
            SeedValue::Plain { type_name, .. } => f.debug_tuple("Plain").field(type_name).finish(),
        }
    }
}

/// Names present in a bag at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BagSnapshot(HashSet<String>);

/// Insertion-ordered attributes written by seed bodies
///
/// Clearing an attribute keeps its name with an empty value.
#[derive(Debug, Default)]
pub struct SeedBag {
    slots: Vec<(String, Option<SeedValue>)>,
}

impl SeedBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an attribute, replacing its value in place if the name exists
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<SeedValue>) {
        let key = key.into();
        let value = Some(value.into());
        match self.slots.iter_mut().find(|(name, _)| *name == key) {
            Some(slot) => slot.1 = value,
            None => self.slots.push((key, value)),
        }
    }

    /// Sets an attribute to a value that is not an entity
    pub fn stash<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.insert(key, SeedValue::plain(value));
    }

    pub fn get_value(&self, key: &str) -> Option<&SeedValue> {
        self.slots
            .iter()
            .find(|(name, _)| name == key)
            .and_then(|(_, value)| value.as_ref())
    }

    pub fn get<E: Entity>(&self, key: &str) -> Option<&E> {
        self.get_value(key)?.as_entity()?.downcast_ref::<E>()
    }

    pub fn get_plain<T: Any>(&self, key: &str) -> Option<&T> {
        match self.get_value(key)? {
            SeedValue::Plain { value, .. } => value.downcast_ref::<T>(),
            SeedValue::Entity(_) => None,
        }
    }

    /// True if the name is present, even with an empty value
    pub fn contains_key(&self, key: &str) -> bool {
        self.slots.iter().any(|(name, _)| name == key)
    }

    /// Empties an attribute, returning its previous value
    pub fn clear(&mut self, key: &str) -> Option<SeedValue> {
        self.slots
            .iter_mut()
            .find(|(name, _)| name == key)
            .and_then(|(_, value)| value.take())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn snapshot(&self) -> BagSnapshot {
        BagSnapshot(self.keys().map(str::to_string).collect())
    }

    /// Names added since `before`, in insertion order, scratch names excluded
    pub fn introduced_since(&self, before: &BagSnapshot) -> Vec<String> {
        self.keys()
            .filter(|key| !before.0.contains(*key) && !is_internal(key))
            .map(str::to_string)
            .collect()
    }
}
