//! Fixture cache
//!
//! Named fixtures, file-based or seeded, keyed by table and symbolic name.
//! A descriptor holds only the primary key; resolving it always re-fetches the
//! row with an exclusive-scope lookup.

use std::collections::HashMap;
use std::fmt;

use infra_db::{DynEntity, ModelClass};
use sqlx::AnyConnection;

use crate::error::SeedError;

/// `(table_name, symbolic_name)` pair addressing one named fixture
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FixtureAccessor {
    pub table_name: String,
    pub symbolic_name: String,
}

impl FixtureAccessor {
    pub fn new(table_name: impl Into<String>, symbolic_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            symbolic_name: symbolic_name.into(),
        }
    }
}

impl fmt::Display for FixtureAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table_name, self.symbolic_name)
    }
}

/// Minimal description of a fixture row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureDescriptor {
    pub primary_key: i64,
    pub model: Option<ModelClass>,
}

impl FixtureDescriptor {
    pub fn new(primary_key: i64, model: Option<ModelClass>) -> Self {
        Self { primary_key, model }
    }

    /// Re-fetches the row, bypassing the entity's default scope
    ///
    /// # Errors
    ///
    /// `UnboundFixtureClass` if no entity class is attached; database errors
    /// (including not found) otherwise.
    pub async fn resolve(
        &self,
        conn: &mut AnyConnection,
        accessor: &FixtureAccessor,
    ) -> Result<Box<dyn DynEntity>, SeedError> {
        let model = self.model.ok_or_else(|| SeedError::UnboundFixtureClass {
            table: accessor.table_name.clone(),
            name: accessor.symbolic_name.clone(),
        })?;

        Ok(model.find_unscoped(conn, self.primary_key).await?)
    }
}

/// `table_name -> symbolic_name -> descriptor`
#[derive(Debug, Clone, Default)]
pub struct FixtureCache {
    tables: HashMap<String, HashMap<String, FixtureDescriptor>>,
}

impl FixtureCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a fixture; an accessor that is already present is never overwritten
    ///
    /// # Errors
    ///
    /// `DuplicateFixture` if the accessor is taken.
    pub fn insert(&mut self, accessor: &FixtureAccessor, descriptor: FixtureDescriptor) -> Result<(), SeedError> {
        let table = self.tables.entry(accessor.table_name.clone()).or_default();
        if table.contains_key(&accessor.symbolic_name) {
            return Err(SeedError::duplicate(
                accessor.table_name.clone(),
                accessor.symbolic_name.clone(),
            ));
        }
        table.insert(accessor.symbolic_name.clone(), descriptor);
        Ok(())
    }

    pub fn get(&self, table_name: &str, symbolic_name: &str) -> Option<&FixtureDescriptor> {
        self.tables.get(table_name)?.get(symbolic_name)
    }

    pub fn contains(&self, accessor: &FixtureAccessor) -> bool {
        self.get(&accessor.table_name, &accessor.symbolic_name).is_some()
    }

    /// Symbolic names registered for a table
    pub fn names(&self, table_name: &str) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .tables
            .get(table_name)
            .map(|table| table.keys().map(String::as_str).collect())
            .unwrap_or_default();
        names.sort_unstable();
        names
    }

    /// Total number of fixtures across all tables
    pub fn len(&self) -> usize {
        self.tables.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.tables.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::{Author, TestDatabase};

    #[test]
    fn test_insert_never_overwrites() {
        let mut cache = FixtureCache::new();
        let accessor = FixtureAccessor::new("authors", "tolkien");

        cache.insert(&accessor, FixtureDescriptor::new(1, None)).unwrap();
        let err = cache.insert(&accessor, FixtureDescriptor::new(2, None)).unwrap_err();

        assert!(matches!(err, SeedError::DuplicateFixture { .. }));
        assert_eq!(cache.get("authors", "tolkien").map(|d| d.primary_key), Some(1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_names_are_sorted_per_table() {
        let mut cache = FixtureCache::new();
        cache.insert(&FixtureAccessor::new("authors", "b"), FixtureDescriptor::new(2, None)).unwrap();
        cache.insert(&FixtureAccessor::new("authors", "a"), FixtureDescriptor::new(1, None)).unwrap();
        cache.insert(&FixtureAccessor::new("tags", "x"), FixtureDescriptor::new(1, None)).unwrap();

        assert_eq!(cache.names("authors"), vec!["a", "b"]);
        assert!(cache.names("books").is_empty());
        assert_eq!(cache.len(), 3);
        assert!(cache.contains(&FixtureAccessor::new("tags", "x")));
    }

    #[tokio::test]
    async fn test_resolve_without_model_is_unbound() {
        let db = TestDatabase::in_memory();
        let mut conn = db.connect().await.unwrap();
        let accessor = FixtureAccessor::new("tags", "rust");

        let err = FixtureDescriptor::new(1, None)
            .resolve(conn.connection(), &accessor)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SeedError::UnboundFixtureClass { ref table, ref name } if table == "tags" && name == "rust"
        ));
    }

    #[tokio::test]
    async fn test_resolve_refetches_row() {
        let db = TestDatabase::in_memory();
        let mut conn = db.connect().await.unwrap();
        let author = Author::create(conn.connection(), "Le Guin").await.unwrap();

        let descriptor = FixtureDescriptor::new(author.id, Some(ModelClass::of::<Author>()));
        let resolved = descriptor
            .resolve(conn.connection(), &FixtureAccessor::new("authors", "le_guin"))
            .await
            .unwrap();

        assert_eq!(resolved.downcast::<Author>(), Some(author));
    }
}
