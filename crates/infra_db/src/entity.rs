//! Entity metadata
//!
//! `Entity` is the mapped persistence base type: a row type that knows its
//! table, its primary key column and whether it has been persisted.
//! `DynEntity` is its object-safe counterpart, used wherever entities of
//! different types are stored side by side. `ModelClass` captures the class
//! metadata of one entity type together with an exclusive-scope finder, so a
//! row can be re-fetched later knowing only its table and primary key.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use sqlx::any::AnyRow;
use sqlx::{AnyConnection, FromRow};

use crate::error::DatabaseError;
use crate::repository::find_unscoped;

/// A row type mapped to a database table
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
/// pub struct Author {
///     pub id: i64,
///     pub name: String,
/// }
///
/// impl Entity for Author {
///     const TABLE_NAME: &'static str = "authors";
///
///     fn id(&self) -> Option<i64> {
///         Some(self.id)
///     }
/// }
/// ```
pub trait Entity: for<'r> FromRow<'r, AnyRow> + fmt::Debug + Send + Sync + Unpin + 'static {
    /// Table the entity is stored in
    const TABLE_NAME: &'static str;

    /// Primary key column
    const PRIMARY_KEY: &'static str = "id";

    /// Primary key value, or `None` if the entity has not been persisted
    fn id(&self) -> Option<i64>;

    /// SQL predicate applied to every scoped query on this table
    ///
    /// Exclusive-scope lookups ignore it.
    fn default_scope() -> Option<&'static str> {
        None
    }
}

/// Object-safe view of an `Entity`
pub trait DynEntity: fmt::Debug + Send + Sync + 'static {
    fn model_class(&self) -> ModelClass;

    fn primary_key_value(&self) -> Option<i64>;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync>;
}

impl<E: Entity> DynEntity for E {
    fn model_class(&self) -> ModelClass {
        ModelClass::of::<E>()
    }

    fn primary_key_value(&self) -> Option<i64> {
        self.id()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync> {
        self
    }
}

impl dyn DynEntity {
    /// Returns true if the boxed entity is an `E`
    pub fn is<E: Entity>(&self) -> bool {
        self.as_any().is::<E>()
    }

    pub fn downcast_ref<E: Entity>(&self) -> Option<&E> {
        self.as_any().downcast_ref::<E>()
    }

    /// Unboxes the entity as an `E`, or `None` if it is another type
    pub fn downcast<E: Entity>(self: Box<Self>) -> Option<E> {
        self.into_any().downcast::<E>().ok().map(|entity| *entity)
    }
}

/// Future returned by a model class finder
pub type EntityFuture<'c> =
    Pin<Box<dyn Future<Output = Result<Box<dyn DynEntity>, DatabaseError>> + Send + 'c>>;

type Finder = for<'c> fn(&'c mut AnyConnection, i64) -> EntityFuture<'c>;

fn find_erased<E: Entity>(conn: &mut AnyConnection, id: i64) -> EntityFuture<'_> {
    Box::pin(async move {
        let entity: E = find_unscoped(conn, id).await?;
        Ok(Box::new(entity) as Box<dyn DynEntity>)
    })
}

/// Class metadata of one entity type
#[derive(Clone, Copy)]
pub struct ModelClass {
    type_id: TypeId,
    type_name: &'static str,
    table_name: &'static str,
    primary_key: &'static str,
    finder: Finder,
}

impl ModelClass {
    pub fn of<E: Entity>() -> Self {
        Self {
            type_id: TypeId::of::<E>(),
            type_name: std::any::type_name::<E>(),
            table_name: E::TABLE_NAME,
            primary_key: E::PRIMARY_KEY,
            finder: find_erased::<E>,
        }
    }

    /// Fully qualified Rust type name of the entity
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn table_name(&self) -> &'static str {
        self.table_name
    }

    pub fn primary_key(&self) -> &'static str {
        self.primary_key
    }

    /// Returns true if this class describes `E`
    pub fn is<E: Entity>(&self) -> bool {
        self.type_id == TypeId::of::<E>()
    }

    /// Fetches a row by primary key, ignoring the default scope
    pub async fn find_unscoped(
        &self,
        conn: &mut AnyConnection,
        id: i64,
    ) -> Result<Box<dyn DynEntity>, DatabaseError> {
        (self.finder)(conn, id).await
    }
}

impl fmt::Debug for ModelClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelClass")
            .field("type_name", &self.type_name)
            .field("table_name", &self.table_name)
            .field("primary_key", &self.primary_key)
            .finish()
    }
}

impl PartialEq for ModelClass {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for ModelClass {}

/// Maps table names to the entity classes stored in them
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: HashMap<&'static str, ModelClass>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `E` for its table, replacing any class registered earlier
    pub fn register<E: Entity>(&mut self) -> &mut Self {
        self.models.insert(E::TABLE_NAME, ModelClass::of::<E>());
        self
    }

    /// Builder form of `register`
    pub fn with<E: Entity>(mut self) -> Self {
        self.register::<E>();
        self
    }

    pub fn get(&self, table_name: &str) -> Option<ModelClass> {
        self.models.get(table_name).copied()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
