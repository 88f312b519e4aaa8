//! Seed callback registry
//!
//! One `SeedRegistry` belongs to each test suite. Seed definitions are
//! registered while the suite is being declared and never change afterwards;
//! the entries produced by running them are recorded here by the executor and
//! live until the suite's fixture cache is invalidated.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use sqlx::AnyConnection;

use crate::bag::SeedBag;
use crate::cache::FixtureAccessor;
use crate::error::SeedError;

/// Future returned by a seed body
pub type SeedFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SeedError>> + Send + 'a>>;

/// A seed body: creates rows on the connection and names them in the bag
pub type SeedBody =
    Arc<dyn for<'a> Fn(&'a mut SeedBag, &'a mut AnyConnection) -> SeedFuture<'a> + Send + Sync>;

/// Name of a seed set
///
/// The unnamed set is the default set, activated for every test. The string
/// `"default"` names it too.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SeedSetName {
    Default,
    Named(String),
}

impl SeedSetName {
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        if name == "default" {
            SeedSetName::Default
        } else {
            SeedSetName::Named(name)
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, SeedSetName::Default)
    }

    pub fn as_str(&self) -> &str {
        match self {
            SeedSetName::Default => "default",
            SeedSetName::Named(name) => name,
        }
    }
}

impl From<&str> for SeedSetName {
    fn from(name: &str) -> Self {
        SeedSetName::named(name)
    }
}

impl From<String> for SeedSetName {
    fn from(name: String) -> Self {
        SeedSetName::named(name)
    }
}

impl From<&SeedSetName> for SeedSetName {
    fn from(name: &SeedSetName) -> Self {
        name.clone()
    }
}

impl From<Option<&str>> for SeedSetName {
    fn from(name: Option<&str>) -> Self {
        name.map_or(SeedSetName::Default, SeedSetName::named)
    }
}

impl fmt::Display for SeedSetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered seed body and the set it belongs to
#[derive(Clone)]
pub struct SeedDefinition {
    set_name: SeedSetName,
    body: SeedBody,
}

impl SeedDefinition {
    pub fn set_name(&self) -> &SeedSetName {
        &self.set_name
    }

    pub(crate) fn body(&self) -> &SeedBody {
        &self.body
    }
}

impl fmt::Debug for SeedDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeedDefinition")
            .field("set_name", &self.set_name)
            .finish_non_exhaustive()
    }
}

/// One seeded attribute and the fixture it resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedEntry {
    pub set_name: SeedSetName,
    pub attribute_key: String,
    pub accessor: FixtureAccessor,
}

/// Seed definitions of one suite plus the entries they produced
#[derive(Debug, Default)]
pub struct SeedRegistry {
    definitions: Vec<SeedDefinition>,
    entries: HashMap<SeedSetName, Vec<SeedEntry>>,
    loaded: bool,
}

impl SeedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a seed body for a set
    ///
    /// Bodies registered under the same name all run, in registration order.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let registry = SeedRegistry::new()
    ///     .seeds(SeedSetName::Default, |bag, conn| Box::pin(async move {
    ///         bag.insert("default_1", Author::create(conn, "default first").await?);
    ///         Ok::<(), SeedError>(())
    ///     }))
    ///     .seeds("foo", |bag, conn| Box::pin(async move {
    ///         bag.insert("foo_1", Author::create(conn, "foo first").await?);
    ///         Ok::<(), SeedError>(())
    ///     }));
    /// ```
    pub fn seeds<N, F>(mut self, name: N, body: F) -> Self
    where
        N: Into<SeedSetName>,
        F: for<'a> Fn(&'a mut SeedBag, &'a mut AnyConnection) -> SeedFuture<'a> + Send + Sync + 'static,
    {
        self.register(name, body);
        self
    }

    /// In-place form of `seeds`
    pub fn register<N, F>(&mut self, name: N, body: F) -> &mut Self
    where
        N: Into<SeedSetName>,
        F: for<'a> Fn(&'a mut SeedBag, &'a mut AnyConnection) -> SeedFuture<'a> + Send + Sync + 'static,
    {
        self.definitions.push(SeedDefinition {
            set_name: name.into(),
            body: Arc::new(body),
        });
        self
    }

    pub fn definitions(&self) -> &[SeedDefinition] {
        &self.definitions
    }

    /// Distinct set names in order of first registration
    pub fn set_names(&self) -> Vec<SeedSetName> {
        let mut names: Vec<SeedSetName> = Vec::new();
        for definition in &self.definitions {
            if !names.contains(&definition.set_name) {
                names.push(definition.set_name.clone());
            }
        }
        names
    }

    pub fn is_registered(&self, name: impl Into<SeedSetName>) -> bool {
        let name = name.into();
        self.definitions.iter().any(|d| d.set_name == name)
    }

    /// Entries recorded for a set, empty if it was never registered or loaded
    pub fn lookup(&self, name: impl Into<SeedSetName>) -> &[SeedEntry] {
        self.entries
            .get(&name.into())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// True once the executor has recorded this suite's entries
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub(crate) fn complete_load(&mut self, entries: Vec<SeedEntry>) {
        self.entries.clear();
        for entry in entries {
            self.entries
                .entry(entry.set_name.clone())
                .or_default()
                .push(entry);
        }
        self.loaded = true;
    }

    /// Forgets recorded entries; definitions are kept
    pub fn reset(&mut self) {
        self.entries.clear();
        self.loaded = false;
    }
}
