//! Base fixture loader
//!
//! Loads file-based fixtures into the database and describes them in a
//! `FixtureCache`. Fixture documents are JSON objects mapping a label to the
//! row's columns:
//!
//! ```json
//! {
//!   "actual_fixture": { "name": "Bob Dole" }
//! }
//! ```
//!
//! Each table is emptied before its rows are inserted. Rows are inserted on
//! the connection as given, so inside a transaction they disappear with it.

use std::path::PathBuf;

use async_trait::async_trait;
use infra_db::{ModelClass, ModelRegistry};
use serde_json::{Map, Value};
use sqlx::{Any, AnyConnection};
use tracing::{debug, info};

use crate::cache::{FixtureAccessor, FixtureCache, FixtureDescriptor};
use crate::error::SeedError;

/// Source of named, file-based fixtures
#[async_trait]
pub trait FixtureLoader: Send + Sync {
    /// Inserts the fixtures and returns `table -> name -> descriptor`
    async fn load_named_fixtures(
        &self,
        conn: &mut AnyConnection,
        models: &ModelRegistry,
    ) -> Result<FixtureCache, SeedError>;
}

/// Loads nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyFixtureLoader;

#[async_trait]
impl FixtureLoader for EmptyFixtureLoader {
    async fn load_named_fixtures(
        &self,
        _conn: &mut AnyConnection,
        _models: &ModelRegistry,
    ) -> Result<FixtureCache, SeedError> {
        Ok(FixtureCache::new())
    }
}

#[derive(Debug, Clone)]
enum FixtureSource {
    Directory {
        path: PathBuf,
        tables: Option<Vec<String>>,
    },
    Inline(Vec<(String, Value)>),
}

/// Loads `{label: {column: value}}` JSON documents, one per table
#[derive(Debug, Clone)]
pub struct JsonFixtureLoader {
    source: FixtureSource,
}

impl JsonFixtureLoader {
    /// Reads `<path>/<table>.json`; every `.json` file unless `tables` narrows it
    ///
    /// A missing directory loads nothing.
    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self {
            source: FixtureSource::Directory {
                path: path.into(),
                tables: None,
            },
        }
    }

    /// Limits a directory loader to the given tables, loaded in that order
    pub fn tables<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let FixtureSource::Directory { tables, .. } = &mut self.source {
            *tables = Some(names.into_iter().map(Into::into).collect());
        }
        self
    }

    /// A loader for documents supplied in code
    pub fn inline() -> Self {
        Self {
            source: FixtureSource::Inline(Vec::new()),
        }
    }

    /// Adds a document to an inline loader
    pub fn document(mut self, table: impl Into<String>, document: Value) -> Self {
        if let FixtureSource::Inline(documents) = &mut self.source {
            documents.push((table.into(), document));
        }
        self
    }

    async fn documents(&self) -> Result<Vec<(String, Value)>, SeedError> {
        let (path, tables) = match &self.source {
            FixtureSource::Inline(documents) => return Ok(documents.clone()),
            FixtureSource::Directory { path, tables } => (path, tables),
        };

        let tables = match tables {
            Some(tables) => tables.clone(),
            None => {
                let mut found = Vec::new();
                let mut entries = match tokio::fs::read_dir(path).await {
                    Ok(entries) => entries,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        debug!(path = %path.display(), "No fixture directory");
                        return Ok(Vec::new());
                    }
                    Err(e) => {
                        return Err(SeedError::FixtureFile(format!("{}: {}", path.display(), e)))
                    }
                };
                while let Some(entry) = entries
                    .next_entry()
                    .await
                    .map_err(|e| SeedError::FixtureFile(format!("{}: {}", path.display(), e)))?
                {
                    let file = entry.path();
                    if file.extension().is_some_and(|ext| ext == "json") {
                        if let Some(stem) = file.file_stem().and_then(|s| s.to_str()) {
                            found.push(stem.to_string());
                        }
                    }
                }
                found.sort();
                found
            }
        };

        let mut documents = Vec::with_capacity(tables.len());
        for table in tables {
            let file = path.join(format!("{}.json", table));
            let text = tokio::fs::read_to_string(&file)
                .await
                .map_err(|e| SeedError::FixtureFile(format!("{}: {}", file.display(), e)))?;
            let document = serde_json::from_str(&text)
                .map_err(|e| SeedError::FixtureFile(format!("{}: {}", file.display(), e)))?;
            documents.push((table, document));
        }
        Ok(documents)
    }
}

#[async_trait]
impl FixtureLoader for JsonFixtureLoader {
    async fn load_named_fixtures(
        &self,
        conn: &mut AnyConnection,
        models: &ModelRegistry,
    ) -> Result<FixtureCache, SeedError> {
        let mut cache = FixtureCache::new();
        for (table, document) in self.documents().await? {
            let rows = insert_table(conn, &mut cache, &table, models.get(&table), document).await?;
            debug!(table = %table, rows, "Loaded fixture table");
        }
        info!(fixtures = cache.len(), "Loaded named fixtures");
        Ok(cache)
    }
}

fn identifier<'a>(kind: &str, name: &'a str) -> Result<&'a str, SeedError> {
    let valid = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(name)
    } else {
        Err(SeedError::FixtureFile(format!("invalid {} name '{}'", kind, name)))
    }
}

async fn insert_table(
    conn: &mut AnyConnection,
    cache: &mut FixtureCache,
    table: &str,
    model: Option<ModelClass>,
    document: Value,
) -> Result<usize, SeedError> {
    let table = identifier("table", table)?;
    let rows = match document {
        Value::Object(rows) => rows,
        _ => {
            return Err(SeedError::FixtureFile(format!(
                "{}: expected an object of labelled rows",
                table
            )))
        }
    };
    let primary_key = model.map_or("id", |m| m.primary_key());

    let delete = format!("DELETE FROM {}", table);
    sqlx::query(&delete).execute(&mut *conn).await?;

    let count = rows.len();
    for (label, row) in rows {
        let Value::Object(columns) = row else {
            return Err(SeedError::FixtureFile(format!(
                "{}.{}: expected an object of columns",
                table, label
            )));
        };
        let id = insert_row(conn, table, primary_key, &columns).await?;
        cache.insert(&FixtureAccessor::new(table, label), FixtureDescriptor::new(id, model))?;
    }
    Ok(count)
}

async fn insert_row(
    conn: &mut AnyConnection,
    table: &str,
    primary_key: &str,
    columns: &Map<String, Value>,
) -> Result<i64, SeedError> {
    let sql = if columns.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", table, primary_key)
    } else {
        let names = columns
            .keys()
            .map(|column| identifier("column", column))
            .collect::<Result<Vec<_>, _>>()?;
        let params: Vec<String> = (1..=names.len()).map(|i| format!("${}", i)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            table,
            names.join(", "),
            params.join(", "),
            primary_key
        )
    };

    let mut query = sqlx::query_scalar::<Any, i64>(&sql);
    for value in columns.values() {
        query = match value {
            Value::Null => query.bind(None::<String>),
            Value::Bool(flag) => query.bind(*flag),
            Value::Number(number) => match number.as_i64() {
                Some(int) => query.bind(int),
                None => query.bind(number.as_f64().unwrap_or_default()),
            },
            Value::String(text) => query.bind(text.clone()),
            nested => query.bind(nested.to_string()),
        };
    }

    Ok(query.fetch_one(&mut *conn).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_utils::{Author, TestDatabase};

    fn fixture_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
    }

    #[tokio::test]
    async fn test_inline_documents_are_inserted_and_described() {
        let mut conn = TestDatabase::in_memory().connect().await.unwrap();
        let models = ModelRegistry::new().with::<Author>();
        let loader = JsonFixtureLoader::inline()
            .document("authors", json!({ "actual_fixture": { "name": "Bob Dole" } }))
            .document("tags", json!({ "rust": { "label": "rust" } }));

        let cache = loader
            .load_named_fixtures(conn.connection(), &models)
            .await
            .unwrap();

        assert_eq!(cache.len(), 2);
        let descriptor = cache.get("authors", "actual_fixture").unwrap();
        assert_eq!(descriptor.model, Some(ModelClass::of::<Author>()));
        assert!(cache.get("tags", "rust").unwrap().model.is_none());

        let accessor = FixtureAccessor::new("authors", "actual_fixture");
        let author = descriptor.resolve(conn.connection(), &accessor).await.unwrap();
        assert_eq!(author.downcast::<Author>().map(|a| a.name), Some("Bob Dole".to_string()));
    }

    #[tokio::test]
    async fn test_existing_rows_are_replaced() {
        let mut conn = TestDatabase::in_memory().connect().await.unwrap();
        Author::create(conn.connection(), "Stale").await.unwrap();
        let loader = JsonFixtureLoader::inline()
            .document("authors", json!({ "fresh": { "name": "Fresh" } }));

        loader
            .load_named_fixtures(conn.connection(), &ModelRegistry::new())
            .await
            .unwrap();

        assert_eq!(Author::count(conn.connection()).await.unwrap(), 1);
        assert!(Author::find_by_name(conn.connection(), "Stale").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_directory_loads_every_json_file() {
        let mut conn = TestDatabase::in_memory().connect().await.unwrap();
        let models = ModelRegistry::new().with::<Author>();

        let cache = JsonFixtureLoader::directory(fixture_dir())
            .load_named_fixtures(conn.connection(), &models)
            .await
            .unwrap();

        assert_eq!(cache.names("authors"), vec!["actual_fixture", "second_fixture"]);
        assert_eq!(cache.names("tags"), vec!["rust"]);
    }

    #[tokio::test]
    async fn test_directory_restricted_to_tables() {
        let mut conn = TestDatabase::in_memory().connect().await.unwrap();

        let cache = JsonFixtureLoader::directory(fixture_dir())
            .tables(["tags"])
            .load_named_fixtures(conn.connection(), &ModelRegistry::new())
            .await
            .unwrap();

        assert_eq!(cache.len(), 1);
        assert!(cache.names("authors").is_empty());
    }

    #[tokio::test]
    async fn test_malformed_documents_are_rejected() {
        let mut conn = TestDatabase::in_memory().connect().await.unwrap();
        let models = ModelRegistry::new();

        let not_rows = JsonFixtureLoader::inline().document("authors", json!(["Bob"]));
        let err = not_rows.load_named_fixtures(conn.connection(), &models).await.unwrap_err();
        assert!(matches!(err, SeedError::FixtureFile(_)));

        let bad_column = JsonFixtureLoader::inline()
            .document("authors", json!({ "x": { "name; DROP": "Bob" } }));
        let err = bad_column.load_named_fixtures(conn.connection(), &models).await.unwrap_err();
        assert!(matches!(err, SeedError::FixtureFile(ref msg) if msg.contains("column")));

        let missing = JsonFixtureLoader::directory(fixture_dir()).tables(["missing"]);
        let err = missing.load_named_fixtures(conn.connection(), &models).await.unwrap_err();
        assert!(matches!(err, SeedError::FixtureFile(_)));
    }

    #[tokio::test]
    async fn test_missing_directory_loads_nothing() {
        let mut conn = TestDatabase::in_memory().connect().await.unwrap();
        let cache = JsonFixtureLoader::directory(fixture_dir().join("nowhere"))
            .load_named_fixtures(conn.connection(), &ModelRegistry::new())
            .await
            .unwrap();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_empty_loader() {
        let mut conn = TestDatabase::in_memory().connect().await.unwrap();
        let cache = EmptyFixtureLoader
            .load_named_fixtures(conn.connection(), &ModelRegistry::new())
            .await
            .unwrap();
        assert!(cache.is_empty());
    }
}
