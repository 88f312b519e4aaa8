//! Suite configuration

use std::path::PathBuf;
use std::time::Duration;

use infra_db::DatabaseConfig;
use serde::Deserialize;

use crate::error::SeedError;

/// Settings for a fixture lifecycle
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SeedConfig {
    /// Database URL
    pub database_url: String,
    /// Directory holding `<table>.json` fixture files
    pub fixture_path: PathBuf,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Log level for suites that install a subscriber
    pub log_level: String,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            fixture_path: PathBuf::from("tests/fixtures"),
            connect_timeout_secs: 30,
            log_level: "warn".to_string(),
        }
    }
}

impl SeedConfig {
    /// Loads configuration from `TEST_SEEDS_*` environment variables
    ///
    /// A `.env` file is read first if present; unset keys keep their defaults.
    pub fn from_env() -> Result<Self, SeedError> {
        dotenvy::dotenv().ok();
        Self::from_source(config::Environment::with_prefix("TEST_SEEDS"))
    }

    fn from_source<S>(source: S) -> Result<Self, SeedError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let defaults = Self::default();
        let config = config::Config::builder()
            .set_default("database_url", defaults.database_url)?
            .set_default("fixture_path", defaults.fixture_path.to_string_lossy().into_owned())?
            .set_default("connect_timeout_secs", defaults.connect_timeout_secs)?
            .set_default("log_level", defaults.log_level)?
            .add_source(source)
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    pub fn database_config(&self) -> DatabaseConfig {
        DatabaseConfig::new(self.database_url.clone())
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
    }
}
