use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Environment variables with this prefix override file settings,
/// e.g. `TPSTORE_DATABASE_URL`.
pub const ENV_PREFIX: &str = "TPSTORE";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StoreConfig {
    pub database_url: String,
    /// Identity recorded as `leased_by` on every lease this process takes.
    pub lease_holder: String,
    pub lease_duration_ms: u64,
    /// Rows fetched per round trip while streaming `find_all` results.
    pub page_size: usize,
    pub max_connections: u32,
}

impl StoreConfig {
    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_duration_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://transfer-process.db?mode=rwc".to_string(),
            lease_holder: default_holder(),
            lease_duration_ms: 60_000,
            page_size: 50,
            max_connections: 5,
        }
    }
}

fn default_holder() -> String {
    format!("tpstore-{}", std::process::id())
}

/// Loads configuration from defaults, then `path` if given, then the
/// environment.
pub fn load_config(path: Option<&Path>) -> Result<StoreConfig, config::ConfigError> {
    let defaults = StoreConfig::default();
    let mut builder = Config::builder()
        .set_default("database_url", defaults.database_url)?
        .set_default("lease_holder", defaults.lease_holder)?
        .set_default("lease_duration_ms", defaults.lease_duration_ms)?
        .set_default("page_size", defaults.page_size as u64)?
        .set_default("max_connections", defaults.max_connections as u64)?;

    if let Some(path) = path {
        builder = builder.add_source(File::from(path));
    }

    builder
        .add_source(Environment::with_prefix(ENV_PREFIX))
        .build()?
        .try_deserialize()
}
