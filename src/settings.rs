use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

const CONFIG_FILE: &str = "course_pipeline";
const ENV_PREFIX: &str = "COURSES";

/// Store location and default names. Layered: defaults, then
/// `course_pipeline.toml` if present, then `COURSES_*` environment variables.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Settings {
    pub store_uri: String,
    pub store_database: String,
    pub store_collection: String,
    pub store_stats_collection: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            store_uri: "sqlite://data".to_string(),
            store_database: "syllabus".to_string(),
            store_collection: "courses".to_string(),
            store_stats_collection: "stats".to_string(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        Self::from_builder(
            Config::builder()
                .add_source(File::with_name(CONFIG_FILE).required(false))
                .add_source(Environment::with_prefix(ENV_PREFIX)),
        )
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        let d = Settings::default();
        builder
            .set_default("store_uri", d.store_uri)?
            .set_default("store_database", d.store_database)?
            .set_default("store_collection", d.store_collection)?
            .set_default("store_stats_collection", d.store_stats_collection)?
            .build()
            .context("Failed to read settings")?
            .try_deserialize()
            .context("Invalid settings")
    }
}

/// Per-run database/collection choice. Empty means "use the configured default".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOverrides {
    pub database: String,
    pub collection: String,
}

impl RunOverrides {
    pub fn new(database: Option<&str>, collection: Option<&str>) -> Self {
        RunOverrides {
            database: database.unwrap_or_default().to_string(),
            collection: collection.unwrap_or_default().to_string(),
        }
    }
}
