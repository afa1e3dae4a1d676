use std::env;
use std::path::{Path, PathBuf};

use tidesync_core::config::ENV_APP_ID;
use tidesync_core::sync::ValueCodec;
use tidesync_core::{LocalStore, Schema, StoreOptions, SyncSettings};

use crate::error::CliError;

const APP_DIR: &str = "tidesync";
const ENV_DB_PATH: &str = "TIDESYNC_DB_PATH";

/// Files the CLI reads, after flags, environment and defaults are applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliPaths {
    pub db_path: PathBuf,
    pub config_path: PathBuf,
    pub schema_path: PathBuf,
}

impl CliPaths {
    pub fn resolve(
        db_path: Option<PathBuf>,
        config_path: Option<PathBuf>,
        schema_path: Option<PathBuf>,
    ) -> Result<Self, CliError> {
        let db_path = match db_path.or_else(|| env::var_os(ENV_DB_PATH).map(PathBuf::from)) {
            Some(path) => path,
            None => default_db_path()?,
        };
        let config_path = match config_path {
            Some(path) => path,
            None => default_config_dir()?.join("settings.json"),
        };
        let schema_path = match schema_path {
            Some(path) => path,
            None => default_config_dir()?.join("schema.json"),
        };

        Ok(Self {
            db_path,
            config_path,
            schema_path,
        })
    }
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR).join("tidesync.db"))
        .ok_or_else(|| CliError::Config("failed to resolve data directory".to_string()))
}

pub fn default_config_dir() -> Result<PathBuf, CliError> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR))
        .ok_or_else(|| CliError::Config("failed to resolve config directory".to_string()))
}

/// Settings from the settings file when present, otherwise from the environment
pub fn load_settings(config_path: &Path) -> Result<SyncSettings, CliError> {
    if config_path.exists() {
        return Ok(SyncSettings::load_from_path(config_path)?);
    }
    if env::var_os(ENV_APP_ID).is_none() {
        return Err(CliError::SyncNotConfigured);
    }
    Ok(SyncSettings::from_env()?)
}

/// Schema file when present; an empty schema defers every inbound field
pub fn load_schema(schema_path: &Path) -> Result<Schema, CliError> {
    if schema_path.exists() {
        Ok(Schema::load_from_path(schema_path)?)
    } else {
        tracing::debug!(
            "No schema at {}, inbound fields will be deferred",
            schema_path.display()
        );
        Ok(Schema::default())
    }
}

pub struct CliContext {
    pub settings: SyncSettings,
    pub store: LocalStore,
}

pub fn open_context(paths: &CliPaths) -> Result<CliContext, CliError> {
    let settings = load_settings(&paths.config_path)?;
    let schema = load_schema(&paths.schema_path)?;
    let store = LocalStore::open_path(
        &paths.db_path,
        schema,
        ValueCodec::new(settings.cipher()),
        StoreOptions {
            auto_subscribe_groups: settings.auto_subscribe_groups,
        },
    )?;

    Ok(CliContext { settings, store })
}

pub fn normalize_group_name(name: &str) -> Result<String, CliError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CliError::EmptyGroupName);
    }
    Ok(trimmed.to_string())
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    if timestamp_ms <= 0 {
        return "never".to_string();
    }
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |datetime| datetime.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}
