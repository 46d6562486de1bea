//! Configuration System
//!
//! Loaded once at startup, validated, then shared as an immutable
//! `Arc<SyncConfig>`. Nothing downstream reads ambient global state.
//!
//! # File formats
//!
//! `.yaml` / `.yml` → `serde_yaml`, anything else → `serde_json`.
//!
//! ```yaml
//! sources:
//!   - { name: pass, path: data/pass.db }
//!   - { name: fail, path: data/fail.db }
//! sink:
//!   kind: mysql
//!   host: 127.0.0.1
//!   database: vw
//!   username: sync
//!   password: secret
//! sync:
//!   interval_minutes: 5
//!   watermark_file: time_index.txt
//! ```

pub mod error;

pub use error::{ConfigError, ConfigResult};

use datasync_storage::{AllowedLabels, FixedFields, MySqlSinkOptions, MySqlSslMode, SourceColumns};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Label shipped as the single-label default
pub const DEFAULT_LABEL_NAME: &str = "A1C6/BC316 T";
/// Part number of the default label
pub const DEFAULT_PART_NUMBER: &str = "5QD919051T";

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Row sources, in fetch order
    pub sources: Vec<SourceConfig>,
    pub sink: SinkConfig,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub fixed_fields: FixedFields,
    /// Parameter name → variance tag
    #[serde(default)]
    pub variance: BTreeMap<String, String>,
}

/// One row source instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub name: String,
    pub path: PathBuf,
    #[serde(default = "default_source_table")]
    pub table: String,
}

fn default_source_table() -> String {
    "Data".to_string()
}

/// Sink backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkConfig {
    Mysql(MySqlConfig),
    Sqlite(SqliteSinkConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MySqlConfig {
    pub host: String,
    #[serde(default = "default_mysql_port")]
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_mysql_table")]
    pub table: String,
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
    #[serde(default = "default_connect_timeout")]
    pub connection_timeout_seconds: u64,
    #[serde(default = "default_command_timeout")]
    pub default_command_timeout_seconds: u64,
}

fn default_mysql_port() -> u16 {
    3306
}
fn default_mysql_table() -> String {
    "vw.parameters".to_string()
}
fn default_ssl_mode() -> String {
    "preferred".to_string()
}
fn default_connect_timeout() -> u64 {
    5
}
fn default_command_timeout() -> u64 {
    30
}

impl MySqlConfig {
    pub fn to_options(&self) -> MySqlSinkOptions {
        MySqlSinkOptions {
            host: self.host.clone(),
            port: self.port,
            database: self.database.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            table: self.table.clone(),
            ssl_mode: MySqlSslMode::parse_lenient(&self.ssl_mode),
            connect_timeout: Duration::from_secs(self.connection_timeout_seconds),
            command_timeout: Duration::from_secs(self.default_command_timeout_seconds),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqliteSinkConfig {
    pub path: PathBuf,
    #[serde(default = "default_sqlite_table")]
    pub table: String,
}

fn default_sqlite_table() -> String {
    "parameters".to_string()
}

/// Sync behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    pub interval_minutes: u64,
    pub watermark_file: PathBuf,
    /// Single-label filter, used when the part-number map is empty, and
    /// as the last part-number fallback
    pub label_name: String,
    /// Label → fixed part number; its keys form the allow-list, in file order
    pub part_number_by_label_name: IndexMap<String, String>,
    pub columns: SourceColumns,
}

impl Default for SyncSettings {
    fn default() -> Self {
        let mut part_numbers = IndexMap::new();
        part_numbers.insert(DEFAULT_LABEL_NAME.to_string(), DEFAULT_PART_NUMBER.to_string());
        Self {
            interval_minutes: 5,
            watermark_file: PathBuf::from("time_index.txt"),
            label_name: DEFAULT_LABEL_NAME.to_string(),
            part_number_by_label_name: part_numbers,
            columns: SourceColumns::default(),
        }
    }
}

impl SyncSettings {
    /// Allow-list: map keys when the map is non-empty, else `label_name`.
    /// Empty result means no label filtering.
    pub fn allowed_labels(&self) -> AllowedLabels {
        if !self.part_number_by_label_name.is_empty() {
            AllowedLabels::new(self.part_number_by_label_name.keys())
        } else {
            AllowedLabels::new([self.label_name.as_str()])
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }
}

impl SyncConfig {
    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );

        if is_yaml {
            Self::from_yaml_str(&content)
        } else {
            Self::from_json_str(&content)
        }
    }

    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.sources.is_empty() {
            return Err(ConfigError::invalid("sources", "at least one row source is required"));
        }

        let mut seen = HashSet::new();
        for (i, source) in self.sources.iter().enumerate() {
            let name = source.name.trim();
            if name.is_empty() {
                return Err(ConfigError::invalid(format!("sources[{}].name", i), "must not be empty"));
            }
            if !seen.insert(name.to_lowercase()) {
                return Err(ConfigError::invalid(
                    format!("sources[{}].name", i),
                    format!("duplicate source name '{}'", name),
                ));
            }
            if source.path.as_os_str().is_empty() {
                return Err(ConfigError::invalid(format!("sources[{}].path", i), "must not be empty"));
            }
            if source.table.trim().is_empty() {
                return Err(ConfigError::invalid(format!("sources[{}].table", i), "must not be empty"));
            }
        }

        match &self.sink {
            SinkConfig::Mysql(m) => {
                if m.host.trim().is_empty() {
                    return Err(ConfigError::invalid("sink.host", "must not be empty"));
                }
                if m.database.trim().is_empty() {
                    return Err(ConfigError::invalid("sink.database", "must not be empty"));
                }
                if m.table.trim().is_empty() {
                    return Err(ConfigError::invalid("sink.table", "must not be empty"));
                }
                if m.connection_timeout_seconds == 0 {
                    return Err(ConfigError::invalid(
                        "sink.connection_timeout_seconds",
                        "must be at least 1",
                    ));
                }
                if m.default_command_timeout_seconds == 0 {
                    return Err(ConfigError::invalid(
                        "sink.default_command_timeout_seconds",
                        "must be at least 1",
                    ));
                }
            }
            SinkConfig::Sqlite(s) => {
                if s.path.as_os_str().is_empty() {
                    return Err(ConfigError::invalid("sink.path", "must not be empty"));
                }
                if s.table.trim().is_empty() {
                    return Err(ConfigError::invalid("sink.table", "must not be empty"));
                }
            }
        }

        if self.sync.interval_minutes == 0 {
            return Err(ConfigError::invalid("sync.interval_minutes", "must be at least 1"));
        }
        if self.sync.watermark_file.as_os_str().is_empty() {
            return Err(ConfigError::invalid("sync.watermark_file", "must not be empty"));
        }
        let cols = &self.sync.columns;
        if cols.index.trim().is_empty() || cols.label.trim().is_empty() {
            return Err(ConfigError::invalid(
                "sync.columns",
                "index and label column names must not be empty",
            ));
        }

        Ok(())
    }
}
