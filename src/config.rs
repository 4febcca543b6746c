// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::error::{LeaseholdError, Result};
use crate::locking::row::{ACQUIRED_COLUMN, EXPIRES_COLUMN, LOGS_URL_COLUMN, METADATA_COLUMN};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const ENV_PREFIX: &str = "LEASEHOLD";
pub const HOME_ENV: &str = "LEASEHOLD_HOME";
pub const TABLES_DIR: &str = "tables";

const DEFAULT_TABLE_NAME: &str = "leasehold-locks";
const DEFAULT_KEY_COLUMN: &str = "LockKey";
const DEFAULT_VERSION_COLUMN: &str = "LockVersion";
const DEFAULT_PAGE_SIZE: usize = 100;
const DEFAULT_LEASE_MS: u64 = 20_000;
const MIN_LEASE_MS: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LeaseholdConfig {
    /// Directory the configuration was loaded from.
    #[serde(skip)]
    pub home: PathBuf,

    #[serde(default)]
    pub table: TableConfig,

    #[serde(default)]
    pub lease: LeaseConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub holder: HolderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    #[serde(default = "default_table_name")]
    pub name: String,
    #[serde(default = "default_key_column")]
    pub key_column: String,
    #[serde(default = "default_version_column")]
    pub version_column: String,
    /// Rows evaluated per scan request.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            name: default_table_name(),
            key_column: default_key_column(),
            version_column: default_version_column(),
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseConfig {
    #[serde(default = "default_lease_ms")]
    pub duration_ms: u64,
}

impl LeaseConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    /// Renewals happen at half the lease so one missed beat never lapses it.
    pub fn heartbeat_interval(&self) -> Duration {
        self.duration() / 2
    }
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            duration_ms: default_lease_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    File,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Root directory of the file store; defaults to `<home>/tables`.
    #[serde(default)]
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HolderConfig {
    /// Execution-environment request id used as the holder id when present.
    #[serde(default)]
    pub request_id: Option<String>,
    /// Pointer to this holder's logs, stored with every lock it takes.
    #[serde(default)]
    pub log_ref: Option<String>,
}

fn default_table_name() -> String {
    DEFAULT_TABLE_NAME.to_string()
}

fn default_key_column() -> String {
    DEFAULT_KEY_COLUMN.to_string()
}

fn default_version_column() -> String {
    DEFAULT_VERSION_COLUMN.to_string()
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_lease_ms() -> u64 {
    DEFAULT_LEASE_MS
}

impl LeaseholdConfig {
    /// Loads `<home>/config.toml` (optional) overlaid with `LEASEHOLD_*`
    /// environment variables, e.g. `LEASEHOLD_LEASE__DURATION_MS=5000`.
    pub fn load(home: &Path) -> Result<Self> {
        let config_path = home.join(CONFIG_FILE_NAME);

        let settings = Config::builder()
            .add_source(
                File::from(config_path.as_path())
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: LeaseholdConfig = settings.try_deserialize()?;
        config.home = home.to_path_buf();
        config.validate()?;

        log::debug!("Loaded config for home {home:?}");
        Ok(config)
    }

    pub fn store_root(&self) -> PathBuf {
        self.store
            .root
            .clone()
            .unwrap_or_else(|| self.home.join(TABLES_DIR))
    }

    pub fn validate(&self) -> Result<()> {
        let table = &self.table;
        if table.name.trim().is_empty() {
            return Err(LeaseholdError::InvalidConfig(
                "table.name must not be empty".to_string(),
            ));
        }
        if !table
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            || table.name.starts_with('.')
        {
            return Err(LeaseholdError::InvalidConfig(format!(
                "table.name '{}' may only contain letters, digits, '-', '_' and '.'",
                table.name
            )));
        }
        if table.key_column.trim().is_empty() {
            return Err(LeaseholdError::InvalidConfig(
                "table.key_column must not be empty".to_string(),
            ));
        }
        if table.version_column.trim().is_empty() {
            return Err(LeaseholdError::InvalidConfig(
                "table.version_column must not be empty".to_string(),
            ));
        }
        if table.version_column == table.key_column {
            return Err(LeaseholdError::InvalidConfig(
                "table.version_column must differ from table.key_column".to_string(),
            ));
        }
        let reserved = [ACQUIRED_COLUMN, EXPIRES_COLUMN, LOGS_URL_COLUMN, METADATA_COLUMN];
        for column in [&table.key_column, &table.version_column] {
            if reserved.contains(&column.as_str()) {
                return Err(LeaseholdError::InvalidConfig(format!(
                    "column name '{column}' is reserved for lease bookkeeping"
                )));
            }
        }
        if table.page_size == 0 {
            return Err(LeaseholdError::InvalidConfig(
                "table.page_size must be at least 1".to_string(),
            ));
        }
        if self.lease.duration_ms < MIN_LEASE_MS {
            return Err(LeaseholdError::InvalidConfig(format!(
                "lease.duration_ms {} is too short to schedule heartbeats (minimum {MIN_LEASE_MS})",
                self.lease.duration_ms
            )));
        }
        Ok(())
    }
}

/// Resolves the home directory: `LEASEHOLD_HOME`, else `~/.leasehold`.
pub fn leasehold_home() -> Result<PathBuf> {
    if let Ok(home) = env::var(HOME_ENV)
        && !home.trim().is_empty()
    {
        return Ok(PathBuf::from(home));
    }

    dirs::home_dir()
        .map(|home| home.join(".leasehold"))
        .ok_or_else(|| {
            LeaseholdError::ConfigError(format!(
                "Unable to determine home directory; set {HOME_ENV}"
            ))
        })
}

pub fn new_leasehold_config() -> Result<LeaseholdConfig> {
    let home = leasehold_home()?;
    LeaseholdConfig::load(&home)
}
