//! Configuration types and builders for pg-cratedb-sync.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;
use validator::{Validate, ValidationError};

/// Main configuration for the sync client.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SyncConfig {
    /// PostgreSQL (source) connection configuration
    #[validate(nested)]
    pub source: PostgresConfig,

    /// Destination connection configuration
    #[validate(nested)]
    pub destination: DestinationConfig,

    /// Sync behavior configuration
    #[validate(nested)]
    pub sync: SyncBehaviorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SyncConfig {
    /// Create a new configuration builder.
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Load configuration from environment variables.
    ///
    /// Every variable is optional; unset ones fall back to a local
    /// PostgreSQL on port 5433 and a local CrateDB on port 4200.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let postgres_url = lookup("DATABASE_URL")
            .or_else(|| lookup("POSTGRES_URL"))
            .unwrap_or_else(default_postgres_url);

        let mut builder = Self::builder().postgres_url(postgres_url);

        if let Some(password) = lookup("DB_PASSWORD") {
            builder = builder.postgres_password(password);
        }

        if let Some(path) = lookup("DUCKDB_PATH") {
            builder = builder.duckdb_path(path);
        } else {
            builder = builder
                .cratedb_url(lookup("CRATEDB_URL").unwrap_or_else(default_cratedb_url))
                .cratedb_username(lookup("CRATEDB_USER").unwrap_or_else(default_cratedb_user));
        }

        if let Some(tables) = lookup("SYNC_TABLES") {
            builder = builder.tables(
                tables
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty()),
            );
        }

        if let Some(path) = lookup("SYNC_WATERMARK_FILE") {
            builder = builder.watermark_file(path);
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            builder = builder.log_level(level);
        }

        builder.build()
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read {}: {}", path, e)))?;

        Self::from_toml(&content)
            .map_err(|e| Error::config(format!("Failed to load {}: {}", path, e)))
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Self =
            toml::from_str(content).map_err(|e| Error::config_with_source("Invalid TOML", e))?;

        // Fall back to DB_PASSWORD when the file carries no password.
        if config.source.password.is_none() {
            config.source.password = std::env::var("DB_PASSWORD").ok();
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self)
            .map_err(|e| Error::validation(format!("Config validation failed: {}", e)))?;
        self.destination.check()
    }
}

/// PostgreSQL connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PostgresConfig {
    /// Connection URL
    #[validate(length(min = 1))]
    pub url: String,

    /// Password, merged into the URL when the URL carries none
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// SSL mode
    #[serde(default)]
    pub ssl_mode: SslMode,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: default_postgres_url(),
            password: None,
            ssl_mode: SslMode::default(),
        }
    }
}

impl PostgresConfig {
    /// Connection string with the configured password applied.
    pub fn connection_string(&self) -> Result<String> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| Error::config(format!("Invalid PostgreSQL URL: {}", e)))?;

        if let Some(ref password) = self.password {
            if url.password().is_none() {
                url.set_password(Some(password))
                    .map_err(|_| Error::config("PostgreSQL URL cannot carry a password"))?;
            }
        }

        Ok(url.to_string())
    }
}

/// SSL mode for PostgreSQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SslMode {
    /// Disable SSL (default, matches a local server)
    #[default]
    Disable,
    /// Use SSL, accept self-signed certificates
    Prefer,
    /// Use SSL, verify certificates
    Require,
}

/// Kind of destination store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DestinationKind {
    /// CrateDB over its HTTP endpoint
    #[default]
    CrateDb,
    /// Embedded DuckDB database file
    DuckDb,
}

impl std::fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DestinationKind::CrateDb => write!(f, "cratedb"),
            DestinationKind::DuckDb => write!(f, "duckdb"),
        }
    }
}

/// Destination connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DestinationConfig {
    /// Destination kind
    #[serde(default)]
    pub kind: DestinationKind,

    /// CrateDB HTTP URL
    #[validate(length(min = 1))]
    #[serde(default = "default_cratedb_url")]
    pub url: String,

    /// CrateDB user
    #[serde(default)]
    pub username: Option<String>,

    /// CrateDB password
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// DuckDB file path (`:memory:` for an in-process database)
    #[serde(default)]
    pub path: Option<String>,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            kind: DestinationKind::CrateDb,
            url: default_cratedb_url(),
            username: Some(default_cratedb_user()),
            password: None,
            path: None,
        }
    }
}

impl DestinationConfig {
    fn check(&self) -> Result<()> {
        match self.kind {
            DestinationKind::CrateDb => {
                let url = Url::parse(&self.url)
                    .map_err(|e| Error::config(format!("Invalid CrateDB URL: {}", e)))?;
                if !matches!(url.scheme(), "http" | "https") {
                    return Err(Error::config(format!(
                        "CrateDB URL must be http(s), got '{}'",
                        url.scheme()
                    )));
                }
                Ok(())
            }
            DestinationKind::DuckDb => match self.path {
                Some(ref p) if !p.is_empty() => Ok(()),
                _ => Err(Error::config("DuckDB destination requires a path")),
            },
        }
    }
}

/// Which source rows a run reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Only rows sharing the table's newest `updated_at`
    #[default]
    LatestBatch,
    /// Every row with `updated_at` after the stored watermark
    SinceWatermark,
}

impl std::fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionMode::LatestBatch => write!(f, "latest_batch"),
            SelectionMode::SinceWatermark => write!(f, "since_watermark"),
        }
    }
}

/// Sync behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SyncBehaviorConfig {
    /// Tables to sync, in order
    #[validate(length(min = 1), custom(function = "validate_identifiers"))]
    pub tables: Vec<String>,

    /// Identifier column
    #[validate(custom(function = "validate_identifier"))]
    #[serde(default = "default_id_column")]
    pub id_column: String,

    /// Last-modified tracking column
    #[validate(custom(function = "validate_identifier"))]
    #[serde(default = "default_updated_at_column")]
    pub updated_at_column: String,

    /// Soft-delete tracking column
    #[validate(custom(function = "validate_identifier"))]
    #[serde(default = "default_deleted_column")]
    pub deleted_column: String,

    /// Watermark file
    #[serde(default = "default_watermark_file")]
    pub watermark_file: PathBuf,

    /// Row selection mode
    #[serde(default)]
    pub selection: SelectionMode,

    /// Add tracking columns to destination tables before syncing
    #[serde(default = "default_true")]
    pub bootstrap_tracking_columns: bool,
}

impl Default for SyncBehaviorConfig {
    fn default() -> Self {
        Self {
            tables: default_tables(),
            id_column: default_id_column(),
            updated_at_column: default_updated_at_column(),
            deleted_column: default_deleted_column(),
            watermark_file: default_watermark_file(),
            selection: SelectionMode::default(),
            bootstrap_tracking_columns: true,
        }
    }
}

impl SyncBehaviorConfig {
    /// Column names the sync relies on.
    pub fn columns(&self) -> TrackingColumns {
        TrackingColumns {
            id: self.id_column.clone(),
            updated_at: self.updated_at_column.clone(),
            deleted: self.deleted_column.clone(),
        }
    }
}

/// Identifier and tracking column names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingColumns {
    /// Identifier column
    pub id: String,
    /// Last-modified timestamp column
    pub updated_at: String,
    /// Soft-delete flag column
    pub deleted: String,
}

impl Default for TrackingColumns {
    fn default() -> Self {
        Self {
            id: default_id_column(),
            updated_at: default_updated_at_column(),
            deleted: default_deleted_column(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text format (default)
    #[default]
    Text,
    /// JSON format
    Json,
}

/// Builder for SyncConfig.
#[derive(Debug, Default)]
pub struct SyncConfigBuilder {
    postgres_url: Option<String>,
    postgres_password: Option<String>,
    cratedb_url: Option<String>,
    cratedb_username: Option<String>,
    duckdb_path: Option<String>,
    tables: Vec<String>,
    watermark_file: Option<PathBuf>,
    selection: Option<SelectionMode>,
    bootstrap: Option<bool>,
    log_level: Option<String>,
}

impl SyncConfigBuilder {
    /// Set PostgreSQL connection URL.
    pub fn postgres_url(mut self, url: impl Into<String>) -> Self {
        self.postgres_url = Some(url.into());
        self
    }

    /// Set PostgreSQL password.
    pub fn postgres_password(mut self, password: impl Into<String>) -> Self {
        self.postgres_password = Some(password.into());
        self
    }

    /// Set CrateDB HTTP URL.
    pub fn cratedb_url(mut self, url: impl Into<String>) -> Self {
        self.cratedb_url = Some(url.into());
        self
    }

    /// Set CrateDB user.
    pub fn cratedb_username(mut self, username: impl Into<String>) -> Self {
        self.cratedb_username = Some(username.into());
        self
    }

    /// Use an embedded DuckDB destination at `path`.
    pub fn duckdb_path(mut self, path: impl Into<String>) -> Self {
        self.duckdb_path = Some(path.into());
        self
    }

    /// Add a table to sync.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.tables.push(table.into());
        self
    }

    /// Add several tables to sync.
    pub fn tables(mut self, tables: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tables.extend(tables.into_iter().map(Into::into));
        self
    }

    /// Set watermark file path.
    pub fn watermark_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.watermark_file = Some(path.into());
        self
    }

    /// Set row selection mode.
    pub fn selection(mut self, selection: SelectionMode) -> Self {
        self.selection = Some(selection);
        self
    }

    /// Enable or disable the tracking-column bootstrap.
    pub fn bootstrap_tracking_columns(mut self, enabled: bool) -> Self {
        self.bootstrap = Some(enabled);
        self
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    /// Build the SyncConfig.
    pub fn build(self) -> Result<SyncConfig> {
        let pg_url = self
            .postgres_url
            .ok_or_else(|| Error::config("postgres_url required"))?;
        Url::parse(&pg_url).map_err(|e| Error::config(format!("Invalid PostgreSQL URL: {}", e)))?;

        let destination = match self.duckdb_path {
            Some(path) => DestinationConfig {
                kind: DestinationKind::DuckDb,
                username: None,
                path: Some(path),
                ..Default::default()
            },
            None => DestinationConfig {
                url: self.cratedb_url.unwrap_or_else(default_cratedb_url),
                username: Some(self.cratedb_username.unwrap_or_else(default_cratedb_user)),
                ..Default::default()
            },
        };

        let config = SyncConfig {
            source: PostgresConfig {
                url: pg_url,
                password: self.postgres_password,
                ..Default::default()
            },
            destination,
            sync: SyncBehaviorConfig {
                tables: if self.tables.is_empty() {
                    default_tables()
                } else {
                    self.tables
                },
                watermark_file: self.watermark_file.unwrap_or_else(default_watermark_file),
                selection: self.selection.unwrap_or_default(),
                bootstrap_tracking_columns: self.bootstrap.unwrap_or(true),
                ..Default::default()
            },
            logging: LoggingConfig {
                level: self.log_level.unwrap_or_else(default_log_level),
                ..Default::default()
            },
        };

        config.validate()?;
        Ok(config)
    }
}

/// Check that `name` is a plain (optionally schema-qualified) SQL identifier.
pub fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
                }
                _ => false,
            }
        })
}

fn validate_identifier(name: &str) -> std::result::Result<(), ValidationError> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_identifier"))
    }
}

fn validate_identifiers(names: &[String]) -> std::result::Result<(), ValidationError> {
    names.iter().try_for_each(|n| validate_identifier(n))
}

// Defaults
fn default_postgres_url() -> String {
    "postgres://postgres@localhost:5433/test".into()
}
fn default_cratedb_url() -> String {
    "http://localhost:4200".into()
}
fn default_cratedb_user() -> String {
    "crate".into()
}
fn default_tables() -> Vec<String> {
    vec!["products".into()]
}
fn default_id_column() -> String {
    "id".into()
}
fn default_updated_at_column() -> String {
    "updated_at".into()
}
fn default_deleted_column() -> String {
    "is_deleted".into()
}
fn default_watermark_file() -> PathBuf {
    PathBuf::from("last_sync_time.txt")
}
fn default_log_level() -> String {
    "info".into()
}
fn default_true() -> bool {
    true
}
