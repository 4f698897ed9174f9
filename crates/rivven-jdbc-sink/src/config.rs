//! JDBC sink configuration
//!
//! [`JdbcSinkConfig`] is built either from a flat string property map (the
//! shape connector frameworks hand to a task) or deserialized with serde
//! using the same dotted key names.
//!
//! # Example
//!
//! ```yaml
//! connection.url: "jdbc:postgresql://db:5432/app"
//! connection.user: writer
//! connection.password: secret
//! connection.attempts: 5
//! connection.backoff.ms: 2000
//! table.types: [TABLE, VIEW]
//! pk.mode: record_key
//! delete.enabled: true
//! ```

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use validator::Validate;

use crate::cache::CachedConnectionProvider;
use crate::connection::{ConnectionConfig, ConnectionFactory};
use crate::credentials::{
    CredentialsProvider, CredentialsProviderContext, CredentialsProviderRegistry,
    DefaultCredentialsProvider,
};
use crate::driver::DriverConnectionProvider;
use crate::error::{Error, Result};
use crate::table_type::{parse_table_types, TableType};
use crate::types::SensitiveString;

/// JDBC connection URL (required)
pub const CONNECTION_URL: &str = "connection.url";
/// Connection user
pub const CONNECTION_USER: &str = "connection.user";
/// Connection password
pub const CONNECTION_PASSWORD: &str = "connection.password";
/// Attempts per connection acquisition
pub const CONNECTION_ATTEMPTS: &str = "connection.attempts";
/// Backoff between connection attempts, in milliseconds
pub const CONNECTION_BACKOFF_MS: &str = "connection.backoff.ms";
/// Timeout of the validity probe on a cached connection, in milliseconds
pub const CONNECTION_VALIDITY_TIMEOUT_MS: &str = "connection.validity.timeout.ms";
/// Insert mode
pub const INSERT_MODE: &str = "insert.mode";
/// Records per batch
pub const BATCH_SIZE: &str = "batch.size";
/// Whether tombstones delete rows
pub const DELETE_ENABLED: &str = "delete.enabled";
/// Destination table name format
pub const TABLE_NAME_FORMAT: &str = "table.name.format";
/// Table types the sink may write to
pub const TABLE_TYPES: &str = "table.types";
/// Primary key mode
pub const PK_MODE: &str = "pk.mode";
/// Primary key fields
pub const PK_FIELDS: &str = "pk.fields";
/// Create missing tables
pub const AUTO_CREATE: &str = "auto.create";
/// Add missing columns
pub const AUTO_EVOLVE: &str = "auto.evolve";
/// Retries of a failed write
pub const MAX_RETRIES: &str = "max.retries";
/// Backoff between write retries, in milliseconds
pub const RETRY_BACKOFF_MS: &str = "retry.backoff.ms";
/// Use `WITH (HOLDLOCK)` in SQL Server MERGE statements
pub const MSSQL_USE_MERGE_HOLDLOCK: &str = "mssql.use.merge.holdlock";
/// Name of the credentials provider
pub const CREDENTIALS_PROVIDER_CLASS_CONFIG: &str = "jdbc.credentials.provider.class";
/// Prefix of the keys handed to the credentials provider
pub const CREDENTIALS_PROVIDER_CONFIG_PREFIX: &str = "jdbc.credentials.provider.";

/// How records are written
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum InsertMode {
    /// Plain INSERT
    #[default]
    Insert,
    /// INSERT or UPDATE on key conflict
    Upsert,
    /// UPDATE only
    Update,
}

impl FromStr for InsertMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "insert" => Ok(Self::Insert),
            "upsert" => Ok(Self::Upsert),
            "update" => Ok(Self::Update),
            other => Err(Error::config(format!("invalid {} '{}'", INSERT_MODE, other))),
        }
    }
}

/// Where primary key columns come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryKeyMode {
    /// No primary key
    #[default]
    None,
    /// Topic, partition and offset of the record
    Kafka,
    /// Fields of the record key
    RecordKey,
    /// Fields of the record value
    RecordValue,
}

impl FromStr for PrimaryKeyMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "kafka" => Ok(Self::Kafka),
            "record_key" => Ok(Self::RecordKey),
            "record_value" => Ok(Self::RecordValue),
            other => Err(Error::config(format!("invalid {} '{}'", PK_MODE, other))),
        }
    }
}

/// JDBC sink configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, JsonSchema)]
pub struct JdbcSinkConfig {
    /// JDBC connection URL
    #[serde(rename = "connection.url")]
    pub connection_url: SensitiveString,

    /// Connection user
    #[serde(rename = "connection.user", default)]
    pub connection_user: Option<String>,

    /// Connection password
    #[serde(rename = "connection.password", default)]
    pub connection_password: Option<SensitiveString>,

    /// Attempts per connection acquisition (default: 3)
    #[serde(rename = "connection.attempts", default = "default_connection_attempts")]
    #[validate(range(min = 1))]
    pub connection_attempts: u32,

    /// Backoff between connection attempts in milliseconds (default: 10000)
    #[serde(rename = "connection.backoff.ms", default = "default_connection_backoff_ms")]
    pub connection_backoff_ms: u64,

    /// Validity probe timeout in milliseconds (default: 5000)
    #[serde(
        rename = "connection.validity.timeout.ms",
        default = "default_validity_timeout_ms"
    )]
    #[validate(range(min = 1))]
    pub connection_validity_timeout_ms: u64,

    /// Insert mode
    #[serde(rename = "insert.mode", default)]
    pub insert_mode: InsertMode,

    /// Records per batch (default: 3000)
    #[serde(rename = "batch.size", default = "default_batch_size")]
    #[validate(range(min = 1))]
    pub batch_size: u32,

    /// Delete rows on tombstones (requires `pk.mode=record_key`)
    #[serde(rename = "delete.enabled", default)]
    pub delete_enabled: bool,

    /// Destination table name format, `${topic}` is replaced by the topic
    #[serde(rename = "table.name.format", default = "default_table_name_format")]
    #[validate(length(min = 1))]
    pub table_name_format: String,

    /// Table types the sink may write to (default: TABLE)
    #[serde(rename = "table.types", default = "default_table_types")]
    pub table_types: BTreeSet<TableType>,

    /// Primary key mode
    #[serde(rename = "pk.mode", default)]
    pub pk_mode: PrimaryKeyMode,

    /// Primary key fields
    #[serde(rename = "pk.fields", default)]
    pub pk_fields: Vec<String>,

    /// Create missing tables
    #[serde(rename = "auto.create", default)]
    pub auto_create: bool,

    /// Add missing columns
    #[serde(rename = "auto.evolve", default)]
    pub auto_evolve: bool,

    /// Retries of a failed write (default: 10)
    #[serde(rename = "max.retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff between write retries in milliseconds (default: 3000)
    #[serde(rename = "retry.backoff.ms", default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Use HOLDLOCK in SQL Server MERGE (default: true)
    #[serde(rename = "mssql.use.merge.holdlock", default = "default_true")]
    pub use_holdlock_in_merge: bool,

    /// Registered name of the credentials provider (default: `default`)
    #[serde(
        rename = "jdbc.credentials.provider.class",
        default = "default_credentials_provider"
    )]
    pub credentials_provider_class: String,

    /// Properties for the credentials provider
    #[serde(rename = "jdbc.credentials.provider", default)]
    pub credentials_provider_properties: HashMap<String, String>,
}

fn default_connection_attempts() -> u32 {
    3
}

fn default_connection_backoff_ms() -> u64 {
    10_000
}

fn default_validity_timeout_ms() -> u64 {
    5_000
}

fn default_batch_size() -> u32 {
    3_000
}

fn default_table_name_format() -> String {
    "${topic}".to_string()
}

fn default_table_types() -> BTreeSet<TableType> {
    BTreeSet::from([TableType::Table])
}

fn default_max_retries() -> u32 {
    10
}

fn default_retry_backoff_ms() -> u64 {
    3_000
}

fn default_true() -> bool {
    true
}

fn default_credentials_provider() -> String {
    DefaultCredentialsProvider::NAME.to_string()
}

impl JdbcSinkConfig {
    /// Configuration with defaults for everything but the URL
    pub fn new(connection_url: impl Into<String>) -> Self {
        Self {
            connection_url: SensitiveString::new(connection_url),
            connection_user: None,
            connection_password: None,
            connection_attempts: default_connection_attempts(),
            connection_backoff_ms: default_connection_backoff_ms(),
            connection_validity_timeout_ms: default_validity_timeout_ms(),
            insert_mode: InsertMode::default(),
            batch_size: default_batch_size(),
            delete_enabled: false,
            table_name_format: default_table_name_format(),
            table_types: default_table_types(),
            pk_mode: PrimaryKeyMode::default(),
            pk_fields: Vec::new(),
            auto_create: false,
            auto_evolve: false,
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            use_holdlock_in_merge: true,
            credentials_provider_class: default_credentials_provider(),
            credentials_provider_properties: HashMap::new(),
        }
    }

    /// Parse and validate a flat property map
    pub fn from_props(props: &HashMap<String, String>) -> Result<Self> {
        let url = props
            .get(CONNECTION_URL)
            .ok_or_else(|| Error::config(format!("missing required '{}'", CONNECTION_URL)))?;
        let mut config = Self::new(url.trim());

        config.connection_user = props.get(CONNECTION_USER).cloned();
        config.connection_password = props
            .get(CONNECTION_PASSWORD)
            .map(|p| SensitiveString::new(p.as_str()));
        config.connection_attempts =
            parse_or(props, CONNECTION_ATTEMPTS, config.connection_attempts)?;
        config.connection_backoff_ms =
            parse_or(props, CONNECTION_BACKOFF_MS, config.connection_backoff_ms)?;
        config.connection_validity_timeout_ms = parse_or(
            props,
            CONNECTION_VALIDITY_TIMEOUT_MS,
            config.connection_validity_timeout_ms,
        )?;
        config.insert_mode = parse_or(props, INSERT_MODE, config.insert_mode)?;
        config.batch_size = parse_or(props, BATCH_SIZE, config.batch_size)?;
        config.delete_enabled = parse_bool_or(props, DELETE_ENABLED, config.delete_enabled)?;
        if let Some(format) = props.get(TABLE_NAME_FORMAT) {
            config.table_name_format = format.trim().to_string();
        }
        if let Some(types) = props.get(TABLE_TYPES) {
            config.table_types = parse_table_types(types)?;
        }
        config.pk_mode = parse_or(props, PK_MODE, config.pk_mode)?;
        if let Some(fields) = props.get(PK_FIELDS) {
            config.pk_fields = parse_list(fields);
        }
        config.auto_create = parse_bool_or(props, AUTO_CREATE, config.auto_create)?;
        config.auto_evolve = parse_bool_or(props, AUTO_EVOLVE, config.auto_evolve)?;
        config.max_retries = parse_or(props, MAX_RETRIES, config.max_retries)?;
        config.retry_backoff_ms = parse_or(props, RETRY_BACKOFF_MS, config.retry_backoff_ms)?;
        config.use_holdlock_in_merge =
            parse_bool_or(props, MSSQL_USE_MERGE_HOLDLOCK, config.use_holdlock_in_merge)?;
        if let Some(class) = props.get(CREDENTIALS_PROVIDER_CLASS_CONFIG) {
            config.credentials_provider_class = class.trim().to_string();
        }
        config.credentials_provider_properties = props
            .iter()
            .filter(|(key, _)| key.as_str() != CREDENTIALS_PROVIDER_CLASS_CONFIG)
            .filter_map(|(key, value)| {
                key.strip_prefix(CREDENTIALS_PROVIDER_CONFIG_PREFIX)
                    .map(|name| (name.to_string(), value.clone()))
            })
            .collect();

        config.validate_all()?;
        debug!(
            url = %config.connection_url.redacted(),
            attempts = config.connection_attempts,
            backoff_ms = config.connection_backoff_ms,
            credentials_provider = %config.credentials_provider_class,
            "Parsed JDBC sink configuration"
        );
        Ok(config)
    }

    /// Validate against the built-in credentials providers
    pub fn validate_all(&self) -> Result<()> {
        self.validate_with(&CredentialsProviderRegistry::with_builtins())
    }

    /// Validate field ranges and cross-field rules
    pub fn validate_with(&self, registry: &CredentialsProviderRegistry) -> Result<()> {
        self.validate()?;

        if self.connection_url.is_blank() {
            return Err(Error::config(format!("'{}' must not be empty", CONNECTION_URL)));
        }
        if self.table_name_format.trim().is_empty() {
            return Err(Error::config(format!(
                "'{}' must not be empty",
                TABLE_NAME_FORMAT
            )));
        }
        if self.table_types.is_empty() {
            return Err(Error::config(format!(
                "'{}' must name at least one table type",
                TABLE_TYPES
            )));
        }
        if self.delete_enabled && self.pk_mode != PrimaryKeyMode::RecordKey {
            return Err(Error::config(format!(
                "'{}' requires '{}=record_key'",
                DELETE_ENABLED, PK_MODE
            )));
        }
        if self.pk_mode == PrimaryKeyMode::Kafka
            && !self.pk_fields.is_empty()
            && self.pk_fields.len() != 3
        {
            return Err(Error::config(format!(
                "'{}=kafka' takes either no '{}' or exactly three (topic, partition, offset)",
                PK_MODE, PK_FIELDS
            )));
        }
        if !registry.contains(&self.credentials_provider_class) {
            return Err(Error::config(format!(
                "'{}' names unknown credentials provider '{}'",
                CREDENTIALS_PROVIDER_CLASS_CONFIG, self.credentials_provider_class
            )));
        }
        Ok(())
    }

    /// Backoff between connection attempts
    pub fn connection_backoff(&self) -> Duration {
        Duration::from_millis(self.connection_backoff_ms)
    }

    /// Validity probe timeout
    pub fn connection_validity_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_validity_timeout_ms)
    }

    /// Backoff between write retries
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Instantiate the configured credentials provider from the built-ins
    pub fn credentials_provider(&self) -> Result<Arc<dyn CredentialsProvider>> {
        self.credentials_provider_with(&CredentialsProviderRegistry::with_builtins())
    }

    /// Instantiate the configured credentials provider from `registry`
    pub fn credentials_provider_with(
        &self,
        registry: &CredentialsProviderRegistry,
    ) -> Result<Arc<dyn CredentialsProvider>> {
        let ctx = CredentialsProviderContext {
            user: self.connection_user.clone(),
            password: self.connection_password.as_ref().map(|p| p.to_secret()),
            properties: self.credentials_provider_properties.clone(),
        };
        registry.create(&self.credentials_provider_class, &ctx)
    }

    /// Connection settings for the driver, without credentials
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::new(self.connection_url.expose_secret())
    }

    /// Cached, retrying provider over `factory` with the configured retry
    /// budget, backoff and credentials.
    pub fn connection_provider(
        &self,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Result<CachedConnectionProvider> {
        let raw = DriverConnectionProvider::new(
            factory,
            self.connection_config(),
            self.credentials_provider()?,
        );

        Ok(CachedConnectionProvider::new(
            Arc::new(raw),
            self.connection_attempts,
            self.connection_backoff(),
        )
        .with_validity_timeout(self.connection_validity_timeout()))
    }
}

fn parse_or<T>(props: &HashMap<String, String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match props.get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::config(format!("invalid value '{}' for '{}': {}", raw, key, e))),
        None => Ok(default),
    }
}

fn parse_bool_or(props: &HashMap<String, String>, key: &str, default: bool) -> Result<bool> {
    match props.get(key).map(|raw| raw.trim().to_ascii_lowercase()) {
        Some(raw) if raw == "true" => Ok(true),
        Some(raw) if raw == "false" => Ok(false),
        Some(raw) => Err(Error::config(format!(
            "invalid value '{}' for '{}': expected true or false",
            raw, key
        ))),
        None => Ok(default),
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = JdbcSinkConfig::new("jdbc:mysql://something");

        assert_eq!(config.connection_attempts, 3);
        assert_eq!(config.connection_backoff(), Duration::from_secs(10));
        assert_eq!(config.connection_validity_timeout(), Duration::from_secs(5));
        assert_eq!(config.table_name_format, "${topic}");
        assert_eq!(config.table_types, BTreeSet::from([TableType::Table]));
        assert!(config.use_holdlock_in_merge);
        assert!(config.validate_all().is_ok());
    }

    #[test]
    fn test_parse_helpers() {
        let props = HashMap::from([
            ("a".to_string(), " 7 ".to_string()),
            ("b".to_string(), "TRUE".to_string()),
            ("c".to_string(), "yes".to_string()),
        ]);

        assert_eq!(parse_or(&props, "a", 1u32).unwrap(), 7);
        assert_eq!(parse_or(&props, "missing", 1u32).unwrap(), 1);
        assert!(parse_bool_or(&props, "b", false).unwrap());
        assert!(parse_bool_or(&props, "c", false).is_err());
        assert_eq!(
            parse_list(" kafka_topic , kafka_partition,,kafka_offset "),
            vec!["kafka_topic", "kafka_partition", "kafka_offset"]
        );
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("UPSERT".parse::<InsertMode>().unwrap(), InsertMode::Upsert);
        assert_eq!(
            "record_value".parse::<PrimaryKeyMode>().unwrap(),
            PrimaryKeyMode::RecordValue
        );
        assert!("merge".parse::<InsertMode>().is_err());
    }
}
