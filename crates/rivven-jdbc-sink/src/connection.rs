//! Connection traits for rivven-jdbc-sink
//!
//! Core abstractions for database connectivity:
//! - Connection: a live raw handle to the database
//! - RawConnectionProvider: opens, probes and releases raw connections
//! - ConnectionFactory: driver backend that performs the actual handshake
//! - ConnectionConfig: resolved connection settings handed to the factory

use async_trait::async_trait;
use secrecy::SecretString;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::Result;

/// A live connection to a database
#[async_trait]
pub trait Connection: Send + Sync {
    /// Execute a statement, returns affected row count
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// Check if connection is valid/alive, waiting at most `timeout`
    async fn is_valid(&self, timeout: Duration) -> bool;

    /// Close the connection. Calling it again is a no-op.
    async fn close(&self) -> Result<()>;
}

/// Source of raw connections wrapped by the connection cache.
///
/// Implementations perform the driver/network handshake. Every failure of
/// [`get_connection`](Self::get_connection) is treated alike by callers,
/// whatever its cause.
#[async_trait]
pub trait RawConnectionProvider: Send + Sync {
    /// Open a new raw connection
    async fn get_connection(&self) -> Result<Box<dyn Connection>>;

    /// Non-destructive liveness probe. Reports `false` for a stale connection
    /// instead of failing.
    async fn is_connection_valid(&self, conn: &dyn Connection, timeout: Duration) -> bool;

    /// Release provider resources. Idempotent.
    async fn close(&self);
}

/// Configuration for creating connections
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Connection URL (e.g., jdbc:postgresql://host:5432/db)
    pub url: String,
    /// Resolved user name
    pub user: Option<String>,
    /// Resolved password
    pub password: Option<SecretString>,
    /// Upper bound for a single connect attempt
    pub connect_timeout: Duration,
    /// Statement used to probe liveness instead of the driver check
    pub validation_query: Option<String>,
    /// Additional driver properties
    pub properties: HashMap<String, String>,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("url", &redact_url(&self.url))
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("connect_timeout", &self.connect_timeout)
            .field("validation_query", &self.validation_query)
            .field("properties", &self.properties)
            .finish()
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            user: None,
            password: None,
            connect_timeout: Duration::from_secs(10),
            validation_query: None,
            properties: HashMap::new(),
        }
    }
}

impl ConnectionConfig {
    /// Create configuration with just a URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set user name
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set password
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::new(password.into().into_boxed_str()));
        self
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Probe liveness by running `sql`
    pub fn with_validation_query(mut self, sql: impl Into<String>) -> Self {
        self.validation_query = Some(sql.into());
        self
    }

    /// Add a connection property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Database type derived from the URL scheme
    pub fn database_type(&self) -> DatabaseType {
        DatabaseType::from_url(&self.url)
    }
}

/// Redact credentials from a connection URL so it is safe to log.
pub fn redact_url(raw: &str) -> String {
    let (prefix, rest) = match raw.strip_prefix("jdbc:") {
        Some(rest) => ("jdbc:", rest),
        None => ("", raw),
    };

    match url::Url::parse(rest) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            format!("{}{}", prefix, parsed)
        }
        Err(_) => "***".to_string(),
    }
}

/// Factory for creating connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Create a new connection
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>>;

    /// Get the database type
    fn database_type(&self) -> DatabaseType;
}

/// Database type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseType {
    /// PostgreSQL
    PostgreSQL,
    /// MySQL/MariaDB
    MySQL,
    /// SQL Server
    SqlServer,
    /// SQLite
    SQLite,
    /// Oracle
    Oracle,
    /// Unknown/custom
    Unknown,
}

impl DatabaseType {
    /// Detect the database from a (optionally `jdbc:` prefixed) URL
    pub fn from_url(url: &str) -> Self {
        let url = url.strip_prefix("jdbc:").unwrap_or(url);
        let scheme = url.split(':').next().unwrap_or_default();
        match scheme.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Self::PostgreSQL,
            "mysql" | "mariadb" => Self::MySQL,
            "sqlserver" | "mssql" => Self::SqlServer,
            "sqlite" => Self::SQLite,
            "oracle" => Self::Oracle,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PostgreSQL => write!(f, "PostgreSQL"),
            Self::MySQL => write!(f, "MySQL"),
            Self::SqlServer => write!(f, "SQL Server"),
            Self::SQLite => write!(f, "SQLite"),
            Self::Oracle => write!(f, "Oracle"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}
