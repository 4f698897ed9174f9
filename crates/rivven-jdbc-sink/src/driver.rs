//! Driver-backed raw connection provider
//!
//! [`DriverConnectionProvider`] turns a [`ConnectionFactory`] plus a
//! [`CredentialsProvider`] into a [`RawConnectionProvider`]. Credentials are
//! resolved on every attempt and each connect is bounded by the configured
//! connect timeout.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::connection::{
    redact_url, Connection, ConnectionConfig, ConnectionFactory, RawConnectionProvider,
};
use crate::credentials::CredentialsProvider;
use crate::error::{Error, Result};

/// Raw provider that opens connections through a driver factory
pub struct DriverConnectionProvider {
    factory: Arc<dyn ConnectionFactory>,
    config: ConnectionConfig,
    credentials: Arc<dyn CredentialsProvider>,
    closed: AtomicBool,
    connections_opened: AtomicU64,
}

impl DriverConnectionProvider {
    /// Create a provider for `config`, authenticating through `credentials`
    pub fn new(
        factory: Arc<dyn ConnectionFactory>,
        config: ConnectionConfig,
        credentials: Arc<dyn CredentialsProvider>,
    ) -> Self {
        Self {
            factory,
            config,
            credentials,
            closed: AtomicBool::new(false),
            connections_opened: AtomicU64::new(0),
        }
    }

    /// Connection settings, without resolved credentials
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Number of connections opened so far
    pub fn connections_opened(&self) -> u64 {
        self.connections_opened.load(Ordering::Relaxed)
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn resolve_config(&self) -> Result<ConnectionConfig> {
        let credentials = self.credentials.credentials().await?;
        let mut config = self.config.clone();
        if let Some(user) = credentials.username() {
            config.user = Some(user.to_string());
        }
        if let Some(password) = credentials.password() {
            config.password = Some(password.clone());
        }
        Ok(config)
    }
}

#[async_trait]
impl RawConnectionProvider for DriverConnectionProvider {
    async fn get_connection(&self) -> Result<Box<dyn Connection>> {
        if self.is_closed() {
            return Err(Error::connection("driver connection provider is closed"));
        }

        let config = self.resolve_config().await?;
        debug!(
            url = %redact_url(&config.url),
            database = %self.factory.database_type(),
            "Opening database connection"
        );

        let conn = tokio::time::timeout(config.connect_timeout, self.factory.connect(&config))
            .await
            .map_err(|_| {
                Error::timeout(format!(
                    "connect timed out after {}ms",
                    config.connect_timeout.as_millis()
                ))
            })??;

        let opened = self.connections_opened.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(connections_opened = opened, "Opened database connection");
        Ok(conn)
    }

    async fn is_connection_valid(&self, conn: &dyn Connection, timeout: Duration) -> bool {
        match &self.config.validation_query {
            Some(sql) => match tokio::time::timeout(timeout, conn.execute(sql)).await {
                Ok(Ok(_)) => true,
                Ok(Err(e)) => {
                    debug!(error = %e, "Validation query failed");
                    false
                }
                Err(_) => {
                    debug!(timeout_ms = timeout.as_millis() as u64, "Validation query timed out");
                    false
                }
            },
            None => tokio::time::timeout(timeout, conn.is_valid(timeout))
                .await
                .unwrap_or(false),
        }
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(
                connections_opened = self.connections_opened(),
                "Closed driver connection provider"
            );
        }
    }
}

impl std::fmt::Debug for DriverConnectionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverConnectionProvider")
            .field("config", &self.config)
            .field("database", &self.factory.database_type())
            .field("credentials", &self.credentials.name())
            .field("closed", &self.is_closed())
            .finish()
    }
}
