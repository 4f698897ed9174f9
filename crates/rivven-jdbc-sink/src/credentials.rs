//! Credentials resolution for database connections
//!
//! A [`CredentialsProvider`] yields the user name and password used for each
//! new raw connection. Providers are selected by name through a
//! [`CredentialsProviderRegistry`]:
//!
//! - `default` reads `connection.user` / `connection.password`
//! - `configurable` reads the `jdbc.credentials.provider.` prefixed keys
//!
//! Custom providers (vaults, token issuers) can be registered under their own
//! name and selected with `jdbc.credentials.provider.class`.

use async_trait::async_trait;
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Resolved user name and password
#[derive(Clone, Default)]
pub struct JdbcCredentials {
    username: Option<String>,
    password: Option<SecretString>,
}

impl JdbcCredentials {
    /// Create credentials
    pub fn new(username: Option<String>, password: Option<SecretString>) -> Self {
        Self { username, password }
    }

    /// User name, if any
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Password, if any
    pub fn password(&self) -> Option<&SecretString> {
        self.password.as_ref()
    }

    /// Whether neither a user name nor a password is set
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.password.is_none()
    }
}

impl std::fmt::Debug for JdbcCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JdbcCredentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Supplies credentials for new connections.
///
/// Called on every connection attempt, so rotated secrets are picked up on the
/// next reconnect.
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    /// Name the provider is registered under
    fn name(&self) -> &str;

    /// Resolve current credentials
    async fn credentials(&self) -> Result<JdbcCredentials>;
}

/// Inputs available to a provider constructor
#[derive(Clone, Default)]
pub struct CredentialsProviderContext {
    /// Value of `connection.user`
    pub user: Option<String>,
    /// Value of `connection.password`
    pub password: Option<SecretString>,
    /// `jdbc.credentials.provider.*` keys with the prefix stripped
    pub properties: HashMap<String, String>,
}

/// Credentials taken verbatim from `connection.user` and `connection.password`
#[derive(Debug, Clone)]
pub struct DefaultCredentialsProvider {
    credentials: JdbcCredentials,
}

impl DefaultCredentialsProvider {
    /// Registry name
    pub const NAME: &'static str = "default";

    /// Create from the connection settings
    pub fn new(user: Option<String>, password: Option<SecretString>) -> Self {
        Self {
            credentials: JdbcCredentials::new(user, password),
        }
    }
}

#[async_trait]
impl CredentialsProvider for DefaultCredentialsProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn credentials(&self) -> Result<JdbcCredentials> {
        Ok(self.credentials.clone())
    }
}

/// Credentials configured under the `jdbc.credentials.provider.` prefix
#[derive(Debug, Clone)]
pub struct ConfigurableCredentialsProvider {
    credentials: JdbcCredentials,
}

impl ConfigurableCredentialsProvider {
    /// Registry name
    pub const NAME: &'static str = "configurable";

    /// Build from prefix-stripped properties (`username`, `password`)
    pub fn from_properties(properties: &HashMap<String, String>) -> Result<Self> {
        let username = properties
            .get("username")
            .filter(|u| !u.trim().is_empty())
            .cloned()
            .ok_or_else(|| {
                Error::config("configurable credentials provider requires a 'username' property")
            })?;
        let password = properties
            .get("password")
            .map(|p| SecretString::new(p.clone().into_boxed_str()));

        Ok(Self {
            credentials: JdbcCredentials::new(Some(username), password),
        })
    }
}

#[async_trait]
impl CredentialsProvider for ConfigurableCredentialsProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn credentials(&self) -> Result<JdbcCredentials> {
        Ok(self.credentials.clone())
    }
}

/// Constructor stored in the registry
pub type CredentialsProviderConstructor =
    Arc<dyn Fn(&CredentialsProviderContext) -> Result<Arc<dyn CredentialsProvider>> + Send + Sync>;

/// Name to constructor lookup for credentials providers
#[derive(Clone)]
pub struct CredentialsProviderRegistry {
    constructors: HashMap<String, CredentialsProviderConstructor>,
}

impl Default for CredentialsProviderRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl CredentialsProviderRegistry {
    /// Create an empty registry
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registry with the `default` and `configurable` providers
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();

        let default: CredentialsProviderConstructor = Arc::new(build_default);
        registry.register_constructor(DefaultCredentialsProvider::NAME, default.clone());
        registry.register_constructor("DefaultJdbcCredentialsProvider", default);

        let configurable: CredentialsProviderConstructor = Arc::new(build_configurable);
        registry.register_constructor(ConfigurableCredentialsProvider::NAME, configurable.clone());
        registry.register_constructor("ConfigurableJdbcCredentialsProvider", configurable);

        registry
    }

    /// Register a provider constructor under `name`
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&CredentialsProviderContext) -> Result<Arc<dyn CredentialsProvider>>
            + Send
            + Sync
            + 'static,
    {
        self.register_constructor(name, Arc::new(constructor));
    }

    fn register_constructor(
        &mut self,
        name: impl Into<String>,
        constructor: CredentialsProviderConstructor,
    ) {
        self.constructors.insert(name.into(), constructor);
    }

    /// Whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name.trim())
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Instantiate the provider registered under `name`
    pub fn create(
        &self,
        name: &str,
        ctx: &CredentialsProviderContext,
    ) -> Result<Arc<dyn CredentialsProvider>> {
        let constructor = self.constructors.get(name.trim()).ok_or_else(|| {
            Error::config(format!(
                "'{}' is not a registered credentials provider (known: {})",
                name,
                self.names().join(", ")
            ))
        })?;
        constructor(ctx)
    }
}

fn build_default(ctx: &CredentialsProviderContext) -> Result<Arc<dyn CredentialsProvider>> {
    Ok(Arc::new(DefaultCredentialsProvider::new(
        ctx.user.clone(),
        ctx.password.clone(),
    )))
}

fn build_configurable(ctx: &CredentialsProviderContext) -> Result<Arc<dyn CredentialsProvider>> {
    Ok(Arc::new(ConfigurableCredentialsProvider::from_properties(
        &ctx.properties,
    )?))
}

impl std::fmt::Debug for CredentialsProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsProviderRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn secret(s: &str) -> SecretString {
        SecretString::new(s.to_string().into_boxed_str())
    }

    #[tokio::test]
    async fn test_default_provider_returns_connection_settings() {
        let provider = DefaultCredentialsProvider::new(Some("app".into()), Some(secret("pw")));
        let creds = provider.credentials().await.unwrap();

        assert_eq!(provider.name(), "default");
        assert_eq!(creds.username(), Some("app"));
        assert_eq!(creds.password().map(|p| p.expose_secret()), Some("pw"));
    }

    #[test]
    fn test_configurable_provider_requires_username() {
        let err = ConfigurableCredentialsProvider::from_properties(&HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("username"));
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = JdbcCredentials::new(Some("app".into()), Some(secret("topsecret")));
        let debug = format!("{:?}", creds);

        assert!(debug.contains("app"));
        assert!(!debug.contains("topsecret"));
    }

    #[test]
    fn test_registry_unknown_name() {
        let registry = CredentialsProviderRegistry::with_builtins();
        let err = registry
            .create("SqliteHelper", &CredentialsProviderContext::default())
            .err()
            .expect("unknown provider");

        assert_eq!(err.category(), crate::error::ErrorCategory::Configuration);
        assert!(err.to_string().contains("SqliteHelper"));
    }

    #[test]
    fn test_registry_builtin_names() {
        let registry = CredentialsProviderRegistry::default();

        assert!(registry.contains("default"));
        assert!(registry.contains(" configurable "));
        assert!(registry.contains("DefaultJdbcCredentialsProvider"));
        assert!(registry.contains("ConfigurableJdbcCredentialsProvider"));
        assert!(!CredentialsProviderRegistry::empty().contains("default"));
    }
}
