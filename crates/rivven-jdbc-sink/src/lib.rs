//! # rivven-jdbc-sink
//!
//! Connection lifecycle for the Rivven JDBC sink connector.
//!
//! The sink writes through a single logical database connection. This crate
//! hands that connection out while hiding transient connectivity failures
//! behind a bounded, cancellable retry protocol.
//!
//! ## Features
//!
//! - **Cached Connection**: One connection slot, validated on every reuse
//! - **Bounded Retry**: Fixed backoff between attempts, configurable budget
//! - **Cancellable Shutdown**: `close` wakes a caller stuck in backoff
//! - **Pluggable Drivers**: `ConnectionFactory` / `RawConnectionProvider` traits
//! - **Credentials Providers**: Selected by name, resolved per connection
//! - **Typed Configuration**: Kafka-Connect style keys with validation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rivven_jdbc_sink::prelude::*;
//!
//! let config = JdbcSinkConfig::from_props(&props)?;
//! let provider = Arc::new(config.connection_provider(Arc::new(MyDriverFactory))?);
//!
//! // Worker task
//! let conn = provider.get_connection().await?;
//! conn.execute("INSERT INTO events VALUES (1)").await?;
//!
//! // Control task, on shutdown
//! provider.close(true).await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod cache;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod driver;
pub mod error;
pub mod table_type;
pub mod testing;
pub mod types;

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{Error, ErrorCategory, Result};

    // Connection traits and config
    pub use crate::connection::{
        Connection, ConnectionConfig, ConnectionFactory, DatabaseType, RawConnectionProvider,
    };

    // Cache types
    pub use crate::cache::{
        AtomicCacheStats, CacheStats, CachedConnectionProvider, DEFAULT_VALIDITY_TIMEOUT,
        UNBOUNDED_RETRIES,
    };

    // Driver-backed provider
    pub use crate::driver::DriverConnectionProvider;

    // Credentials
    pub use crate::credentials::{
        ConfigurableCredentialsProvider, CredentialsProvider, CredentialsProviderContext,
        CredentialsProviderRegistry, DefaultCredentialsProvider, JdbcCredentials,
    };

    // Configuration
    pub use crate::config::{InsertMode, JdbcSinkConfig, PrimaryKeyMode};
    pub use crate::table_type::{parse_table_types, TableType};
    pub use crate::types::SensitiveString;
}

// Re-export commonly used items at crate root
pub use cache::CachedConnectionProvider;
pub use error::{Error, Result};
