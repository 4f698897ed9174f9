//! Testing utilities for connection providers
//!
//! In-memory fakes that stand in for a database driver:
//! - [`MockConnection`]: a connection whose liveness can be flipped at will
//! - [`ScriptedConnectionProvider`]: a raw provider that fails or succeeds on
//!   a scripted schedule
//! - [`MockConnectionFactory`]: a driver factory that records what it was
//!   asked to connect with
//!
//! # Example
//!
//! ```rust,ignore
//! use rivven_jdbc_sink::testing::ScriptedConnectionProvider;
//!
//! let raw = Arc::new(ScriptedConnectionProvider::new().fail_times(14));
//! let cache = CachedConnectionProvider::new(raw.clone(), 15, Duration::from_millis(1));
//!
//! cache.get_connection().await?;
//! assert_eq!(raw.attempts(), 15);
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use secrecy::ExposeSecret;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::connection::{
    Connection, ConnectionConfig, ConnectionFactory, DatabaseType, RawConnectionProvider,
};
use crate::error::{Error, Result};

// ============================================================================
// Mock Connection
// ============================================================================

/// Shared, observable state of a [`MockConnection`]
#[derive(Debug)]
pub struct MockConnectionState {
    id: u64,
    valid: AtomicBool,
    fail_close: AtomicBool,
    close_calls: AtomicU32,
    executed: Mutex<Vec<String>>,
}

impl MockConnectionState {
    /// Identifier assigned at creation
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Make the connection (in)valid
    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::SeqCst);
    }

    /// Make `close` report an error
    pub fn set_fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Number of `close` calls
    pub fn close_calls(&self) -> u32 {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Whether `close` was called at least once
    pub fn is_closed(&self) -> bool {
        self.close_calls() > 0
    }

    /// Statements executed so far
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

/// A fake connection
#[derive(Debug, Clone)]
pub struct MockConnection {
    state: Arc<MockConnectionState>,
}

impl MockConnection {
    /// Create a valid connection with the given id
    pub fn new(id: u64) -> Self {
        Self {
            state: Arc::new(MockConnectionState {
                id,
                valid: AtomicBool::new(true),
                fail_close: AtomicBool::new(false),
                close_calls: AtomicU32::new(0),
                executed: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Handle to the shared state
    pub fn state(&self) -> Arc<MockConnectionState> {
        Arc::clone(&self.state)
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn execute(&self, sql: &str) -> Result<u64> {
        if self.state.is_closed() || !self.state.valid.load(Ordering::SeqCst) {
            return Err(Error::connection("connection is broken"));
        }
        self.state.executed.lock().push(sql.to_string());
        Ok(0)
    }

    async fn is_valid(&self, _timeout: Duration) -> bool {
        !self.state.is_closed() && self.state.valid.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.state.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_close.load(Ordering::SeqCst) {
            return Err(Error::connection("close failed"));
        }
        Ok(())
    }
}

// ============================================================================
// Scripted raw provider
// ============================================================================

/// Outcome of one scripted connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Fail the attempt
    Fail,
    /// Hand out a new connection
    Succeed,
}

/// Raw provider driven by a script of attempt outcomes.
///
/// Once the script runs out every further attempt uses the fallback step
/// (`Succeed` unless [`always_fail`](Self::always_fail) was called).
#[derive(Debug)]
pub struct ScriptedConnectionProvider {
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    connect_delay: Duration,
    attempts: AtomicU32,
    probes: AtomicU32,
    close_calls: AtomicU32,
    next_id: AtomicU64,
    connections: Mutex<Vec<Arc<MockConnectionState>>>,
    attempted: Notify,
}

impl Default for ScriptedConnectionProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedConnectionProvider {
    /// Provider whose attempts all succeed
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Step::Succeed,
            connect_delay: Duration::ZERO,
            attempts: AtomicU32::new(0),
            probes: AtomicU32::new(0),
            close_calls: AtomicU32::new(0),
            next_id: AtomicU64::new(1),
            connections: Mutex::new(Vec::new()),
            attempted: Notify::new(),
        }
    }

    /// Fail the next `n` scripted attempts
    pub fn fail_times(self, n: u32) -> Self {
        self.script
            .lock()
            .extend(std::iter::repeat(Step::Fail).take(n as usize));
        self
    }

    /// Succeed on the next scripted attempt
    pub fn then_succeed(self) -> Self {
        self.script.lock().push_back(Step::Succeed);
        self
    }

    /// Fail every attempt past the script
    pub fn always_fail(mut self) -> Self {
        self.fallback = Step::Fail;
        self
    }

    /// Delay every attempt by `delay`
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Number of `get_connection` calls that completed
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Number of validity probes
    pub fn probes(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }

    /// Number of `close` calls
    pub fn close_calls(&self) -> u32 {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// State of every connection handed out, oldest first
    pub fn connections(&self) -> Vec<Arc<MockConnectionState>> {
        self.connections.lock().clone()
    }

    /// Wait until an attempt has completed since the last wait
    pub async fn wait_for_attempt(&self) {
        self.attempted.notified().await;
    }
}

#[async_trait]
impl RawConnectionProvider for ScriptedConnectionProvider {
    async fn get_connection(&self) -> Result<Box<dyn Connection>> {
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }

        let step = self.script.lock().pop_front().unwrap_or(self.fallback);
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        let outcome: Result<Box<dyn Connection>> = match step {
            Step::Fail => Err(Error::connection(format!("scripted failure #{}", attempt))),
            Step::Succeed => {
                let conn = MockConnection::new(self.next_id.fetch_add(1, Ordering::SeqCst));
                self.connections.lock().push(conn.state());
                Ok(Box::new(conn))
            }
        };

        self.attempted.notify_one();
        outcome
    }

    async fn is_connection_valid(&self, conn: &dyn Connection, timeout: Duration) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        conn.is_valid(timeout).await
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Mock driver factory
// ============================================================================

/// What a [`MockConnectionFactory`] was asked to connect with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Connection URL
    pub url: String,
    /// Resolved user name
    pub user: Option<String>,
    /// Resolved password, exposed for assertions
    pub password: Option<String>,
}

/// Driver factory that hands out [`MockConnection`]s
#[derive(Debug, Default)]
pub struct MockConnectionFactory {
    failures_left: AtomicU32,
    connect_delay: Duration,
    requests: Mutex<Vec<ConnectRequest>>,
    connections: Mutex<Vec<Arc<MockConnectionState>>>,
}

impl MockConnectionFactory {
    /// Factory whose connects all succeed
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `n` connects
    pub fn fail_times(self, n: u32) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    /// Delay every connect by `delay`
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Connect requests seen so far
    pub fn requests(&self) -> Vec<ConnectRequest> {
        self.requests.lock().clone()
    }

    /// State of every connection handed out
    pub fn connections(&self) -> Vec<Arc<MockConnectionState>> {
        self.connections.lock().clone()
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        self.requests.lock().push(ConnectRequest {
            url: config.url.clone(),
            user: config.user.clone(),
            password: config
                .password
                .as_ref()
                .map(|p| p.expose_secret().to_string()),
        });

        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::connection("connection refused"));
        }

        let id = self.connections.lock().len() as u64 + 1;
        let conn = MockConnection::new(id);
        self.connections.lock().push(conn.state());
        Ok(Box::new(conn))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Unknown
    }
}
