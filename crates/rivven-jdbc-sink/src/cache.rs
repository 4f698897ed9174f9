//! Cached, validity-checked, retrying connection provider
//!
//! [`CachedConnectionProvider`] keeps one logical connection slot. Each
//! [`get_connection`](CachedConnectionProvider::get_connection) call either
//! reuses the cached connection after a validity probe, or runs a bounded
//! acquisition loop with a fixed backoff between failed attempts.
//!
//! Closing the provider wins over an in-flight loop: the backoff sleep is
//! raced against a cancellation token, so a blocked caller returns
//! [`Error::Closed`] instead of spending its whole retry budget.
//!
//! Owners should call [`close`](CachedConnectionProvider::close) before
//! dropping the provider. Dropping it with a cached connection only spawns a
//! best-effort release on the current runtime, and the raw provider is not
//! closed.
//!
//! # Example
//!
//! ```rust,ignore
//! use rivven_jdbc_sink::prelude::*;
//!
//! let cache = Arc::new(CachedConnectionProvider::new(
//!     Arc::new(DriverConnectionProvider::new(factory, config, credentials)),
//!     3,
//!     Duration::from_secs(10),
//! ));
//!
//! let conn = cache.get_connection().await?;
//! conn.execute("INSERT INTO t VALUES (1)").await?;
//!
//! // during shutdown, from another task
//! cache.close(true).await;
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connection::{Connection, RawConnectionProvider};
use crate::error::{Error, Result};

/// Retry budget that never runs out in practice
pub const UNBOUNDED_RETRIES: u32 = u32::MAX;

/// Default upper bound for the validity probe on a cached connection
pub const DEFAULT_VALIDITY_TIMEOUT: Duration = Duration::from_secs(5);

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Raw acquisition attempts, successful or not
    pub attempts: u64,
    /// Failed raw acquisition attempts
    pub failures: u64,
    /// Connections committed to the cache
    pub connections_created: u64,
    /// Connections released by the cache
    pub connections_released: u64,
    /// Calls served from the cache
    pub cache_hits: u64,
    /// Cached connections that failed the validity probe
    pub probe_failures: u64,
}

/// Atomic cache stats for concurrent updates
#[derive(Debug, Default)]
#[allow(missing_docs)]
pub struct AtomicCacheStats {
    pub attempts: AtomicU64,
    pub failures: AtomicU64,
    pub connections_created: AtomicU64,
    pub connections_released: AtomicU64,
    pub cache_hits: AtomicU64,
    pub probe_failures: AtomicU64,
}

impl AtomicCacheStats {
    /// Create new atomic stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a raw acquisition attempt
    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed raw acquisition attempt
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection committed to the cache
    pub fn record_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a released connection
    pub fn record_released(&self) {
        self.connections_released.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cache hit
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed validity probe
    pub fn record_probe_failure(&self) {
        self.probe_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot current stats
    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            attempts: self.attempts.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_released: self.connections_released.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            probe_failures: self.probe_failures.load(Ordering::Relaxed),
        }
    }
}

/// Connection provider that caches a single connection and retries on failure.
pub struct CachedConnectionProvider {
    /// Wrapped raw provider
    raw: Arc<dyn RawConnectionProvider>,
    /// Attempts allowed per acquisition loop
    max_retries: u32,
    /// Fixed delay between failed attempts
    backoff: Duration,
    /// Bound for the probe on a cached connection
    validity_timeout: Duration,
    /// The single connection slot. The lock spans probe, acquisition and replacement.
    current: Mutex<Option<Arc<dyn Connection>>>,
    /// Monotonic, readable without the slot lock so close can reach a running loop
    closed: AtomicBool,
    /// Cancels blocked waits on `close(true)`
    shutdown: CancellationToken,
    stats: AtomicCacheStats,
}

impl CachedConnectionProvider {
    /// Wrap `raw` with a retry budget of `max_retries` attempts and a fixed `backoff`.
    ///
    /// A budget of zero is raised to one attempt.
    pub fn new(raw: Arc<dyn RawConnectionProvider>, max_retries: u32, backoff: Duration) -> Self {
        if max_retries == 0 {
            warn!("Connection retry budget of 0 raised to a single attempt");
        }

        Self {
            raw,
            max_retries: max_retries.max(1),
            backoff,
            validity_timeout: DEFAULT_VALIDITY_TIMEOUT,
            current: Mutex::new(None),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            stats: AtomicCacheStats::new(),
        }
    }

    /// Set the validity probe timeout
    pub fn with_validity_timeout(mut self, timeout: Duration) -> Self {
        self.validity_timeout = timeout;
        self
    }

    /// Attempts allowed per acquisition loop
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay between failed attempts
    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Validity probe timeout
    pub fn validity_timeout(&self) -> Duration {
        self.validity_timeout
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// Return a usable connection, reusing the cached one when it is still valid.
    ///
    /// Fails with [`Error::Closed`] once the provider is closed, and with
    /// [`Error::RetriesExhausted`] when every attempt of the acquisition loop
    /// failed.
    pub async fn get_connection(&self) -> Result<Arc<dyn Connection>> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let mut slot = self.current.lock().await;

        // close may have run while we waited for the slot
        if self.is_closed() {
            return Err(Error::Closed);
        }

        if let Some(conn) = slot.as_ref() {
            if self
                .raw
                .is_connection_valid(conn.as_ref(), self.validity_timeout)
                .await
            {
                self.stats.record_cache_hit();
                return Ok(Arc::clone(conn));
            }

            debug!("Cached connection failed validity check, reconnecting");
            self.stats.record_probe_failure();
            if let Some(stale) = slot.take() {
                self.release(stale).await;
            }
        }

        let conn = self.acquire().await?;
        *slot = Some(Arc::clone(&conn));
        Ok(conn)
    }

    /// Acquisition loop. Runs with the slot lock held.
    async fn acquire(&self) -> Result<Arc<dyn Connection>> {
        let mut attempts: u32 = 0;

        loop {
            if self.is_closed() {
                debug!(attempts, "Provider closed, abandoning connection attempts");
                return Err(Error::Closed);
            }

            let outcome = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Err(Error::Closed),
                result = self.raw.get_connection() => result,
            };

            attempts += 1;
            self.stats.record_attempt();

            match outcome {
                Ok(conn) => {
                    let conn: Arc<dyn Connection> = Arc::from(conn);
                    if self.is_closed() {
                        debug!("Provider closed while connecting, releasing new connection");
                        self.release(conn).await;
                        return Err(Error::Closed);
                    }

                    info!(attempt = attempts, "Established database connection");
                    self.stats.record_created();
                    return Ok(conn);
                }
                Err(e) => {
                    self.stats.record_failure();

                    // close during the attempt outranks the failure
                    if self.is_closed() {
                        debug!(attempts, error = %e, "Provider closed while connecting");
                        return Err(Error::Closed);
                    }

                    if attempts >= self.max_retries {
                        error!(
                            attempts,
                            error = %e,
                            "Failed to obtain database connection, no attempts left"
                        );
                        return Err(Error::retries_exhausted(attempts, e));
                    }

                    warn!(
                        attempt = attempts,
                        max_attempts = self.max_retries,
                        backoff_ms = self.backoff.as_millis() as u64,
                        error = %e,
                        "Unable to connect to database, will retry"
                    );

                    tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => return Err(Error::Closed),
                        _ = tokio::time::sleep(self.backoff) => {}
                    }
                }
            }
        }
    }

    /// Close the provider.
    ///
    /// Marks the provider closed, releases the cached connection and then the
    /// raw provider. With `release_immediately` any caller blocked in a backoff
    /// sleep or a connect attempt is woken at once; otherwise it stops at its
    /// next close check, at most one backoff interval later. A second call is a
    /// no-op.
    pub async fn close(&self, release_immediately: bool) {
        if release_immediately {
            self.shutdown.cancel();
        }

        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("Connection provider already closed");
            return;
        }

        info!(release_immediately, "Closing cached connection provider");

        let cached = self.current.lock().await.take();
        if let Some(conn) = cached {
            self.release(conn).await;
        }

        self.raw.close().await;
    }

    /// Best-effort release of a connection the cache no longer holds
    async fn release(&self, conn: Arc<dyn Connection>) {
        if let Err(e) = conn.close().await {
            warn!(error = %e, "Failed to close database connection");
        }
        self.stats.record_released();
    }
}

impl std::fmt::Debug for CachedConnectionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedConnectionProvider")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .field("validity_timeout", &self.validity_timeout)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Drop for CachedConnectionProvider {
    fn drop(&mut self) {
        let Some(conn) = self.current.get_mut().take() else {
            return;
        };

        warn!("Connection provider dropped without close, releasing cached connection");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = conn.close().await {
                        warn!(error = %e, "Failed to close database connection");
                    }
                });
            }
            Err(_) => {
                warn!("No async runtime available, cached connection dropped unclosed");
            }
        }
    }
}
