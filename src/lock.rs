//! Cross-process mutual exclusion on top of a shared [`KvStore`].
//!
//! Each acquisition stores a fresh random owner token under the lock key
//! with a TTL. Release is an atomic compare-and-delete on that token, so a
//! holder whose lock already expired can never delete the lock of whoever
//! acquired it next.

use crate::error::{Error, Result};
use crate::kv::KvStore;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Acquisition parameters.
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    pub ttl: Duration,
    /// How long to keep polling before giving up with `LockTimeout`.
    pub timeout: Duration,
    pub retry_interval: Duration,
}

impl LockOptions {
    /// A single attempt that fails with `LockTimeout` when the key is held.
    pub fn try_once(ttl: Duration) -> Self {
        Self {
            ttl,
            timeout: Duration::ZERO,
            retry_interval: Duration::ZERO,
        }
    }
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            timeout: Duration::from_secs(30),
            retry_interval: Duration::from_millis(200),
        }
    }
}

#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn KvStore>,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Poll until the key is free or `options.timeout` elapses.
    pub async fn acquire(&self, key: &str, options: LockOptions) -> Result<LockGuard> {
        let started = Instant::now();
        let deadline = started + options.timeout;

        loop {
            if let Some(guard) = self.attempt(key, options.ttl).await? {
                return Ok(guard);
            }
            if Instant::now() >= deadline {
                record(key, "timeout");
                return Err(Error::LockTimeout {
                    key: key.to_string(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            tokio::time::sleep(options.retry_interval).await;
        }
    }

    /// Single attempt. `Ok(None)` when somebody else holds the lock.
    pub async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockGuard>> {
        let guard = self.attempt(key, ttl).await?;
        if guard.is_none() {
            record(key, "busy");
        }
        Ok(guard)
    }

    async fn attempt(&self, key: &str, ttl: Duration) -> Result<Option<LockGuard>> {
        let token = Uuid::new_v4().simple().to_string();
        if !self.store.set_nx(key, &token, ttl).await? {
            return Ok(None);
        }
        debug!(key, "lock acquired");
        record(key, "acquired");
        Ok(Some(LockGuard {
            store: Arc::clone(&self.store),
            key: key.to_string(),
            token,
            released: false,
        }))
    }

    /// Run `f` under the lock and release afterwards, whatever `f` returned.
    pub async fn with_lock<T, F, Fut>(&self, key: &str, options: LockOptions, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let guard = self.acquire(key, options).await?;
        let outcome = f().await;
        if let Err(e) = guard.release().await {
            warn!(key, error = %e, "lock release failed, relying on TTL");
        }
        outcome
    }
}

/// A held lock. Release explicitly with [`LockGuard::release`]; a guard
/// dropped unreleased (panic, cancelled future) schedules a best-effort
/// release on the current runtime.
pub struct LockGuard {
    store: Arc<dyn KvStore>,
    key: String,
    token: String,
    released: bool,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// True if the lock was still ours and is now deleted; false if it had
    /// expired and may belong to someone else (left untouched).
    pub async fn release(mut self) -> Result<bool> {
        self.released = true;
        let deleted = self
            .store
            .compare_and_delete(&self.key, &self.token)
            .await?;
        if deleted {
            debug!(key = %self.key, "lock released");
            record(&self.key, "released");
        } else {
            warn!(key = %self.key, "lock expired before release");
            record(&self.key, "stale");
        }
        Ok(deleted)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let store = Arc::clone(&self.store);
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        handle.spawn(async move {
            if let Err(e) = store.compare_and_delete(&key, &token).await {
                warn!(key = %key, error = %e, "deferred lock release failed");
            }
        });
    }
}

fn record(key: &str, result: &'static str) {
    metrics::lock_operations().add(
        1,
        &[
            KeyValue::new("key", key.to_string()),
            KeyValue::new("result", result),
        ],
    );
}
