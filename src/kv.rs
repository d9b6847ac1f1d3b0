//! Shared key-value store primitives used by the distributed lock.
//!
//! `RedisKv` is the production backend. `MemoryKv` implements the same
//! contract inside one process, for single-replica runs and tests.

use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// Deletes KEYS[1] only while it still holds ARGV[1].
const COMPARE_AND_DELETE: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Set `key` to `value` with `ttl` only if absent. True when set.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn del(&self, key: &str) -> Result<()>;

    /// Atomically delete `key` if its value equals `expected`. True when deleted.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool>;
}

#[derive(Clone)]
pub struct RedisKv {
    conn: ConnectionManager,
    release: Script,
}

impl fmt::Debug for RedisKv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisKv")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisKv {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::Config(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client).await?;
        info!("connected to redis");
        Ok(Self {
            conn,
            release: Script::new(COMPARE_AND_DELETE),
        })
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }
}

/// In-process store with the same expiry and atomicity guarantees.
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if let Some((_, expires_at)) = entries.get(key) {
            if now < *expires_at {
                return Ok(false);
            }
        }
        entries.insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let entries = self.entries.lock();
        Ok(entries
            .get(key)
            .filter(|(_, expires_at)| now < *expires_at)
            .map(|(value, _)| value.clone()))
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let matches = matches!(
            entries.get(key),
            Some((value, expires_at)) if now < *expires_at && value == expected
        );
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn memory_set_nx_respects_ttl() {
        let kv = MemoryKv::new();
        assert!(kv.set_nx("k", "a", Duration::from_secs(5)).await.unwrap());
        assert!(!kv.set_nx("k", "b", Duration::from_secs(5)).await.unwrap());
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("a"));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(kv.get("k").await.unwrap(), None);
        assert!(kv.set_nx("k", "b", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn memory_compare_and_delete_checks_value() {
        let kv = MemoryKv::new();
        kv.set_nx("k", "mine", Duration::from_secs(5)).await.unwrap();
        assert!(!kv.compare_and_delete("k", "theirs").await.unwrap());
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("mine"));
        assert!(kv.compare_and_delete("k", "mine").await.unwrap());
        assert_eq!(kv.get("k").await.unwrap(), None);
    }
}
