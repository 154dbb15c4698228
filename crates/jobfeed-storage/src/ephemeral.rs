//! TTL key-value store with list operations. Redis in production, a map in tests.

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::EphemeralError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const SCAN_COUNT: usize = 500;
pub const RECONNECT_COOLDOWN: Duration = Duration::from_secs(5);

#[async_trait]
pub trait EphemeralStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool, EphemeralError>;

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration)
        -> Result<(), EphemeralError>;

    /// Keys matching a glob pattern; only a trailing `*` is relied upon.
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, EphemeralError>;

    async fn push_back(&self, list: &str, value: &str) -> Result<(), EphemeralError>;

    async fn pop_front(&self, list: &str) -> Result<Option<String>, EphemeralError>;

    async fn list_len(&self, list: &str) -> Result<usize, EphemeralError>;

    /// Up to `count` items from the head of the list, without removing them.
    async fn list_head(&self, list: &str, count: usize) -> Result<Vec<String>, EphemeralError>;
}

pub struct RedisEphemeralStore {
    client: redis::Client,
    slot: Mutex<ConnectionSlot>,
    cooldown: Duration,
}

#[derive(Default)]
struct ConnectionSlot {
    conn: Option<MultiplexedConnection>,
    /// Set after a failed connect; calls before this instant fail without dialing.
    retry_at: Option<Instant>,
}

impl RedisEphemeralStore {
    pub fn open(url: &str) -> Result<Self, EphemeralError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            slot: Mutex::new(ConnectionSlot::default()),
            cooldown: RECONNECT_COOLDOWN,
        })
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub async fn is_cooling_down(&self) -> bool {
        let slot = self.slot.lock().await;
        slot.retry_at.is_some_and(|at| Instant::now() < at)
    }

    async fn connection(&self) -> Result<MultiplexedConnection, EphemeralError> {
        let mut slot = self.slot.lock().await;
        if let Some(conn) = slot.conn.as_ref() {
            return Ok(conn.clone());
        }
        if slot.retry_at.is_some_and(|at| Instant::now() < at) {
            return Err(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "redis unreachable; waiting before reconnecting",
            ))
            .into());
        }

        let connected = tokio::time::timeout(
            CONNECT_TIMEOUT,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .unwrap_or_else(|_| {
            Err(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "redis connect timed out",
            )))
        });
        match connected {
            Ok(conn) => {
                debug!("opened redis connection");
                slot.retry_at = None;
                slot.conn = Some(conn.clone());
                Ok(conn)
            }
            Err(err) => {
                warn!(
                    error = %err,
                    cooldown_ms = u64::try_from(self.cooldown.as_millis()).unwrap_or(u64::MAX),
                    "redis connect failed"
                );
                slot.retry_at = Instant::now().checked_add(self.cooldown);
                Err(err.into())
            }
        }
    }

    /// Drop the cached connection after a transport failure so the next call reconnects.
    async fn observe<T>(&self, result: redis::RedisResult<T>) -> Result<T, EphemeralError> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
                    warn!(error = %err, "resetting redis connection");
                    self.slot.lock().await.conn.take();
                }
                Err(err.into())
            }
        }
    }
}

#[async_trait]
impl EphemeralStore for RedisEphemeralStore {
    async fn exists(&self, key: &str) -> Result<bool, EphemeralError> {
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<bool> = conn.exists(key).await;
        self.observe(result).await
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), EphemeralError> {
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<()> = conn.set_ex(key, value, ttl.as_secs().max(1)).await;
        self.observe(result).await
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, EphemeralError> {
        let mut conn = self.connection().await?;
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let result: redis::RedisResult<(u64, Vec<String>)> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await;
            let (next, batch) = self.observe(result).await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn push_back(&self, list: &str, value: &str) -> Result<(), EphemeralError> {
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<i64> = conn.rpush(list, value).await;
        self.observe(result).await.map(|_| ())
    }

    async fn pop_front(&self, list: &str) -> Result<Option<String>, EphemeralError> {
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<Option<String>> =
            conn.lpop(list, None::<NonZeroUsize>).await;
        self.observe(result).await
    }

    async fn list_len(&self, list: &str) -> Result<usize, EphemeralError> {
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<usize> = conn.llen(list).await;
        self.observe(result).await
    }

    async fn list_head(&self, list: &str, count: usize) -> Result<Vec<String>, EphemeralError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;
        let stop = isize::try_from(count).unwrap_or(isize::MAX) - 1;
        let result: redis::RedisResult<Vec<String>> = conn.lrange(list, 0, stop).await;
        self.observe(result).await
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    values: HashMap<String, (String, Option<Instant>)>,
    lists: HashMap<String, VecDeque<String>>,
}

impl MemoryState {
    fn evict_expired(&mut self) {
        let now = Instant::now();
        self.values
            .retain(|_, (_, expires_at)| expires_at.map_or(true, |at| at > now));
    }
}

/// Process-local stand-in honouring expiry, for tests and single-node runs.
#[derive(Debug, Default)]
pub struct MemoryEphemeralStore {
    state: Mutex<MemoryState>,
}

impl MemoryEphemeralStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.values.clear();
        state.lists.clear();
    }
}

fn glob_matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

#[async_trait]
impl EphemeralStore for MemoryEphemeralStore {
    async fn exists(&self, key: &str) -> Result<bool, EphemeralError> {
        let mut state = self.state.lock().await;
        state.evict_expired();
        Ok(state.values.contains_key(key) || state.lists.contains_key(key))
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), EphemeralError> {
        let mut state = self.state.lock().await;
        state
            .values
            .insert(key.to_string(), (value.to_string(), Some(Instant::now() + ttl)));
        Ok(())
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, EphemeralError> {
        let mut state = self.state.lock().await;
        state.evict_expired();
        let mut keys = state
            .values
            .keys()
            .chain(state.lists.keys())
            .filter(|key| glob_matches(pattern, key))
            .cloned()
            .collect::<Vec<_>>();
        keys.sort();
        Ok(keys)
    }

    async fn push_back(&self, list: &str, value: &str) -> Result<(), EphemeralError> {
        let mut state = self.state.lock().await;
        state
            .lists
            .entry(list.to_string())
            .or_default()
            .push_back(value.to_string());
        Ok(())
    }

    async fn pop_front(&self, list: &str) -> Result<Option<String>, EphemeralError> {
        let mut state = self.state.lock().await;
        let Some(items) = state.lists.get_mut(list) else {
            return Ok(None);
        };
        let popped = items.pop_front();
        if items.is_empty() {
            state.lists.remove(list);
        }
        Ok(popped)
    }

    async fn list_len(&self, list: &str) -> Result<usize, EphemeralError> {
        let state = self.state.lock().await;
        Ok(state.lists.get(list).map_or(0, VecDeque::len))
    }

    async fn list_head(&self, list: &str, count: usize) -> Result<Vec<String>, EphemeralError> {
        let state = self.state.lock().await;
        Ok(state
            .lists
            .get(list)
            .map(|items| items.iter().take(count).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn values_expire_after_ttl() {
        let store = MemoryEphemeralStore::new();
        store
            .set_with_expiry("jobs:dedup:abc", "1", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(store.exists("jobs:dedup:abc").await.unwrap());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!store.exists("jobs:dedup:abc").await.unwrap());
        assert!(store.scan_keys("jobs:dedup:*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_redis_connect_cools_down_before_redialing() {
        let store = RedisEphemeralStore::open("redis://127.0.0.1:1/")
            .unwrap()
            .with_cooldown(Duration::from_millis(200));
        assert!(!store.is_cooling_down().await);

        let err = store.exists("jobs:dedup:x").await.unwrap_err();
        assert_eq!(err.class(), jobfeed_core::FailureClass::Unavailable);
        assert!(store.is_cooling_down().await);

        let err = store.push_back("email_queue", "{}").await.unwrap_err();
        assert!(err.to_string().contains("waiting before reconnecting"), "{err}");

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!store.is_cooling_down().await);
    }

    #[tokio::test]
    async fn lists_are_fifo_and_peekable() {
        let store = MemoryEphemeralStore::new();
        for item in ["a", "b", "c"] {
            store.push_back("queue", item).await.unwrap();
        }
        assert_eq!(store.list_len("queue").await.unwrap(), 3);
        assert_eq!(store.list_head("queue", 2).await.unwrap(), vec!["a", "b"]);
        assert_eq!(store.pop_front("queue").await.unwrap().as_deref(), Some("a"));
        assert_eq!(store.list_len("queue").await.unwrap(), 2);
        assert_eq!(store.pop_front("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn scan_matches_prefix_patterns() {
        let store = MemoryEphemeralStore::new();
        let ttl = Duration::from_secs(60);
        store.set_with_expiry("jobs:dedup:1", "1", ttl).await.unwrap();
        store.set_with_expiry("jobs:dedup:2", "1", ttl).await.unwrap();
        store.set_with_expiry("other:1", "1", ttl).await.unwrap();

        let keys = store.scan_keys("jobs:dedup:*").await.unwrap();
        assert_eq!(keys, vec!["jobs:dedup:1", "jobs:dedup:2"]);

        store.clear().await;
        assert!(store.scan_keys("*").await.unwrap().is_empty());
    }
}
