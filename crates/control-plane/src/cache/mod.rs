// Counter cache for rate limiting
// Decision: Use enum dispatch like StorageBackend (Redis in production, in-memory in dev)
// Decision: INCR and PEXPIRE run in one Lua script so a counter never outlives its window
// Decision: The window is armed by the first increment; later increments never extend it

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Cache key for a client's rate-limit counter
pub fn rate_limit_key(ip: &str) -> String {
    format!("rate_limit:{}", ip)
}

/// Counter cache that can be either Redis or in-memory
#[derive(Clone)]
pub enum CacheBackend {
    Redis(RedisCache),
    InMemory(Arc<InMemoryCache>),
}

impl CacheBackend {
    /// Connect to Redis
    pub async fn redis(url: &str) -> Result<Self> {
        Ok(Self::Redis(RedisCache::connect(url).await?))
    }

    pub fn in_memory() -> Self {
        Self::InMemory(Arc::new(InMemoryCache::default()))
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Redis(_) => "redis",
            Self::InMemory(_) => "memory",
        }
    }

    /// Increment a counter and return the new value.
    ///
    /// The first increment of a window arms its expiry. A key found without
    /// an expiry is re-armed as well.
    pub async fn incr(&self, key: &str, window: Duration) -> Result<i64> {
        match self {
            Self::Redis(cache) => cache.incr(key, window).await,
            Self::InMemory(cache) => Ok(cache.incr(key, window)),
        }
    }
}

// ============================================
// Redis
// ============================================

#[derive(Clone)]
pub struct RedisCache {
    conn: redis::aio::ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("Invalid Redis URL")?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;
        Ok(Self { conn })
    }

    async fn incr(&self, key: &str, window: Duration) -> Result<i64> {
        let mut conn = self.conn.clone();
        let count: i64 = redis::Script::new(INCR_WITH_EXPIRY)
            .key(key)
            .arg(window.as_millis() as u64)
            .invoke_async(&mut conn)
            .await
            .context("Redis INCR script failed")?;
        Ok(count)
    }
}

const INCR_WITH_EXPIRY: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 or redis.call('PTTL', KEYS[1]) == -1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

// ============================================
// In-memory
// ============================================

#[derive(Debug, Clone, Copy)]
struct Entry {
    count: i64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-memory counters with Redis-like expiry semantics
#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryCache {
    fn incr(&self, key: &str, window: Duration) -> i64 {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.to_string()).or_insert(Entry {
            count: 0,
            expires_at: None,
        });
        if entry.is_expired(now) {
            *entry = Entry {
                count: 0,
                expires_at: None,
            };
        }
        entry.count += 1;
        if entry.expires_at.is_none() {
            entry.expires_at = Some(now + window);
        }
        entry.count
    }
}
