use anyhow::Result;
use async_trait::async_trait;
use cached::stores::TimedCache;
use cached::Cached;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Short-lived key/value storage for game state.
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
}

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process store. Entries expire after their own ttl; the cache lifespan
/// only bounds how long anything can stay around. Writes sweep out whatever
/// has expired so abandoned keys do not pile up.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    max_ttl: Duration,
}

struct Inner {
    cache: TimedCache<String, Entry>,
    expiries: BinaryHeap<Reverse<(Instant, String)>>,
}

impl Inner {
    fn sweep(&mut self, now: Instant) {
        self.cache.flush();
        while let Some(Reverse((expires_at, _))) = self.expiries.peek() {
            if *expires_at > now {
                break;
            }
            let Some(Reverse((expires_at, key))) = self.expiries.pop() else {
                break;
            };
            // the key may have been set again with a later expiry
            let stale = self
                .cache
                .cache_get(&key)
                .map_or(false, |entry| entry.expires_at <= expires_at);
            if stale {
                self.cache.cache_remove(&key);
            }
        }
        if self.expiries.len() > 2 * self.cache.cache_size() + 64 {
            self.expiries
                .retain(|Reverse((_, key))| self.cache.cache_get(key).is_some());
        }
    }
}

impl MemoryStore {
    pub fn new(max_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                cache: TimedCache::with_lifespan(max_ttl.as_secs().max(1)),
                expiries: BinaryHeap::new(),
            }),
            max_ttl,
        }
    }

    /// Number of entries currently held, expired or not.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.cache.cache_size()
    }
}

#[async_trait]
impl EphemeralStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut lock = self.inner.lock().await;
        let key = key.to_string();
        let value = match lock.cache.cache_get(&key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => None,
            None => return Ok(None),
        };
        if value.is_none() {
            lock.cache.cache_remove(&key);
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        if ttl > self.max_ttl {
            tracing::debug!(
                "ttl {:?} for {} exceeds store lifespan {:?}, clamping",
                ttl,
                key,
                self.max_ttl
            );
        }
        let now = Instant::now();
        let expires_at = now + ttl.min(self.max_ttl);
        let mut lock = self.inner.lock().await;
        lock.sweep(now);
        lock.cache.cache_set(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        lock.expiries.push(Reverse((expires_at, key.to_string())));
        Ok(())
    }
}
