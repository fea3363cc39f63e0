//! Exchange cache interface used by the OBO exchanger.
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, info};

/// Cache key for an exchanged token.
///
/// Scopes are normalised (sorted, de-duplicated) so request order does not
/// split the cache. The subject is always part of the key; there is no way
/// to look up a token without naming whose it is.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    subject: String,
    audience: String,
    scopes: Vec<String>,
}

impl CacheKey {
    pub fn new(subject: impl Into<String>, audience: impl Into<String>, scopes: &[String]) -> Self {
        let mut scopes = scopes.to_vec();
        scopes.sort();
        scopes.dedup();
        Self {
            subject: subject.into(),
            audience: audience.into(),
            scopes,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

}

#[derive(Clone)]
pub struct CachedToken {
    pub access_token: String,
    pub expires_at: Instant,
}

impl CachedToken {
    pub fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

impl fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedToken")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Keyed store of exchanged tokens.
///
/// Implementations must:
/// - never return an entry past its `expires_at`
/// - replace entries whole (insert-or-replace by key)
#[async_trait]
pub trait ExchangeCache: Send + Sync + 'static {
    // Returns the cache backend name (for logging).
    fn backend_name(&self) -> &'static str;

    async fn get(&self, key: &CacheKey) -> Option<CachedToken>;

    async fn insert(&self, key: CacheKey, token: CachedToken);

    // Drop expired entries. Returns how many were removed.
    async fn purge_expired(&self) -> usize;
}

/// In-process cache backed by a sharded concurrent map.
#[derive(Debug, Default)]
pub struct InMemoryExchangeCache {
    entries: DashMap<CacheKey, CachedToken>,
}

impl InMemoryExchangeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[async_trait]
impl ExchangeCache for InMemoryExchangeCache {
    fn backend_name(&self) -> &'static str {
        "in-memory"
    }

    async fn get(&self, key: &CacheKey) -> Option<CachedToken> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.is_fresh(now) {
                return Some(entry.clone());
            }
        }
        // Expired entries are invalidated, never refreshed in place.
        self.entries.remove_if(key, |_, token| !token.is_fresh(now));
        None
    }

    async fn insert(&self, key: CacheKey, token: CachedToken) {
        self.entries.insert(key, token);
    }

    async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, token| token.is_fresh(now));
        before.saturating_sub(self.entries.len())
    }
}

/// Spawn a background task that periodically evicts expired exchange tokens.
pub fn spawn_purge_task(
    cache: Arc<dyn ExchangeCache>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // Skip the first immediate tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let evicted = cache.purge_expired().await;
            if evicted > 0 {
                info!(evicted, backend = cache.backend_name(), "exchange cache purge");
            } else {
                debug!(backend = cache.backend_name(), "exchange cache purge: nothing expired");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(value: &str, ttl: Duration) -> CachedToken {
        CachedToken {
            access_token: value.to_string(),
            expires_at: Instant::now() + ttl,
        }
    }

    fn scopes(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn scope_order_does_not_change_the_key() {
        let a = CacheKey::new("alice", "api://b", &scopes(&["b.read", "a.write"]));
        let b = CacheKey::new("alice", "api://b", &scopes(&["a.write", "b.read", "a.write"]));
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn entries_are_isolated_per_subject() {
        let cache = InMemoryExchangeCache::new();
        let s = scopes(&["api://b/.default"]);
        let alice = CacheKey::new("alice", "api://b", &s);
        let bob = CacheKey::new("bob", "api://b", &s);

        cache.insert(alice.clone(), token("alice-token", Duration::from_secs(60))).await;
        cache.insert(bob.clone(), token("bob-token", Duration::from_secs(60))).await;

        assert_eq!(cache.get(&alice).await.unwrap().access_token, "alice-token");
        assert_eq!(cache.get(&bob).await.unwrap().access_token, "bob-token");
        assert!(cache.get(&CacheKey::new("carol", "api://b", &s)).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_never_served() {
        let cache = InMemoryExchangeCache::new();
        let key = CacheKey::new("alice", "api://b", &[]);
        cache.insert(key.clone(), token("t", Duration::from_secs(30))).await;

        assert!(cache.get(&key).await.is_some());
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cache.get(&key).await.is_none());
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_removes_only_expired_entries() {
        let cache = InMemoryExchangeCache::new();
        cache
            .insert(CacheKey::new("a", "x", &[]), token("short", Duration::from_secs(5)))
            .await;
        cache
            .insert(CacheKey::new("b", "x", &[]), token("long", Duration::from_secs(500)))
            .await;

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.len(), 1);
    }
}
