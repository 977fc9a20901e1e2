//! Key-value stores backing the response cache.
//!
//! A store holds two kinds of records:
//!
//! - **entries**: opaque byte values with a TTL, addressed by key and
//!   enumerable by key prefix
//! - **field hashes**: small string maps without expiry, used for per-model
//!   counters
//!
//! Single-key operations are atomic; nothing spans keys.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Errors raised by a cache store.
///
/// These never leave [`ResponseCache`](super::ResponseCache): every public
/// cache operation logs them and degrades to a miss.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Storage operations needed by the response cache.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Short backend label used in logs.
    fn backend(&self) -> &'static str;

    /// Fetch a live entry.
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Insert or replace an entry that expires after `ttl`.
    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()>;

    /// Remove an entry. Returns whether it existed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Keys of all live entries starting with `prefix`.
    async fn scan(&self, prefix: &str) -> CacheResult<Vec<String>>;

    /// Add `delta` to an integer field of a hash, creating both if absent.
    async fn incr_field(&self, key: &str, field: &str, delta: i64) -> CacheResult<i64>;

    /// Set a field of a hash.
    async fn set_field(&self, key: &str, field: &str, value: &str) -> CacheResult<()>;

    /// All fields of a hash; empty when the hash does not exist.
    async fn get_fields(&self, key: &str) -> CacheResult<HashMap<String, String>>;
}

/// Longest expiry a store honours; longer TTLs are clamped to it.
pub const MAX_TTL: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// In-process store on [`DashMap`].
///
/// Expired entries are dropped lazily when read, by [`sweep_expired`], or by
/// the optional background sweeper. With `max_entries > 0`, an insert that
/// overflows the store sweeps expired entries and, if still over, evicts the
/// entries closest to expiry (never the one just written). TTLs longer than
/// [`MAX_TTL`] are clamped.
///
/// [`sweep_expired`]: InMemoryStore::sweep_expired
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: DashMap<String, Entry>,
    hashes: DashMap<String, HashMap<String, String>>,
    max_entries: usize,
}

impl InMemoryStore {
    /// Unbounded store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding at most `max_entries` entries (0 means unbounded).
    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            max_entries,
            ..Self::default()
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let live = entry.expires_at > now;
            if !live {
                removed += 1;
            }
            live
        });
        if removed > 0 {
            debug!(removed, "swept expired cache entries");
        }
        removed
    }

    /// Sweep expired entries every `interval` until the store is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match store.upgrade() {
                    Some(store) => {
                        store.sweep_expired();
                    }
                    None => break,
                }
            }
        })
    }

    /// Bring the store back under `max_entries` after inserting `keep`.
    ///
    /// Runs after the insert rather than before it, so concurrent inserts of
    /// new keys cannot leave the store over its bound once they return.
    fn enforce_bound(&self, keep: &str) {
        if self.max_entries == 0 || self.entries.len() <= self.max_entries {
            return;
        }

        self.sweep_expired();
        while self.entries.len() > self.max_entries {
            // Pick the victim first so no shard guard is held during removal.
            let victim = self
                .entries
                .iter()
                .filter(|entry| entry.key() != keep)
                .min_by_key(|entry| entry.value().expires_at)
                .map(|entry| entry.key().clone());
            let Some(victim) = victim else { break };
            if self.entries.remove(&victim).is_some() {
                debug!(key = %victim, "evicted cache entry closest to expiry");
            }
        }
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        }
        Ok(None)
    }

    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl.min(MAX_TTL))
            .unwrap_or_else(|| now + MAX_TTL / 1000);
        self.entries
            .insert(key.to_string(), Entry { value, expires_at });
        self.enforce_bound(key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn scan(&self, prefix: &str) -> CacheResult<Vec<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && entry.value().expires_at > now)
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn incr_field(&self, key: &str, field: &str, delta: i64) -> CacheResult<i64> {
        let mut hash = self.hashes.entry(key.to_string()).or_default();
        let current = match hash.get(field) {
            Some(raw) => raw.parse::<i64>().map_err(|_| {
                CacheError::Backend(format!("hash field {key}.{field} is not an integer"))
            })?,
            None => 0,
        };
        let next = current + delta;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn set_field(&self, key: &str, field: &str, value: &str) -> CacheResult<()> {
        self.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn get_fields(&self, key: &str) -> CacheResult<HashMap<String, String>> {
        Ok(self
            .hashes
            .get(key)
            .map(|hash| hash.value().clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_lazily() {
        let store = InMemoryStore::new();
        store
            .set_with_ttl("k", b"v".to_vec(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_skips_expired_and_foreign_keys() {
        let store = InMemoryStore::new();
        store.set_with_ttl("p:a", vec![1], Duration::from_secs(5)).await.unwrap();
        store.set_with_ttl("p:b", vec![2], Duration::from_secs(60)).await.unwrap();
        store.set_with_ttl("q:c", vec![3], Duration::from_secs(60)).await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        let mut keys = store.scan("p:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["p:b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_expired() {
        let store = InMemoryStore::new();
        store.set_with_ttl("short", vec![], Duration::from_secs(1)).await.unwrap();
        store.set_with_ttl("long", vec![], Duration::from_secs(100)).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.sweep_expired(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get("long").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_store_prefers_expired_victims() {
        let store = InMemoryStore::with_max_entries(2);
        store.set_with_ttl("stale", vec![], Duration::from_secs(1)).await.unwrap();
        store.set_with_ttl("fresh", vec![], Duration::from_secs(100)).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        store.set_with_ttl("new", vec![], Duration::from_secs(100)).await.unwrap();

        assert_eq!(store.len(), 2);
        assert!(store.get("fresh").await.unwrap().is_some());
        assert!(store.get("new").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_store_evicts_closest_to_expiry() {
        let store = InMemoryStore::with_max_entries(2);
        store.set_with_ttl("soon", vec![], Duration::from_secs(10)).await.unwrap();
        store.set_with_ttl("later", vec![], Duration::from_secs(100)).await.unwrap();
        store.set_with_ttl("new", vec![], Duration::from_secs(50)).await.unwrap();

        assert_eq!(store.len(), 2);
        assert!(store.get("soon").await.unwrap().is_none());
        assert!(store.get("later").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_huge_ttl_is_clamped() {
        let store = InMemoryStore::new();
        store
            .set_with_ttl("k", vec![1], Duration::from_secs(u64::MAX))
            .await
            .unwrap();
        store.set_with_ttl("m", vec![2], Duration::MAX).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(vec![1]));
        assert_eq!(store.get("m").await.unwrap(), Some(vec![2]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_inserts_respect_bound() {
        let store = Arc::new(InMemoryStore::with_max_entries(8));
        let writers: Vec<_> = (0..8)
            .map(|w| {
                let store = store.clone();
                tokio::spawn(async move {
                    for i in 0..100 {
                        store
                            .set_with_ttl(&format!("w{w}-{i}"), vec![], Duration::from_secs(60))
                            .await
                            .unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }
        assert!(store.len() <= 8, "store grew to {}", store.len());
    }

    #[tokio::test]
    async fn test_replacing_key_never_evicts() {
        let store = InMemoryStore::with_max_entries(1);
        store.set_with_ttl("k", vec![1], Duration::from_secs(60)).await.unwrap();
        store.set_with_ttl("k", vec![2], Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(vec![2]));
    }

    #[tokio::test]
    async fn test_field_hash_counters() {
        let store = InMemoryStore::new();
        assert_eq!(store.incr_field("h", "n", 1).await.unwrap(), 1);
        assert_eq!(store.incr_field("h", "n", 2).await.unwrap(), 3);
        store.set_field("h", "when", "now").await.unwrap();

        let fields = store.get_fields("h").await.unwrap();
        assert_eq!(fields["n"], "3");
        assert_eq!(fields["when"], "now");
        assert!(store.get_fields("missing").await.unwrap().is_empty());

        assert!(store.incr_field("h", "when", 1).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweeper() {
        let store = Arc::new(InMemoryStore::new());
        store.set_with_ttl("k", vec![], Duration::from_secs(1)).await.unwrap();
        let sweeper = store.spawn_sweeper(Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(store.is_empty());

        drop(store);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(sweeper.is_finished());
    }
}
