//! Response Cache
//!
//! Fingerprint-keyed cache of model responses on a pluggable [`CacheStore`].
//!
//! Key layout, with the default prefix `model_cache`:
//!
//! ```text
//! model_cache:<model id>:<sha256 hex fingerprint>   cached response (JSON, TTL)
//! model_cache_stats:<model id>                      hash: total_cached, last_cached,
//!                                                         cache_hits, cache_misses
//! ```
//!
//! The cache is best-effort. Store failures are logged and surface as a miss
//! (or as a no-op for writes); no operation here returns an error.
//!
//! `clear` enumerates matching keys and deletes them one by one. Entries stored
//! after the enumeration started survive the clear.

pub mod store;

#[cfg(feature = "redis")]
pub mod redis_store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use modelhub_kernel::{GenerationOptions, ModelResponse};

pub use store::{CacheError, CacheResult, CacheStore, InMemoryStore, MAX_TTL};

#[cfg(feature = "redis")]
pub use redis_store::RedisStore;

/// Default entry lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Default bound on memory-store entries.
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Default key namespace.
pub const DEFAULT_KEY_PREFIX: &str = "model_cache";

/// Length of a hex-encoded fingerprint.
const FINGERPRINT_LEN: usize = 64;

const TOTAL_CACHED: &str = "total_cached";
const LAST_CACHED: &str = "last_cached";
const CACHE_HITS: &str = "cache_hits";
const CACHE_MISSES: &str = "cache_misses";

/// A stored response with its caching metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    #[serde(flatten)]
    pub response: ModelResponse,
    pub cached_at: DateTime<Utc>,
    /// TTL in seconds that was in effect when the entry was written
    pub cache_ttl: u64,
}

/// Per-model cache counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub total_cached: u64,
    pub last_cached: Option<DateTime<Utc>>,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Fingerprint-keyed response cache.
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    key_prefix: String,
    default_ttl: Duration,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("backend", &self.store.backend())
            .field("key_prefix", &self.key_prefix)
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl ResponseCache {
    /// Cache on `store` with the default prefix and TTL.
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            default_ttl: DEFAULT_TTL,
        }
    }

    /// Cache on a fresh [`InMemoryStore`] bounded to `max_entries`.
    pub fn in_memory(max_entries: usize) -> Self {
        Self::new(Arc::new(InMemoryStore::with_max_entries(max_entries)))
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn backing_store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Stable digest of a request.
    ///
    /// SHA-256 over `model \0 prompt \0 canonical(options)`, hex encoded.
    /// Options are canonicalized with sorted keys, so their insertion order
    /// never changes the result.
    pub fn fingerprint(model_id: &str, prompt: &str, options: &GenerationOptions) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(prompt.as_bytes());
        hasher.update([0u8]);
        hasher.update(options.canonical().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Store key of a request.
    pub fn entry_key(&self, model_id: &str, prompt: &str, options: &GenerationOptions) -> String {
        format!(
            "{}{}",
            self.model_prefix(model_id),
            Self::fingerprint(model_id, prompt, options)
        )
    }

    fn model_prefix(&self, model_id: &str) -> String {
        format!("{}:{}:", self.key_prefix, model_id)
    }

    fn stats_key(&self, model_id: &str) -> String {
        format!("{}_stats:{}", self.key_prefix, model_id)
    }

    /// Cached response for a request, if a live entry exists.
    pub async fn lookup(
        &self,
        model_id: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Option<ModelResponse> {
        self.lookup_entry(model_id, prompt, options)
            .await
            .map(|entry| entry.response)
    }

    /// Like [`lookup`](Self::lookup), keeping `cached_at` and `cache_ttl`.
    pub async fn lookup_entry(
        &self,
        model_id: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Option<CachedResponse> {
        let key = self.entry_key(model_id, prompt, options);
        match self.read_entry(&key).await {
            Ok(Some(entry)) => {
                debug!(model = %model_id, "cache hit");
                Some(entry)
            }
            Ok(None) => {
                debug!(model = %model_id, "cache miss");
                None
            }
            Err(e) => {
                error!(model = %model_id, backend = self.store.backend(), "Error retrieving cached response: {}", e);
                None
            }
        }
    }

    async fn read_entry(&self, key: &str) -> CacheResult<Option<CachedResponse>> {
        match self.store.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Cache `response` for a request.
    ///
    /// `ttl` falls back to the cache default. A zero TTL stores nothing. On
    /// success the model's `total_cached` counter and `last_cached` time are
    /// updated.
    pub async fn store(
        &self,
        model_id: &str,
        prompt: &str,
        response: &ModelResponse,
        ttl: Option<Duration>,
        options: &GenerationOptions,
    ) {
        let ttl = ttl.unwrap_or(self.default_ttl).min(MAX_TTL);
        if ttl.is_zero() {
            debug!(model = %model_id, "zero ttl, response not cached");
            return;
        }

        let key = self.entry_key(model_id, prompt, options);
        let entry = CachedResponse {
            response: response.clone(),
            cached_at: Utc::now(),
            cache_ttl: ttl.as_secs(),
        };
        if let Err(e) = self.write_entry(&key, &entry, ttl).await {
            error!(model = %model_id, backend = self.store.backend(), "Error caching response: {}", e);
            return;
        }
        debug!(model = %model_id, ttl_secs = ttl.as_secs(), "cached response");

        if let Err(e) = self.bump_cached(model_id, entry.cached_at).await {
            error!(model = %model_id, "Error updating cache stats: {}", e);
        }
    }

    async fn write_entry(
        &self,
        key: &str,
        entry: &CachedResponse,
        ttl: Duration,
    ) -> CacheResult<()> {
        let bytes = serde_json::to_vec(entry)?;
        self.store.set_with_ttl(key, bytes, ttl).await
    }

    async fn bump_cached(&self, model_id: &str, at: DateTime<Utc>) -> CacheResult<()> {
        let stats_key = self.stats_key(model_id);
        self.store.incr_field(&stats_key, TOTAL_CACHED, 1).await?;
        self.store
            .set_field(&stats_key, LAST_CACHED, &at.to_rfc3339())
            .await
    }

    /// Count a lookup that found an entry.
    pub async fn record_hit(&self, model_id: &str) {
        self.bump_counter(model_id, CACHE_HITS).await;
    }

    /// Count a lookup that found nothing.
    pub async fn record_miss(&self, model_id: &str) {
        self.bump_counter(model_id, CACHE_MISSES).await;
    }

    async fn bump_counter(&self, model_id: &str, field: &str) {
        if let Err(e) = self
            .store
            .incr_field(&self.stats_key(model_id), field, 1)
            .await
        {
            error!(model = %model_id, field, "Error updating cache stats: {}", e);
        }
    }

    /// Counters for one model; zeroed when nothing was recorded or the store
    /// is unavailable.
    pub async fn stats(&self, model_id: &str) -> CacheStats {
        let fields = match self.store.get_fields(&self.stats_key(model_id)).await {
            Ok(fields) => fields,
            Err(e) => {
                error!(model = %model_id, "Error getting cache stats: {}", e);
                return CacheStats::default();
            }
        };

        let counter = |field: &str| {
            fields
                .get(field)
                .and_then(|raw| raw.parse::<u64>().ok())
                .unwrap_or(0)
        };
        CacheStats {
            total_cached: counter(TOTAL_CACHED),
            last_cached: fields
                .get(LAST_CACHED)
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|at| at.with_timezone(&Utc)),
            cache_hits: counter(CACHE_HITS),
            cache_misses: counter(CACHE_MISSES),
        }
    }

    /// Remove cached responses of one model, or of every model.
    ///
    /// Statistics are kept. Returns the number of entries removed.
    pub async fn clear(&self, model_id: Option<&str>) -> usize {
        let keys = match self.entry_keys(model_id).await {
            Ok(keys) => keys,
            Err(e) => {
                error!(model = ?model_id, "Error clearing cache: {}", e);
                return 0;
            }
        };

        let mut removed = 0;
        for key in keys {
            match self.store.delete(&key).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => error!(key = %key, "Error clearing cache: {}", e),
            }
        }
        info!(
            "Cleared cache for {} ({} entries)",
            model_id.unwrap_or("all models"),
            removed
        );
        removed
    }

    /// Number of live cached responses across all models.
    pub async fn size(&self) -> usize {
        match self.entry_keys(None).await {
            Ok(keys) => keys.len(),
            Err(e) => {
                error!("Error getting cache size: {}", e);
                0
            }
        }
    }

    async fn entry_keys(&self, model_id: Option<&str>) -> CacheResult<Vec<String>> {
        match model_id {
            Some(model_id) => {
                let prefix = self.model_prefix(model_id);
                let keys = self.store.scan(&prefix).await?;
                // `a:b` and `a` share the prefix `model_cache:a:`; only keep keys
                // whose remainder is exactly one fingerprint.
                Ok(keys
                    .into_iter()
                    .filter(|key| is_fingerprint(&key[prefix.len()..]))
                    .collect())
            }
            None => self.store.scan(&format!("{}:", self.key_prefix)).await,
        }
    }
}

fn is_fingerprint(s: &str) -> bool {
    s.len() == FINGERPRINT_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
}
