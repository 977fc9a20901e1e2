//! Orchestrator
//!
//! Front door tying the registry, the response cache and named ensembles
//! together:
//!
//! ```text
//! generate(model, prompt)
//!     ├─ cache.lookup ── hit ──────────────────────────► cached response
//!     └─ miss ─► registry.generate_response ─► cache.store ─► response
//!
//! generate_ensemble(name, prompt, strategy)
//!     └─ ensemble.generate ─► members via registry ─► combined response
//! ```
//!
//! Combined ensemble responses are not cached.

use dashmap::DashMap;
use error_stack::{Report, ResultExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use modelhub_kernel::{
    GenerationOptions, IntoModelReport, ModelError, ModelHandle, ModelReport, ModelResponse,
    ModelResult,
};

use crate::cache::{InMemoryStore, ResponseCache};
use crate::config::{CacheConfig, OrchestratorConfig};
use crate::ensemble::ModelEnsemble;
use crate::registry::ModelRegistry;

/// Cache-aware entry point for single-model and ensemble generation.
pub struct Orchestrator {
    registry: Arc<ModelRegistry>,
    cache: Option<ResponseCache>,
    ensembles: DashMap<String, Arc<ModelEnsemble>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("cache", &self.cache)
            .field("ensembles", &self.ensemble_names())
            .finish()
    }
}

impl Orchestrator {
    /// Orchestrator without a cache.
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self {
            registry,
            cache: None,
            ensembles: DashMap::new(),
            sweeper: Mutex::new(None),
        }
    }

    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Build from configuration.
    ///
    /// Ensemble members are resolved at generation time, so models may be
    /// registered after construction. A configured Redis server that cannot be
    /// reached falls back to the in-memory store.
    ///
    /// # Errors
    /// - `InvalidInput`: a Redis URL is configured without the `redis` feature,
    ///   or two ensembles share a name
    pub async fn from_config(config: &OrchestratorConfig) -> ModelReport<Self> {
        let registry = Arc::new(ModelRegistry::with_error_history(
            config.registry.error_history,
        ));
        let mut orchestrator = Self::new(registry);

        if config.cache.enabled {
            let (cache, sweeper) = build_cache(&config.cache).await?;
            orchestrator.cache = Some(cache);
            *orchestrator.sweeper.get_mut() = sweeper;
        }

        for ensemble in &config.ensembles {
            let mut definition = ModelEnsemble::new(
                orchestrator.registry.clone(),
                ensemble.name.clone(),
                ensemble.models(),
                ensemble.weights(),
            );
            if let Some(timeout) = ensemble.timeout() {
                definition = definition.with_timeout(timeout);
            }
            orchestrator
                .add_ensemble(definition)
                .into_report()
                .attach(format!("while configuring ensemble {}", ensemble.name))?;
        }

        info!(
            cache = orchestrator.cache.is_some(),
            ensembles = orchestrator.ensembles.len(),
            "orchestrator configured"
        );
        Ok(orchestrator)
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> Option<&ResponseCache> {
        self.cache.as_ref()
    }

    /// Register a model with the underlying registry.
    pub async fn register_model(&self, handle: Arc<dyn ModelHandle>) -> ModelResult<()> {
        self.registry.register(handle).await
    }

    /// Add a named ensemble.
    ///
    /// # Errors
    /// - `InvalidInput`: an ensemble with the same name exists
    pub fn add_ensemble(&self, ensemble: ModelEnsemble) -> ModelResult<Arc<ModelEnsemble>> {
        use dashmap::mapref::entry::Entry;

        match self.ensembles.entry(ensemble.name().to_string()) {
            Entry::Occupied(existing) => Err(ModelError::InvalidInput(format!(
                "ensemble already defined: {}",
                existing.key()
            ))),
            Entry::Vacant(slot) => {
                let ensemble = Arc::new(ensemble);
                info!(ensemble = %ensemble.name(), members = ?ensemble.members(), "ensemble added");
                slot.insert(ensemble.clone());
                Ok(ensemble)
            }
        }
    }

    pub fn ensemble(&self, name: &str) -> Option<Arc<ModelEnsemble>> {
        self.ensembles.get(name).map(|e| e.value().clone())
    }

    pub fn remove_ensemble(&self, name: &str) -> Option<Arc<ModelEnsemble>> {
        self.ensembles.remove(name).map(|(_, e)| e)
    }

    /// Ensemble names, sorted.
    pub fn ensemble_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.ensembles.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Generate with one model, serving from the cache when possible.
    ///
    /// Cache hits bypass the registry and therefore its telemetry. Every
    /// lookup is counted as a hit or a miss in the cache statistics.
    ///
    /// # Errors
    /// - `NotFound`: the model is not registered (checked before the cache)
    /// - any error of the model's generate call
    pub async fn generate(
        &self,
        model_id: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> ModelResult<ModelResponse> {
        if !self.registry.contains(model_id) {
            return Err(ModelError::NotFound(model_id.to_string()));
        }

        let Some(cache) = &self.cache else {
            return self.registry.generate_response(model_id, prompt, options).await;
        };

        if let Some(cached) = cache.lookup(model_id, prompt, options).await {
            cache.record_hit(model_id).await;
            return Ok(cached);
        }
        cache.record_miss(model_id).await;

        let response = self
            .registry
            .generate_response(model_id, prompt, options)
            .await?;
        cache.store(model_id, prompt, &response, None, options).await;
        Ok(response)
    }

    /// Generate with a named ensemble.
    ///
    /// # Errors
    /// - `NotFound`: no ensemble has that name
    /// - `UnknownStrategy`, `NoValidResponses`: see [`ModelEnsemble::generate`]
    pub async fn generate_ensemble(
        &self,
        name: &str,
        prompt: &str,
        strategy: &str,
        options: &GenerationOptions,
    ) -> ModelResult<ModelResponse> {
        let ensemble = self
            .ensemble(name)
            .ok_or_else(|| ModelError::NotFound(name.to_string()))?;
        ensemble.generate(prompt, strategy, options).await
    }

    /// Stop the cache sweeper and unload every model.
    ///
    /// Returns the identifiers whose unload failed.
    pub async fn shutdown(&self) -> Vec<String> {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }
        let failed = self.registry.unload_all().await;
        if failed.is_empty() {
            info!("orchestrator shut down");
        } else {
            warn!(failed = ?failed, "orchestrator shut down with unload failures");
        }
        failed
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            sweeper.abort();
        }
    }
}

async fn build_cache(
    config: &CacheConfig,
) -> ModelReport<(ResponseCache, Option<JoinHandle<()>>)> {
    let configure = |cache: ResponseCache| {
        cache
            .with_key_prefix(config.key_prefix.clone())
            .with_default_ttl(config.default_ttl())
    };

    if let Some(url) = &config.redis_url {
        match connect_redis(url).await? {
            Some(cache) => return Ok((configure(cache), None)),
            None => warn!("falling back to the in-memory cache store"),
        }
    }

    let store = Arc::new(InMemoryStore::with_max_entries(config.max_entries));
    let sweeper = config.sweep_interval().map(|interval| {
        debug!(interval_secs = interval.as_secs(), "starting cache sweeper");
        store.spawn_sweeper(interval)
    });
    Ok((configure(ResponseCache::new(store)), sweeper))
}

#[cfg(feature = "redis")]
async fn connect_redis(url: &str) -> ModelReport<Option<ResponseCache>> {
    use crate::cache::RedisStore;

    match RedisStore::connect(url).await {
        Ok(store) => Ok(Some(ResponseCache::new(Arc::new(store)))),
        Err(e) => {
            warn!(error = %e, "redis cache store unavailable");
            Ok(None)
        }
    }
}

#[cfg(not(feature = "redis"))]
async fn connect_redis(_url: &str) -> ModelReport<Option<ResponseCache>> {
    Err(Report::new(ModelError::InvalidInput(
        "cache.redis_url is set but the redis feature is disabled".to_string(),
    )))
    .attach("while configuring the response cache")
}
