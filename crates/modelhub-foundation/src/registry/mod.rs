//! Model Registry & Dispatcher
//!
//! [`ModelRegistry`] owns every registered [`ModelHandle`], routes single and
//! batch generation requests to a model by identifier, and keeps per-model
//! usage and error telemetry.
//!
//! ## Locking
//!
//! ```text
//! lifecycle: tokio Mutex<()>        register / unregister, held across unload().await
//! models:    RwLock<HashMap<id, Arc<RegisteredModel>>>   short critical sections only
//! entry.telemetry: Mutex<ModelTelemetry>                 one per model
//! ```
//!
//! Readers clone the `Arc` of an entry out of the map and release the map lock
//! before awaiting the backend, so generation never blocks registration and
//! a reader never sees a half-inserted entry. Counters of one model are
//! serialized by its own mutex; different models update independently.
//!
//! ## Unregister with a failing unload
//!
//! The entry is removed even if the handle's `unload` fails; the unload error
//! is still returned to the caller. The handle is then no longer reachable
//! through the registry.

pub mod telemetry;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use modelhub_kernel::{GenerationOptions, ModelError, ModelHandle, ModelResponse, ModelResult};

pub use telemetry::{
    DEFAULT_ERROR_HISTORY, ErrorRecord, ModelStats, RECENT_ERRORS_EXPOSED, UsageRecord,
};
use telemetry::ModelTelemetry;

// ============================================================================
// RegisteredModel
// ============================================================================

/// A registered handle together with its telemetry.
struct RegisteredModel {
    id: String,
    handle: Arc<dyn ModelHandle>,
    registered_at: DateTime<Utc>,
    telemetry: Mutex<ModelTelemetry>,
}

impl RegisteredModel {
    fn stats(&self) -> ModelStats {
        let telemetry = self.telemetry.lock();
        let usage = telemetry.usage();
        ModelStats {
            model_id: self.id.clone(),
            model_name: self.handle.name().to_string(),
            model_version: self.handle.version().to_string(),
            is_loaded: self.handle.is_loaded(),
            registered_at: self.registered_at,
            total_requests: usage.total_requests,
            successful_requests: usage.successful_requests,
            failed_requests: usage.failed_requests,
            success_rate: usage.success_rate(),
            last_used: usage.last_used,
            recent_errors: telemetry.recent_errors(),
        }
    }
}

// ============================================================================
// ModelRegistry
// ============================================================================

/// Registry of backend models with usage telemetry.
///
/// Construct one per application and share it behind an `Arc`; ensembles and
/// the [`Orchestrator`](crate::orchestrator::Orchestrator) hold references to
/// it. Shutting down is the application's call via
/// [`ModelRegistry::unload_all`].
pub struct ModelRegistry {
    models: RwLock<HashMap<String, Arc<RegisteredModel>>>,
    lifecycle: tokio::sync::Mutex<()>,
    error_history: usize,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("models", &self.list_models())
            .field("error_history", &self.error_history)
            .finish()
    }
}

impl ModelRegistry {
    /// Create an empty registry keeping [`DEFAULT_ERROR_HISTORY`] errors per model.
    pub fn new() -> Self {
        Self::with_error_history(DEFAULT_ERROR_HISTORY)
    }

    /// Create an empty registry retaining up to `error_history` error records
    /// per model. Stats always expose the five most recent.
    pub fn with_error_history(error_history: usize) -> Self {
        Self {
            models: RwLock::new(HashMap::new()),
            lifecycle: tokio::sync::Mutex::new(()),
            error_history,
        }
    }

    /// Register a handle under its [`ModelHandle::id`].
    ///
    /// The handle is not loaded here; see [`ModelRegistry::load_model`].
    ///
    /// # Errors
    /// - `DuplicateModel`: the identifier is already registered; the existing
    ///   entry and its telemetry are left untouched
    pub async fn register(&self, handle: Arc<dyn ModelHandle>) -> ModelResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let id = handle.id();

        {
            let mut models = self.models.write();
            if models.contains_key(&id) {
                return Err(ModelError::DuplicateModel(id));
            }
            models.insert(
                id.clone(),
                Arc::new(RegisteredModel {
                    id: id.clone(),
                    handle: Arc::clone(&handle),
                    registered_at: Utc::now(),
                    telemetry: Mutex::new(ModelTelemetry::new(self.error_history)),
                }),
            );
        }

        info!("Registered model: {} v{}", handle.name(), handle.version());
        Ok(())
    }

    /// Unload and remove a model together with its telemetry.
    ///
    /// # Errors
    /// - `NotFound`: no such model; the registry is unchanged
    /// - any error returned by the handle's `unload` (the entry is removed anyway)
    pub async fn unregister(&self, model_id: &str) -> ModelResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let entry = self
            .entry(model_id)
            .ok_or_else(|| ModelError::NotFound(model_id.to_string()))?;

        let unloaded = entry.handle.unload().await;
        self.models.write().remove(model_id);

        match unloaded {
            Ok(()) => {
                info!("Unregistered model: {}", model_id);
                Ok(())
            }
            Err(e) => {
                warn!(model = model_id, error = %e, "unload failed; model removed from registry");
                Err(e)
            }
        }
    }

    /// Look up a handle. Never fails.
    pub fn get(&self, model_id: &str) -> Option<Arc<dyn ModelHandle>> {
        self.entry(model_id).map(|entry| Arc::clone(&entry.handle))
    }

    /// Whether a model is registered under `model_id`.
    pub fn contains(&self, model_id: &str) -> bool {
        self.models.read().contains_key(model_id)
    }

    /// Registered model identifiers, sorted.
    pub fn list_models(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.models.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of registered models.
    pub fn len(&self) -> usize {
        self.models.read().len()
    }

    /// Returns true if no models are registered.
    pub fn is_empty(&self) -> bool {
        self.models.read().is_empty()
    }

    /// Explicitly load a registered model.
    pub async fn load_model(&self, model_id: &str) -> ModelResult<()> {
        let entry = self.require(model_id)?;
        entry.handle.load().await.inspect_err(|e| {
            error!(model = model_id, error = %e, "model load failed");
        })?;
        info!("Loaded model: {}", model_id);
        Ok(())
    }

    /// Explicitly unload a registered model without unregistering it.
    pub async fn unload_model(&self, model_id: &str) -> ModelResult<()> {
        let entry = self.require(model_id)?;
        entry.handle.unload().await.inspect_err(|e| {
            error!(model = model_id, error = %e, "model unload failed");
        })?;
        info!("Unloaded model: {}", model_id);
        Ok(())
    }

    /// Unload every registered model, continuing past failures.
    ///
    /// Models stay registered. Returns the identifiers whose unload failed.
    pub async fn unload_all(&self) -> Vec<String> {
        let entries: Vec<Arc<RegisteredModel>> = self.models.read().values().cloned().collect();
        let mut failed = Vec::new();

        for entry in entries {
            if let Err(e) = entry.handle.unload().await {
                warn!(model = %entry.id, error = %e, "unload failed during shutdown");
                failed.push(entry.id.clone());
            }
        }

        failed.sort();
        failed
    }

    /// Generate a response with the named model.
    ///
    /// `processing_time` of the returned response is overwritten with the
    /// measured wall-clock duration. Telemetry is updated before returning,
    /// on success and on failure; backend errors are returned unmodified.
    ///
    /// # Errors
    /// - `NotFound`: no such model (no telemetry is recorded)
    /// - any error returned by the handle
    pub async fn generate_response(
        &self,
        model_id: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> ModelResult<ModelResponse> {
        let entry = self.require(model_id)?;

        let start = Instant::now();
        let result = entry.handle.generate(prompt, options).await;
        let elapsed = start.elapsed().as_secs_f64();

        match result {
            Ok(mut response) => {
                response.processing_time = elapsed;
                entry.telemetry.lock().record_success(1);
                Ok(response)
            }
            Err(e) => {
                entry
                    .telemetry
                    .lock()
                    .record_failure(1, e.to_string(), vec![prompt.to_string()]);
                error!("Error generating response with model {}: {}", model_id, e);
                Err(e)
            }
        }
    }

    /// Generate responses for several prompts with the named model.
    ///
    /// Counters move by `prompts.len()`. The measured batch duration is split
    /// evenly across the returned responses.
    pub async fn batch_generate(
        &self,
        model_id: &str,
        prompts: &[String],
        options: &GenerationOptions,
    ) -> ModelResult<Vec<ModelResponse>> {
        let entry = self.require(model_id)?;
        let count = prompts.len() as u64;

        let start = Instant::now();
        let result = entry.handle.batch_generate(prompts, options).await;
        let elapsed = start.elapsed().as_secs_f64();

        match result {
            Ok(mut responses) => {
                let share = if prompts.is_empty() {
                    0.0
                } else {
                    elapsed / prompts.len() as f64
                };
                for response in &mut responses {
                    response.processing_time = share;
                }
                entry.telemetry.lock().record_success(count);
                Ok(responses)
            }
            Err(e) => {
                entry
                    .telemetry
                    .lock()
                    .record_failure(count, e.to_string(), prompts.to_vec());
                error!("Error batch generating with model {}: {}", model_id, e);
                Err(e)
            }
        }
    }

    /// Embed text with the named model, sharing generation telemetry.
    pub async fn embed(&self, model_id: &str, text: &str) -> ModelResult<Vec<f32>> {
        let entry = self.require(model_id)?;

        match entry.handle.embed(text).await {
            Ok(embedding) => {
                entry.telemetry.lock().record_success(1);
                Ok(embedding)
            }
            Err(e) => {
                entry
                    .telemetry
                    .lock()
                    .record_failure(1, e.to_string(), vec![text.to_string()]);
                error!("Error embedding with model {}: {}", model_id, e);
                Err(e)
            }
        }
    }

    /// Statistics for one model.
    ///
    /// # Errors
    /// - `NotFound`: no such model
    pub fn stats(&self, model_id: &str) -> ModelResult<ModelStats> {
        self.require(model_id).map(|entry| entry.stats())
    }

    /// Statistics for every registered model, keyed by identifier.
    pub fn stats_all(&self) -> BTreeMap<String, ModelStats> {
        let entries: Vec<Arc<RegisteredModel>> = self.models.read().values().cloned().collect();
        entries
            .into_iter()
            .map(|entry| (entry.id.clone(), entry.stats()))
            .collect()
    }

    fn entry(&self, model_id: &str) -> Option<Arc<RegisteredModel>> {
        self.models.read().get(model_id).cloned()
    }

    fn require(&self, model_id: &str) -> ModelResult<Arc<RegisteredModel>> {
        self.entry(model_id)
            .ok_or_else(|| ModelError::NotFound(model_id.to_string()))
    }
}
