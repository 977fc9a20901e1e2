//! Ensemble Combiner
//!
//! A [`ModelEnsemble`] is a named, weighted set of registered models. A single
//! prompt is fanned out to every member concurrently through the
//! [`ModelRegistry`], and the responses that come back are reduced into one
//! [`ModelResponse`] by an [`EnsembleStrategy`].
//!
//! ```text
//!              ┌──────────── generate(prompt) ────────────┐
//!              ▼                     ▼                    ▼
//!   registry.generate_response  registry.generate_response  ...
//!              │                     │                    │
//!              └──── completion order (FuturesUnordered) ─┘
//!                                    ▼
//!                  combine(strategy, responses, weights)
//! ```
//!
//! Members that are not registered, or whose backend fails, are skipped with a
//! warning. The ensemble only fails when no member produced a response.
//!
//! With a timeout configured, members still running at the deadline are
//! cancelled by dropping their futures; the ensemble combines whatever has
//! completed. A cancelled member call records no registry telemetry.

pub mod strategy;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use modelhub_kernel::{GenerationOptions, ModelError, ModelResponse, ModelResult};

use crate::registry::ModelRegistry;

pub use strategy::{EnsembleStrategy, MAJORITY_PREFIX_CHARS};

/// Weight given to members without an explicit weight.
pub const DEFAULT_WEIGHT: f64 = 1.0;

/// Caller-reported performance of one member.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemberPerformance {
    pub success_count: u64,
    pub failure_count: u64,
    pub total_processing_time: f64,
    pub request_count: u64,
}

/// Snapshot of an ensemble's definition and metrics.
#[derive(Debug, Clone, Serialize)]
pub struct EnsembleInfo {
    pub name: String,
    pub models: Vec<String>,
    pub weights: BTreeMap<String, f64>,
    pub performance_metrics: BTreeMap<String, MemberPerformance>,
    pub timeout_ms: Option<u64>,
}

/// A named, weighted set of models combined by a selectable strategy.
///
/// Membership is fixed at construction; weights and performance metrics can be
/// updated concurrently with `generate`.
pub struct ModelEnsemble {
    name: String,
    registry: Arc<ModelRegistry>,
    members: Vec<String>,
    weights: RwLock<HashMap<String, f64>>,
    performance: Mutex<HashMap<String, MemberPerformance>>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for ModelEnsemble {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelEnsemble")
            .field("name", &self.name)
            .field("members", &self.members)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ModelEnsemble {
    /// Create an ensemble over `members`.
    ///
    /// Members missing from `weights` get [`DEFAULT_WEIGHT`]; weights for
    /// identifiers that are not members, or that are not positive finite
    /// numbers, are discarded. Duplicate member identifiers are collapsed.
    pub fn new(
        registry: Arc<ModelRegistry>,
        name: impl Into<String>,
        members: Vec<String>,
        weights: HashMap<String, f64>,
    ) -> Self {
        let name = name.into();

        let mut unique = Vec::with_capacity(members.len());
        for member in members {
            if !unique.contains(&member) {
                unique.push(member);
            }
        }

        let resolved: HashMap<String, f64> = unique
            .iter()
            .map(|member| {
                let weight = match weights.get(member) {
                    Some(&w) if is_valid_weight(w) => w,
                    Some(&w) => {
                        warn!(ensemble = %name, model = %member, weight = w, "ignoring non-positive weight");
                        DEFAULT_WEIGHT
                    }
                    None => DEFAULT_WEIGHT,
                };
                (member.clone(), weight)
            })
            .collect();

        Self {
            name,
            registry,
            members: unique,
            weights: RwLock::new(resolved),
            performance: Mutex::new(HashMap::new()),
            timeout: None,
        }
    }

    /// Cancel member calls still outstanding after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Ensemble name; also the `model_name` of every combined response.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Member identifiers in definition order.
    pub fn members(&self) -> &[String] {
        &self.members
    }

    /// Configured timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Current weight of a member, `None` for non-members.
    pub fn weight(&self, model_id: &str) -> Option<f64> {
        self.weights.read().get(model_id).copied()
    }

    /// Snapshot of all member weights.
    pub fn weights(&self) -> HashMap<String, f64> {
        self.weights.read().clone()
    }

    /// Generate with a strategy given by name.
    ///
    /// # Errors
    /// - `UnknownStrategy`: the name is not a known strategy; no member is called
    /// - `NoValidResponses`: no member produced a response
    pub async fn generate(
        &self,
        prompt: &str,
        strategy: &str,
        options: &GenerationOptions,
    ) -> ModelResult<ModelResponse> {
        let strategy: EnsembleStrategy = strategy.parse()?;
        self.generate_with(prompt, strategy, options).await
    }

    /// Generate with a typed strategy.
    pub async fn generate_with(
        &self,
        prompt: &str,
        strategy: EnsembleStrategy,
        options: &GenerationOptions,
    ) -> ModelResult<ModelResponse> {
        let responses = self.fan_out(prompt, options).await;
        if responses.is_empty() {
            warn!(ensemble = %self.name, "no member produced a response");
            return Err(ModelError::NoValidResponses(self.name.clone()));
        }

        let weights = self.weights();
        debug!(
            ensemble = %self.name,
            strategy = %strategy,
            responders = responses.len(),
            "combining ensemble responses"
        );
        strategy::combine(strategy, &self.name, &responses, &weights)
    }

    /// Call every member concurrently and collect responses in completion order.
    async fn fan_out(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Vec<(String, ModelResponse)> {
        let registry = &self.registry;
        let mut pending: FuturesUnordered<_> = self
            .members
            .iter()
            .map(|member| async move {
                let result = registry.generate_response(member, prompt, options).await;
                (member, result)
            })
            .collect();

        let deadline = self.timeout.map(|t| tokio::time::Instant::now() + t);
        let mut responses = Vec::with_capacity(self.members.len());

        loop {
            let next = match deadline {
                Some(deadline) => {
                    let waited = tokio::time::timeout_at(deadline, pending.next()).await;
                    match waited {
                        Ok(next) => next,
                        Err(_) => {
                            warn!(
                                ensemble = %self.name,
                                outstanding = pending.len(),
                                "ensemble timed out; cancelling outstanding members"
                            );
                            break;
                        }
                    }
                }
                None => pending.next().await,
            };

            let Some((member, result)) = next else {
                break;
            };

            match result {
                Ok(response) => responses.push((member.clone(), response)),
                Err(ModelError::NotFound(_)) => {
                    warn!("Model {} not found in ensemble {}", member, self.name);
                }
                Err(e) => {
                    warn!(ensemble = %self.name, model = %member, error = %e, "ensemble member failed");
                }
            }
        }

        responses
    }

    /// Merge new weights for existing members; unknown identifiers and
    /// non-positive weights are ignored.
    pub fn update_weights(&self, new_weights: &HashMap<String, f64>) {
        let mut weights = self.weights.write();
        for (model_id, &weight) in new_weights {
            if !is_valid_weight(weight) {
                warn!(ensemble = %self.name, model = %model_id, weight, "ignoring non-positive weight");
                continue;
            }
            if let Some(current) = weights.get_mut(model_id) {
                *current = weight;
            }
        }
    }

    /// Record the outcome of one request served by `model_id`.
    ///
    /// Independent of [`ModelEnsemble::generate`]; callers decide what to record.
    pub fn update_performance_metrics(&self, model_id: &str, success: bool, processing_time: f64) {
        let mut performance = self.performance.lock();
        let metrics = performance.entry(model_id.to_string()).or_default();
        metrics.request_count += 1;
        metrics.total_processing_time += processing_time;
        if success {
            metrics.success_count += 1;
        } else {
            metrics.failure_count += 1;
        }
    }

    /// Snapshot of the per-member performance metrics.
    pub fn performance_metrics(&self) -> HashMap<String, MemberPerformance> {
        self.performance.lock().clone()
    }

    /// Name, members, weights and metrics in one serializable view.
    pub fn info(&self) -> EnsembleInfo {
        EnsembleInfo {
            name: self.name.clone(),
            models: self.members.clone(),
            weights: self.weights().into_iter().collect(),
            performance_metrics: self.performance_metrics().into_iter().collect(),
            timeout_ms: self.timeout.map(|t| t.as_millis() as u64),
        }
    }
}

fn is_valid_weight(weight: f64) -> bool {
    weight.is_finite() && weight > 0.0
}
