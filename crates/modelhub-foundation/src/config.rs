//! Orchestrator configuration.
//!
//! Every field has a default, so an empty document is a valid configuration.
//!
//! ```toml
//! [cache]
//! enabled = true
//! default_ttl_secs = 3600
//! max_entries = 1000
//! key_prefix = "model_cache"
//! # redis_url = "redis://localhost:6379"
//! sweep_interval_secs = 60
//!
//! [registry]
//! error_history = 50
//!
//! [[ensembles]]
//! name = "triage"
//! timeout_ms = 30000
//! members = [
//!     { model = "llama3:8b", weight = 2.0 },
//!     { model = "mistral:7b" },
//! ]
//!
//! [benchmark]
//! results_dir = "benchmarks"
//! num_runs = 3
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use modelhub_kernel::config::{self, ConfigResult};

use crate::cache::{DEFAULT_KEY_PREFIX, DEFAULT_MAX_ENTRIES, DEFAULT_TTL};
use crate::ensemble::DEFAULT_WEIGHT;
use crate::registry::telemetry::DEFAULT_ERROR_HISTORY;

/// Top-level configuration of an [`Orchestrator`](crate::Orchestrator).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub cache: CacheConfig,
    pub registry: RegistryConfig,
    pub ensembles: Vec<EnsembleConfig>,
    pub benchmark: BenchmarkConfig,
}

impl OrchestratorConfig {
    /// Load from a file; the format follows the extension.
    pub fn from_file(path: &str) -> ConfigResult<Self> {
        config::load_config(path)
    }

    /// Load from a file, then apply `<PREFIX>_SECTION__FIELD` environment
    /// overrides.
    pub fn from_file_with_env(path: &str, env_prefix: &str) -> ConfigResult<Self> {
        config::load_with_env(path, env_prefix)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub default_ttl_secs: u64,
    /// Bound on the in-memory store (0 means unbounded); ignored for Redis
    pub max_entries: usize,
    pub key_prefix: String,
    /// Use a Redis store instead of the in-memory one
    pub redis_url: Option<String>,
    /// Period of the in-memory store's background TTL sweep
    pub sweep_interval_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: DEFAULT_TTL.as_secs(),
            max_entries: DEFAULT_MAX_ENTRIES,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            redis_url: None,
            sweep_interval_secs: None,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Error records retained per model
    pub error_history: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            error_history: DEFAULT_ERROR_HISTORY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleConfig {
    pub name: String,
    #[serde(default)]
    pub members: Vec<MemberConfig>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl EnsembleConfig {
    pub fn models(&self) -> Vec<String> {
        self.members.iter().map(|m| m.model.clone()).collect()
    }

    pub fn weights(&self) -> HashMap<String, f64> {
        self.members
            .iter()
            .map(|m| (m.model.clone(), m.weight))
            .collect()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberConfig {
    /// Registry identifier (`name:version`)
    pub model: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    DEFAULT_WEIGHT
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    pub results_dir: PathBuf,
    pub num_runs: usize,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("benchmarks"),
            num_runs: 3,
        }
    }
}
