// registry module - model registration, dispatch and telemetry
pub mod registry;

// ensemble module - weighted multi-model fan-out and combination
pub mod ensemble;

// cache module - fingerprint-keyed response cache
pub mod cache;

// config module
pub mod config;

// orchestrator module - cache-aware front door
pub mod orchestrator;

// benchmark module
pub mod benchmark;

pub use benchmark::{
    BenchmarkCase, BenchmarkMetrics, BenchmarkReport, Metric, ModelBenchmark, ModelComparison,
    accuracy,
};
pub use cache::{CacheStats, CacheStore, CachedResponse, InMemoryStore, ResponseCache};
#[cfg(feature = "redis")]
pub use cache::RedisStore;
pub use config::{
    BenchmarkConfig, CacheConfig, EnsembleConfig, MemberConfig, OrchestratorConfig,
    RegistryConfig,
};
pub use ensemble::{EnsembleInfo, EnsembleStrategy, MemberPerformance, ModelEnsemble};
pub use orchestrator::Orchestrator;
pub use registry::ModelRegistry;
pub use registry::telemetry::{ErrorRecord, ModelStats, UsageRecord};

pub use modelhub_kernel::{
    GenerationOptions, ModelError, ModelHandle, ModelResponse, ModelResult,
};
