//! Integration tests for the orchestrator: cache-first single-model generation,
//! named ensembles, configuration bootstrap and shutdown.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::mock_model::MockModel;
use modelhub_foundation::{
    ModelEnsemble, ModelRegistry, Orchestrator, OrchestratorConfig, ResponseCache,
};
use modelhub_kernel::config::{FileFormat, from_str};
use modelhub_kernel::{GenerationOptions, ModelError};

async fn cached_orchestrator(models: &[Arc<MockModel>]) -> Orchestrator {
    let orchestrator =
        Orchestrator::new(Arc::new(ModelRegistry::new())).with_cache(ResponseCache::in_memory(100));
    for model in models {
        orchestrator.register_model(model.clone()).await.unwrap();
    }
    orchestrator
}

#[tokio::test]
async fn second_identical_request_is_served_from_cache() {
    common::init_tracing();
    let model = MockModel::builder("m", "1")
        .respond_with("first answer")
        .respond_with("second answer")
        .build();
    let orchestrator = cached_orchestrator(&[model.clone()]).await;
    let opts = GenerationOptions::new().temperature(0.1);

    let first = orchestrator.generate("m:1", "q", &opts).await.unwrap();
    let second = orchestrator.generate("m:1", "q", &opts).await.unwrap();

    assert_eq!(first.content, "first answer");
    assert_eq!(second.content, "first answer");
    assert_eq!(model.generate_call_count(), 1);

    let cache = orchestrator.cache().unwrap();
    let stats = cache.stats("m:1").await;
    assert_eq!(stats.cache_misses, 1);
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.total_cached, 1);

    // Cache hits do not reach the registry.
    assert_eq!(orchestrator.registry().stats("m:1").unwrap().total_requests, 1);
}

#[tokio::test]
async fn different_options_miss_the_cache() {
    let model = MockModel::answering("m", "1", "x", 1.0);
    let orchestrator = cached_orchestrator(&[model.clone()]).await;

    orchestrator
        .generate("m:1", "q", &GenerationOptions::new().max_tokens(10))
        .await
        .unwrap();
    orchestrator
        .generate("m:1", "q", &GenerationOptions::new().max_tokens(20))
        .await
        .unwrap();
    assert_eq!(model.generate_call_count(), 2);
}

#[tokio::test]
async fn failures_are_not_cached() {
    let model = MockModel::builder("m", "1")
        .fail_with("transient")
        .respond_with("recovered")
        .build();
    let orchestrator = cached_orchestrator(&[model.clone()]).await;
    let opts = GenerationOptions::new();

    let err = orchestrator.generate("m:1", "q", &opts).await.unwrap_err();
    assert_eq!(err, ModelError::backend("transient"));

    let ok = orchestrator.generate("m:1", "q", &opts).await.unwrap();
    assert_eq!(ok.content, "recovered");
    assert_eq!(orchestrator.cache().unwrap().stats("m:1").await.cache_misses, 2);
}

#[tokio::test]
async fn without_cache_every_call_reaches_the_model() {
    let model = MockModel::answering("m", "1", "x", 1.0);
    let orchestrator = Orchestrator::new(Arc::new(ModelRegistry::new()));
    orchestrator.register_model(model.clone()).await.unwrap();

    for _ in 0..3 {
        orchestrator
            .generate("m:1", "q", &GenerationOptions::new())
            .await
            .unwrap();
    }
    assert_eq!(model.generate_call_count(), 3);
}

#[tokio::test]
async fn unregistered_model_is_not_served_from_a_stale_cache() {
    let model = MockModel::answering("m", "1", "x", 1.0);
    let orchestrator = cached_orchestrator(&[model]).await;
    let opts = GenerationOptions::new();
    orchestrator.generate("m:1", "q", &opts).await.unwrap();

    orchestrator.registry().unregister("m:1").await.unwrap();
    let err = orchestrator.generate("m:1", "q", &opts).await.unwrap_err();
    assert_eq!(err, ModelError::NotFound("m:1".to_string()));
}

#[tokio::test]
async fn named_ensemble_generation() {
    let a = MockModel::answering("a", "1", "alpha", 0.3);
    let b = MockModel::answering("b", "1", "beta", 0.9);
    let orchestrator = cached_orchestrator(&[a, b]).await;
    orchestrator
        .add_ensemble(ModelEnsemble::new(
            orchestrator.registry().clone(),
            "duo",
            vec!["a:1".to_string(), "b:1".to_string()],
            HashMap::new(),
        ))
        .unwrap();

    let combined = orchestrator
        .generate_ensemble("duo", "q", "best_model", &GenerationOptions::new())
        .await
        .unwrap();
    assert_eq!(combined.content, "beta");
    assert_eq!(combined.model_name, "duo");

    let duplicate = ModelEnsemble::new(
        orchestrator.registry().clone(),
        "duo",
        Vec::new(),
        HashMap::new(),
    );
    assert!(matches!(
        orchestrator.add_ensemble(duplicate),
        Err(ModelError::InvalidInput(_))
    ));
    assert_eq!(orchestrator.ensemble_names(), vec!["duo"]);
}

#[tokio::test]
async fn bootstrap_from_toml_config() {
    let toml = r#"
[cache]
default_ttl_secs = 120
key_prefix = "svc_cache"

[registry]
error_history = 10

[[ensembles]]
name = "triage"
members = [
    { model = "fast:1", weight = 1.0 },
    { model = "smart:1", weight = 3.0 },
]
"#;
    let config: OrchestratorConfig = from_str(toml, FileFormat::Toml).unwrap();
    let orchestrator = Orchestrator::from_config(&config).await.unwrap();

    let cache = orchestrator.cache().unwrap();
    assert_eq!(cache.key_prefix(), "svc_cache");
    assert_eq!(cache.default_ttl().as_secs(), 120);

    orchestrator
        .register_model(MockModel::answering("fast", "1", "quick take", 0.5))
        .await
        .unwrap();
    orchestrator
        .register_model(MockModel::answering("smart", "1", "careful take", 0.9))
        .await
        .unwrap();

    let combined = orchestrator
        .generate_ensemble("triage", "q", "weighted_average", &GenerationOptions::new())
        .await
        .unwrap();
    // (1 * 0.5 + 3 * 0.9) / 4
    assert!((combined.confidence - 0.8).abs() < 1e-9);
}

#[tokio::test]
async fn shutdown_unloads_every_model() {
    let good = MockModel::answering("good", "1", "x", 1.0);
    let bad = MockModel::builder("bad", "1").unload_fails("stuck").build();
    let orchestrator = cached_orchestrator(&[good.clone(), bad.clone()]).await;
    orchestrator.registry().load_model("good:1").await.unwrap();

    let failed = orchestrator.shutdown().await;
    assert_eq!(failed, vec!["bad:1"]);
    assert_eq!(good.unload_call_count(), 1);
    assert_eq!(bad.unload_call_count(), 1);
    assert!(!orchestrator.registry().stats("good:1").unwrap().is_loaded);
}
