//! Model benchmark harness.
//!
//! Runs a fixed set of prompts against registered models, scores each answer
//! against an expected output, and writes the report as JSON under
//! `<results_dir>/<model>_<YYYYmmdd_HHMMSS>.json`.
//!
//! Benchmarks call the model handle directly, so they never show up in the
//! registry's usage telemetry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use modelhub_kernel::{GenerationOptions, ModelError, ModelResult};

use crate::config::BenchmarkConfig;
use crate::registry::ModelRegistry;

/// One prompt with its expected answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkCase {
    pub name: String,
    pub prompt: String,
    #[serde(default)]
    pub options: GenerationOptions,
    #[serde(default)]
    pub expected_output: String,
}

impl BenchmarkCase {
    pub fn new(
        name: impl Into<String>,
        prompt: impl Into<String>,
        expected_output: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
            options: GenerationOptions::default(),
            expected_output: expected_output.into(),
        }
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// 1-based run number
    pub run: usize,
    pub latency: f64,
    pub accuracy: f64,
    pub response: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub test_case: String,
    pub average_latency: f64,
    pub average_accuracy: f64,
    pub runs: Vec<RunResult>,
}

/// Overall numbers of one benchmark.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkMetrics {
    /// Mean of the per-case average latencies, in seconds
    pub average_latency: f64,
    pub average_accuracy: f64,
    /// Cases per second of summed per-case average latency
    pub throughput: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub model_name: String,
    pub timestamp: DateTime<Utc>,
    pub metrics: BenchmarkMetrics,
    pub test_cases: Vec<CaseResult>,
}

/// Metric compared across models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Latency,
    Accuracy,
    Throughput,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::Latency, Metric::Accuracy, Metric::Throughput];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Latency => "latency",
            Metric::Accuracy => "accuracy",
            Metric::Throughput => "throughput",
        }
    }

    /// Lower latency is better; higher is better for everything else.
    pub fn higher_is_better(&self) -> bool {
        !matches!(self, Metric::Latency)
    }

    fn value(&self, metrics: &BenchmarkMetrics) -> f64 {
        match self {
            Metric::Latency => metrics.average_latency,
            Metric::Accuracy => metrics.average_accuracy,
            Metric::Throughput => metrics.throughput,
        }
    }
}

/// Spread of one metric across compared models.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSummary {
    pub best: f64,
    pub worst: f64,
    pub average: f64,
    /// Population variance
    pub variance: f64,
    /// Model identifiers, best first
    pub ranking: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelComparison {
    pub timestamp: DateTime<Utc>,
    pub models: BTreeMap<String, BenchmarkMetrics>,
    pub metrics: BTreeMap<&'static str, MetricSummary>,
}

/// Word-overlap score of `actual` against `expected`.
///
/// `|words(actual) ∩ words(expected)| / |words(expected)|` over lowercase,
/// whitespace-separated words; 1.0 when `expected` has no words.
pub fn accuracy(actual: &str, expected: &str) -> f64 {
    let actual: HashSet<String> = actual.split_whitespace().map(str::to_lowercase).collect();
    let expected: HashSet<String> = expected.split_whitespace().map(str::to_lowercase).collect();
    if expected.is_empty() {
        return 1.0;
    }
    expected.intersection(&actual).count() as f64 / expected.len() as f64
}

/// Benchmark runner over the models of a registry.
#[derive(Debug, Clone)]
pub struct ModelBenchmark {
    registry: Arc<ModelRegistry>,
    results_dir: PathBuf,
    num_runs: usize,
}

impl ModelBenchmark {
    pub fn new(registry: Arc<ModelRegistry>, results_dir: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            results_dir: results_dir.into(),
            num_runs: BenchmarkConfig::default().num_runs,
        }
    }

    pub fn from_config(registry: Arc<ModelRegistry>, config: &BenchmarkConfig) -> Self {
        Self::new(registry, config.results_dir.clone()).with_num_runs(config.num_runs)
    }

    pub fn with_num_runs(mut self, num_runs: usize) -> Self {
        self.num_runs = num_runs;
        self
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    /// Benchmark one model with the configured number of runs per case.
    pub async fn run_benchmark(
        &self,
        model_id: &str,
        cases: &[BenchmarkCase],
    ) -> ModelResult<BenchmarkReport> {
        self.run_benchmark_with_runs(model_id, cases, self.num_runs)
            .await
    }

    /// Benchmark one model and save the report.
    ///
    /// # Errors
    /// - `NotFound`: the model is not registered
    /// - `InvalidInput`: no cases, or zero runs
    /// - any error of the model's generate call; the benchmark stops there
    pub async fn run_benchmark_with_runs(
        &self,
        model_id: &str,
        cases: &[BenchmarkCase],
        num_runs: usize,
    ) -> ModelResult<BenchmarkReport> {
        if cases.is_empty() {
            return Err(ModelError::InvalidInput(
                "benchmark needs at least one test case".to_string(),
            ));
        }
        if num_runs == 0 {
            return Err(ModelError::InvalidInput(
                "benchmark needs at least one run per case".to_string(),
            ));
        }
        let model = self
            .registry
            .get(model_id)
            .ok_or_else(|| ModelError::NotFound(model_id.to_string()))?;

        info!(model = %model_id, cases = cases.len(), num_runs, "running benchmark");
        let timestamp = Utc::now();
        let mut test_cases = Vec::with_capacity(cases.len());

        for case in cases {
            let mut runs = Vec::with_capacity(num_runs);
            for run in 1..=num_runs {
                let started = Instant::now();
                let response = match model.generate(&case.prompt, &case.options).await {
                    Ok(response) => response,
                    Err(e) => {
                        error!(model = %model_id, case = %case.name, "Error running benchmark: {}", e);
                        return Err(e);
                    }
                };
                runs.push(RunResult {
                    run,
                    latency: started.elapsed().as_secs_f64(),
                    accuracy: accuracy(&response.content, &case.expected_output),
                    response: response.content,
                    confidence: response.confidence,
                });
            }

            test_cases.push(CaseResult {
                test_case: case.name.clone(),
                average_latency: mean(runs.iter().map(|r| r.latency)),
                average_accuracy: mean(runs.iter().map(|r| r.accuracy)),
                runs,
            });
        }

        let total_latency: f64 = test_cases.iter().map(|c| c.average_latency).sum();
        let metrics = BenchmarkMetrics {
            average_latency: mean(test_cases.iter().map(|c| c.average_latency)),
            average_accuracy: mean(test_cases.iter().map(|c| c.average_accuracy)),
            throughput: if total_latency > 0.0 {
                test_cases.len() as f64 / total_latency
            } else {
                0.0
            },
        };

        let report = BenchmarkReport {
            model_name: model_id.to_string(),
            timestamp,
            metrics,
            test_cases,
        };
        self.save(&report).await;
        Ok(report)
    }

    /// Benchmark several models on the same cases and rank them per metric.
    pub async fn compare_models(
        &self,
        model_ids: &[&str],
        cases: &[BenchmarkCase],
    ) -> ModelResult<ModelComparison> {
        if model_ids.is_empty() {
            return Err(ModelError::InvalidInput(
                "comparison needs at least one model".to_string(),
            ));
        }

        let mut models = BTreeMap::new();
        for model_id in model_ids {
            let report = self.run_benchmark(model_id, cases).await?;
            models.insert(model_id.to_string(), report.metrics);
        }

        let metrics = Metric::ALL
            .into_iter()
            .map(|metric| (metric.as_str(), summarize(metric, &models)))
            .collect();

        Ok(ModelComparison {
            timestamp: Utc::now(),
            models,
            metrics,
        })
    }

    /// Saved reports, newest first; all models when `model_id` is `None`.
    ///
    /// Unreadable files are logged and skipped.
    pub async fn history(&self, model_id: Option<&str>) -> Vec<BenchmarkReport> {
        let mut entries = match tokio::fs::read_dir(&self.results_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                error!(dir = %self.results_dir.display(), "Error getting benchmark history: {}", e);
                return Vec::new();
            }
        };

        let mut history = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    error!("Error getting benchmark history: {}", e);
                    break;
                }
            };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_report(&path).await {
                Ok(report) => {
                    if model_id.is_none_or(|id| id == report.model_name) {
                        history.push(report);
                    }
                }
                Err(e) => error!(path = %path.display(), "Error reading benchmark report: {}", e),
            }
        }

        history.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        history
    }

    async fn save(&self, report: &BenchmarkReport) {
        let stem = format!(
            "{}_{}",
            file_stem(&report.model_name),
            report.timestamp.format("%Y%m%d_%H%M%S_%6f")
        );
        let path = self.unused_path(&stem).await;
        match write_report(&self.results_dir, &path, report).await {
            Ok(()) => info!(path = %path.display(), "Saved benchmark results"),
            Err(e) => error!(path = %path.display(), "Error saving benchmark results: {}", e),
        }
    }

    /// `<stem>.json`, or `<stem>_<n>.json` for the first free `n`.
    async fn unused_path(&self, stem: &str) -> PathBuf {
        let mut path = self.results_dir.join(format!("{stem}.json"));
        let mut n = 1;
        while tokio::fs::try_exists(&path).await.unwrap_or(false) {
            path = self.results_dir.join(format!("{stem}_{n}.json"));
            n += 1;
        }
        path
    }
}

async fn write_report(dir: &Path, path: &Path, report: &BenchmarkReport) -> std::io::Result<()> {
    let json = serde_json::to_vec_pretty(report)?;
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(path, json).await
}

async fn read_report(path: &Path) -> std::io::Result<BenchmarkReport> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Model identifier made safe for a file name.
fn file_stem(model_id: &str) -> String {
    model_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

fn summarize(metric: Metric, models: &BTreeMap<String, BenchmarkMetrics>) -> MetricSummary {
    let mut ranked: Vec<(&String, f64)> = models
        .iter()
        .map(|(id, metrics)| (id, metric.value(metrics)))
        .collect();
    ranked.sort_by(|a, b| {
        let order = a.1.total_cmp(&b.1);
        if metric.higher_is_better() { order.reverse() } else { order }
    });

    let average = mean(ranked.iter().map(|(_, v)| *v));
    let variance = mean(ranked.iter().map(|(_, v)| (v - average).powi(2)));
    MetricSummary {
        best: ranked.first().map_or(0.0, |(_, v)| *v),
        worst: ranked.last().map_or(0.0, |(_, v)| *v),
        average,
        variance,
        ranking: ranked.into_iter().map(|(id, _)| id.clone()).collect(),
    }
}
