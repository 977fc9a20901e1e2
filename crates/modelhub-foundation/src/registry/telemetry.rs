//! Per-model usage and error telemetry kept by the registry.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

/// Number of error records exposed by [`ModelStats::recent_errors`].
pub const RECENT_ERRORS_EXPOSED: usize = 5;

/// Default number of error records retained per model.
pub const DEFAULT_ERROR_HISTORY: usize = 50;

/// Request counters for one registered model.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageRecord {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub last_used: Option<DateTime<Utc>>,
}

impl UsageRecord {
    /// `successful / total`, or 0 when nothing has been requested yet.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }
}

/// One failed generation attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub error: String,
    /// The prompt, or every prompt of a failed batch
    pub prompts: Vec<String>,
}

/// Usage counters plus a bounded ring of recent failures.
#[derive(Debug)]
pub(crate) struct ModelTelemetry {
    usage: UsageRecord,
    errors: VecDeque<ErrorRecord>,
    capacity: usize,
}

impl ModelTelemetry {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            usage: UsageRecord::default(),
            errors: VecDeque::new(),
            capacity: capacity.max(RECENT_ERRORS_EXPOSED),
        }
    }

    pub(crate) fn record_success(&mut self, count: u64) {
        self.usage.total_requests += count;
        self.usage.successful_requests += count;
        self.usage.last_used = Some(Utc::now());
    }

    pub(crate) fn record_failure(&mut self, count: u64, error: String, prompts: Vec<String>) {
        self.usage.total_requests += count;
        self.usage.failed_requests += count;
        if self.errors.len() == self.capacity {
            self.errors.pop_front();
        }
        self.errors.push_back(ErrorRecord {
            timestamp: Utc::now(),
            error,
            prompts,
        });
    }

    pub(crate) fn usage(&self) -> &UsageRecord {
        &self.usage
    }

    /// The most recent failures, oldest first.
    pub(crate) fn recent_errors(&self) -> Vec<ErrorRecord> {
        let skip = self.errors.len().saturating_sub(RECENT_ERRORS_EXPOSED);
        self.errors.iter().skip(skip).cloned().collect()
    }

    pub(crate) fn retained_errors(&self) -> usize {
        self.errors.len()
    }
}

/// Read-only view of one model's registration and telemetry.
#[derive(Debug, Clone, Serialize)]
pub struct ModelStats {
    pub model_id: String,
    pub model_name: String,
    pub model_version: String,
    pub is_loaded: bool,
    pub registered_at: DateTime<Utc>,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    pub last_used: Option<DateTime<Utc>>,
    /// At most [`RECENT_ERRORS_EXPOSED`] records, oldest first
    pub recent_errors: Vec<ErrorRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate_zero_when_idle() {
        let usage = UsageRecord::default();
        assert_eq!(usage.success_rate(), 0.0);
    }

    #[test]
    fn test_counts_accumulate() {
        let mut telemetry = ModelTelemetry::new(DEFAULT_ERROR_HISTORY);
        telemetry.record_success(3);
        telemetry.record_failure(2, "timeout".to_string(), vec!["a".into(), "b".into()]);

        let usage = telemetry.usage();
        assert_eq!(usage.total_requests, 5);
        assert_eq!(usage.successful_requests, 3);
        assert_eq!(usage.failed_requests, 2);
        assert!((usage.success_rate() - 0.6).abs() < f64::EPSILON);
        assert!(usage.last_used.is_some());
    }

    #[test]
    fn test_error_ring_is_bounded() {
        let mut telemetry = ModelTelemetry::new(8);
        for i in 0..20 {
            telemetry.record_failure(1, format!("err-{i}"), vec![format!("p-{i}")]);
        }

        assert_eq!(telemetry.retained_errors(), 8);
        let recent: Vec<_> = telemetry
            .recent_errors()
            .into_iter()
            .map(|e| e.error)
            .collect();
        assert_eq!(recent, vec!["err-15", "err-16", "err-17", "err-18", "err-19"]);
    }

    #[test]
    fn test_capacity_never_below_exposed_window() {
        let mut telemetry = ModelTelemetry::new(1);
        for i in 0..3 {
            telemetry.record_failure(1, format!("err-{i}"), Vec::new());
        }
        assert_eq!(telemetry.recent_errors().len(), 3);
    }
}
