/// Metrics for capture strategies
///
/// Tracks how often each strategy succeeds, fails, retries and hands over to
/// its fallback, so slow or blocked sites show up in `/metrics`.

use crate::error::CaptureError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyMetrics {
    pub strategy: String,
    pub total_attempts: u64,
    pub successful: u64,
    pub failed: u64,
    pub retry_count: u64,
    pub fallback_count: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub average_capture_time_ms: f64,
    pub total_capture_time_ms: u64,
    pub rate_limit_hits: u64,
    pub taint_count: u64,
    pub timeout_count: u64,
}

impl StrategyMetrics {
    pub fn new(strategy: String) -> Self {
        Self {
            strategy,
            total_attempts: 0,
            successful: 0,
            failed: 0,
            retry_count: 0,
            fallback_count: 0,
            last_success: None,
            last_failure: None,
            last_error: None,
            average_capture_time_ms: 0.0,
            total_capture_time_ms: 0,
            rate_limit_hits: 0,
            taint_count: 0,
            timeout_count: 0,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            0.0
        } else {
            (self.successful as f64 / self.total_attempts as f64) * 100.0
        }
    }

    pub fn record_success(&mut self, elapsed: Duration) {
        self.total_attempts += 1;
        self.successful += 1;
        self.last_success = Some(Utc::now());

        self.total_capture_time_ms += elapsed.as_millis() as u64;
        self.average_capture_time_ms =
            self.total_capture_time_ms as f64 / self.successful as f64;
    }

    pub fn record_failure(&mut self, error: &CaptureError) {
        self.total_attempts += 1;
        self.failed += 1;
        self.last_failure = Some(Utc::now());
        self.last_error = Some(error.to_string());

        match error {
            CaptureError::Status(429) => self.rate_limit_hits += 1,
            CaptureError::Tainted(_) => self.taint_count += 1,
            CaptureError::Timeout(_) => self.timeout_count += 1,
            _ => {}
        }
    }
}

/// Shared, cloneable tracker
#[derive(Clone, Default)]
pub struct MetricsTracker {
    metrics: Arc<Mutex<HashMap<String, StrategyMetrics>>>,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, StrategyMetrics>> {
        self.metrics.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_entry<R>(&self, strategy: &str, f: impl FnOnce(&mut StrategyMetrics) -> R) -> R {
        let mut metrics = self.lock();
        let entry = metrics
            .entry(strategy.to_string())
            .or_insert_with(|| StrategyMetrics::new(strategy.to_string()));
        f(entry)
    }

    pub fn record_success(&self, strategy: &str, elapsed: Duration) {
        self.with_entry(strategy, |m| m.record_success(elapsed));
        log::debug!("[{}] Captured in {}ms", strategy, elapsed.as_millis());
    }

    pub fn record_failure(&self, strategy: &str, error: &CaptureError) {
        let rate = self.with_entry(strategy, |m| {
            m.record_failure(error);
            m.success_rate()
        });
        log::warn!(
            "[{}] Failure - Error: {} - Success rate: {:.2}%",
            strategy,
            error,
            rate
        );
    }

    pub fn record_retry(&self, strategy: &str) {
        let total = self.with_entry(strategy, |m| {
            m.retry_count += 1;
            m.retry_count
        });
        log::debug!("[{}] Retry attempt - Total retries: {}", strategy, total);
    }

    /// The strategy gave up on an image and passed it to its fallback
    pub fn record_fallback(&self, strategy: &str) {
        self.with_entry(strategy, |m| m.fallback_count += 1);
    }

    pub fn get_metrics(&self, strategy: &str) -> Option<StrategyMetrics> {
        self.lock().get(strategy).cloned()
    }

    pub fn get_all_metrics(&self) -> Vec<StrategyMetrics> {
        let mut all: Vec<StrategyMetrics> = self.lock().values().cloned().collect();
        all.sort_by(|a, b| a.strategy.cmp(&b.strategy));
        all
    }

    pub fn export_json(&self) -> String {
        serde_json::to_string_pretty(&*self.lock()).unwrap_or_else(|_| "{}".to_string())
    }
}
