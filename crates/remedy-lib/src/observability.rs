//! Observability infrastructure for the remediation engine
//!
//! Provides:
//! - Prometheus metrics (analyzer latency, cache hits, remediation and verification outcomes, cycles)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for analyzer and cycle durations (in seconds)
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<RemedyMetricsInner> = OnceLock::new();

struct RemedyMetricsInner {
    analyzer_duration_seconds: HistogramVec,
    analyzer_errors: IntCounterVec,
    issues_detected: IntGauge,
    cache_hits: IntCounter,
    cache_misses: IntCounter,
    cache_store_errors: IntCounter,
    ai_requests: IntCounterVec,
    remediations: IntCounterVec,
    verifications: IntCounterVec,
    cycles: IntCounter,
    cycles_skipped: IntCounter,
    cycle_duration_seconds: Histogram,
}

impl RemedyMetricsInner {
    fn new() -> Self {
        Self {
            analyzer_duration_seconds: register_histogram_vec!(
                "kube_remedy_analyzer_duration_seconds",
                "Time spent running one analyzer",
                &["analyzer"],
                DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register analyzer_duration_seconds"),

            analyzer_errors: register_int_counter_vec!(
                "kube_remedy_analyzer_errors_total",
                "Analyzer invocations that did not complete",
                &["analyzer", "kind"]
            )
            .expect("Failed to register analyzer_errors"),

            issues_detected: register_int_gauge!(
                "kube_remedy_issues_detected",
                "Issues found by the most recent analysis"
            )
            .expect("Failed to register issues_detected"),

            cache_hits: register_int_counter!(
                "kube_remedy_cache_hits_total",
                "Completion cache lookups that returned a stored response"
            )
            .expect("Failed to register cache_hits"),

            cache_misses: register_int_counter!(
                "kube_remedy_cache_misses_total",
                "Completion cache lookups that missed"
            )
            .expect("Failed to register cache_misses"),

            cache_store_errors: register_int_counter!(
                "kube_remedy_cache_store_errors_total",
                "Completion cache writes that failed"
            )
            .expect("Failed to register cache_store_errors"),

            ai_requests: register_int_counter_vec!(
                "kube_remedy_ai_requests_total",
                "Requests sent to the AI backend",
                &["provider", "result"]
            )
            .expect("Failed to register ai_requests"),

            remediations: register_int_counter_vec!(
                "kube_remedy_remediations_total",
                "Remediation attempts by outcome",
                &["outcome"]
            )
            .expect("Failed to register remediations"),

            verifications: register_int_counter_vec!(
                "kube_remedy_verifications_total",
                "Rollout verifications by terminal outcome",
                &["outcome"]
            )
            .expect("Failed to register verifications"),

            cycles: register_int_counter!(
                "kube_remedy_cycles_total",
                "Orchestration cycles started"
            )
            .expect("Failed to register cycles"),

            cycles_skipped: register_int_counter!(
                "kube_remedy_cycles_skipped_total",
                "Orchestration ticks skipped because a cycle was still running"
            )
            .expect("Failed to register cycles_skipped"),

            cycle_duration_seconds: register_histogram!(
                "kube_remedy_cycle_duration_seconds",
                "Wall time of one orchestration cycle",
                DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_duration_seconds"),
        }
    }
}

/// Handle to the process-wide metrics
///
/// Clones share the same underlying registry entries.
#[derive(Clone)]
pub struct RemedyMetrics {
    _private: (),
}

impl Default for RemedyMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RemedyMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(RemedyMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &RemedyMetricsInner {
        GLOBAL_METRICS.get_or_init(RemedyMetricsInner::new)
    }

    pub fn observe_analyzer_duration(&self, analyzer: &str, duration_secs: f64) {
        self.inner()
            .analyzer_duration_seconds
            .with_label_values(&[analyzer])
            .observe(duration_secs);
    }

    pub fn inc_analyzer_errors(&self, analyzer: &str, kind: &str) {
        self.inner()
            .analyzer_errors
            .with_label_values(&[analyzer, kind])
            .inc();
    }

    pub fn set_issues_detected(&self, count: i64) {
        self.inner().issues_detected.set(count);
    }

    pub fn inc_cache_hits(&self) {
        self.inner().cache_hits.inc();
    }

    pub fn inc_cache_misses(&self) {
        self.inner().cache_misses.inc();
    }

    pub fn inc_cache_store_errors(&self) {
        self.inner().cache_store_errors.inc();
    }

    /// `result` is one of `ok`, `rate_limited`, `error`
    pub fn inc_ai_requests(&self, provider: &str, result: &str) {
        self.inner()
            .ai_requests
            .with_label_values(&[provider, result])
            .inc();
    }

    pub fn inc_remediations(&self, outcome: &str) {
        self.inner()
            .remediations
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn inc_verifications(&self, outcome: &str) {
        self.inner()
            .verifications
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn inc_cycles(&self) {
        self.inner().cycles.inc();
    }

    pub fn inc_cycles_skipped(&self) {
        self.inner().cycles_skipped.inc();
    }

    pub fn observe_cycle_duration(&self, duration_secs: f64) {
        self.inner().cycle_duration_seconds.observe(duration_secs);
    }
}

/// Structured logger for engine events
///
/// Every record carries a stable `event` field so log pipelines can key on it.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_cycle_started(&self, cycle_id: u64, provider: &str) {
        info!(
            event = "cycle_started",
            instance = %self.instance,
            cycle_id = cycle_id,
            provider = %provider,
            "Orchestration cycle started"
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub fn log_cycle_finished(
        &self,
        cycle_id: u64,
        issues: usize,
        analyzer_errors: usize,
        recovered: usize,
        unverified: usize,
        failed: usize,
        duration_ms: u128,
    ) {
        info!(
            event = "cycle_finished",
            instance = %self.instance,
            cycle_id = cycle_id,
            issues = issues,
            analyzer_errors = analyzer_errors,
            recovered = recovered,
            unverified = unverified,
            failed = failed,
            duration_ms = duration_ms as u64,
            "Orchestration cycle finished"
        );
    }

    pub fn log_cycle_skipped(&self, reason: &str) {
        warn!(
            event = "cycle_skipped",
            instance = %self.instance,
            reason = %reason,
            "Orchestration cycle skipped"
        );
    }

    pub fn log_remediation_applied(&self, kind: &str, namespace: &str, name: &str, action: &str) {
        info!(
            event = "remediation_applied",
            instance = %self.instance,
            kind = %kind,
            namespace = %namespace,
            name = %name,
            action = %action,
            "Corrected manifest applied"
        );
    }

    pub fn log_remediation_failed(&self, kind: &str, name: &str, error: &str) {
        warn!(
            event = "remediation_failed",
            instance = %self.instance,
            kind = %kind,
            name = %name,
            error = %error,
            "Remediation attempt failed"
        );
    }

    pub fn log_verification(&self, kind: &str, namespace: &str, name: &str, outcome: &str) {
        if outcome == "ready" {
            info!(
                event = "verification_finished",
                instance = %self.instance,
                kind = %kind,
                namespace = %namespace,
                name = %name,
                outcome = %outcome,
                "Workload recovered"
            );
        } else {
            warn!(
                event = "verification_finished",
                instance = %self.instance,
                kind = %kind,
                namespace = %namespace,
                name = %name,
                outcome = %outcome,
                "Workload did not recover"
            );
        }
    }

    pub fn log_startup(&self, version: &str, mode: &str) {
        info!(
            event = "remedy_started",
            instance = %self.instance,
            version = %version,
            mode = %mode,
            "kube-remedy started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "remedy_shutdown",
            instance = %self.instance,
            reason = %reason,
            "kube-remedy shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_handles_share_registry() {
        let metrics = RemedyMetrics::new();
        let other = metrics.clone();

        metrics.observe_analyzer_duration("Pod", 0.01);
        metrics.inc_cache_hits();
        other.inc_cache_misses();
        other.inc_remediations("recovered");
        other.inc_verifications("ready");
        metrics.set_issues_detected(3);

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "kube_remedy_cache_hits_total"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("remedy-0");
        assert_eq!(logger.instance, "remedy-0");
    }
}
