//! One orchestration cycle

use crate::ai::{AiBackend, AiProviderConfig};
use crate::analysis::AnalysisRunner;
use crate::cache::CompletionCache;
use crate::cluster::ClusterAccessor;
use crate::error::RemediationError;
use crate::health::{components, HealthRegistry};
use crate::observability::{RemedyMetrics, StructuredLogger};
use crate::remediation::{resolve_target, Explainer, RemediationGenerator};
use crate::rollout::RolloutVerifier;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Outcome counts of one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub cycle_id: u64,
    pub issues: usize,
    pub analyzer_errors: usize,
    /// Applied and verified ready
    pub recovered: usize,
    /// Applied, but the rollout did not verify
    pub unverified: usize,
    /// Generation or apply failed
    pub failed: usize,
    /// Left untouched because the cycle was cancelled
    pub skipped: usize,
    /// Resolved to a resource already remediated earlier in the cycle
    pub duplicates: usize,
    #[serde(rename = "duration_ms", with = "crate::models::duration_millis")]
    pub duration: Duration,
}

/// Runs analysis, the optional explanation pass and sequential remediation
pub struct CycleRunner {
    accessor: Arc<dyn ClusterAccessor>,
    analysis: AnalysisRunner,
    cache: Arc<CompletionCache>,
    verifier: Arc<RolloutVerifier>,
    explain: bool,
    health: HealthRegistry,
    logger: StructuredLogger,
    metrics: RemedyMetrics,
}

impl CycleRunner {
    pub fn new(
        accessor: Arc<dyn ClusterAccessor>,
        analysis: AnalysisRunner,
        cache: Arc<CompletionCache>,
        verifier: Arc<RolloutVerifier>,
    ) -> Self {
        Self {
            accessor,
            analysis,
            cache,
            verifier,
            explain: false,
            health: HealthRegistry::new(),
            logger: StructuredLogger::new("orchestrator"),
            metrics: RemedyMetrics::new(),
        }
    }

    pub fn with_explain(mut self, explain: bool) -> Self {
        self.explain = explain;
        self
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    /// Run one cycle with the provider resolved at trigger time
    pub async fn run(
        &self,
        cycle_id: u64,
        provider: &AiProviderConfig,
        backend: Arc<dyn AiBackend>,
        cancel: &CancellationToken,
    ) -> CycleSummary {
        let start = Instant::now();
        self.logger.log_cycle_started(cycle_id, &provider.provider);

        let mut report = self.analysis.run(&[], cancel.clone()).await;
        self.metrics.set_issues_detected(report.results.len() as i64);
        if report.errors.is_empty() {
            self.health.set_healthy(components::ANALYZER).await;
        } else {
            self.health
                .set_degraded(
                    components::ANALYZER,
                    format!("{} analyzer errors", report.errors.len()),
                )
                .await;
        }

        if self.explain && !cancel.is_cancelled() {
            let explainer = Explainer::new(backend.clone(), self.cache.clone(), &provider.language);
            let explained = explainer.explain_all(&mut report.results).await;
            info!(cycle_id, explained, "Explanation pass finished");
        }

        let generator = RemediationGenerator::new(
            self.accessor.clone(),
            backend,
            self.cache.clone(),
            self.verifier.clone(),
        )
        .with_language(provider.language.clone())
        .with_logger(self.logger.clone());

        let mut summary = CycleSummary {
            cycle_id,
            issues: report.results.len(),
            analyzer_errors: report.errors.len(),
            ..Default::default()
        };
        let mut rate_limited = false;
        let mut seen = HashSet::new();

        for (i, issue) in report.results.iter().enumerate() {
            if cancel.is_cancelled() {
                summary.skipped += report.results.len() - i;
                info!(cycle_id, skipped = summary.skipped, "Cycle cancelled");
                break;
            }

            // Malformed names fall through so the generator reports them
            if let Ok(target) = resolve_target(issue) {
                if !seen.insert(target.clone()) {
                    summary.duplicates += 1;
                    info!(
                        cycle_id,
                        %target,
                        issue = %issue.name,
                        "Target already remediated this cycle"
                    );
                    continue;
                }
            }

            match generator.remediate(issue, cancel).await {
                Ok(attempt) if attempt.recovered() => summary.recovered += 1,
                Ok(_) => summary.unverified += 1,
                Err(RemediationError::Cancelled) => summary.skipped += 1,
                Err(e) => {
                    summary.failed += 1;
                    if e.is_rate_limited() {
                        rate_limited = true;
                        warn!(
                            kind = %issue.kind,
                            name = %issue.name,
                            "AI quota exhausted, remediation skipped"
                        );
                    }
                }
            }
        }

        self.record_health(&summary, rate_limited).await;

        summary.duration = start.elapsed();
        self.metrics.inc_cycles();
        self.metrics
            .observe_cycle_duration(summary.duration.as_secs_f64());
        self.logger.log_cycle_finished(
            cycle_id,
            summary.issues,
            summary.analyzer_errors,
            summary.recovered,
            summary.unverified,
            summary.failed,
            summary.duration.as_millis(),
        );
        summary
    }

    async fn record_health(&self, summary: &CycleSummary, rate_limited: bool) {
        if summary.failed > 0 {
            self.health
                .set_degraded(
                    components::REMEDIATOR,
                    format!("{} of {} remediations failed", summary.failed, summary.issues),
                )
                .await;
        } else {
            self.health.set_healthy(components::REMEDIATOR).await;
        }

        if rate_limited {
            self.health
                .set_degraded(components::AI_BACKEND, "rate limited")
                .await;
        } else {
            self.health.set_healthy(components::AI_BACKEND).await;
        }
    }
}
