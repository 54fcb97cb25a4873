//! Bounded-concurrency execution of analyzers

use super::{AnalysisConfig, AnalysisContext, Analyzer, AnalyzerRegistry};
use crate::cluster::ClusterAccessor;
use crate::models::{AnalysisReport, AnalyzerFailure, AnalyzerFailureKind, AnalyzerStat};
use crate::observability::RemedyMetrics;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Runs the analyzers selected from a registry against one cluster
pub struct AnalysisRunner {
    accessor: Arc<dyn ClusterAccessor>,
    registry: AnalyzerRegistry,
    config: AnalysisConfig,
}

impl AnalysisRunner {
    pub fn new(
        accessor: Arc<dyn ClusterAccessor>,
        registry: AnalyzerRegistry,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            accessor,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Run once; `filter` overrides the configured selection when non-empty
    pub async fn run(&self, filter: &[String], cancel: CancellationToken) -> AnalysisReport {
        let filter = if filter.is_empty() {
            &self.config.filters[..]
        } else {
            filter
        };
        let selection = self.registry.select(filter, &self.config.active);

        let ctx = AnalysisContext::new(self.accessor.clone())
            .with_namespace(self.config.namespace.clone())
            .with_cancel(cancel);

        let mut report = run_analyzers(
            selection.analyzers,
            ctx,
            self.config.max_concurrency,
            self.config.with_stats,
        )
        .await;

        for name in selection.unknown {
            warn!(analyzer = %name, "Requested analyzer is not registered");
            report.errors.push(AnalyzerFailure {
                analyzer: name.clone(),
                kind: AnalyzerFailureKind::UnknownAnalyzer,
                message: format!("analyzer {name} is not registered"),
            });
        }

        report
    }
}

enum Outcome {
    Completed(Vec<crate::models::DiagnosedIssue>),
    Failed(AnalyzerFailureKind, String),
}

/// Execute `analyzers` with at most `max_concurrency` running at once.
///
/// Values below 1 are treated as 1. Every analyzer contributes exactly one
/// entry to either `completed` or `errors`.
pub async fn run_analyzers(
    analyzers: Vec<Arc<dyn Analyzer>>,
    ctx: AnalysisContext,
    max_concurrency: usize,
    with_stats: bool,
) -> AnalysisReport {
    let limit = max_concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(limit));
    let report = Arc::new(Mutex::new(AnalysisReport {
        stats: with_stats.then(Vec::new),
        ..Default::default()
    }));
    let metrics = RemedyMetrics::new();

    debug!(analyzers = analyzers.len(), max_concurrency = limit, "Starting analysis");

    let mut tasks = JoinSet::new();
    for analyzer in analyzers {
        let semaphore = semaphore.clone();
        let report = report.clone();
        let ctx = ctx.clone();
        let metrics = metrics.clone();

        tasks.spawn(async move {
            let name = analyzer.name().to_string();
            let start = Instant::now();
            let outcome = run_one(analyzer.as_ref(), &ctx, &semaphore).await;
            let elapsed = start.elapsed();

            metrics.observe_analyzer_duration(&name, elapsed.as_secs_f64());

            let mut report = report.lock().await;
            if let Some(stats) = report.stats.as_mut() {
                stats.push(AnalyzerStat {
                    analyzer: name.clone(),
                    duration: elapsed,
                });
            }
            match outcome {
                Outcome::Completed(issues) => {
                    report.results.extend(issues);
                    report.completed.push(name);
                }
                Outcome::Failed(kind, message) => {
                    metrics.inc_analyzer_errors(&name, kind_label(kind));
                    report.errors.push(AnalyzerFailure {
                        analyzer: name,
                        kind,
                        message,
                    });
                }
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            // analyzer panics are caught inside the task; this is the runtime failing
            error!(error = %e, "Analyzer task did not complete");
        }
    }

    let report = std::mem::take(&mut *report.lock().await);
    info!(
        issues = report.results.len(),
        completed = report.completed.len(),
        errors = report.errors.len(),
        "Analysis finished"
    );
    report
}

async fn run_one(analyzer: &dyn Analyzer, ctx: &AnalysisContext, semaphore: &Semaphore) -> Outcome {
    let permit = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => None,
        permit = semaphore.acquire() => permit.ok(),
    };
    let Some(_permit) = permit else {
        return Outcome::Failed(
            AnalyzerFailureKind::Cancelled,
            "cancelled before the analyzer started".to_string(),
        );
    };

    let run = AssertUnwindSafe(analyzer.analyze(ctx)).catch_unwind();
    let result = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => None,
        result = run => Some(result),
    };

    match result {
        None => Outcome::Failed(
            AnalyzerFailureKind::Cancelled,
            "cancelled while the analyzer was running".to_string(),
        ),
        Some(Ok(Ok(issues))) => Outcome::Completed(issues),
        Some(Ok(Err(e))) => {
            warn!(analyzer = %analyzer.name(), error = %e, "Analyzer failed");
            Outcome::Failed(AnalyzerFailureKind::Failed, format!("{e:#}"))
        }
        Some(Err(panic)) => {
            let message = panic_message(panic);
            error!(analyzer = %analyzer.name(), panic = %message, "Analyzer panicked");
            Outcome::Failed(AnalyzerFailureKind::Panicked, message)
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "analyzer panicked".to_string()
    }
}

fn kind_label(kind: AnalyzerFailureKind) -> &'static str {
    match kind {
        AnalyzerFailureKind::UnknownAnalyzer => "unknown",
        AnalyzerFailureKind::Failed => "failed",
        AnalyzerFailureKind::Panicked => "panicked",
        AnalyzerFailureKind::Cancelled => "cancelled",
    }
}
