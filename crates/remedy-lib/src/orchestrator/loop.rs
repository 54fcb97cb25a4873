//! Orchestration loop
//!
//! Fires a cycle on every tick. The provider configuration is loaded fresh
//! for each cycle and never changes while that cycle runs.

use super::{CycleRunner, CycleSummary, OrchestratorConfig, OverlapPolicy};
use crate::ai::{AiBackend, AiProviderConfig, BackendFactory, ProviderConfigSource};
use crate::health::components;
use crate::observability::RemedyMetrics;
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct Orchestrator {
    cycles: CycleRunner,
    source: Arc<dyn ProviderConfigSource>,
    factory: Arc<dyn BackendFactory>,
    config: OrchestratorConfig,
    in_flight: Arc<AtomicUsize>,
    next_cycle: AtomicU64,
    skipped: AtomicU64,
    metrics: RemedyMetrics,
}

/// Decrements the in-flight count when a cycle task ends, panics included
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(count: &Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Orchestrator {
    pub fn new(
        cycles: CycleRunner,
        source: Arc<dyn ProviderConfigSource>,
        factory: Arc<dyn BackendFactory>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            cycles,
            source,
            factory,
            config,
            in_flight: Arc::new(AtomicUsize::new(0)),
            next_cycle: AtomicU64::new(1),
            skipped: AtomicU64::new(0),
            metrics: RemedyMetrics::new(),
        }
    }

    /// Ticks dropped by the overlap policy or a failed configuration load
    pub fn skipped_cycles(&self) -> u64 {
        self.skipped.load(Ordering::SeqCst)
    }

    /// Load the provider document and build its backend
    async fn prepare(&self) -> Result<(AiProviderConfig, Arc<dyn AiBackend>)> {
        let provider = self
            .source
            .load()
            .await
            .context("loading AI provider configuration")?;
        let backend = self
            .factory
            .build(&provider)
            .with_context(|| format!("building {} backend", provider.provider))?;
        Ok((provider, backend))
    }

    /// Run a single cycle now
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<CycleSummary> {
        let cycle_id = self.next_cycle.fetch_add(1, Ordering::SeqCst);
        let (provider, backend) = match self.prepare().await {
            Ok(prepared) => prepared,
            Err(e) => {
                self.cycles
                    .health()
                    .set_unhealthy(components::AI_BACKEND, format!("{e:#}"))
                    .await;
                return Err(e);
            }
        };
        Ok(self.cycles.run(cycle_id, &provider, backend, cancel).await)
    }

    async fn fire(&self, cancel: CancellationToken) {
        if let Err(e) = self.run_once(&cancel).await {
            warn!(error = %format!("{e:#}"), "Skipping cycle");
            self.skip(&format!("{e:#}"));
        }
    }

    fn skip(&self, reason: &str) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
        self.metrics.inc_cycles_skipped();
        self.cycles.logger().log_cycle_skipped(reason);
    }

    /// Tick until `shutdown` is cancelled, then wait for in-flight cycles,
    /// which observe the same cancellation
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            interval_ms = self.config.interval().as_millis() as u64,
            overlap = ?self.config.overlap,
            "Starting orchestration loop"
        );

        let mut ticker = interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutting down orchestration loop");
                    break;
                }
                _ = ticker.tick() => {
                    if self.config.overlap == OverlapPolicy::Skip
                        && self.in_flight.load(Ordering::SeqCst) > 0
                    {
                        self.skip("previous cycle still running");
                        continue;
                    }

                    let guard = InFlight::enter(&self.in_flight);
                    let this = self.clone();
                    let cancel = shutdown.child_token();
                    cycles.spawn(async move {
                        let _guard = guard;
                        this.fire(cancel).await;
                    });
                }
                Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Cycle task panicked");
                    }
                }
            }
        }

        while let Some(joined) = cycles.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Cycle task panicked");
            }
        }
    }
}
