//! remedy-agent - Kubernetes remediation engine
//!
//! `serve` hosts the cluster HTTP boundary, health and metrics, and runs the
//! orchestration loop. `remediate` runs cycles without the HTTP server.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use remedy_agent::{api, config::AgentConfig};
use remedy_lib::{
    ai::{FileProviderSource, HttpBackendFactory},
    analysis::{AnalysisRunner, AnalyzerRegistry},
    cluster::{AgentClient, AgentClientConfig, ClusterAccessor, KubeClusterAccessor},
    health::HealthRegistry,
    observability::StructuredLogger,
    orchestrator::{CycleRunner, Orchestrator},
    rollout::RolloutVerifier,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "remedy-agent")]
#[command(version, about = "Kubernetes remediation engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the cluster boundary, health and metrics, and run the remediation loop
    Serve {
        /// Only serve HTTP; do not remediate
        #[arg(long)]
        no_remediate: bool,
    },

    /// Run remediation cycles without the HTTP server
    Remediate {
        /// Run a single cycle, print its summary and exit
        #[arg(long)]
        once: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let cli = Cli::parse();
    let config = AgentConfig::load()?;
    let logger = StructuredLogger::new(&config.instance);

    let accessor = connect(&config).await?;
    let health = HealthRegistry::for_engine().await;
    let orchestrator = Arc::new(build_orchestrator(
        &config,
        accessor.clone(),
        health.clone(),
        logger.clone(),
    ));
    let shutdown = CancellationToken::new();

    match cli.command {
        Command::Serve { no_remediate } => {
            logger.log_startup(AGENT_VERSION, "serve");
            let state = Arc::new(api::AppState::new(accessor, health.clone()));
            let api_handle = tokio::spawn(api::serve(config.listen_port, state, shutdown.clone()));
            let loop_handle = if no_remediate {
                None
            } else {
                Some(tokio::spawn(orchestrator.run(shutdown.clone())))
            };

            health.set_ready(true).await;

            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    signal?;
                    logger.log_shutdown("SIGINT received");
                }
                served = api_handle => {
                    // the server only returns on its own when it fails
                    logger.log_shutdown("API server stopped");
                    served?.context("API server failed")?;
                }
            }

            shutdown.cancel();
            if let Some(handle) = loop_handle {
                if let Err(e) = handle.await {
                    error!(error = %e, "Orchestration loop panicked");
                }
            }
        }
        Command::Remediate { once: true } => {
            logger.log_startup(AGENT_VERSION, "remediate-once");
            let summary = orchestrator.run_once(&shutdown).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Remediate { once: false } => {
            logger.log_startup(AGENT_VERSION, "remediate");
            let handle = tokio::spawn(orchestrator.run(shutdown.clone()));
            tokio::signal::ctrl_c().await?;
            logger.log_shutdown("SIGINT received");
            shutdown.cancel();
            handle.await.context("orchestration loop panicked")?;
        }
    }

    info!("Shutting down");
    Ok(())
}

/// Direct API server access, or another agent when `cluster.agent_url` is set
async fn connect(config: &AgentConfig) -> Result<Arc<dyn ClusterAccessor>> {
    match &config.cluster.agent_url {
        Some(url) => {
            info!(agent_url = %url, "Using remote agent for cluster access");
            let client = AgentClient::new(AgentClientConfig {
                base_url: url.clone(),
                ..Default::default()
            })?;
            Ok(Arc::new(client))
        }
        None => {
            let accessor = KubeClusterAccessor::try_default()
                .await
                .context("connecting to the Kubernetes API")?;
            Ok(Arc::new(accessor))
        }
    }
}

fn build_orchestrator(
    config: &AgentConfig,
    accessor: Arc<dyn ClusterAccessor>,
    health: HealthRegistry,
    logger: StructuredLogger,
) -> Orchestrator {
    let cache = Arc::new(config.cache.build());
    let verifier = Arc::new(RolloutVerifier::new(
        accessor.clone(),
        config.verifier.clone(),
    ));
    let analysis = AnalysisRunner::new(
        accessor.clone(),
        AnalyzerRegistry::with_defaults(),
        config.analysis.clone(),
    );
    let cycles = CycleRunner::new(accessor, analysis, cache, verifier)
        .with_explain(config.orchestrator.explain)
        .with_health(health)
        .with_logger(logger);

    info!(
        provider_config = ?config.ai.config_path,
        interval_secs = config.orchestrator.interval_secs,
        "Remediation engine configured"
    );

    Orchestrator::new(
        cycles,
        Arc::new(FileProviderSource::new(config.ai.config_path.clone())),
        Arc::new(HttpBackendFactory),
        config.orchestrator.clone(),
    )
}
