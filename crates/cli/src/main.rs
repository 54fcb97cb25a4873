//! remedyctl - operator CLI for kube-remedy
//!
//! Inspects pods, manifests and logs, applies manifests and runs one-off
//! analyses, all through the agent's HTTP boundary.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{analyze, cluster};
use remedy_lib::cluster::{AgentClient, AgentClientConfig, FIELD_MANAGER};
use std::time::Duration;

/// Operator CLI for kube-remedy
#[derive(Parser)]
#[command(name = "remedyctl")]
#[command(author, version, about = "CLI for the kube-remedy agent", long_about = None)]
pub struct Cli {
    /// Agent URL (can also be set via REMEDY_AGENT_URL env var)
    #[arg(long, env = "REMEDY_AGENT_URL", default_value = "http://localhost:8080")]
    pub agent_url: String,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List pods
    Pods {
        /// Only pods in this namespace
        #[arg(long, short)]
        namespace: Option<String>,
    },

    /// Show the status, containers and probes of a pod
    Status {
        namespace: String,
        pod: String,
    },

    /// Stream the logs of a pod
    Logs {
        namespace: String,
        pod: String,

        /// Container name, required for multi-container pods
        #[arg(long, short)]
        container: Option<String>,
    },

    /// Print the manifest of a resource
    Manifest {
        /// Resource kind (pod, deployment, statefulset, ...)
        kind: String,
        namespace: String,
        name: String,
    },

    /// Server-side apply a manifest file
    Apply {
        /// Path to a YAML manifest
        file: String,

        /// Field manager recorded for the apply
        #[arg(long, default_value = FIELD_MANAGER)]
        field_manager: String,

        /// Fail on field ownership conflicts instead of taking ownership
        #[arg(long)]
        no_force: bool,
    },

    /// Run the built-in analyzers once and print the report
    Analyze {
        /// Analyzers to run (repeatable); all built-ins when omitted
        #[arg(long = "filter", short)]
        filters: Vec<String>,

        /// Only analyze this namespace
        #[arg(long, short)]
        namespace: Option<String>,

        /// Analyzers running at once
        #[arg(long, default_value_t = 10)]
        max_concurrency: usize,

        /// Include per-analyzer timings
        #[arg(long)]
        stats: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let client = AgentClient::new(AgentClientConfig {
        base_url: cli.agent_url.clone(),
        request_timeout: Duration::from_secs(cli.timeout),
        ..Default::default()
    })?;

    match cli.command {
        Commands::Pods { namespace } => {
            cluster::list_pods(&client, namespace, cli.format).await?;
        }
        Commands::Status { namespace, pod } => {
            cluster::show_status(&client, &namespace, &pod, cli.format).await?;
        }
        Commands::Logs {
            namespace,
            pod,
            container,
        } => {
            cluster::stream_logs(&client, &namespace, &pod, container).await?;
        }
        Commands::Manifest {
            kind,
            namespace,
            name,
        } => {
            cluster::show_manifest(&client, &kind, &namespace, &name, cli.format).await?;
        }
        Commands::Apply {
            file,
            field_manager,
            no_force,
        } => {
            cluster::apply_file(&client, &file, &field_manager, !no_force, cli.format).await?;
        }
        Commands::Analyze {
            filters,
            namespace,
            max_concurrency,
            stats,
        } => {
            analyze::run_analysis(client, filters, namespace, max_concurrency, stats, cli.format)
                .await?;
        }
    }

    Ok(())
}
