//! Commands that read or change cluster resources through the agent

use anyhow::{Context, Result};
use colored::Colorize;
use futures::StreamExt;
use remedy_lib::{
    cluster::{AgentClient, ClusterAccessor, ResourceKind},
    models::{ContainerProbes, PodStatus, ProbeStatus},
};
use serde_json::Value;
use tabled::Tabled;
use tokio::io::AsyncWriteExt;

use crate::output::{
    color_status, format_age, format_ready, print_heading, print_info, print_json,
    print_success, print_table, truncate, OutputFormat,
};

#[derive(Tabled)]
struct PodRow {
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Ready")]
    ready: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Restarts")]
    restarts: i64,
    #[tabled(rename = "Age")]
    age: String,
}

impl PodRow {
    fn from_object(pod: &Value) -> Self {
        let statuses = pod["status"]["containerStatuses"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        let ready = statuses
            .iter()
            .filter(|c| c["ready"].as_bool().unwrap_or(false))
            .count();
        let waiting = statuses
            .iter()
            .find_map(|c| c["state"]["waiting"]["reason"].as_str());
        let phase = pod["status"]["phase"].as_str().unwrap_or("Unknown");

        Self {
            namespace: pod["metadata"]["namespace"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            name: pod["metadata"]["name"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            ready: format_ready(ready, statuses.len()),
            status: color_status(waiting.unwrap_or(phase)),
            restarts: statuses
                .iter()
                .filter_map(|c| c["restartCount"].as_i64())
                .sum(),
            age: format_age(pod["status"]["startTime"].as_str()),
        }
    }
}

/// List pods, optionally in one namespace
pub async fn list_pods(
    client: &AgentClient,
    namespace: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let pods = client
        .list(ResourceKind::Pod, namespace.as_deref(), None)
        .await
        .context("listing pods")?;

    match format {
        OutputFormat::Json => print_json(&pods)?,
        OutputFormat::Table => {
            let count = pods.len();
            print_table(
                pods.iter().map(PodRow::from_object).collect(),
                "No pods found",
            );
            if count > 0 {
                println!("\nTotal: {} pods", count);
            }
        }
    }

    Ok(())
}

#[derive(Tabled)]
struct ContainerRow {
    #[tabled(rename = "Container")]
    name: String,
    #[tabled(rename = "Ready")]
    ready: String,
    #[tabled(rename = "Restarts")]
    restarts: i32,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Image")]
    image: String,
}

#[derive(Tabled)]
struct ConditionRow {
    #[tabled(rename = "Condition")]
    condition_type: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

#[derive(Tabled)]
struct ProbeRow {
    #[tabled(rename = "Container")]
    container: String,
    #[tabled(rename = "Probe")]
    probe: String,
    #[tabled(rename = "Passing")]
    passing: String,
    #[tabled(rename = "Failures")]
    failures: i32,
    #[tabled(rename = "Handler")]
    details: String,
    #[tabled(rename = "Last Failure")]
    last_failure: String,
}

fn probe_rows(probes: &ContainerProbes) -> Vec<ProbeRow> {
    let row = |kind: &str, p: &ProbeStatus| ProbeRow {
        container: probes.container_name.clone(),
        probe: kind.to_string(),
        passing: color_status(if p.status { "true" } else { "false" }),
        failures: p.failure_count,
        details: p.details.clone(),
        last_failure: truncate(p.failure.as_deref().unwrap_or("-"), 50),
    };

    let mut rows = Vec::new();
    if let Some(p) = &probes.liveness {
        rows.push(row("liveness", p));
    }
    if let Some(p) = &probes.readiness {
        rows.push(row("readiness", p));
    }
    rows
}

fn print_pod_status(status: &PodStatus) {
    print_heading("Pod Status");
    println!("Pod:        {}", status.name.cyan());
    println!("Namespace:  {}", status.namespace.cyan());
    println!("Phase:      {}", color_status(&status.phase));
    println!("Age:        {}", format_age(status.start_time.as_deref()));
    if let Some(ip) = &status.pod_ip {
        println!("Pod IP:     {}", ip);
    }
    println!();

    print_table(
        status
            .container_statuses
            .iter()
            .map(|c| {
                let state = c
                    .waiting
                    .as_ref()
                    .or(c.terminated.as_ref())
                    .and_then(|d| d.reason.clone())
                    .unwrap_or_else(|| {
                        if c.started { "Running" } else { "Unknown" }.to_string()
                    });
                ContainerRow {
                    name: c.name.clone(),
                    ready: color_status(if c.ready { "true" } else { "false" }),
                    restarts: c.restart_count,
                    state: color_status(&state),
                    image: c.image.clone(),
                }
            })
            .collect(),
        "No container statuses reported",
    );

    if !status.conditions.is_empty() {
        println!();
        print_table(
            status
                .conditions
                .iter()
                .map(|c| ConditionRow {
                    condition_type: c.condition_type.clone(),
                    status: color_status(&c.status),
                    reason: c.reason.clone().unwrap_or_default(),
                })
                .collect(),
            "",
        );
    }

    let probes: Vec<ProbeRow> = status.probe_results.iter().flat_map(probe_rows).collect();
    if !probes.is_empty() {
        println!();
        print_table(probes, "");
    }
}

/// Show phase, containers, conditions and probes of a pod
pub async fn show_status(
    client: &AgentClient,
    namespace: &str,
    pod: &str,
    format: OutputFormat,
) -> Result<()> {
    let status = client.pod_status(namespace, pod).await?;

    match format {
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Table => print_pod_status(&status),
    }

    Ok(())
}

/// Copy a container's log stream to stdout as it arrives
pub async fn stream_logs(
    client: &AgentClient,
    namespace: &str,
    pod: &str,
    container: Option<String>,
) -> Result<()> {
    let mut stream = client
        .stream_logs(namespace, pod, container.as_deref())
        .await?;
    let mut stdout = tokio::io::stdout();

    while let Some(chunk) = stream.next().await {
        stdout.write_all(&chunk?).await?;
        stdout.flush().await?;
    }

    Ok(())
}

/// Print the manifest of one resource
pub async fn show_manifest(
    client: &AgentClient,
    kind: &str,
    namespace: &str,
    name: &str,
    format: OutputFormat,
) -> Result<()> {
    let kind: ResourceKind = kind.parse()?;
    let manifest = client.get(kind, namespace, name).await?;

    match format {
        OutputFormat::Json => {
            let value: Value =
                serde_yaml::from_str(&manifest).context("agent returned an invalid manifest")?;
            print_json(&value)?;
        }
        OutputFormat::Table => print!("{}", manifest),
    }

    Ok(())
}

/// Server-side apply a manifest file
pub async fn apply_file(
    client: &AgentClient,
    path: &str,
    field_manager: &str,
    force: bool,
    format: OutputFormat,
) -> Result<()> {
    let manifest = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path))?;
    if !force {
        print_info("Applying without --force; conflicting fields will be rejected");
    }

    let outcome = client.apply(&manifest, field_manager, force).await?;

    match format {
        OutputFormat::Json => print_json(&outcome)?,
        OutputFormat::Table => print_success(&format!(
            "{} {}/{} {}",
            outcome.kind.to_lowercase(),
            outcome.namespace,
            outcome.name,
            color_status(&outcome.action.to_string())
        )),
    }

    Ok(())
}
