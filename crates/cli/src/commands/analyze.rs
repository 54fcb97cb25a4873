//! One analysis pass through the agent, without remediation

use anyhow::Result;
use colored::Colorize;
use remedy_lib::{
    analysis::{AnalysisConfig, AnalysisRunner, AnalyzerRegistry},
    cluster::AgentClient,
    models::{AnalysisReport, AnalyzerFailureKind},
};
use std::sync::Arc;
use tabled::Tabled;
use tokio_util::sync::CancellationToken;

use crate::output::{print_heading, print_json, print_success, print_table, truncate, OutputFormat};

#[derive(Tabled)]
struct IssueRow {
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Parent")]
    parent: String,
    #[tabled(rename = "Failure")]
    failure: String,
}

#[derive(Tabled)]
struct FailureRow {
    #[tabled(rename = "Analyzer")]
    analyzer: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Message")]
    message: String,
}

#[derive(Tabled)]
struct StatRow {
    #[tabled(rename = "Analyzer")]
    analyzer: String,
    #[tabled(rename = "Duration")]
    duration: String,
}

fn failure_kind(kind: AnalyzerFailureKind) -> &'static str {
    match kind {
        AnalyzerFailureKind::UnknownAnalyzer => "unknown analyzer",
        AnalyzerFailureKind::Failed => "failed",
        AnalyzerFailureKind::Panicked => "panicked",
        AnalyzerFailureKind::Cancelled => "cancelled",
    }
}

fn issue_rows(report: &AnalysisReport) -> Vec<IssueRow> {
    report
        .results
        .iter()
        .flat_map(|issue| {
            issue.errors.iter().map(move |failure| IssueRow {
                kind: issue.kind.clone(),
                name: issue.name.clone(),
                parent: if issue.parent_object.is_empty() {
                    "-".to_string()
                } else {
                    issue.parent_object.clone()
                },
                failure: truncate(&failure.text, 70),
            })
        })
        .collect()
}

fn print_report(report: &AnalysisReport) {
    if report.is_clean() {
        print_success("No problems detected");
        return;
    }

    print_heading("Analysis Report");
    print_table(issue_rows(report), "No issues found");

    if !report.errors.is_empty() {
        println!("\n{}", "Analyzer errors".red().bold());
        print_table(
            report
                .errors
                .iter()
                .map(|e| FailureRow {
                    analyzer: e.analyzer.clone(),
                    kind: failure_kind(e.kind).to_string(),
                    message: truncate(&e.message, 70),
                })
                .collect(),
            "",
        );
    }

    if let Some(stats) = &report.stats {
        println!("\n{}", "Timing".bold());
        print_table(
            stats
                .iter()
                .map(|s| StatRow {
                    analyzer: s.analyzer.clone(),
                    duration: format!("{}ms", s.duration.as_millis()),
                })
                .collect(),
            "",
        );
    }

    println!(
        "\nTotal: {} issues from {} analyzers",
        report.results.len(),
        report.completed.len()
    );
}

/// Run the built-in analyzers against the agent and print the report
pub async fn run_analysis(
    client: AgentClient,
    filters: Vec<String>,
    namespace: Option<String>,
    max_concurrency: usize,
    with_stats: bool,
    format: OutputFormat,
) -> Result<()> {
    let runner = AnalysisRunner::new(
        Arc::new(client),
        AnalyzerRegistry::with_defaults(),
        AnalysisConfig {
            max_concurrency,
            namespace,
            with_stats,
            ..Default::default()
        },
    );

    let cancel = CancellationToken::new();
    let report = tokio::select! {
        report = runner.run(&filters, cancel.clone()) => report,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            anyhow::bail!("analysis interrupted");
        }
    };

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => print_report(&report),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use remedy_lib::models::{DiagnosedIssue, Failure};

    #[test]
    fn test_one_row_per_failure() {
        let report = AnalysisReport {
            results: vec![DiagnosedIssue::new("Pod", "shop/web-1")
                .with_parent("Deployment/web")
                .with_failure(Failure::new("back-off restarting failed container"))
                .with_failure(Failure::new("readiness probe failed"))],
            completed: vec!["Pod".to_string()],
            ..Default::default()
        };

        let rows = issue_rows(&report);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].parent, "Deployment/web");
        assert_eq!(rows[1].failure, "readiness probe failed");
    }
}
