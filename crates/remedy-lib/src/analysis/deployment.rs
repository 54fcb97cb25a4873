//! Deployment analyzer

use super::{AnalysisContext, Analyzer};
use crate::cluster::ResourceKind;
use crate::models::{DiagnosedIssue, Failure};
use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;

/// Reports deployments with fewer ready replicas than desired
pub struct DeploymentAnalyzer;

#[async_trait]
impl Analyzer for DeploymentAnalyzer {
    fn name(&self) -> &str {
        "Deployment"
    }

    async fn analyze(&self, ctx: &AnalysisContext) -> Result<Vec<DiagnosedIssue>> {
        let objects = ctx
            .accessor
            .list(ResourceKind::Deployment, ctx.namespace.as_deref(), None)
            .await
            .context("failed to list deployments")?;

        Ok(objects
            .into_iter()
            .filter_map(|o| serde_json::from_value::<Deployment>(o).ok())
            .filter_map(|d| diagnose(&d))
            .collect())
    }
}

fn diagnose(deployment: &Deployment) -> Option<DiagnosedIssue> {
    let desired = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let ready = deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    if ready >= desired {
        return None;
    }

    let name = deployment.name_any();
    let namespace = deployment.namespace().unwrap_or_else(|| "default".to_string());
    let failure = Failure::new(format!(
        "Deployment {namespace}/{name} has {ready} ready replicas out of {desired} desired"
    ))
    .with_sensitive(vec![name.clone()]);

    Some(DiagnosedIssue::new("Deployment", format!("{namespace}/{name}")).with_failure(failure))
}
