//! Access to cluster resources
//!
//! The engine talks to the cluster only through [`ClusterAccessor`]. Two
//! implementations are provided: [`KubeClusterAccessor`] calls the Kubernetes
//! API directly, [`AgentClient`] calls the HTTP boundary served by
//! `remedy-agent serve`.

mod direct;
mod http;
mod status;

#[cfg(test)]
pub(crate) mod testing;

pub use direct::KubeClusterAccessor;
pub use self::http::{AgentClient, AgentClientConfig};
pub use status::{format_probe_details, pod_status_from};

use crate::error::ClusterError;
use crate::models::{ApplyOutcome, PodStatus};
use bytes::Bytes;
use futures::stream::BoxStream;
use std::fmt;
use std::str::FromStr;

pub use async_trait::async_trait;

/// Field manager recorded on every server-side apply
pub const FIELD_MANAGER: &str = "kube-remedy";

/// Namespace used when a manifest or name does not carry one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Chunked log output of a container
pub type LogStream = BoxStream<'static, Result<Bytes, ClusterError>>;

/// Resource kinds the engine knows how to address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Pod,
    Deployment,
    ReplicaSet,
    StatefulSet,
    DaemonSet,
    Job,
    CronJob,
    Service,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 8] = [
        ResourceKind::Pod,
        ResourceKind::Deployment,
        ResourceKind::ReplicaSet,
        ResourceKind::StatefulSet,
        ResourceKind::DaemonSet,
        ResourceKind::Job,
        ResourceKind::CronJob,
        ResourceKind::Service,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Pod => "Pod",
            ResourceKind::Deployment => "Deployment",
            ResourceKind::ReplicaSet => "ReplicaSet",
            ResourceKind::StatefulSet => "StatefulSet",
            ResourceKind::DaemonSet => "DaemonSet",
            ResourceKind::Job => "Job",
            ResourceKind::CronJob => "CronJob",
            ResourceKind::Service => "Service",
        }
    }

    /// Kinds whose health is the health of the pods they select
    pub fn selects_pods(&self) -> bool {
        matches!(
            self,
            ResourceKind::Deployment
                | ResourceKind::ReplicaSet
                | ResourceKind::StatefulSet
                | ResourceKind::DaemonSet
                | ResourceKind::Job
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let singular = lower.strip_suffix('s').unwrap_or(&lower);
        ResourceKind::ALL
            .into_iter()
            .find(|k| {
                k.as_str().eq_ignore_ascii_case(singular) || k.as_str().eq_ignore_ascii_case(&lower)
            })
            .ok_or_else(|| ClusterError::BadRequest(format!("unsupported resource kind: {s}")))
    }
}

/// Operations the engine needs from the cluster
#[async_trait]
pub trait ClusterAccessor: Send + Sync {
    /// Fetch one resource as a manifest document (YAML), without status
    async fn get(&self, kind: ResourceKind, namespace: &str, name: &str)
        -> Result<String, ClusterError>;

    /// List resources as JSON objects, optionally filtered by label selector
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<serde_json::Value>, ClusterError>;

    /// Server-side apply of a manifest document
    async fn apply(
        &self,
        manifest: &str,
        field_manager: &str,
        force: bool,
    ) -> Result<ApplyOutcome, ClusterError>;

    /// Current phase and container readiness of a pod
    async fn pod_status(&self, namespace: &str, name: &str) -> Result<PodStatus, ClusterError>;

    /// Names of the pods currently selected by a deployment
    async fn deployment_pod_names(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Vec<String>, ClusterError>;

    /// Stream the logs of a pod, optionally of a single container
    async fn stream_logs(
        &self,
        namespace: &str,
        name: &str,
        container: Option<&str>,
    ) -> Result<LogStream, ClusterError>;
}

/// Render a `matchLabels` map as a label selector string
pub fn label_selector<'a>(labels: impl IntoIterator<Item = (&'a String, &'a String)>) -> String {
    labels
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}
