//! Polling state machine that waits for a workload to become ready
//!
//! Every tick the verifier resolves the pods behind the target and checks
//! their phase:
//! - running with every container ready counts as ready
//! - the `Failed` phase is terminal and never retried
//! - fetch errors and other phases keep polling
//!
//! The loop ends with [`VerificationOutcome::TimedOut`] at the deadline and
//! with [`VerificationOutcome::Cancelled`] as soon as the token fires.

use crate::cluster::{label_selector, ClusterAccessor, ResourceKind};
use crate::models::PodStatus;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a multi-pod workload is judged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessPolicy {
    /// First ready pod concludes; failed only when every pod has failed
    #[default]
    Any,
    /// Every pod ready; any failed pod fails the rollout
    All,
}

/// Verifier settings
#[derive(Debug, Clone, Deserialize)]
pub struct VerifierConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub readiness: ReadinessPolicy,

    /// Overrides `poll_interval_secs` when set
    #[serde(skip)]
    pub poll_interval: Option<Duration>,

    /// Overrides `timeout_secs` when set
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            timeout_secs: default_timeout_secs(),
            readiness: ReadinessPolicy::default(),
            poll_interval: None,
            timeout: None,
        }
    }
}

impl VerifierConfig {
    pub fn with_durations(mut self, poll_interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = Some(poll_interval);
        self.timeout = Some(timeout);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
            .unwrap_or_else(|| Duration::from_secs(self.poll_interval_secs))
            .max(Duration::from_millis(1))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
            .unwrap_or_else(|| Duration::from_secs(self.timeout_secs))
    }
}

/// The workload a verification watches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationTarget {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for VerificationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Terminal state of a verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    Ready,
    Failed(String),
    TimedOut,
    Cancelled,
}

impl VerificationOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, VerificationOutcome::Ready)
    }

    pub fn label(&self) -> &'static str {
        match self {
            VerificationOutcome::Ready => "ready",
            VerificationOutcome::Failed(_) => "failed",
            VerificationOutcome::TimedOut => "timed_out",
            VerificationOutcome::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for VerificationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationOutcome::Failed(reason) => write!(f, "failed: {reason}"),
            other => f.write_str(other.label()),
        }
    }
}

/// Result of a single poll
enum Tick {
    Ready,
    Failed(String),
    Pending(String),
}

pub struct RolloutVerifier {
    accessor: Arc<dyn ClusterAccessor>,
    config: VerifierConfig,
}

impl RolloutVerifier {
    pub fn new(accessor: Arc<dyn ClusterAccessor>, config: VerifierConfig) -> Self {
        Self { accessor, config }
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Poll until `target` reaches a terminal state
    pub async fn verify(
        &self,
        target: &VerificationTarget,
        cancel: &CancellationToken,
    ) -> VerificationOutcome {
        let deadline = Instant::now() + self.config.timeout();
        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            kind = %target.kind,
            namespace = %target.namespace,
            name = %target.name,
            timeout_secs = self.config.timeout().as_secs(),
            "Waiting for rollout"
        );

        let mut last_observed = String::new();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(%target, "Verification cancelled");
                    return VerificationOutcome::Cancelled;
                }
                _ = sleep_until(deadline) => {
                    warn!(%target, last_observed = %last_observed, "Verification timed out");
                    return VerificationOutcome::TimedOut;
                }
                _ = ticker.tick() => {
                    // A stalled status request must not hold off cancellation or the deadline
                    let tick = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            info!(%target, "Verification cancelled");
                            return VerificationOutcome::Cancelled;
                        }
                        _ = sleep_until(deadline) => {
                            warn!(%target, last_observed = %last_observed, "Verification timed out");
                            return VerificationOutcome::TimedOut;
                        }
                        tick = self.poll(target) => tick,
                    };
                    match tick {
                        Tick::Ready => return VerificationOutcome::Ready,
                        Tick::Failed(reason) => return VerificationOutcome::Failed(reason),
                        Tick::Pending(observed) => {
                            debug!(%target, observed = %observed, "Rollout still in progress");
                            last_observed = observed;
                        }
                    }
                }
            }
        }
    }

    async fn poll(&self, target: &VerificationTarget) -> Tick {
        let pods = match self.resolve_pods(target).await {
            Ok(pods) => pods,
            Err(e) => return Tick::Pending(format!("could not resolve pods: {e}")),
        };
        if pods.is_empty() {
            return Tick::Pending("no pods yet".to_string());
        }

        let mut statuses = Vec::with_capacity(pods.len());
        for pod in &pods {
            match self.accessor.pod_status(&target.namespace, pod).await {
                Ok(status) => statuses.push(status),
                Err(e) => {
                    debug!(pod = %pod, error = %e, "Pod status fetch failed");
                }
            }
        }
        if statuses.is_empty() {
            return Tick::Pending("pod status unavailable".to_string());
        }

        judge(&statuses, pods.len(), self.config.readiness)
    }

    async fn resolve_pods(&self, target: &VerificationTarget) -> Result<Vec<String>, String> {
        match target.kind {
            ResourceKind::Pod => Ok(vec![target.name.clone()]),
            ResourceKind::Deployment => self
                .accessor
                .deployment_pod_names(&target.namespace, &target.name)
                .await
                .map_err(|e| e.to_string()),
            kind if kind.selects_pods() => {
                let selector = self.workload_selector(target).await?;
                let pods = self
                    .accessor
                    .list(ResourceKind::Pod, Some(&target.namespace), Some(&selector))
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(pods
                    .iter()
                    .filter_map(|p| p["metadata"]["name"].as_str().map(str::to_string))
                    .collect())
            }
            kind => Err(format!("{kind} does not manage pods")),
        }
    }

    async fn workload_selector(&self, target: &VerificationTarget) -> Result<String, String> {
        let manifest = self
            .accessor
            .get(target.kind, &target.namespace, &target.name)
            .await
            .map_err(|e| e.to_string())?;
        let value: serde_yaml::Value = serde_yaml::from_str(&manifest).map_err(|e| e.to_string())?;
        let labels: BTreeMap<String, String> = value["spec"]["selector"]["matchLabels"]
            .as_mapping()
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| Some((k.as_str()?.to_string(), v.as_str()?.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        if labels.is_empty() {
            return Err(format!("{target} has no matchLabels selector"));
        }
        Ok(label_selector(&labels))
    }
}

fn judge(statuses: &[PodStatus], expected: usize, policy: ReadinessPolicy) -> Tick {
    let ready = statuses.iter().filter(|s| s.is_ready()).count();
    let failed: Vec<&PodStatus> = statuses.iter().filter(|s| s.is_failed()).collect();
    let summary = statuses
        .iter()
        .map(|s| format!("{}={}", s.name, s.phase))
        .collect::<Vec<_>>()
        .join(",");

    match policy {
        ReadinessPolicy::Any => {
            if ready > 0 {
                Tick::Ready
            } else if failed.len() == expected {
                Tick::Failed(format!("every pod failed: {summary}"))
            } else {
                Tick::Pending(summary)
            }
        }
        ReadinessPolicy::All => {
            if let Some(pod) = failed.first() {
                Tick::Failed(format!("pod {} entered phase Failed", pod.name))
            } else if ready == expected {
                Tick::Ready
            } else {
                Tick::Pending(summary)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::testing::{pod_status, FakeCluster};

    fn fast_config() -> VerifierConfig {
        VerifierConfig::default()
            .with_durations(Duration::from_millis(10), Duration::from_millis(300))
    }

    fn pod_target(name: &str) -> VerificationTarget {
        VerificationTarget {
            kind: ResourceKind::Pod,
            namespace: "default".to_string(),
            name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_pod_becomes_ready_after_pending() {
        let cluster = FakeCluster::new().with_pod_statuses(
            "default",
            "web-1",
            vec![
                pod_status("default", "web-1", "Pending", false),
                pod_status("default", "web-1", "Running", false),
                pod_status("default", "web-1", "Running", true),
            ],
        );
        let verifier = RolloutVerifier::new(Arc::new(cluster), fast_config());

        let outcome = verifier
            .verify(&pod_target("web-1"), &CancellationToken::new())
            .await;
        assert_eq!(outcome, VerificationOutcome::Ready);
    }

    #[tokio::test]
    async fn test_failed_phase_is_terminal() {
        let cluster = FakeCluster::new().with_pod_statuses(
            "default",
            "web-1",
            vec![pod_status("default", "web-1", "Failed", false)],
        );
        let verifier = RolloutVerifier::new(Arc::new(cluster), fast_config());

        let outcome = verifier
            .verify(&pod_target("web-1"), &CancellationToken::new())
            .await;
        assert!(matches!(outcome, VerificationOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_transient_errors_keep_polling() {
        let cluster = FakeCluster::new()
            .with_pod_statuses(
                "default",
                "web-1",
                vec![pod_status("default", "web-1", "Running", true)],
            )
            .with_pod_status_error("default", "web-1", "connection reset");
        let cluster = Arc::new(cluster);
        let verifier = RolloutVerifier::new(cluster.clone(), fast_config());

        let outcome = verifier
            .verify(&pod_target("web-1"), &CancellationToken::new())
            .await;
        assert_eq!(outcome, VerificationOutcome::Ready);
        assert!(*cluster.status_calls.lock().unwrap() >= 2);
    }

    #[tokio::test]
    async fn test_times_out_when_never_ready() {
        let cluster = FakeCluster::new().with_pod_statuses(
            "default",
            "web-1",
            vec![pod_status("default", "web-1", "Pending", false)],
        );
        let verifier = RolloutVerifier::new(Arc::new(cluster), fast_config());

        let outcome = verifier
            .verify(&pod_target("web-1"), &CancellationToken::new())
            .await;
        assert_eq!(outcome, VerificationOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_cancellation_is_distinct_from_timeout() {
        let cluster = FakeCluster::new().with_pod_statuses(
            "default",
            "web-1",
            vec![pod_status("default", "web-1", "Pending", false)],
        );
        let verifier = RolloutVerifier::new(
            Arc::new(cluster),
            VerifierConfig::default()
                .with_durations(Duration::from_millis(10), Duration::from_secs(60)),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let outcome = verifier.verify(&pod_target("web-1"), &cancel).await;
        assert_eq!(outcome, VerificationOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_stalled_status_request() {
        let cluster = FakeCluster::new()
            .with_pod_statuses(
                "default",
                "web-1",
                vec![pod_status("default", "web-1", "Running", true)],
            )
            .with_status_delay(Duration::from_secs(10));
        let verifier = RolloutVerifier::new(
            Arc::new(cluster),
            VerifierConfig::default()
                .with_durations(Duration::from_millis(10), Duration::from_millis(200)),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let outcome = verifier.verify(&pod_target("web-1"), &cancel).await;

        assert_eq!(outcome, VerificationOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_deadline_interrupts_stalled_status_request() {
        let cluster = FakeCluster::new()
            .with_pod_statuses(
                "default",
                "web-1",
                vec![pod_status("default", "web-1", "Running", true)],
            )
            .with_status_delay(Duration::from_secs(10));
        let verifier = RolloutVerifier::new(
            Arc::new(cluster),
            VerifierConfig::default()
                .with_durations(Duration::from_millis(10), Duration::from_millis(100)),
        );

        let started = Instant::now();
        let outcome = verifier
            .verify(&pod_target("web-1"), &CancellationToken::new())
            .await;

        assert_eq!(outcome, VerificationOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_ready_pod_concludes_within_one_interval() {
        let cluster = Arc::new(FakeCluster::new().with_pod_statuses(
            "default",
            "web-1",
            vec![pod_status("default", "web-1", "Running", true)],
        ));
        let poll_interval = Duration::from_millis(500);
        let verifier = RolloutVerifier::new(
            cluster.clone(),
            VerifierConfig::default().with_durations(poll_interval, Duration::from_secs(60)),
        );

        let started = Instant::now();
        let outcome = verifier
            .verify(&pod_target("web-1"), &CancellationToken::new())
            .await;

        assert_eq!(outcome, VerificationOutcome::Ready);
        assert!(started.elapsed() < poll_interval);
        assert_eq!(*cluster.status_calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_deployment_with_no_pods_keeps_polling() {
        let cluster = FakeCluster::new().with_deployment_pods("ns1", "dep-a", &[]);
        let verifier = RolloutVerifier::new(Arc::new(cluster), fast_config());
        let target = VerificationTarget {
            kind: ResourceKind::Deployment,
            namespace: "ns1".to_string(),
            name: "dep-a".to_string(),
        };

        let outcome = verifier.verify(&target, &CancellationToken::new()).await;
        assert_eq!(outcome, VerificationOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_deployment_readiness_policies() {
        let cluster = Arc::new(
            FakeCluster::new()
                .with_deployment_pods("ns1", "dep-a", &["dep-a-1", "dep-a-2"])
                .with_pod_statuses(
                    "ns1",
                    "dep-a-1",
                    vec![pod_status("ns1", "dep-a-1", "Running", true)],
                )
                .with_pod_statuses(
                    "ns1",
                    "dep-a-2",
                    vec![pod_status("ns1", "dep-a-2", "Failed", false)],
                ),
        );
        let target = VerificationTarget {
            kind: ResourceKind::Deployment,
            namespace: "ns1".to_string(),
            name: "dep-a".to_string(),
        };

        let any = RolloutVerifier::new(cluster.clone(), fast_config());
        assert_eq!(
            any.verify(&target, &CancellationToken::new()).await,
            VerificationOutcome::Ready
        );

        let mut config = fast_config();
        config.readiness = ReadinessPolicy::All;
        let all = RolloutVerifier::new(cluster, config);
        assert!(matches!(
            all.verify(&target, &CancellationToken::new()).await,
            VerificationOutcome::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_statefulset_resolved_through_selector() {
        let manifest = "apiVersion: apps/v1\nkind: StatefulSet\nmetadata:\n  name: db\nspec:\n  selector:\n    matchLabels:\n      app: db\n";
        let cluster = Arc::new(
            FakeCluster::new()
                .with_manifest(ResourceKind::StatefulSet, "default", "db", manifest)
                .with_objects(
                    ResourceKind::Pod,
                    vec![serde_json::json!({ "metadata": { "name": "db-0", "namespace": "default" } })],
                )
                .with_pod_statuses(
                    "default",
                    "db-0",
                    vec![pod_status("default", "db-0", "Running", true)],
                ),
        );
        let verifier = RolloutVerifier::new(cluster.clone(), fast_config());
        let target = VerificationTarget {
            kind: ResourceKind::StatefulSet,
            namespace: "default".to_string(),
            name: "db".to_string(),
        };

        assert_eq!(
            verifier.verify(&target, &CancellationToken::new()).await,
            VerificationOutcome::Ready
        );
        let calls = cluster.list_calls.lock().unwrap();
        assert_eq!(calls[0].2.as_deref(), Some("app=db"));
    }

    #[test]
    fn test_config_defaults() {
        let config = VerifierConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.timeout(), Duration::from_secs(300));
        assert_eq!(config.readiness, ReadinessPolicy::Any);
    }
}
