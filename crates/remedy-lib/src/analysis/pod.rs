//! Pod analyzer

use super::{AnalysisContext, Analyzer};
use crate::cluster::ResourceKind;
use crate::models::{DiagnosedIssue, Failure};
use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::debug;

/// Waiting reasons that mean the container will not start on its own
const FAILING_WAIT_REASONS: &[&str] = &[
    "CrashLoopBackOff",
    "ImagePullBackOff",
    "ErrImagePull",
    "InvalidImageName",
    "CreateContainerConfigError",
    "CreateContainerError",
    "RunContainerError",
];

/// Reports pods whose containers cannot run, failed pods and unschedulable pods
pub struct PodAnalyzer;

#[async_trait]
impl Analyzer for PodAnalyzer {
    fn name(&self) -> &str {
        "Pod"
    }

    async fn analyze(&self, ctx: &AnalysisContext) -> Result<Vec<DiagnosedIssue>> {
        let objects = ctx
            .accessor
            .list(ResourceKind::Pod, ctx.namespace.as_deref(), None)
            .await
            .context("failed to list pods")?;

        let mut issues = Vec::new();
        for object in objects {
            let pod: Pod = match serde_json::from_value(object) {
                Ok(pod) => pod,
                Err(e) => {
                    debug!(error = %e, "Skipping undecodable pod object");
                    continue;
                }
            };
            if let Some(issue) = diagnose(&pod) {
                issues.push(issue);
            }
        }
        Ok(issues)
    }
}

fn diagnose(pod: &Pod) -> Option<DiagnosedIssue> {
    let name = pod.name_any();
    let namespace = pod.namespace().unwrap_or_else(|| "default".to_string());
    let status = pod.status.as_ref()?;
    let mut failures = Vec::new();

    let phase = status.phase.as_deref().unwrap_or_default();
    if phase == "Pending" {
        for condition in status.conditions.iter().flatten() {
            if condition.type_ == "PodScheduled"
                && condition.status == "False"
                && condition.reason.as_deref() == Some("Unschedulable")
            {
                failures.push(format!(
                    "pod {name} cannot be scheduled: {}",
                    condition.message.clone().unwrap_or_default()
                ));
            }
        }
    }

    if phase == "Failed" {
        failures.push(format!(
            "pod {name} failed: {} {}",
            status.reason.clone().unwrap_or_default(),
            status.message.clone().unwrap_or_default()
        ));
    }

    for cs in status.container_statuses.iter().flatten() {
        let state = cs.state.clone().unwrap_or_default();
        if let Some(waiting) = state.waiting {
            let reason = waiting.reason.unwrap_or_default();
            if !FAILING_WAIT_REASONS.contains(&reason.as_str()) {
                continue;
            }
            if reason == "CrashLoopBackOff" {
                let last = cs
                    .last_state
                    .as_ref()
                    .and_then(|s| s.terminated.as_ref())
                    .and_then(|t| t.reason.clone())
                    .unwrap_or_else(|| "Unknown".to_string());
                failures.push(format!(
                    "the last termination reason is {last} container={} pod={name}",
                    cs.name
                ));
            } else {
                failures.push(
                    waiting
                        .message
                        .unwrap_or_else(|| format!("{reason} container={} pod={name}", cs.name)),
                );
            }
        } else if let Some(terminated) = state.terminated {
            if terminated.exit_code != 0 && cs.restart_count > 0 {
                failures.push(format!(
                    "container {} in pod {name} exited with code {} ({})",
                    cs.name,
                    terminated.exit_code,
                    terminated.reason.unwrap_or_default()
                ));
            }
        }
    }

    if failures.is_empty() {
        return None;
    }

    let mut issue = DiagnosedIssue::new("Pod", format!("{namespace}/{name}"));
    if let Some(parent) = parent_object(pod) {
        issue = issue.with_parent(parent);
    }
    for text in failures {
        issue = issue.with_failure(Failure::new(text).with_sensitive(vec![name.clone()]));
    }
    Some(issue)
}

/// `Kind/name` of the controller that owns the pod
fn parent_object(pod: &Pod) -> Option<String> {
    let owner = pod
        .owner_references()
        .iter()
        .find(|o| o.controller.unwrap_or(false))
        .or_else(|| pod.owner_references().first())?;

    match owner.kind.as_str() {
        "ReplicaSet" => {
            // deployments name their replica sets `<deployment>-<pod-template-hash>`
            let hash = pod.labels().get("pod-template-hash")?;
            let deployment = owner.name.strip_suffix(&format!("-{hash}"))?;
            Some(format!("Deployment/{deployment}"))
        }
        "StatefulSet" | "DaemonSet" | "Job" => Some(format!("{}/{}", owner.kind, owner.name)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn crashing_pod() -> Pod {
        serde_json::from_value(json!({
            "metadata": {
                "name": "web-7d4b9c-xkq2p",
                "namespace": "shop",
                "labels": { "app": "web", "pod-template-hash": "7d4b9c" },
                "ownerReferences": [{
                    "apiVersion": "apps/v1",
                    "kind": "ReplicaSet",
                    "name": "web-7d4b9c",
                    "uid": "1",
                    "controller": true
                }]
            },
            "spec": { "containers": [{ "name": "app", "image": "web:bad" }] },
            "status": {
                "phase": "Running",
                "containerStatuses": [{
                    "name": "app",
                    "ready": false,
                    "restartCount": 4,
                    "image": "web:bad",
                    "imageID": "",
                    "state": { "waiting": { "reason": "CrashLoopBackOff" } },
                    "lastState": { "terminated": { "exitCode": 1, "reason": "Error" } }
                }]
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_crash_loop_is_attributed_to_deployment() {
        let issue = diagnose(&crashing_pod()).unwrap();

        assert_eq!(issue.kind, "Pod");
        assert_eq!(issue.name, "shop/web-7d4b9c-xkq2p");
        assert_eq!(issue.parent_object, "Deployment/web");
        assert_eq!(issue.errors.len(), 1);
        assert!(issue.errors[0]
            .text
            .contains("the last termination reason is Error container=app"));
        assert!(!issue.masked_failure_text().contains("web-7d4b9c-xkq2p"));
    }

    #[test]
    fn test_healthy_pod_has_no_issue() {
        let pod: Pod = serde_json::from_value(json!({
            "metadata": { "name": "ok", "namespace": "default" },
            "status": {
                "phase": "Running",
                "containerStatuses": [{
                    "name": "app", "ready": true, "restartCount": 0,
                    "image": "x", "imageID": "", "state": { "running": {} }
                }]
            }
        }))
        .unwrap();
        assert!(diagnose(&pod).is_none());
    }

    #[test]
    fn test_unschedulable_pending_pod() {
        let pod: Pod = serde_json::from_value(json!({
            "metadata": { "name": "big", "namespace": "default" },
            "status": {
                "phase": "Pending",
                "conditions": [{
                    "type": "PodScheduled",
                    "status": "False",
                    "reason": "Unschedulable",
                    "message": "0/3 nodes are available: 3 Insufficient memory."
                }]
            }
        }))
        .unwrap();

        let issue = diagnose(&pod).unwrap();
        assert_eq!(issue.parent_object, "");
        assert!(issue.errors[0].text.contains("Insufficient memory"));
    }

    #[test]
    fn test_replica_set_without_hash_label_is_not_attributed() {
        let mut pod = crashing_pod();
        pod.metadata.labels = None;
        assert!(parent_object(&pod).is_none());
    }
}
