//! In-memory cluster used by unit tests

use super::{ClusterAccessor, LogStream, ResourceKind};
use crate::error::ClusterError;
use crate::models::{ApplyAction, ApplyOutcome, ContainerStatus, PodStatus};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

type Key = (ResourceKind, String, String);

/// Scriptable [`ClusterAccessor`] that records every call
#[derive(Default)]
pub struct FakeCluster {
    manifests: Mutex<HashMap<Key, String>>,
    objects: Mutex<HashMap<ResourceKind, Vec<serde_json::Value>>>,
    /// Successive statuses per pod; the last one repeats
    pod_statuses: Mutex<HashMap<(String, String), VecDeque<Result<PodStatus, String>>>>,
    deployment_pods: Mutex<HashMap<(String, String), Vec<String>>>,
    apply_error: Mutex<Option<String>>,
    status_delay: Mutex<Option<Duration>>,
    pub get_calls: Mutex<Vec<Key>>,
    pub list_calls: Mutex<Vec<(ResourceKind, Option<String>, Option<String>)>>,
    pub applied: Mutex<Vec<(String, String, bool)>>,
    pub status_calls: Mutex<usize>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_manifest(self, kind: ResourceKind, ns: &str, name: &str, yaml: &str) -> Self {
        self.manifests
            .lock()
            .unwrap()
            .insert((kind, ns.to_string(), name.to_string()), yaml.to_string());
        self
    }

    pub fn with_objects(self, kind: ResourceKind, objects: Vec<serde_json::Value>) -> Self {
        self.objects.lock().unwrap().insert(kind, objects);
        self
    }

    pub fn with_pod_statuses(self, ns: &str, name: &str, phases: Vec<PodStatus>) -> Self {
        self.pod_statuses.lock().unwrap().insert(
            (ns.to_string(), name.to_string()),
            phases.into_iter().map(Ok).collect(),
        );
        self
    }

    pub fn with_pod_status_error(self, ns: &str, name: &str, message: &str) -> Self {
        self.pod_statuses
            .lock()
            .unwrap()
            .entry((ns.to_string(), name.to_string()))
            .or_default()
            .push_front(Err(message.to_string()));
        self
    }

    pub fn with_deployment_pods(self, ns: &str, name: &str, pods: &[&str]) -> Self {
        self.deployment_pods.lock().unwrap().insert(
            (ns.to_string(), name.to_string()),
            pods.iter().map(|p| p.to_string()).collect(),
        );
        self
    }

    /// Stall every `pod_status` call before answering
    pub fn with_status_delay(self, delay: Duration) -> Self {
        *self.status_delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn failing_apply(self, message: &str) -> Self {
        *self.apply_error.lock().unwrap() = Some(message.to_string());
        self
    }

    pub fn network_calls(&self) -> usize {
        self.get_calls.lock().unwrap().len()
            + self.applied.lock().unwrap().len()
            + *self.status_calls.lock().unwrap()
    }
}

/// Pod status with one container in the given phase and readiness
pub fn pod_status(ns: &str, name: &str, phase: &str, ready: bool) -> PodStatus {
    PodStatus {
        name: name.to_string(),
        namespace: ns.to_string(),
        phase: phase.to_string(),
        container_statuses: vec![ContainerStatus {
            name: "app".to_string(),
            ready,
            ..Default::default()
        }],
        ..Default::default()
    }
}

#[async_trait]
impl ClusterAccessor for FakeCluster {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<String, ClusterError> {
        let key = (kind, namespace.to_string(), name.to_string());
        self.get_calls.lock().unwrap().push(key.clone());
        self.manifests
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or_else(|| ClusterError::not_found(kind.as_str(), namespace, name))
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<serde_json::Value>, ClusterError> {
        self.list_calls.lock().unwrap().push((
            kind,
            namespace.map(str::to_string),
            label_selector.map(str::to_string),
        ));
        let objects = self
            .objects
            .lock()
            .unwrap()
            .get(&kind)
            .cloned()
            .unwrap_or_default();
        Ok(objects
            .into_iter()
            .filter(|o| match namespace {
                Some(ns) => o["metadata"]["namespace"].as_str().unwrap_or("default") == ns,
                None => true,
            })
            .collect())
    }

    async fn apply(
        &self,
        manifest: &str,
        field_manager: &str,
        force: bool,
    ) -> Result<ApplyOutcome, ClusterError> {
        self.applied.lock().unwrap().push((
            manifest.to_string(),
            field_manager.to_string(),
            force,
        ));
        if let Some(message) = self.apply_error.lock().unwrap().clone() {
            return Err(ClusterError::Api {
                status: 500,
                message,
            });
        }
        let value: serde_yaml::Value = serde_yaml::from_str(manifest)?;
        let field = |path: &[&str]| {
            let mut cur = &value;
            for p in path {
                cur = &cur[*p];
            }
            cur.as_str().unwrap_or_default().to_string()
        };
        Ok(ApplyOutcome {
            kind: field(&["kind"]),
            name: field(&["metadata", "name"]),
            namespace: field(&["metadata", "namespace"]),
            action: ApplyAction::Applied,
        })
    }

    async fn pod_status(&self, namespace: &str, name: &str) -> Result<PodStatus, ClusterError> {
        *self.status_calls.lock().unwrap() += 1;
        let delay = *self.status_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut statuses = self.pod_statuses.lock().unwrap();
        let queue = statuses
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| ClusterError::not_found("Pod", namespace, name))?;
        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        match next {
            Some(Ok(status)) => Ok(status),
            Some(Err(message)) => Err(ClusterError::Transport(message)),
            None => Err(ClusterError::not_found("Pod", namespace, name)),
        }
    }

    async fn deployment_pod_names(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Vec<String>, ClusterError> {
        self.deployment_pods
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ClusterError::not_found("Deployment", namespace, name))
    }

    async fn stream_logs(
        &self,
        namespace: &str,
        name: &str,
        _container: Option<&str>,
    ) -> Result<LogStream, ClusterError> {
        if !self
            .pod_statuses
            .lock()
            .unwrap()
            .contains_key(&(namespace.to_string(), name.to_string()))
        {
            return Err(ClusterError::not_found("Pod", namespace, name));
        }
        let lines = vec![Ok(Bytes::from("starting\n")), Ok(Bytes::from("ready\n"))];
        Ok(futures::stream::iter(lines).boxed())
    }
}
