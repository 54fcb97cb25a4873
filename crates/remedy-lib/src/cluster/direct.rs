//! [`ClusterAccessor`] backed by the Kubernetes API

use super::{label_selector, status, ClusterAccessor, LogStream, ResourceKind, DEFAULT_NAMESPACE};
use crate::error::ClusterError;
use crate::models::{ApplyAction, ApplyOutcome, PodStatus};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{AsyncBufReadExt, StreamExt, TryStreamExt};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::{Api, DynamicObject, ListParams, LogParams, Patch, PatchParams};
use kube::core::GroupVersionKind;
use kube::discovery::{self, ApiResource, Scope};
use kube::{Client, ResourceExt};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Direct Kubernetes API access through a kube client
#[derive(Clone)]
pub struct KubeClusterAccessor {
    client: Client,
}

impl KubeClusterAccessor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using in-cluster config or the local kubeconfig
    pub async fn try_default() -> Result<Self, ClusterError> {
        let client = Client::try_default()
            .await
            .map_err(|e| ClusterError::Transport(e.to_string()))?;
        Ok(Self::new(client))
    }

    fn dynamic_api(&self, kind: ResourceKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = api_resource(kind);
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        }
    }
}

fn api_resource(kind: ResourceKind) -> ApiResource {
    match kind {
        ResourceKind::Pod => ApiResource::erase::<Pod>(&()),
        ResourceKind::Deployment => ApiResource::erase::<Deployment>(&()),
        ResourceKind::ReplicaSet => ApiResource::erase::<ReplicaSet>(&()),
        ResourceKind::StatefulSet => ApiResource::erase::<StatefulSet>(&()),
        ResourceKind::DaemonSet => ApiResource::erase::<DaemonSet>(&()),
        ResourceKind::Job => ApiResource::erase::<Job>(&()),
        ResourceKind::CronJob => ApiResource::erase::<CronJob>(&()),
        ResourceKind::Service => ApiResource::erase::<Service>(&()),
    }
}

fn map_kube_error(err: kube::Error, kind: &str, namespace: &str, name: &str) -> ClusterError {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => ClusterError::not_found(kind, namespace, name),
        kube::Error::Api(ae) if ae.code == 400 || ae.code == 422 => {
            ClusterError::BadRequest(ae.message)
        }
        kube::Error::Api(ae) => ClusterError::Api {
            status: ae.code,
            message: ae.message,
        },
        kube::Error::SerdeError(e) => ClusterError::Serialization(e.to_string()),
        other => ClusterError::Transport(other.to_string()),
    }
}

/// Reduce a live object to the parts worth editing: identity and spec
fn manifest_value(kind: ResourceKind, obj: &DynamicObject) -> Value {
    let api_version = obj
        .types
        .as_ref()
        .map(|t| t.api_version.clone())
        .unwrap_or_else(|| api_resource(kind).api_version);

    let mut metadata = Map::new();
    metadata.insert("name".to_string(), json!(obj.name_any()));
    if let Some(ns) = &obj.metadata.namespace {
        metadata.insert("namespace".to_string(), json!(ns));
    }
    if !obj.labels().is_empty() {
        metadata.insert("labels".to_string(), json!(obj.labels()));
    }
    let annotations: std::collections::BTreeMap<_, _> = obj
        .annotations()
        .iter()
        .filter(|(k, _)| k.as_str() != "kubectl.kubernetes.io/last-applied-configuration")
        .collect();
    if !annotations.is_empty() {
        metadata.insert("annotations".to_string(), json!(annotations));
    }

    let mut manifest = Map::new();
    manifest.insert("apiVersion".to_string(), json!(api_version));
    manifest.insert("kind".to_string(), json!(kind.as_str()));
    manifest.insert("metadata".to_string(), Value::Object(metadata));
    if let Value::Object(data) = &obj.data {
        for (key, value) in data {
            if key != "status" {
                manifest.insert(key.clone(), value.clone());
            }
        }
    }
    Value::Object(manifest)
}

fn parse_gvk(obj: &DynamicObject) -> Result<GroupVersionKind, ClusterError> {
    let types = obj
        .types
        .as_ref()
        .ok_or_else(|| ClusterError::BadRequest("manifest is missing apiVersion/kind".into()))?;
    if types.kind.is_empty() || types.api_version.is_empty() {
        return Err(ClusterError::BadRequest(
            "manifest is missing apiVersion/kind".into(),
        ));
    }
    let (group, version) = match types.api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", types.api_version.as_str()),
    };
    Ok(GroupVersionKind::gvk(group, version, &types.kind))
}

#[async_trait]
impl ClusterAccessor for KubeClusterAccessor {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<String, ClusterError> {
        let api = self.dynamic_api(kind, Some(namespace));
        let obj = api
            .get_opt(name)
            .await
            .map_err(|e| map_kube_error(e, kind.as_str(), namespace, name))?
            .ok_or_else(|| ClusterError::not_found(kind.as_str(), namespace, name))?;

        Ok(serde_yaml::to_string(&manifest_value(kind, &obj))?)
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<Value>, ClusterError> {
        let api = self.dynamic_api(kind, namespace);
        let mut params = ListParams::default();
        if let Some(selector) = label_selector.filter(|s| !s.is_empty()) {
            params = params.labels(selector);
        }

        let list = api
            .list(&params)
            .await
            .map_err(|e| map_kube_error(e, kind.as_str(), namespace.unwrap_or(""), ""))?;

        list.items
            .into_iter()
            .map(|mut obj| {
                // list items come back without type information
                if obj.types.is_none() {
                    let resource = api_resource(kind);
                    obj.types = Some(kube::core::TypeMeta {
                        api_version: resource.api_version,
                        kind: resource.kind,
                    });
                }
                serde_json::to_value(&obj).map_err(ClusterError::from)
            })
            .collect()
    }

    async fn apply(
        &self,
        manifest: &str,
        field_manager: &str,
        force: bool,
    ) -> Result<ApplyOutcome, ClusterError> {
        let mut obj: DynamicObject = serde_yaml::from_str(manifest)
            .map_err(|e| ClusterError::BadRequest(format!("invalid manifest: {e}")))?;
        let gvk = parse_gvk(&obj)?;
        let name = obj
            .metadata
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ClusterError::BadRequest("manifest is missing metadata.name".into()))?;

        let (resource, caps) = discovery::pinned_kind(&self.client, &gvk)
            .await
            .map_err(|e| match e {
                kube::Error::Api(ae) => ClusterError::Api {
                    status: ae.code,
                    message: ae.message,
                },
                other => ClusterError::BadRequest(format!(
                    "unknown resource type {}: {other}",
                    gvk.kind
                )),
            })?;

        let namespace = match caps.scope {
            Scope::Namespaced => obj
                .metadata
                .namespace
                .clone()
                .filter(|ns| !ns.is_empty())
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            Scope::Cluster => String::new(),
        };

        obj.metadata.managed_fields = None;
        obj.metadata.resource_version = None;
        if !namespace.is_empty() {
            obj.metadata.namespace = Some(namespace.clone());
        }

        let api: Api<DynamicObject> = if namespace.is_empty() {
            Api::all_with(self.client.clone(), &resource)
        } else {
            Api::namespaced_with(self.client.clone(), &namespace, &resource)
        };

        let mut params = PatchParams::apply(field_manager);
        if force {
            params = params.force();
        }

        debug!(kind = %gvk.kind, %namespace, %name, "Applying manifest");
        api.patch(&name, &params, &Patch::Apply(&obj))
            .await
            .map_err(|e| map_kube_error(e, &gvk.kind, &namespace, &name))?;

        Ok(ApplyOutcome {
            kind: gvk.kind,
            name,
            namespace,
            action: ApplyAction::Applied,
        })
    }

    async fn pod_status(&self, namespace: &str, name: &str) -> Result<PodStatus, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = api
            .get_opt(name)
            .await
            .map_err(|e| map_kube_error(e, "Pod", namespace, name))?
            .ok_or_else(|| ClusterError::not_found("Pod", namespace, name))?;
        Ok(status::pod_status_from(&pod))
    }

    async fn deployment_pod_names(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Vec<String>, ClusterError> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let deployment = deployments
            .get_opt(name)
            .await
            .map_err(|e| map_kube_error(e, "Deployment", namespace, name))?
            .ok_or_else(|| ClusterError::not_found("Deployment", namespace, name))?;

        let match_labels = deployment
            .spec
            .and_then(|s| s.selector.match_labels)
            .unwrap_or_default();
        if match_labels.is_empty() {
            warn!(%namespace, %name, "Deployment has no matchLabels selector");
            return Ok(Vec::new());
        }

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&label_selector(&match_labels));
        let list = pods
            .list(&params)
            .await
            .map_err(|e| map_kube_error(e, "Pod", namespace, ""))?;

        Ok(list.items.iter().map(|p| p.name_any()).collect())
    }

    async fn stream_logs(
        &self,
        namespace: &str,
        name: &str,
        container: Option<&str>,
    ) -> Result<LogStream, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| map_kube_error(e, "Pod", namespace, name))?
            .ok_or_else(|| ClusterError::not_found("Pod", namespace, name))?;

        let params = LogParams {
            container: container.map(str::to_string),
            ..LogParams::default()
        };
        let reader = api
            .log_stream(name, &params)
            .await
            .map_err(|e| map_kube_error(e, "Pod", namespace, name))?;

        let (tx, rx) = mpsc::channel::<Result<Bytes, ClusterError>>(64);
        let pod = name.to_string();
        tokio::spawn(async move {
            let mut lines = reader.lines();
            loop {
                let next = match lines.try_next().await {
                    Ok(Some(line)) => Ok(Bytes::from(format!("{line}\n"))),
                    Ok(None) => break,
                    Err(e) => Err(ClusterError::Transport(e.to_string())),
                };
                let failed = next.is_err();
                if tx.send(next).await.is_err() || failed {
                    debug!(pod = %pod, "Log stream closed");
                    break;
                }
            }
        });

        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }
}
