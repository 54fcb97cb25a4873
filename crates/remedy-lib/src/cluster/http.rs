//! [`ClusterAccessor`] that calls the agent's HTTP boundary

use super::{ClusterAccessor, LogStream, ResourceKind};
use crate::error::ClusterError;
use crate::models::{ApplyOutcome, DeploymentPods, PodStatus};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// Connection settings for [`AgentClient`]
#[derive(Debug, Clone)]
pub struct AgentClientConfig {
    /// Agent base URL, e.g. `http://remedy-agent:8080`
    pub base_url: String,
    pub connect_timeout: Duration,
    /// Applies to every request except log streaming
    pub request_timeout: Duration,
}

impl Default for AgentClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP client for the agent
#[derive(Clone)]
pub struct AgentClient {
    client: Client,
    base_url: Url,
    request_timeout: Duration,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl AgentClient {
    pub fn new(config: AgentClientConfig) -> Result<Self, ClusterError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ClusterError::Transport(format!("failed to create HTTP client: {e}")))?;

        // joining onto a base without a trailing slash drops its last segment
        let mut base = config.base_url.trim_end_matches('/').to_string();
        base.push('/');
        let base_url = Url::parse(&base)
            .map_err(|e| ClusterError::BadRequest(format!("invalid agent URL {base}: {e}")))?;

        Ok(Self {
            client,
            base_url,
            request_timeout: config.request_timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, ClusterError> {
        self.base_url
            .join(path)
            .map_err(|e| ClusterError::BadRequest(format!("invalid path {path}: {e}")))
    }

    async fn send_get(&self, path: &str, query: &[(&str, &str)]) -> Result<Response, ClusterError> {
        let response = self
            .client
            .get(self.url(path)?)
            .query(query)
            .timeout(self.request_timeout)
            .send()
            .await?;
        check(response, path).await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ClusterError> {
        Ok(self.send_get(path, query).await?.json().await?)
    }

    async fn get_text(&self, path: &str) -> Result<String, ClusterError> {
        Ok(self.send_get(path, &[]).await?.text().await?)
    }
}

/// Map a non-success response onto a [`ClusterError`]
async fn check(response: Response, path: &str) -> Result<Response, ClusterError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.error)
        .unwrap_or(body);

    Err(match status {
        StatusCode::NOT_FOUND => ClusterError::NotFound {
            kind: "resource".to_string(),
            namespace: String::new(),
            name: format!("{path}: {message}"),
        },
        StatusCode::BAD_REQUEST => ClusterError::BadRequest(message),
        other => ClusterError::Api {
            status: other.as_u16(),
            message,
        },
    })
}

#[async_trait]
impl ClusterAccessor for AgentClient {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<String, ClusterError> {
        let path = format!("resources/{}/{namespace}/{name}/yaml", kind.as_str());
        self.get_text(&path).await.map_err(|e| match e {
            ClusterError::NotFound { .. } => ClusterError::not_found(kind.as_str(), namespace, name),
            other => other,
        })
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<serde_json::Value>, ClusterError> {
        let mut query = Vec::new();
        if let Some(ns) = namespace {
            query.push(("namespace", ns));
        }
        if let Some(selector) = label_selector {
            query.push(("labelSelector", selector));
        }
        self.get_json(&format!("resources/{}", kind.as_str()), &query)
            .await
    }

    async fn apply(
        &self,
        manifest: &str,
        field_manager: &str,
        force: bool,
    ) -> Result<ApplyOutcome, ClusterError> {
        let response = self
            .client
            .post(self.url("apply")?)
            .query(&[
                ("fieldManager", field_manager),
                ("force", if force { "true" } else { "false" }),
            ])
            .header(reqwest::header::CONTENT_TYPE, "application/yaml")
            .body(manifest.to_string())
            .timeout(self.request_timeout)
            .send()
            .await?;
        Ok(check(response, "apply").await?.json().await?)
    }

    async fn pod_status(&self, namespace: &str, name: &str) -> Result<PodStatus, ClusterError> {
        self.get_json(&format!("pods/{namespace}/{name}/status"), &[])
            .await
            .map_err(|e| match e {
                ClusterError::NotFound { .. } => ClusterError::not_found("Pod", namespace, name),
                other => other,
            })
    }

    async fn deployment_pod_names(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Vec<String>, ClusterError> {
        let pods: DeploymentPods = self
            .get_json(&format!("deployments/{namespace}/{name}/pods"), &[])
            .await
            .map_err(|e| match e {
                ClusterError::NotFound { .. } => {
                    ClusterError::not_found("Deployment", namespace, name)
                }
                other => other,
            })?;
        Ok(pods.pod_names)
    }

    async fn stream_logs(
        &self,
        namespace: &str,
        name: &str,
        container: Option<&str>,
    ) -> Result<LogStream, ClusterError> {
        let path = format!("pods/{namespace}/{name}/logs");
        let mut request = self.client.get(self.url(&path)?);
        if let Some(container) = container {
            request = request.query(&[("container", container)]);
        }
        let response = check(request.send().await?, &path).await?;
        Ok(response.bytes_stream().map_err(ClusterError::from).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(server: &mockito::Server) -> AgentClient {
        AgentClient::new(AgentClientConfig {
            base_url: server.url(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let client = AgentClient::new(AgentClientConfig {
            base_url: "http://agent:8080/api".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            client.url("pods/default/web-1/status").unwrap().as_str(),
            "http://agent:8080/api/pods/default/web-1/status"
        );
    }

    #[tokio::test]
    async fn test_get_manifest_yaml() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/resources/Deployment/ns1/dep-a/yaml")
            .with_status(200)
            .with_header("content-type", "application/yaml")
            .with_body("kind: Deployment\n")
            .create_async()
            .await;

        let yaml = client(&server)
            .get(ResourceKind::Deployment, "ns1", "dep-a")
            .await
            .unwrap();

        assert_eq!(yaml, "kind: Deployment\n");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_not_found_maps_to_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/pods/default/ghost/status")
            .with_status(404)
            .with_body(r#"{"error":"Pod default/ghost not found"}"#)
            .create_async()
            .await;

        let err = client(&server)
            .pod_status("default", "ghost")
            .await
            .unwrap_err();

        match err {
            ClusterError::NotFound { kind, name, .. } => {
                assert_eq!(kind, "Pod");
                assert_eq!(name, "ghost");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_apply_posts_manifest() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/apply")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("fieldManager".into(), "kube-remedy".into()),
                mockito::Matcher::UrlEncoded("force".into(), "true".into()),
            ]))
            .match_body("kind: Pod\n")
            .with_status(200)
            .with_body(r#"{"kind":"Pod","name":"web-1","namespace":"default","action":"applied"}"#)
            .create_async()
            .await;

        let outcome = client(&server)
            .apply("kind: Pod\n", "kube-remedy", true)
            .await
            .unwrap();

        assert_eq!(outcome.name, "web-1");
        assert_eq!(outcome.action, crate::models::ApplyAction::Applied);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_bad_request_and_server_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/apply")
            .match_query(mockito::Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error":"invalid manifest"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/deployments/ns1/dep-a/pods")
            .with_status(500)
            .with_body(r#"{"error":"boom"}"#)
            .create_async()
            .await;

        let client = client(&server);
        let err = client.apply("nope", "kube-remedy", true).await.unwrap_err();
        assert!(matches!(err, ClusterError::BadRequest(ref m) if m == "invalid manifest"));

        let err = client
            .deployment_pod_names("ns1", "dep-a")
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Api { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_deployment_pod_names_and_list() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/deployments/ns1/dep-a/pods")
            .with_status(200)
            .with_body(r#"{"name":"dep-a","namespace":"ns1","podNames":["dep-a-1","dep-a-2"]}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/resources/Pod")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("namespace".into(), "ns1".into()),
                mockito::Matcher::UrlEncoded("labelSelector".into(), "app=web".into()),
            ]))
            .with_status(200)
            .with_body(r#"[{"metadata":{"name":"dep-a-1"}}]"#)
            .create_async()
            .await;

        let client = client(&server);
        let names = client.deployment_pod_names("ns1", "dep-a").await.unwrap();
        assert_eq!(names, vec!["dep-a-1", "dep-a-2"]);

        let pods = client
            .list(ResourceKind::Pod, Some("ns1"), Some("app=web"))
            .await
            .unwrap();
        assert_eq!(pods[0]["metadata"]["name"], "dep-a-1");
    }

    #[tokio::test]
    async fn test_stream_logs_collects_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/pods/default/web-1/logs")
            .match_query(mockito::Matcher::UrlEncoded(
                "container".into(),
                "app".into(),
            ))
            .with_status(200)
            .with_body("line one\nline two\n")
            .create_async()
            .await;

        let mut stream = client(&server)
            .stream_logs("default", "web-1", Some("app"))
            .await
            .unwrap();

        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(String::from_utf8(collected).unwrap(), "line one\nline two\n");
    }
}
