//! HTTP boundary over the cluster, plus health checks and Prometheus metrics

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use remedy_lib::{
    cluster::{ClusterAccessor, ResourceKind, FIELD_MANAGER},
    error::ClusterError,
    health::{ComponentStatus, HealthRegistry},
    models::{ApplyOutcome, DeploymentPods, PodStatus},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub accessor: Arc<dyn ClusterAccessor>,
    pub health_registry: HealthRegistry,
}

impl AppState {
    pub fn new(accessor: Arc<dyn ClusterAccessor>, health_registry: HealthRegistry) -> Self {
        Self {
            accessor,
            health_registry,
        }
    }
}

/// A [`ClusterError`] rendered as `{ "error": ... }`
pub struct ApiError(ClusterError);

impl From<ClusterError> for ApiError {
    fn from(e: ClusterError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ClusterError::NotFound { .. } => StatusCode::NOT_FOUND,
            ClusterError::BadRequest(_) | ClusterError::Serialization(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!(error = %self.0, "Cluster request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub namespace: Option<String>,
    pub label_selector: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    pub container: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyQuery {
    #[serde(default = "default_field_manager")]
    pub field_manager: String,
    #[serde(default = "default_force")]
    pub force: bool,
}

fn default_field_manager() -> String {
    FIELD_MANAGER.to_string()
}

fn default_force() -> bool {
    true
}

/// Health check response - returns 200 if operational, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

fn yaml(manifest: String) -> Response {
    ([(header::CONTENT_TYPE, "application/yaml")], manifest).into_response()
}

async fn apply(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ApplyQuery>,
    body: Bytes,
) -> ApiResult<Json<ApplyOutcome>> {
    let manifest = std::str::from_utf8(&body)
        .map_err(|e| ClusterError::BadRequest(format!("manifest is not UTF-8: {e}")))?;
    if manifest.trim().is_empty() {
        return Err(ClusterError::BadRequest("empty manifest".to_string()).into());
    }

    let outcome = state
        .accessor
        .apply(manifest, &query.field_manager, query.force)
        .await?;
    info!(
        kind = %outcome.kind,
        namespace = %outcome.namespace,
        name = %outcome.name,
        action = %outcome.action,
        "Applied manifest"
    );
    Ok(Json(outcome))
}

async fn list_pods(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<serde_json::Value>>> {
    let pods = state
        .accessor
        .list(
            ResourceKind::Pod,
            query.namespace.as_deref(),
            query.label_selector.as_deref(),
        )
        .await?;
    Ok(Json(pods))
}

async fn list_resources(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<serde_json::Value>>> {
    let kind: ResourceKind = kind.parse()?;
    let objects = state
        .accessor
        .list(
            kind,
            query.namespace.as_deref(),
            query.label_selector.as_deref(),
        )
        .await?;
    Ok(Json(objects))
}

async fn resource_yaml(
    State(state): State<Arc<AppState>>,
    Path((kind, namespace, name)): Path<(String, String, String)>,
) -> ApiResult<Response> {
    let kind: ResourceKind = kind.parse()?;
    Ok(yaml(state.accessor.get(kind, &namespace, &name).await?))
}

async fn pod_yaml(
    State(state): State<Arc<AppState>>,
    Path((namespace, pod)): Path<(String, String)>,
) -> ApiResult<Response> {
    Ok(yaml(
        state
            .accessor
            .get(ResourceKind::Pod, &namespace, &pod)
            .await?,
    ))
}

async fn deployment_yaml(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<Response> {
    Ok(yaml(
        state
            .accessor
            .get(ResourceKind::Deployment, &namespace, &name)
            .await?,
    ))
}

async fn pod_status(
    State(state): State<Arc<AppState>>,
    Path((namespace, pod)): Path<(String, String)>,
) -> ApiResult<Json<PodStatus>> {
    Ok(Json(state.accessor.pod_status(&namespace, &pod).await?))
}

async fn deployment_pods(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<Json<DeploymentPods>> {
    let pod_names = state
        .accessor
        .deployment_pod_names(&namespace, &name)
        .await?;
    Ok(Json(DeploymentPods {
        name,
        namespace,
        pod_names,
    }))
}

async fn pod_logs(
    State(state): State<Arc<AppState>>,
    Path((namespace, pod)): Path<(String, String)>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Response> {
    let stream = state
        .accessor
        .stream_logs(&namespace, &pod, query.container.as_deref())
        .await?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(stream),
    )
        .into_response())
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/apply", post(apply))
        .route("/pods", get(list_pods))
        .route("/pods/:namespace/:pod/yaml", get(pod_yaml))
        .route("/pods/:namespace/:pod/status", get(pod_status))
        .route("/pods/:namespace/:pod/logs", get(pod_logs))
        .route("/deployments/:namespace/:name/yaml", get(deployment_yaml))
        .route("/deployments/:namespace/:name/pods", get(deployment_pods))
        .route("/resources/:kind", get(list_resources))
        .route("/resources/:kind/:namespace/:name/yaml", get(resource_yaml))
        .with_state(state)
}

/// Serve until `shutdown` is cancelled
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
