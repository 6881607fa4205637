//! Control-plane API
//!
//! A coequal writer of intent next to the idler engine: operators and other
//! services force idle/unidle/reset operations, query Jenkins state, and
//! manage the disabled-users set. Every mutating endpoint names its target
//! cluster with a `cluster` query parameter resolved against the cluster
//! view.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use idler_lib::cluster::ClusterView;
use idler_lib::health::HealthRegistry;
use idler_lib::models::{DisabledUsers, PodState, JENKINS_SERVICES};
use idler_lib::observability::IdlerMetrics;
use idler_lib::platform::PlatformClient;
use idler_lib::tenant::TenantService;
use idler_lib::ComponentStatus;
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

const STATUS_SERVICE: &str = "jenkins";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub platform: Arc<dyn PlatformClient>,
    pub tenant: Arc<dyn TenantService>,
    pub cluster_view: ClusterView,
    pub disabled_users: Arc<DisabledUsers>,
    pub health: HealthRegistry,
    pub metrics: IdlerMetrics,
}

/// JSON error envelope for failed mutations.
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(err: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
        }
    }

    fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(status = %self.status, error = %self.message, "Request failed");
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

/// Resolve the `cluster` query parameter against the cluster view.
fn url_and_token(
    state: &AppState,
    params: &HashMap<String, String>,
) -> Result<(String, String), ApiError> {
    let Some(cluster) = params.get("cluster") else {
        return Err(ApiError::bad_request("cluster URL needs to be specified"));
    };
    match state.cluster_view.token_for(cluster) {
        Some(token) => Ok((cluster.clone(), token.to_string())),
        None => Err(ApiError::bad_request(format!(
            "unknown or invalid cluster URL: {cluster}"
        ))),
    }
}

async fn idle(
    State(state): State<Arc<AppState>>,
    Path(namespace): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<StatusCode, ApiError> {
    let (cluster, token) = url_and_token(&state, &params)?;

    for service in JENKINS_SERVICES {
        let started = Instant::now();
        let result = state
            .platform
            .idle(&cluster, &token, &namespace, service)
            .await;
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(()) => state.metrics.observe_request(service, "Idle", 200, elapsed),
            Err(e) => {
                state.metrics.observe_request(service, "Idle", 500, elapsed);
                return Err(ApiError::internal(e));
            }
        }
    }

    Ok(StatusCode::OK)
}

async fn un_idle(
    State(state): State<Arc<AppState>>,
    Path(namespace): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<StatusCode, ApiError> {
    let (cluster, token) = url_and_token(&state, &params)?;

    let namespace = namespace.trim();
    if namespace.is_empty() {
        return Err(ApiError::bad_request("missing mandatory param namespace"));
    }

    // Jenkins may already be up; nothing to do then.
    let pod_state = state
        .platform
        .state(&cluster, &token, namespace, STATUS_SERVICE)
        .await
        .map_err(ApiError::internal)?;
    if pod_state == PodState::Starting || pod_state == PodState::Running {
        info!(namespace, state = %pod_state, "Jenkins is already starting or running");
        return Ok(StatusCode::OK);
    }

    let cluster_full = state
        .tenant
        .has_reached_max_capacity(&cluster, namespace)
        .await
        .map_err(ApiError::internal)?;
    if cluster_full {
        return Err(ApiError::unavailable(format!(
            "maximum resource limit reached on {cluster} for {namespace}"
        )));
    }

    for service in JENKINS_SERVICES {
        let started = Instant::now();
        let result = state
            .platform
            .un_idle(&cluster, &token, namespace, service)
            .await;
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(()) => state
                .metrics
                .observe_request(service, "UnIdle", 200, elapsed),
            Err(e) => {
                state
                    .metrics
                    .observe_request(service, "UnIdle", 500, elapsed);
                return Err(ApiError::internal(e));
            }
        }
    }

    Ok(StatusCode::OK)
}

#[derive(Debug, Serialize, Deserialize)]
struct IsIdleStatus {
    is_idle: bool,
}

async fn is_idle(
    State(state): State<Arc<AppState>>,
    Path(namespace): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<IsIdleStatus>, ApiError> {
    let (cluster, token) = url_and_token(&state, &params)?;

    let pod_state = state
        .platform
        .state(&cluster, &token, &namespace, STATUS_SERVICE)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(IsIdleStatus {
        is_idle: pod_state.is_idle(),
    }))
}

/// Error codes clients can compare against.
const TOKEN_FETCH_FAILED: u32 = 1;
const PLATFORM_CLIENT_ERROR: u32 = 2;

#[derive(Debug, Default, Serialize)]
struct StatusResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<JenkinsInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<ResponseError>,
}

#[derive(Debug, Serialize)]
struct JenkinsInfo {
    state: String,
}

#[derive(Debug, Serialize)]
struct ResponseError {
    code: u32,
    description: String,
}

async fn status(
    State(state): State<Arc<AppState>>,
    Path(namespace): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let mut response = StatusResponse::default();

    let (cluster, token) = match url_and_token(&state, &params) {
        Ok(resolved) => resolved,
        Err(e) => {
            response.errors.push(ResponseError {
                code: TOKEN_FETCH_FAILED,
                description: format!("failed to obtain platform token: {}", e.message),
            });
            return (StatusCode::BAD_REQUEST, Json(response));
        }
    };

    match state
        .platform
        .state(&cluster, &token, &namespace, STATUS_SERVICE)
        .await
    {
        Ok(pod_state) => {
            response.data = Some(JenkinsInfo {
                state: pod_state.to_string(),
            });
            (StatusCode::OK, Json(response))
        }
        Err(e) => {
            response.errors.push(ResponseError {
                code: PLATFORM_CLIENT_ERROR,
                description: format!("platform client error: {e}"),
            });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(response))
        }
    }
}

async fn cluster_view(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.cluster_view.dns_view())
}

async fn reset(
    State(state): State<Arc<AppState>>,
    Path(namespace): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<StatusCode, ApiError> {
    let (cluster, token) = url_and_token(&state, &params)?;

    state
        .platform
        .reset(&cluster, &token, &namespace)
        .await
        .map_err(ApiError::internal)?;

    Ok(StatusCode::OK)
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct UserStatusRequest {
    #[serde(default)]
    disable: Vec<String>,
    #[serde(default)]
    enable: Vec<String>,
}

async fn set_user_status(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UserStatusRequest>,
) -> StatusCode {
    // Enables take precedence: an id listed in both ends up enabled.
    state.disabled_users.add(request.disable);
    state.disabled_users.remove(&request.enable);
    StatusCode::OK
}

#[derive(Debug, Serialize, Deserialize)]
struct DisabledUsersResponse {
    users: Vec<String>,
}

async fn disabled_users(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(DisabledUsersResponse {
        users: state.disabled_users.list(),
    })
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let report = state.health.report();
    let status_code = match report.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(report))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health.readiness();
    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(readiness))
}

async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return ApiError::internal(format!("could not encode metrics: {e}")).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/idle/:namespace", post(idle))
        .route("/unidle/:namespace", post(un_idle))
        .route("/isidle/:namespace", get(is_idle))
        .route("/status/:namespace", get(status))
        .route("/cluster", get(cluster_view))
        .route("/reset/:namespace", post(reset))
        .route("/users", put(set_user_status))
        .route("/users/disabled", get(disabled_users))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{port}");
    info!(addr = %addr, "Starting control-plane API");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
