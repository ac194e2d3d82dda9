use std::sync::Arc;
use std::time::SystemTime;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use langops_cluster_client::{ClusterClient, ClusterClientConfig, ClusterClientError};
use serde::Serialize;
use thiserror::Error;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

pub mod api_envelope;
pub mod classifier;
pub mod config;
pub mod observability;
pub mod relay;
pub mod stream_session;
pub mod subscription;
pub mod tenancy;

use crate::config::Config;
use crate::observability::Observability;
use crate::relay::RelayRegistry;
use crate::tenancy::{StaticTenancyResolver, TenancyResolver};

const SERVICE_NAME: &str = "langops-console-service";

pub const ROUTE_WATCH_AGENTS: &str = "/api/watch/agents";
pub const ROUTE_WATCH_MODELS: &str = "/api/watch/models";
pub const ROUTE_WATCH_TOOLS: &str = "/api/watch/tools";
pub const ROUTE_WATCH_PERSONAS: &str = "/api/watch/personas";
pub const ROUTE_WATCH_CLUSTERS: &str = "/api/watch/clusters";
pub const ROUTE_WATCH_EVENTS: &str = "/api/watch/events";
pub const ROUTE_WATCH_STATS: &str = "/api/watch/stats";

#[derive(Debug, Error)]
pub enum ServiceInitError {
    #[error("cluster client init failed: {0}")]
    Cluster(#[from] ClusterClientError),
}

#[derive(Clone)]
pub struct AppState {
    pub(crate) config: Arc<Config>,
    pub(crate) cluster: ClusterClient,
    pub(crate) tenancy: Arc<dyn TenancyResolver>,
    pub(crate) observability: Observability,
    pub(crate) registry: RelayRegistry,
    pub(crate) started_at: SystemTime,
}

impl AppState {
    fn from_parts(config: Config, observability: Observability) -> Result<Self, ServiceInitError> {
        let mut cluster_config = ClusterClientConfig::new(config.cluster_api_url.clone());
        cluster_config.bearer_token = config.cluster_api_token.clone();
        cluster_config.connect_timeout_ms = config.cluster_connect_timeout_ms;
        let cluster = ClusterClient::new(cluster_config)?;
        let tenancy = Arc::new(StaticTenancyResolver::from_config(&config));

        Ok(Self {
            config: Arc::new(config),
            cluster,
            tenancy,
            observability,
            registry: RelayRegistry::default(),
            started_at: SystemTime::now(),
        })
    }

    #[cfg(test)]
    pub(crate) fn for_tests(config: Config) -> Self {
        Self::from_parts(config, Observability::default())
            .unwrap_or_else(|error| panic!("test app state: {error}"))
    }
}

pub fn build_router(config: Config) -> Result<Router, ServiceInitError> {
    build_router_with_observability(config, Observability::default())
}

pub fn build_router_with_observability(
    config: Config,
    observability: Observability,
) -> Result<Router, ServiceInitError> {
    let state = AppState::from_parts(config, observability)?;

    Ok(Router::new()
        .route("/healthz", get(health))
        .route("/readyz", get(readiness))
        .route(ROUTE_WATCH_AGENTS, get(relay::watch_agents))
        .route(ROUTE_WATCH_MODELS, get(relay::watch_models))
        .route(ROUTE_WATCH_TOOLS, get(relay::watch_tools))
        .route(ROUTE_WATCH_PERSONAS, get(relay::watch_personas))
        .route(ROUTE_WATCH_CLUSTERS, get(relay::watch_clusters))
        .route(ROUTE_WATCH_EVENTS, get(relay::watch_events))
        .route(ROUTE_WATCH_STATS, get(relay::watch_stats))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http()),
        ))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    uptime_seconds: u64,
    active_relay_sessions: usize,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    status: &'static str,
    cluster_api: String,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = match state.started_at.elapsed() {
        Ok(duration) => duration.as_secs(),
        Err(_) => 0,
    };

    Json(HealthResponse {
        status: "ok",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds,
        active_relay_sessions: state.registry.active_sessions(),
    })
}

async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let cluster_api = state.config.cluster_api_url.clone();

    match state.cluster.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ready",
                cluster_api,
            }),
        ),
        Err(error) => {
            tracing::warn!("cluster api not reachable: {error}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadinessResponse {
                    status: "not_ready",
                    cluster_api,
                }),
            )
        }
    }
}

pub(crate) fn request_id(headers: &HeaderMap) -> String {
    header_string(headers, "x-request-id")
        .and_then(non_empty)
        .unwrap_or_else(|| format!("req_{}", uuid::Uuid::new_v4().simple()))
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
