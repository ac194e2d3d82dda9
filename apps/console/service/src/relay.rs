//! Relay endpoints: per-kind push streams plus the session registry.
//!
//! Request-scoped wiring only. Tenancy and permission are settled before
//! any long-lived resource is allocated; after that a stream session and
//! exactly one subscription controller are bound together, and the
//! registry tracks them until the session's cleanup hook deregisters it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use chrono::{DateTime, Utc};
use langops_cluster_client::{WatchSelector, WatchTarget};
use serde::{Deserialize, Serialize};

use crate::api_envelope::{
    forbidden_error, ok_data, unauthorized_error, validation_error, ApiDataEnvelope, ApiErrorTuple,
};
use crate::classifier::TenantScope;
use crate::observability::AuditEvent;
use crate::stream_session::{sse_response, StreamSession};
use crate::subscription::{SubscriptionConfig, SubscriptionController};
use crate::tenancy::{credential_from_headers, TenancyError, TenantContext};
use crate::{request_id, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct WatchScopeQuery {
    pub cluster: Option<String>,
    #[serde(rename = "resourceType")]
    pub resource_type: Option<String>,
    #[serde(rename = "resourceName")]
    pub resource_name: Option<String>,
}

/// Initial ack echoing the resolved scope, so a reconnecting client can
/// verify it resumed the right stream.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionAck {
    connection_id: String,
    kind: String,
    organization_id: String,
    namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cluster: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RelayStats {
    pub active_sessions: usize,
    pub sessions: Vec<RelaySessionStat>,
}

#[derive(Debug, Serialize)]
pub struct RelaySessionStat {
    pub connection_id: String,
    pub kind: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_token: Option<String>,
    pub opened_at: DateTime<Utc>,
}

struct RegisteredSession {
    kind: &'static str,
    opened_at: DateTime<Utc>,
    controller: SubscriptionController,
}

/// Registry of live relay sessions, keyed by connection id. Sessions
/// register on open and deregister through their cleanup hook; nothing
/// else holds mutable relay state.
#[derive(Clone, Default)]
pub struct RelayRegistry {
    sessions: Arc<Mutex<HashMap<String, RegisteredSession>>>,
}

impl RelayRegistry {
    fn register(
        &self,
        connection_id: &str,
        kind: &'static str,
        controller: SubscriptionController,
    ) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(
                connection_id.to_string(),
                RegisteredSession {
                    kind,
                    opened_at: Utc::now(),
                    controller,
                },
            );
        }
    }

    fn deregister(&self, connection_id: &str) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(connection_id);
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions
            .lock()
            .map(|sessions| sessions.len())
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> RelayStats {
        let sessions = self
            .sessions
            .lock()
            .map(|sessions| {
                let mut stats: Vec<RelaySessionStat> = sessions
                    .iter()
                    .map(|(connection_id, entry)| RelaySessionStat {
                        connection_id: connection_id.clone(),
                        kind: entry.kind.to_string(),
                        state: entry.controller.state().as_str().to_string(),
                        resume_token: entry.controller.bookmark(),
                        opened_at: entry.opened_at,
                    })
                    .collect();
                stats.sort_by(|a, b| a.opened_at.cmp(&b.opened_at));
                stats
            })
            .unwrap_or_default();

        RelayStats {
            active_sessions: sessions.len(),
            sessions,
        }
    }
}

pub(crate) async fn watch_agents(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WatchScopeQuery>,
) -> Result<Response, ApiErrorTuple> {
    relay_stream(state, WatchTarget::Agents, headers, query).await
}

pub(crate) async fn watch_models(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WatchScopeQuery>,
) -> Result<Response, ApiErrorTuple> {
    relay_stream(state, WatchTarget::Models, headers, query).await
}

pub(crate) async fn watch_tools(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WatchScopeQuery>,
) -> Result<Response, ApiErrorTuple> {
    relay_stream(state, WatchTarget::Tools, headers, query).await
}

pub(crate) async fn watch_personas(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WatchScopeQuery>,
) -> Result<Response, ApiErrorTuple> {
    relay_stream(state, WatchTarget::Personas, headers, query).await
}

pub(crate) async fn watch_clusters(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WatchScopeQuery>,
) -> Result<Response, ApiErrorTuple> {
    relay_stream(state, WatchTarget::Clusters, headers, query).await
}

pub(crate) async fn watch_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WatchScopeQuery>,
) -> Result<Response, ApiErrorTuple> {
    relay_stream(state, WatchTarget::Events, headers, query).await
}

pub(crate) async fn watch_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<(axum::http::StatusCode, Json<ApiDataEnvelope<RelayStats>>), ApiErrorTuple> {
    let _tenant = resolve_tenant(&state, &headers).await?;
    Ok(ok_data(state.registry.snapshot()))
}

async fn resolve_tenant(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<TenantContext, ApiErrorTuple> {
    let credential =
        credential_from_headers(headers).ok_or_else(|| unauthorized_error("Unauthenticated."))?;
    let tenant = state
        .tenancy
        .resolve(&credential)
        .await
        .map_err(map_tenancy_error)?;
    if !tenant.role.can_view() {
        return Err(forbidden_error(
            "The view capability is required for resource streams.",
        ));
    }
    Ok(tenant)
}

async fn relay_stream(
    state: AppState,
    target: WatchTarget,
    headers: HeaderMap,
    query: WatchScopeQuery,
) -> Result<Response, ApiErrorTuple> {
    let request_id = request_id(&headers);
    let tenant = resolve_tenant(&state, &headers).await?;
    let selector = build_selector(&state, &tenant, target, &query)?;

    let scope = TenantScope {
        organization_id: tenant.organization_id.clone(),
        org_label: state.config.org_label.clone(),
        cluster_label: state.config.cluster_label.clone(),
        managed_label: state.config.managed_label.clone(),
    };

    let (session, stream) = StreamSession::open(
        Duration::from_secs(state.config.heartbeat_interval_seconds),
        state.config.session_buffer_capacity,
    );

    session
        .send_json(
            "connection",
            &ConnectionAck {
                connection_id: session.connection_id().to_string(),
                kind: target.kind().to_lowercase(),
                organization_id: tenant.organization_id.clone(),
                namespace: tenant.organization_namespace.clone(),
                cluster: query.cluster.clone(),
                resource_type: query.resource_type.clone(),
                resource_name: query.resource_name.clone(),
            },
        )
        .await;

    let controller = SubscriptionController::spawn(
        state.cluster.clone(),
        SubscriptionConfig {
            target,
            selector,
            retry_cooldown: Duration::from_millis(state.config.watch_retry_cooldown_ms),
        },
        session.clone(),
        scope,
        state.observability.clone(),
        request_id.clone(),
    );

    state
        .registry
        .register(session.connection_id(), target.kind(), controller.clone());

    let registry = state.registry.clone();
    let registry_connection_id = session.connection_id().to_string();
    let observability = state.observability.clone();
    let close_request_id = request_id.clone();
    session.on_cleanup(move || {
        controller.cancel();
        registry.deregister(&registry_connection_id);
        observability.increment_counter("relay.session.closed", &close_request_id);
    });

    state.observability.audit(
        AuditEvent::new("relay.session.opened", request_id.clone())
            .with_user_id(tenant.user_id.clone())
            .with_org_id(tenant.organization_id.clone())
            .with_attribute("kind", target.kind().to_lowercase())
            .with_attribute("connection_id", session.connection_id().to_string()),
    );
    state
        .observability
        .increment_counter("relay.session.opened", &request_id);

    Ok(sse_response(stream))
}

fn build_selector(
    state: &AppState,
    tenant: &TenantContext,
    target: WatchTarget,
    query: &WatchScopeQuery,
) -> Result<WatchSelector, ApiErrorTuple> {
    let mut labels = vec![(
        state.config.org_label.as_str(),
        tenant.organization_id.as_str(),
    )];
    if let Some(cluster) = query.cluster.as_deref().map(str::trim) {
        if !cluster.is_empty() {
            labels.push((state.config.cluster_label.as_str(), cluster));
        }
    }

    let mut selector = WatchSelector::new(
        tenant.organization_namespace.clone(),
        langops_cluster_client::selector::label_selector(&labels),
    );

    if target == WatchTarget::Events {
        let mut fields = Vec::new();
        let resource_kind = query
            .resource_type
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(normalize_resource_kind)
            .transpose()?;
        if let Some(kind) = resource_kind.as_deref() {
            fields.push(("involvedObject.kind", kind));
        }
        if let Some(name) = query
            .resource_name
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            fields.push(("involvedObject.name", name));
        }
        selector =
            selector.with_field_selector(langops_cluster_client::selector::field_selector(&fields));
    }

    Ok(selector)
}

/// Map a query-string resource type to the canonical kind the control
/// plane indexes events by.
fn normalize_resource_kind(value: &str) -> Result<String, ApiErrorTuple> {
    let canonical = match value.to_lowercase().as_str() {
        "agent" | "agents" => "Agent",
        "model" | "models" => "Model",
        "tool" | "tools" => "Tool",
        "persona" | "personas" => "Persona",
        "cluster" | "clusters" => "Cluster",
        "pod" | "pods" => "Pod",
        "service" | "services" => "Service",
        "deployment" | "deployments" => "Deployment",
        "job" | "jobs" => "Job",
        _ => {
            return Err(validation_error(
                "resourceType",
                "Unknown resource type for event scoping.",
            ));
        }
    };
    Ok(canonical.to_string())
}

fn map_tenancy_error(error: TenancyError) -> ApiErrorTuple {
    match error {
        TenancyError::Unauthenticated { .. } => unauthorized_error("Unauthenticated."),
        TenancyError::Forbidden { .. } => {
            forbidden_error("Not authorized for this organization's resources.")
        }
    }
}
