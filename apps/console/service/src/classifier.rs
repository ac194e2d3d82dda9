//! Event classification and transformation.
//!
//! Pure functions from raw change notifications to the client envelope.
//! Tenancy is re-checked here even though the watch selector already
//! filtered by the organization label, so a control-plane bug returning
//! foreign objects can never leak into a tenant's stream.

use chrono::{SecondsFormat, Utc};
use langops_cluster_client::{ChangeNotification, ResourceBody, WatchEventKind};
use serde::Serialize;

const MAX_UPSTREAM_MESSAGE_CHARS: usize = 100;

/// Per-session scope applied to every notification.
#[derive(Debug, Clone)]
pub struct TenantScope {
    pub organization_id: String,
    pub org_label: String,
    pub cluster_label: String,
    pub managed_label: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceSummary {
    pub kind: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

/// The envelope pushed to clients. Derived and disposable; every event
/// carries the resource's full current state summary, so replaying one is
/// harmless.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub action: String,
    pub resource: ResourceSummary,
    pub message: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_token: Option<String>,
}

/// Whether a notification belongs in this tenant's stream.
pub fn should_include(notification: &ChangeNotification, scope: &TenantScope) -> bool {
    if notification.kind == WatchEventKind::Error {
        return false;
    }

    let object = &notification.object;

    // A foreign organization label is disqualifying no matter the kind.
    if let Some(org) = object.label(&scope.org_label) {
        if org != scope.organization_id {
            return false;
        }
    }

    if object.is_langops_resource() {
        return object.label(&scope.org_label) == Some(scope.organization_id.as_str());
    }

    if object.kind == "Event" && object.api_version == "v1" {
        return true;
    }

    known_native_api_version(&object.kind, &object.api_version)
        && object.label(&scope.managed_label) == Some("true")
        && object.label(&scope.org_label) == Some(scope.organization_id.as_str())
}

fn known_native_api_version(kind: &str, api_version: &str) -> bool {
    matches!(
        (kind, api_version),
        ("Pod" | "Service", "v1") | ("Deployment", "apps/v1") | ("Job", "batch/v1")
    )
}

/// Build the client envelope for an accepted notification.
pub fn classify(notification: &ChangeNotification, scope: &TenantScope) -> ClientEvent {
    let object = &notification.object;
    let action = derive_action(notification.kind, object);
    let resource = ResourceSummary {
        kind: object.kind.clone(),
        name: object.metadata.name.clone(),
        namespace: object.metadata.namespace.clone(),
        cluster: object.label(&scope.cluster_label).map(str::to_string),
        phase: object.status_phase().map(str::to_string),
    };
    let message = format_message(object, &action);

    ClientEvent {
        event_type: object.kind.to_lowercase(),
        action,
        resource,
        message,
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        resume_token: notification.resume_token().map(str::to_string),
    }
}

/// Ordered reason/status heuristic. Deletions are unambiguous; everything
/// else is inferred from the reason and status phase, falling back to the
/// event's own Normal/Warning type, the raw reason, and finally the watch
/// verb.
pub fn derive_action(kind: WatchEventKind, object: &ResourceBody) -> String {
    if kind == WatchEventKind::Deleted {
        return "deleted".to_string();
    }

    let reason = object
        .reason
        .as_deref()
        .or_else(|| object.status_reason())
        .unwrap_or_default();
    let phase = object.status_phase().unwrap_or_default();
    let haystack = format!("{reason} {phase}").to_lowercase();

    for (needle, action) in [
        ("creat", "created"),
        ("updat", "updated"),
        ("scal", "scaled"),
        ("fail", "failed"),
        ("error", "failed"),
        ("ready", "ready"),
        ("start", "started"),
        ("stop", "stopped"),
        ("pulling", "pulling"),
        ("pulled", "pulled"),
    ] {
        if haystack.contains(needle) {
            return action.to_string();
        }
    }

    if let Some(event_type) = object.event_type.as_deref() {
        return event_type.to_lowercase();
    }
    if !reason.is_empty() {
        return reason.to_lowercase();
    }
    match kind {
        WatchEventKind::Added => "created".to_string(),
        _ => "updated".to_string(),
    }
}

/// Prefer the upstream human message when it is short enough to be
/// trustworthy; otherwise synthesize one from the resource identity.
pub fn format_message(object: &ResourceBody, action: &str) -> String {
    if let Some(message) = object.message.as_deref() {
        let trimmed = message.trim();
        if !trimmed.is_empty() && trimmed.chars().count() < MAX_UPSTREAM_MESSAGE_CHARS {
            return trimmed.to_string();
        }
    }

    let phrase = match action {
        "ready" => "is ready",
        other => other,
    };
    format!("{} \"{}\" {}", object.kind, object.metadata.name, phrase)
}

#[cfg(test)]
mod tests {
    use langops_cluster_client::ChangeNotification;
    use serde_json::json;

    use super::*;

    fn scope() -> TenantScope {
        TenantScope {
            organization_id: "org-42".to_string(),
            org_label: "langops.io/organization".to_string(),
            cluster_label: "langops.io/cluster".to_string(),
            managed_label: "langops.io/managed".to_string(),
        }
    }

    fn notification(value: serde_json::Value) -> ChangeNotification {
        let line = serde_json::to_vec(&value).expect("encode");
        ChangeNotification::decode(&line).expect("decode")
    }

    fn agent_modified(org: &str, phase: &str) -> ChangeNotification {
        notification(json!({
            "type": "MODIFIED",
            "object": {
                "apiVersion": "langops.io/v1alpha1",
                "kind": "Agent",
                "metadata": {
                    "name": "billing-bot",
                    "namespace": "org-42",
                    "labels": {
                        "langops.io/organization": org,
                        "langops.io/cluster": "prod-1"
                    },
                    "resourceVersion": "1010"
                },
                "status": {"phase": phase}
            }
        }))
    }

    #[test]
    fn scoped_agent_update_becomes_a_ready_event() {
        let notification = agent_modified("org-42", "Ready");
        assert!(should_include(&notification, &scope()));

        let event = classify(&notification, &scope());
        assert_eq!(event.event_type, "agent");
        assert_eq!(event.action, "ready");
        assert_eq!(event.resource.name, "billing-bot");
        assert_eq!(event.resource.cluster.as_deref(), Some("prod-1"));
        assert_eq!(event.message, "Agent \"billing-bot\" is ready");
        assert_eq!(event.resume_token.as_deref(), Some("1010"));
    }

    #[test]
    fn cross_tenant_notification_is_never_included() {
        let notification = agent_modified("org-99", "Ready");
        assert!(!should_include(&notification, &scope()));
    }

    #[test]
    fn langops_resource_without_org_label_is_dropped() {
        let stripped = notification(json!({
            "type": "ADDED",
            "object": {
                "apiVersion": "langops.io/v1alpha1",
                "kind": "Agent",
                "metadata": {"name": "a", "labels": {}}
            }
        }));
        assert!(!should_include(&stripped, &scope()));
    }

    #[test]
    fn native_resources_require_managed_and_org_labels() {
        let managed_pod = notification(json!({
            "type": "MODIFIED",
            "object": {
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": {
                    "name": "billing-bot-0",
                    "labels": {
                        "langops.io/managed": "true",
                        "langops.io/organization": "org-42"
                    }
                },
                "status": {"phase": "Running"}
            }
        }));
        assert!(should_include(&managed_pod, &scope()));

        let unmanaged_pod = notification(json!({
            "type": "MODIFIED",
            "object": {
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": {"name": "random", "labels": {}}
            }
        }));
        assert!(!should_include(&unmanaged_pod, &scope()));

        // Unknown api group never passes, managed or not.
        let custom = notification(json!({
            "type": "MODIFIED",
            "object": {
                "apiVersion": "sketchy.example/v1",
                "kind": "Pod",
                "metadata": {
                    "name": "impostor",
                    "labels": {
                        "langops.io/managed": "true",
                        "langops.io/organization": "org-42"
                    }
                }
            }
        }));
        assert!(!should_include(&custom, &scope()));
    }

    #[test]
    fn error_notifications_are_excluded_from_resource_updates() {
        let error = notification(json!({
            "type": "ERROR",
            "object": {"apiVersion": "v1", "kind": "Status", "code": 410}
        }));
        assert!(!should_include(&error, &scope()));
    }

    #[test]
    fn action_heuristic_checks_in_order() {
        let cases = [
            (json!({"reason": "SuccessfulCreate"}), "created"),
            (json!({"reason": "ScalingReplicaSet"}), "scaled"),
            (json!({"reason": "FailedScheduling"}), "failed"),
            (json!({"reason": "BackoffError"}), "failed"),
            (json!({"reason": "Pulling"}), "pulling"),
            (json!({"reason": "Pulled"}), "pulled"),
            (json!({"reason": "Started"}), "started"),
        ];
        for (extra, expected) in cases {
            let mut object = json!({
                "apiVersion": "v1",
                "kind": "Event",
                "metadata": {"name": "e"}
            });
            if let (Some(target), Some(source)) = (object.as_object_mut(), extra.as_object()) {
                for (key, value) in source {
                    target.insert(key.clone(), value.clone());
                }
            }
            let n = notification(json!({"type": "MODIFIED", "object": object}));
            assert_eq!(derive_action(n.kind, &n.object), expected, "{extra}");
        }
    }

    #[test]
    fn action_falls_back_to_event_type_then_verb() {
        let warning = notification(json!({
            "type": "MODIFIED",
            "object": {
                "apiVersion": "v1",
                "kind": "Event",
                "metadata": {"name": "e"},
                "reason": "NodePressure",
                "type": "Warning"
            }
        }));
        assert_eq!(derive_action(warning.kind, &warning.object), "warning");

        let bare_added = notification(json!({
            "type": "ADDED",
            "object": {
                "apiVersion": "langops.io/v1alpha1",
                "kind": "Tool",
                "metadata": {"name": "t"}
            }
        }));
        assert_eq!(derive_action(bare_added.kind, &bare_added.object), "created");

        let deleted = notification(json!({
            "type": "DELETED",
            "object": {
                "apiVersion": "langops.io/v1alpha1",
                "kind": "Tool",
                "metadata": {"name": "t"},
                "status": {"phase": "Ready"}
            }
        }));
        assert_eq!(derive_action(deleted.kind, &deleted.object), "deleted");
    }

    #[test]
    fn short_upstream_messages_win_over_synthesis() {
        let pulled = notification(json!({
            "type": "MODIFIED",
            "object": {
                "apiVersion": "v1",
                "kind": "Event",
                "metadata": {"name": "e"},
                "reason": "Pulled",
                "message": "Successfully pulled image \"langops/agent:1.2\""
            }
        }));
        let event = classify(&pulled, &scope());
        assert_eq!(event.message, "Successfully pulled image \"langops/agent:1.2\"");

        let long_message = "x".repeat(150);
        let noisy = notification(json!({
            "type": "MODIFIED",
            "object": {
                "apiVersion": "v1",
                "kind": "Event",
                "metadata": {"name": "e"},
                "reason": "Pulled",
                "message": long_message
            }
        }));
        let event = classify(&noisy, &scope());
        assert_eq!(event.message, "Event \"e\" pulled");
    }

    #[test]
    fn unknown_kinds_map_to_their_lowercased_literal() {
        let odd = notification(json!({
            "type": "ADDED",
            "object": {
                "apiVersion": "langops.io/v1alpha1",
                "kind": "Persona",
                "metadata": {
                    "name": "tutor",
                    "labels": {"langops.io/organization": "org-42"}
                }
            }
        }));
        let event = classify(&odd, &scope());
        assert_eq!(event.event_type, "persona");
    }
}
