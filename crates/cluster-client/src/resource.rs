//! Wire types for control-plane resources and watch notifications.
//!
//! The watch protocol streams newline-delimited JSON objects of the form
//! `{"type":"ADDED","object":{...}}`. The object is always the complete
//! current state of the resource, never a diff; an ERROR notification
//! carries a `Status` object in the same slot.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ClusterClientError, Result};

pub const LANGOPS_API_GROUP: &str = "langops.io";
pub const LANGOPS_API_VERSION: &str = "langops.io/v1alpha1";

/// Watch verb reported by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchEventKind {
    Added,
    Modified,
    Deleted,
    Error,
}

impl WatchEventKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Added => "ADDED",
            Self::Modified => "MODIFIED",
            Self::Deleted => "DELETED",
            Self::Error => "ERROR",
        }
    }
}

/// One decoded line of the watch stream.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeNotification {
    #[serde(rename = "type")]
    pub kind: WatchEventKind,
    pub object: ResourceBody,
}

impl ChangeNotification {
    pub fn decode(line: &[u8]) -> Result<Self> {
        serde_json::from_slice(line).map_err(|error| ClusterClientError::Decode {
            message: error.to_string(),
        })
    }

    /// Resume token carried by this notification, if any.
    pub fn resume_token(&self) -> Option<&str> {
        self.object.metadata.resource_version.as_deref()
    }

    /// Status code of an ERROR notification (e.g. 410 when the resume
    /// token has expired).
    pub fn error_code(&self) -> Option<u16> {
        if self.kind == WatchEventKind::Error {
            self.object.code
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceBody {
    pub api_version: String,
    pub kind: String,
    pub metadata: ResourceMetadata,
    pub spec: Value,
    pub status: Value,
    // Event resources and Status objects carry these at the top level.
    pub reason: Option<String>,
    pub message: Option<String>,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub involved_object: Option<InvolvedObjectRef>,
    pub code: Option<u16>,
}

impl ResourceBody {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata.labels.get(key).map(String::as_str)
    }

    pub fn status_phase(&self) -> Option<&str> {
        self.status.get("phase").and_then(Value::as_str)
    }

    pub fn status_reason(&self) -> Option<&str> {
        self.status.get("reason").and_then(Value::as_str)
    }

    /// True when the resource belongs to the LangOps API group.
    pub fn is_langops_resource(&self) -> bool {
        self.api_version == LANGOPS_API_VERSION
            || self
                .api_version
                .strip_suffix("/v1alpha1")
                .or_else(|| self.api_version.strip_suffix("/v1"))
                .is_some_and(|group| group == LANGOPS_API_GROUP)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceMetadata {
    pub name: String,
    pub namespace: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub resource_version: Option<String>,
    pub creation_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InvolvedObjectRef {
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_added_notification_with_metadata() {
        let line = serde_json::to_vec(&json!({
            "type": "ADDED",
            "object": {
                "apiVersion": "langops.io/v1alpha1",
                "kind": "Agent",
                "metadata": {
                    "name": "billing-bot",
                    "namespace": "org-42",
                    "labels": {"langops.io/organization": "org-42"},
                    "resourceVersion": "1001"
                },
                "status": {"phase": "Ready"}
            }
        }))
        .unwrap();

        let notification = ChangeNotification::decode(&line).unwrap();
        assert_eq!(notification.kind, WatchEventKind::Added);
        assert_eq!(notification.resume_token(), Some("1001"));
        assert_eq!(notification.object.metadata.name, "billing-bot");
        assert_eq!(notification.object.status_phase(), Some("Ready"));
        assert!(notification.object.is_langops_resource());
        assert_eq!(
            notification.object.label("langops.io/organization"),
            Some("org-42")
        );
    }

    #[test]
    fn decodes_error_notification_as_status_object() {
        let line = serde_json::to_vec(&json!({
            "type": "ERROR",
            "object": {
                "apiVersion": "v1",
                "kind": "Status",
                "status": "Failure",
                "message": "too old resource version: 900 (1000)",
                "reason": "Expired",
                "code": 410
            }
        }))
        .unwrap();

        let notification = ChangeNotification::decode(&line).unwrap();
        assert_eq!(notification.kind, WatchEventKind::Error);
        assert_eq!(notification.error_code(), Some(410));
        assert_eq!(notification.resume_token(), None);
        assert_eq!(
            notification.object.message.as_deref(),
            Some("too old resource version: 900 (1000)")
        );
    }

    #[test]
    fn decodes_event_resource_with_involved_object() {
        let line = serde_json::to_vec(&json!({
            "type": "MODIFIED",
            "object": {
                "apiVersion": "v1",
                "kind": "Event",
                "metadata": {"name": "billing-bot.1", "resourceVersion": "2002"},
                "reason": "Pulled",
                "message": "Successfully pulled image",
                "type": "Normal",
                "involvedObject": {"kind": "Pod", "name": "billing-bot-0", "namespace": "org-42"}
            }
        }))
        .unwrap();

        let notification = ChangeNotification::decode(&line).unwrap();
        let involved = notification.object.involved_object.unwrap();
        assert_eq!(involved.kind, "Pod");
        assert_eq!(involved.name, "billing-bot-0");
        assert_eq!(notification.object.event_type.as_deref(), Some("Normal"));
    }

    #[test]
    fn malformed_line_is_a_decode_error() {
        let result = ChangeNotification::decode(b"{\"type\":\"ADDED\"");
        assert!(matches!(result, Err(ClusterClientError::Decode { .. })));
    }
}
