use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

/// One audit record emitted for a notable relay action.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub name: String,
    pub request_id: String,
    pub occurred_at: DateTime<Utc>,
    pub user_id: Option<String>,
    pub organization_id: Option<String>,
    pub attributes: BTreeMap<String, String>,
}

impl AuditEvent {
    pub fn new(name: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            request_id: request_id.into(),
            occurred_at: Utc::now(),
            user_id: None,
            organization_id: None,
            attributes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn with_org_id(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Test sink that captures audit events and counters in memory.
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
    counters: Mutex<BTreeMap<String, u64>>,
}

impl RecordingAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .ok()
            .and_then(|counters| counters.get(name).copied())
            .unwrap_or(0)
    }

    fn record(&self, event: &AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }

    fn bump(&self, name: &str) {
        if let Ok(mut counters) = self.counters.lock() {
            *counters.entry(name.to_string()).or_insert(0) += 1;
        }
    }
}

/// Handle through which the service emits audit events and counters.
/// The default handle logs through `tracing`; tests attach a recording
/// sink to assert on what was emitted.
#[derive(Clone, Default)]
pub struct Observability {
    recorder: Option<Arc<RecordingAuditSink>>,
}

impl Observability {
    pub fn recording() -> (Self, Arc<RecordingAuditSink>) {
        let sink = Arc::new(RecordingAuditSink::default());
        (
            Self {
                recorder: Some(Arc::clone(&sink)),
            },
            sink,
        )
    }

    pub fn audit(&self, event: AuditEvent) {
        tracing::info!(
            target: "audit",
            event = %event.name,
            request_id = %event.request_id,
            user_id = event.user_id.as_deref().unwrap_or(""),
            organization_id = event.organization_id.as_deref().unwrap_or(""),
            attributes = ?event.attributes,
            "audit"
        );
        if let Some(recorder) = &self.recorder {
            recorder.record(&event);
        }
    }

    pub fn increment_counter(&self, name: &str, request_id: &str) {
        tracing::debug!(target: "metrics", counter = %name, request_id = %request_id, "increment");
        if let Some(recorder) = &self.recorder {
            recorder.bump(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_captures_events_and_counters() {
        let (observability, sink) = Observability::recording();

        observability.audit(
            AuditEvent::new("relay.session.opened", "req_1")
                .with_user_id("user-1")
                .with_org_id("org-42")
                .with_attribute("kind", "agent"),
        );
        observability.increment_counter("relay.session.opened", "req_1");
        observability.increment_counter("relay.session.opened", "req_2");

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "relay.session.opened");
        assert_eq!(events[0].organization_id.as_deref(), Some("org-42"));
        assert_eq!(events[0].attributes.get("kind").map(String::as_str), Some("agent"));
        assert_eq!(sink.counter("relay.session.opened"), 2);
        assert_eq!(sink.counter("relay.session.closed"), 0);
    }
}
