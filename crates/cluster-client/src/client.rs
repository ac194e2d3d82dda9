//! Control-plane API client and watch call setup.

use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{format_http_error, ClusterClientError, Result};
use crate::selector::WatchSelector;
use crate::watch::{read_watch_stream, WatchHandle};

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Buffered notifications per watch before the reader applies backpressure.
const WATCH_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct ClusterClientConfig {
    pub base_url: String,
    pub bearer_token: Option<String>,
    pub connect_timeout_ms: u64,
}

impl ClusterClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            bearer_token: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

/// Resource kinds the relay can watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchTarget {
    Agents,
    Models,
    Tools,
    Personas,
    Clusters,
    Events,
}

impl WatchTarget {
    pub const fn kind(self) -> &'static str {
        match self {
            Self::Agents => "Agent",
            Self::Models => "Model",
            Self::Tools => "Tool",
            Self::Personas => "Persona",
            Self::Clusters => "Cluster",
            Self::Events => "Event",
        }
    }

    pub const fn plural(self) -> &'static str {
        match self {
            Self::Agents => "agents",
            Self::Models => "models",
            Self::Tools => "tools",
            Self::Personas => "personas",
            Self::Clusters => "clusters",
            Self::Events => "events",
        }
    }

    /// API path for this target in the given namespace.
    pub fn path(self, namespace: &str) -> String {
        match self {
            Self::Events => format!("/api/v1/namespaces/{namespace}/events"),
            _ => format!(
                "/apis/langops.io/v1alpha1/namespaces/{namespace}/{}",
                self.plural()
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClusterClient {
    base_url: String,
    bearer_token: Option<String>,
    http: reqwest::Client,
}

impl ClusterClient {
    pub fn new(config: ClusterClientConfig) -> Result<Self> {
        let base_url = normalize_base_url(&config.base_url)?;
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms.max(250)))
            .build()
            .map_err(|error| ClusterClientError::Build {
                message: error.to_string(),
            })?;
        Ok(Self {
            base_url,
            bearer_token: config.bearer_token.filter(|token| !token.trim().is_empty()),
            http,
        })
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Open a watch. The initial call fails fast on connect or HTTP errors;
    /// everything after that arrives on the handle's channel, terminated by
    /// a single `Closed` message.
    pub async fn watch(&self, target: WatchTarget, selector: &WatchSelector) -> Result<WatchHandle> {
        validate_selector(selector)?;

        let url = self.endpoint(&target.path(&selector.namespace));
        let mut request = self
            .http
            .get(url)
            .query(&watch_query(selector))
            .header("x-request-id", format!("watch_{}", Uuid::new_v4().simple()));
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|error| ClusterClientError::Request {
                message: error.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            return Err(format_http_error(status, &body));
        }

        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let reader = tokio::spawn(read_watch_stream(response, tx));
        Ok(WatchHandle::new(rx, reader))
    }

    /// Liveness probe against the API server's version endpoint.
    pub async fn ping(&self) -> Result<()> {
        let mut request = self
            .http
            .get(self.endpoint("/version"))
            .timeout(Duration::from_millis(2_500));
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|error| ClusterClientError::Request {
                message: error.to_string(),
            })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            return Err(format_http_error(status, &body));
        }
        Ok(())
    }
}

/// Query parameters for a watch request.
pub fn watch_query(selector: &WatchSelector) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("watch", "true".to_string()),
        ("labelSelector", selector.label_selector.clone()),
    ];
    if let Some(field_selector) = &selector.field_selector {
        query.push(("fieldSelector", field_selector.clone()));
    }
    if let Some(resume_token) = &selector.resume_token {
        query.push(("resourceVersion", resume_token.clone()));
    }
    query
}

fn validate_selector(selector: &WatchSelector) -> Result<()> {
    if selector.namespace.trim().is_empty() {
        return Err(ClusterClientError::InvalidSelector {
            message: "namespace is required".to_string(),
        });
    }
    if selector.label_selector.trim().is_empty() {
        return Err(ClusterClientError::InvalidSelector {
            message: "label selector is required".to_string(),
        });
    }
    Ok(())
}

fn normalize_base_url(base_url: &str) -> Result<String> {
    let trimmed = base_url.trim();
    if trimmed.is_empty() {
        return Err(ClusterClientError::BaseUrlMissing);
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_paths_are_deterministic() {
        assert_eq!(
            WatchTarget::Agents.path("org-42"),
            "/apis/langops.io/v1alpha1/namespaces/org-42/agents"
        );
        assert_eq!(
            WatchTarget::Personas.path("org-7"),
            "/apis/langops.io/v1alpha1/namespaces/org-7/personas"
        );
        assert_eq!(
            WatchTarget::Events.path("org-42"),
            "/api/v1/namespaces/org-42/events"
        );
        assert_eq!(WatchTarget::Models.kind(), "Model");
    }

    #[test]
    fn watch_query_includes_optional_parameters_in_order() {
        let selector = WatchSelector::new("org-42", "langops.io/organization=org-42")
            .with_field_selector(Some("involvedObject.kind=Pod".to_string()))
            .with_resume_token(Some("1007".to_string()));

        let query = watch_query(&selector);
        assert_eq!(
            query,
            vec![
                ("watch", "true".to_string()),
                (
                    "labelSelector",
                    "langops.io/organization=org-42".to_string()
                ),
                ("fieldSelector", "involvedObject.kind=Pod".to_string()),
                ("resourceVersion", "1007".to_string()),
            ]
        );

        let fresh = watch_query(&selector.with_resume_token(None));
        assert_eq!(fresh.len(), 3);
    }

    #[test]
    fn endpoint_builder_normalizes_paths() {
        let client = ClusterClient::new(ClusterClientConfig::new("https://cluster.example.com/"))
            .expect("cluster client");
        assert_eq!(
            client.endpoint("/version"),
            "https://cluster.example.com/version"
        );
        assert_eq!(
            client.endpoint("version"),
            "https://cluster.example.com/version"
        );
    }

    #[test]
    fn base_url_missing_is_rejected() {
        let result = ClusterClient::new(ClusterClientConfig::new("   "));
        assert!(matches!(result, Err(ClusterClientError::BaseUrlMissing)));
    }

    #[tokio::test]
    async fn blank_selector_is_a_caller_error() {
        let client = ClusterClient::new(ClusterClientConfig::new("http://127.0.0.1:1"))
            .expect("cluster client");
        let selector = WatchSelector::new("org-42", "  ");
        let result = client.watch(WatchTarget::Agents, &selector).await;
        assert!(matches!(
            result,
            Err(ClusterClientError::InvalidSelector { .. })
        ));
    }
}
