use std::env;
use std::net::SocketAddr;

use thiserror::Error;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8890";
const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_CLUSTER_API_URL: &str = "http://127.0.0.1:8001";
const DEFAULT_ORG_LABEL: &str = "langops.io/organization";
const DEFAULT_CLUSTER_LABEL: &str = "langops.io/cluster";
const DEFAULT_MANAGED_LABEL: &str = "langops.io/managed";
const DEFAULT_HEARTBEAT_INTERVAL_SECONDS: u64 = 30;
const DEFAULT_WATCH_RETRY_COOLDOWN_MS: u64 = 100;
const DEFAULT_SESSION_BUFFER_CAPACITY: usize = 64;
const DEFAULT_CLUSTER_CONNECT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_TENANCY_SESSIONS: &str = "";

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub log_filter: String,
    pub cluster_api_url: String,
    pub cluster_api_token: Option<String>,
    pub cluster_connect_timeout_ms: u64,
    pub org_label: String,
    pub cluster_label: String,
    pub managed_label: String,
    pub heartbeat_interval_seconds: u64,
    pub watch_retry_cooldown_ms: u64,
    pub session_buffer_capacity: usize,
    pub tenancy_sessions: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid bind address '{value}': {message}")]
    InvalidBindAddr { value: String, message: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr_raw = env::var("LC_BIND_ADDR")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr: SocketAddr =
            bind_addr_raw
                .trim()
                .parse()
                .map_err(|error: std::net::AddrParseError| ConfigError::InvalidBindAddr {
                    value: bind_addr_raw.clone(),
                    message: error.to_string(),
                })?;

        let log_filter = env::var("LC_LOG_FILTER")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        let cluster_api_url = env::var("LC_CLUSTER_API_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CLUSTER_API_URL.to_string());

        let cluster_api_token = env::var("LC_CLUSTER_API_TOKEN")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let cluster_connect_timeout_ms = env::var("LC_CLUSTER_CONNECT_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_CLUSTER_CONNECT_TIMEOUT_MS);

        let org_label = env::var("LC_ORG_LABEL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ORG_LABEL.to_string());

        let cluster_label = env::var("LC_CLUSTER_LABEL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CLUSTER_LABEL.to_string());

        let managed_label = env::var("LC_MANAGED_LABEL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MANAGED_LABEL.to_string());

        let heartbeat_interval_seconds = env::var("LC_HEARTBEAT_INTERVAL_SECONDS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_SECONDS);

        let watch_retry_cooldown_ms = env::var("LC_WATCH_RETRY_COOLDOWN_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_WATCH_RETRY_COOLDOWN_MS);

        let session_buffer_capacity = env::var("LC_SESSION_BUFFER_CAPACITY")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_SESSION_BUFFER_CAPACITY);

        let tenancy_sessions = parse_csv(
            env::var("LC_TENANCY_SESSIONS")
                .ok()
                .unwrap_or_else(|| DEFAULT_TENANCY_SESSIONS.to_string()),
        );

        Ok(Self {
            bind_addr,
            log_filter,
            cluster_api_url,
            cluster_api_token,
            cluster_connect_timeout_ms,
            org_label,
            cluster_label,
            managed_label,
            heartbeat_interval_seconds,
            watch_retry_cooldown_ms,
            session_buffer_capacity,
            tenancy_sessions,
        })
    }

    pub fn for_tests(cluster_api_url: impl Into<String>) -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            cluster_api_url: cluster_api_url.into(),
            cluster_api_token: None,
            cluster_connect_timeout_ms: DEFAULT_CLUSTER_CONNECT_TIMEOUT_MS,
            org_label: DEFAULT_ORG_LABEL.to_string(),
            cluster_label: DEFAULT_CLUSTER_LABEL.to_string(),
            managed_label: DEFAULT_MANAGED_LABEL.to_string(),
            heartbeat_interval_seconds: DEFAULT_HEARTBEAT_INTERVAL_SECONDS,
            watch_retry_cooldown_ms: DEFAULT_WATCH_RETRY_COOLDOWN_MS,
            session_buffer_capacity: DEFAULT_SESSION_BUFFER_CAPACITY,
            tenancy_sessions: Vec::new(),
        }
    }
}

fn parse_csv(raw: String) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}
