//! Tenant identity resolution for relay requests.
//!
//! Session issuance lives outside this service; the relay only needs to map
//! an opaque credential to a tenant. The static resolver is seeded from
//! config for local development and tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Config;

pub const SESSION_COOKIE_NAME: &str = "lc_session";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Viewer,
    Editor,
    Admin,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Editor => "editor",
            Self::Admin => "admin",
        }
    }

    /// Every role can read the tenant's resource streams.
    pub const fn can_view(self) -> bool {
        true
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "viewer" => Some(Self::Viewer),
            "editor" => Some(Self::Editor),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TenantContext {
    pub user_id: String,
    pub organization_id: String,
    pub organization_namespace: String,
    pub role: Role,
}

#[derive(Debug, Error)]
pub enum TenancyError {
    #[error("tenancy_unauthenticated:{message}")]
    Unauthenticated { message: String },

    #[error("tenancy_forbidden:{message}")]
    Forbidden { message: String },
}

#[async_trait]
pub trait TenancyResolver: Send + Sync {
    async fn resolve(&self, credential: &str) -> Result<TenantContext, TenancyError>;
}

/// Config-seeded resolver: `LC_TENANCY_SESSIONS` entries of the form
/// `token=user:org:namespace:role`.
#[derive(Clone, Default)]
pub struct StaticTenancyResolver {
    sessions: Arc<HashMap<String, TenantContext>>,
}

impl StaticTenancyResolver {
    pub fn from_config(config: &Config) -> Self {
        let mut sessions = HashMap::new();
        for entry in &config.tenancy_sessions {
            match parse_session_entry(entry) {
                Some((token, context)) => {
                    sessions.insert(token, context);
                }
                None => {
                    tracing::warn!("ignoring malformed tenancy session entry: {entry}");
                }
            }
        }
        Self {
            sessions: Arc::new(sessions),
        }
    }

    pub fn with_sessions(entries: Vec<(String, TenantContext)>) -> Self {
        Self {
            sessions: Arc::new(entries.into_iter().collect()),
        }
    }
}

#[async_trait]
impl TenancyResolver for StaticTenancyResolver {
    async fn resolve(&self, credential: &str) -> Result<TenantContext, TenancyError> {
        self.sessions
            .get(credential.trim())
            .cloned()
            .ok_or_else(|| TenancyError::Unauthenticated {
                message: "unknown session credential".to_string(),
            })
    }
}

/// Bearer token first, then the session cookie.
pub fn credential_from_headers(headers: &HeaderMap) -> Option<String> {
    bearer_token(headers).or_else(|| cookie_value(headers, SESSION_COOKIE_NAME))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = raw.strip_prefix("Bearer ").or_else(|| raw.strip_prefix("bearer "))?;
    non_empty(token.to_string())
}

fn cookie_value(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let raw = headers.get(COOKIE)?.to_str().ok()?;
    for part in raw.split(';') {
        let mut pieces = part.trim().splitn(2, '=');
        let key = pieces.next()?.trim();
        let value = pieces.next()?.trim();
        if key == cookie_name {
            return non_empty(value.to_string());
        }
    }
    None
}

fn parse_session_entry(entry: &str) -> Option<(String, TenantContext)> {
    let (token, rest) = entry.split_once('=')?;
    let mut fields = rest.split(':');
    let user_id = fields.next()?.trim();
    let organization_id = fields.next()?.trim();
    let organization_namespace = fields.next()?.trim();
    let role = Role::parse(fields.next()?)?;
    if fields.next().is_some() {
        return None;
    }
    if token.trim().is_empty()
        || user_id.is_empty()
        || organization_id.is_empty()
        || organization_namespace.is_empty()
    {
        return None;
    }
    Some((
        token.trim().to_string(),
        TenantContext {
            user_id: user_id.to_string(),
            organization_id: organization_id.to_string(),
            organization_namespace: organization_namespace.to_string(),
            role,
        },
    ))
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
