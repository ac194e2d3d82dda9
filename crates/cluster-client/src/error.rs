//! Client error types.

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterClientError {
    #[error("cluster_base_url_missing")]
    BaseUrlMissing,

    #[error("cluster_invalid_selector:{message}")]
    InvalidSelector { message: String },

    #[error("cluster_client_build_failed:{message}")]
    Build { message: String },

    #[error("cluster_request_failed:{message}")]
    Request { message: String },

    #[error("cluster_read_failed:{message}")]
    Read { message: String },

    #[error("cluster_http_{status}:{body}")]
    Http { status: StatusCode, body: String },

    #[error("cluster_decode_failed:{message}")]
    Decode { message: String },
}

pub type Result<T> = std::result::Result<T, ClusterClientError>;

pub fn format_http_error(status: StatusCode, body: &[u8]) -> ClusterClientError {
    let body = String::from_utf8_lossy(body);
    let body = body.trim();
    let body = if body.is_empty() {
        "<empty>".to_string()
    } else {
        body.to_string()
    };
    ClusterClientError::Http { status, body }
}
