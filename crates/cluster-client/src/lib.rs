//! Typed client for the LangOps control-plane API.
//!
//! This crate intentionally exposes a small surface:
//! - watch calls over the Kubernetes-compatible list/watch protocol,
//!   delivered as an ordered channel of change notifications
//! - selector construction scoped by namespace, labels and fields
//! - a liveness probe for readiness checks

pub mod client;
pub mod error;
pub mod resource;
pub mod selector;
pub mod watch;

pub use client::{ClusterClient, ClusterClientConfig, WatchTarget, DEFAULT_CONNECT_TIMEOUT_MS};
pub use error::{ClusterClientError, Result};
pub use resource::{
    ChangeNotification, InvolvedObjectRef, ResourceBody, ResourceMetadata, WatchEventKind,
    LANGOPS_API_GROUP, LANGOPS_API_VERSION,
};
pub use selector::WatchSelector;
pub use watch::{WatchHandle, WatchMessage};
