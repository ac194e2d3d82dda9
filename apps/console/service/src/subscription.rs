//! Subscription control: one watch lifecycle per controller.
//!
//! A controller owns exactly one selector and one bookmark. It drives the
//! watch as an explicit state machine (Idle, Watching, Retrying, Stopped)
//! over the cluster client's message channel. Termination of the underlying
//! watch is never fatal: the controller restarts from the bookmark after a
//! fixed cooldown until the owning session goes away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use langops_cluster_client::{
    ClusterClient, WatchEventKind, WatchHandle, WatchMessage, WatchSelector, WatchTarget,
};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::classifier::{classify, should_include, TenantScope};
use crate::observability::Observability;
use crate::stream_session::StreamSession;

/// Status code the control plane uses for an expired resume token.
const RESUME_TOKEN_EXPIRED: u16 = 410;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Idle,
    Watching,
    Retrying,
    Stopped,
}

impl SubscriptionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Watching => "watching",
            Self::Retrying => "retrying",
            Self::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    pub target: WatchTarget,
    pub selector: WatchSelector,
    pub retry_cooldown: Duration,
}

/// Informational payload for the client's `error` events.
#[derive(Debug, Serialize)]
struct ErrorEvent {
    message: String,
    timestamp: String,
}

#[derive(Clone)]
pub struct SubscriptionController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    kind: &'static str,
    state: Mutex<SubscriptionState>,
    bookmark: Mutex<Option<String>>,
    stopped: AtomicBool,
    stop_tx: watch::Sender<bool>,
}

enum WatchOutcome {
    Stopped,
    ServerClosed,
    Failed { message: String, reported: bool },
}

impl SubscriptionController {
    /// Create the controller and start its watch loop.
    pub fn spawn(
        client: ClusterClient,
        config: SubscriptionConfig,
        session: StreamSession,
        scope: TenantScope,
        observability: Observability,
        request_id: String,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let controller = Self {
            inner: Arc::new(ControllerInner {
                kind: config.target.kind(),
                state: Mutex::new(SubscriptionState::Idle),
                bookmark: Mutex::new(None),
                stopped: AtomicBool::new(false),
                stop_tx,
            }),
        };

        let run_controller = controller.clone();
        tokio::spawn(run(
            run_controller,
            client,
            config,
            session,
            scope,
            observability,
            request_id,
            stop_rx,
        ));

        controller
    }

    pub fn kind(&self) -> &'static str {
        self.inner.kind
    }

    pub fn state(&self) -> SubscriptionState {
        self.inner
            .state
            .lock()
            .map(|state| *state)
            .unwrap_or(SubscriptionState::Stopped)
    }

    pub fn bookmark(&self) -> Option<String> {
        self.inner
            .bookmark
            .lock()
            .map(|bookmark| bookmark.clone())
            .unwrap_or(None)
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Stop the watch loop. Idempotent; cancels an in-flight watch and the
    /// pending retry, and never lets the loop schedule further work.
    pub fn cancel(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.inner.stop_tx.send(true);
        self.set_state(SubscriptionState::Stopped);
    }

    fn set_state(&self, state: SubscriptionState) {
        if let Ok(mut current) = self.inner.state.lock() {
            if *current != SubscriptionState::Stopped || state == SubscriptionState::Stopped {
                *current = state;
            }
        }
    }

    fn set_bookmark(&self, token: &str) {
        if let Ok(mut bookmark) = self.inner.bookmark.lock() {
            *bookmark = Some(token.to_string());
        }
    }

    fn clear_bookmark(&self) {
        if let Ok(mut bookmark) = self.inner.bookmark.lock() {
            bookmark.take();
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    controller: SubscriptionController,
    client: ClusterClient,
    config: SubscriptionConfig,
    session: StreamSession,
    scope: TenantScope,
    observability: Observability,
    request_id: String,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        if controller.is_stopped() || !session.is_active() {
            break;
        }
        controller.set_state(SubscriptionState::Watching);

        let selector = config.selector.with_resume_token(controller.bookmark());
        let outcome = match client.watch(config.target, &selector).await {
            Ok(handle) => {
                drive_watch(&controller, handle, &session, &scope, &mut stop_rx).await
            }
            Err(error) => WatchOutcome::Failed {
                message: error.to_string(),
                reported: false,
            },
        };

        match outcome {
            WatchOutcome::Stopped => break,
            WatchOutcome::ServerClosed => {
                debug!(kind = controller.kind(), "watch closed by server, restarting");
            }
            WatchOutcome::Failed { message, reported } => {
                warn!(kind = controller.kind(), "watch failed: {message}");
                if !reported {
                    emit_error_event(&session, &message).await;
                }
                observability.increment_counter("relay.watch.retry", &request_id);
            }
        }

        if controller.is_stopped() || !session.is_active() {
            break;
        }
        controller.set_state(SubscriptionState::Retrying);
        tokio::select! {
            () = sleep(config.retry_cooldown) => {}
            _ = stop_rx.changed() => break,
        }
    }

    controller.set_state(SubscriptionState::Stopped);
}

async fn drive_watch(
    controller: &SubscriptionController,
    mut handle: WatchHandle,
    session: &StreamSession,
    scope: &TenantScope,
    stop_rx: &mut watch::Receiver<bool>,
) -> WatchOutcome {
    let mut error_reported = false;
    loop {
        if controller.is_stopped() {
            handle.cancel();
            return WatchOutcome::Stopped;
        }
        tokio::select! {
            message = handle.next() => match message {
                Some(WatchMessage::Event(notification)) => {
                    if let Some(token) = notification.resume_token() {
                        controller.set_bookmark(token);
                    }
                    if notification.kind == WatchEventKind::Error {
                        if notification.error_code() == Some(RESUME_TOKEN_EXPIRED) {
                            controller.clear_bookmark();
                        }
                        let message = notification
                            .object
                            .message
                            .clone()
                            .unwrap_or_else(|| "watch error".to_string());
                        warn!(kind = controller.kind(), "watch reported an error: {message}");
                        if !error_reported {
                            emit_error_event(session, &message).await;
                            error_reported = true;
                        }
                        continue;
                    }
                    if should_include(&notification, scope) {
                        let event = classify(&notification, scope);
                        session.send_json("resource-update", &event).await;
                    }
                }
                Some(WatchMessage::Closed(Some(error))) => {
                    return WatchOutcome::Failed {
                        message: error.to_string(),
                        reported: error_reported,
                    };
                }
                Some(WatchMessage::Closed(None)) | None => return WatchOutcome::ServerClosed,
            },
            _ = stop_rx.changed() => {
                handle.cancel();
                return WatchOutcome::Stopped;
            }
        }
    }
}

async fn emit_error_event(session: &StreamSession, message: &str) {
    session
        .send_json(
            "error",
            &ErrorEvent {
                message: message.to_string(),
                timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            },
        )
        .await;
}
