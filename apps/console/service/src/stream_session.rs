//! Server-sent-event session lifecycle.
//!
//! A session owns one outbound push connection: the frame channel drained
//! by the HTTP response, the heartbeat timer, and an ordered list of
//! cleanup callbacks that run exactly once no matter which side terminates
//! the connection first. Without that guarantee, subscription controllers
//! would keep polling the control plane for clients that navigated away.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use axum::http::header;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use futures::Stream;
use serde::Serialize;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};
use uuid::Uuid;

type CleanupFn = Box<dyn FnOnce() + Send + 'static>;

#[derive(Clone)]
pub struct StreamSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    connection_id: String,
    active: AtomicBool,
    frames: Mutex<Option<mpsc::Sender<Event>>>,
    cleanups: Mutex<Vec<CleanupFn>>,
    closed: Notify,
}

impl StreamSession {
    /// Allocate the transport and start the heartbeat and disconnect
    /// watcher. The returned stream is the response body; dropping it
    /// (client disconnect) triggers the same teardown as [`close`].
    ///
    /// [`close`]: StreamSession::close
    pub fn open(heartbeat_interval: Duration, capacity: usize) -> (Self, SessionStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let session = Self {
            inner: Arc::new(SessionInner {
                connection_id: format!("conn_{}", Uuid::new_v4().simple()),
                active: AtomicBool::new(true),
                frames: Mutex::new(Some(tx.clone())),
                cleanups: Mutex::new(Vec::new()),
                closed: Notify::new(),
            }),
        };

        let heartbeat_session = session.clone();
        let heartbeat = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !heartbeat_session.is_active() {
                    break;
                }
                heartbeat_session
                    .send_event(Event::default().comment("ping"))
                    .await;
            }
        });
        session.on_cleanup(move || heartbeat.abort());

        let watcher_session = session.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = tx.closed() => {
                    debug!(
                        connection_id = %watcher_session.inner.connection_id,
                        "client disconnected"
                    );
                    watcher_session.close();
                }
                () = watcher_session.inner.closed.notified() => {}
            }
        });

        (session, SessionStream { frames: rx })
    }

    pub fn connection_id(&self) -> &str {
        &self.inner.connection_id
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Push a named JSON event. Serialization failures are dropped with a
    /// log; a fault in one event must never tear down the session.
    pub async fn send_json<T: Serialize>(&self, event_name: &str, payload: &T) {
        match Event::default().event(event_name).json_data(payload) {
            Ok(event) => self.send_event(event).await,
            Err(error) => {
                warn!(
                    connection_id = %self.inner.connection_id,
                    "failed to encode {event_name} event: {error}"
                );
            }
        }
    }

    /// Push a raw frame. No-op once the session is inactive; a gone
    /// receiver closes the session instead of surfacing an error.
    pub async fn send_event(&self, event: Event) {
        if !self.is_active() {
            return;
        }
        let sender = self
            .inner
            .frames
            .lock()
            .ok()
            .and_then(|frames| frames.clone());
        let Some(sender) = sender else {
            return;
        };
        if sender.send(event).await.is_err() {
            self.close();
        }
    }

    /// Register a cleanup callback. Callbacks run exactly once, in
    /// registration order; registering on an already-closed session runs
    /// the callback immediately.
    pub fn on_cleanup(&self, cleanup: impl FnOnce() + Send + 'static) {
        let mut pending: Option<CleanupFn> = Some(Box::new(cleanup));
        if let Ok(mut cleanups) = self.inner.cleanups.lock() {
            if self.inner.active.load(Ordering::SeqCst) {
                if let Some(cleanup) = pending.take() {
                    cleanups.push(cleanup);
                }
            }
        }
        if let Some(cleanup) = pending {
            cleanup();
        }
    }

    /// Tear the session down. Idempotent: the first caller (explicit close
    /// or the disconnect watcher) runs the cleanups; later calls are no-ops.
    pub fn close(&self) {
        if !self.inner.active.swap(false, Ordering::SeqCst) {
            return;
        }
        let pending = self
            .inner
            .cleanups
            .lock()
            .map(|mut cleanups| std::mem::take(&mut *cleanups))
            .unwrap_or_default();
        for cleanup in pending {
            cleanup();
        }
        if let Ok(mut frames) = self.inner.frames.lock() {
            frames.take();
        }
        self.inner.closed.notify_one();
        debug!(connection_id = %self.inner.connection_id, "stream session closed");
    }
}

/// Response body for one session: yields frames until every sender is gone.
pub struct SessionStream {
    frames: mpsc::Receiver<Event>,
}

impl Stream for SessionStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.frames.poll_recv(cx).map(|event| event.map(Ok))
    }
}

/// SSE response with proxy-friendly headers.
pub fn sse_response(stream: SessionStream) -> Response {
    (
        [
            (header::CACHE_CONTROL.as_str(), "no-cache"),
            ("x-accel-buffering", "no"),
        ],
        Sse::new(stream),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use futures::StreamExt;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn cleanups_run_exactly_once_in_registration_order() {
        let (session, stream) = StreamSession::open(Duration::from_secs(30), 8);

        let order = Arc::new(Mutex::new(Vec::new()));
        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            session.on_cleanup(move || {
                if let Ok(mut order) = order.lock() {
                    order.push(label);
                }
            });
        }

        // Both triggers fire: the client goes away and the relay closes.
        drop(stream);
        session.close();
        session.close();
        tokio::task::yield_now().await;

        let order = order.lock().expect("order").clone();
        assert_eq!(order, vec!["first", "second", "third"]);
        assert!(!session.is_active());
    }

    #[tokio::test]
    async fn cleanup_registered_after_close_runs_immediately() {
        let (session, _stream) = StreamSession::open(Duration::from_secs(30), 8);
        session.close();

        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        session.on_cleanup(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn send_after_close_is_a_no_op() {
        let (session, mut stream) = StreamSession::open(Duration::from_secs(30), 8);
        session.send_json("connection", &json!({"ok": true})).await;
        session.close();
        session.send_json("resource-update", &json!({"dropped": true})).await;

        let mut frames = 0;
        while stream.next().await.is_some() {
            frames += 1;
        }
        assert_eq!(frames, 1);
    }

    #[tokio::test]
    async fn quiet_session_still_emits_heartbeat_frames() {
        let (session, mut stream) = StreamSession::open(Duration::from_millis(40), 8);

        let frame = tokio::time::timeout(Duration::from_millis(500), stream.next())
            .await
            .expect("heartbeat before the period elapsed");
        assert!(frame.is_some());
        session.close();
    }

    #[tokio::test]
    async fn client_disconnect_triggers_teardown() {
        let (session, stream) = StreamSession::open(Duration::from_secs(30), 8);
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        session.on_cleanup(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        drop(stream);
        // The disconnect watcher runs on the spawned task.
        for _ in 0..50 {
            if !session.is_active() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!session.is_active());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
