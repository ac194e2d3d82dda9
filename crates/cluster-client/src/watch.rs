//! Watch stream plumbing: line framing and the background reader task.

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::ClusterClientError;
use crate::resource::ChangeNotification;

/// One message from an open watch.
#[derive(Debug)]
pub enum WatchMessage {
    /// An ordered change notification.
    Event(ChangeNotification),
    /// The watch ended: `None` for a server-side close, `Some` for a
    /// transport error. Always the final message.
    Closed(Option<ClusterClientError>),
}

/// Handle to an open watch. Dropping the handle cancels the underlying
/// connection, so a forgotten watch can never leak.
#[derive(Debug)]
pub struct WatchHandle {
    messages: mpsc::Receiver<WatchMessage>,
    reader: Option<JoinHandle<()>>,
}

impl WatchHandle {
    pub(crate) fn new(messages: mpsc::Receiver<WatchMessage>, reader: JoinHandle<()>) -> Self {
        Self {
            messages,
            reader: Some(reader),
        }
    }

    /// Next message, or `None` once the channel is drained after close.
    pub async fn next(&mut self) -> Option<WatchMessage> {
        self.messages.recv().await
    }

    /// Cancel the watch. Idempotent; safe after termination.
    pub fn cancel(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.messages.close();
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Reader task: frames the chunked response body into lines and forwards
/// decoded notifications. Undecodable lines are dropped; the loop only
/// ends on transport close, transport error, or a gone receiver.
pub(crate) async fn read_watch_stream(
    response: reqwest::Response,
    tx: mpsc::Sender<WatchMessage>,
) {
    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();

    loop {
        match stream.next().await {
            Some(Ok(chunk)) => {
                buffer.extend_from_slice(&chunk);
                for line in drain_lines(&mut buffer) {
                    if !forward_line(&tx, &line).await {
                        return;
                    }
                }
            }
            Some(Err(error)) => {
                let _ = tx
                    .send(WatchMessage::Closed(Some(ClusterClientError::Read {
                        message: error.to_string(),
                    })))
                    .await;
                return;
            }
            None => {
                // A final notification may arrive without a trailing newline.
                if !buffer.is_empty() && !forward_line(&tx, &buffer).await {
                    return;
                }
                let _ = tx.send(WatchMessage::Closed(None)).await;
                return;
            }
        }
    }
}

async fn forward_line(tx: &mpsc::Sender<WatchMessage>, line: &[u8]) -> bool {
    if line.is_empty() {
        return true;
    }
    match ChangeNotification::decode(line) {
        Ok(notification) => tx.send(WatchMessage::Event(notification)).await.is_ok(),
        Err(error) => {
            warn!("dropping undecodable watch line: {error}");
            true
        }
    }
}

/// Split complete newline-terminated lines off the front of `buffer`,
/// leaving any partial trailing line in place.
fn drain_lines(buffer: &mut Vec<u8>) -> Vec<Vec<u8>> {
    let mut lines = Vec::new();
    while let Some(position) = buffer.iter().position(|byte| *byte == b'\n') {
        let mut line: Vec<u8> = buffer.drain(..=position).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        lines.push(line);
    }
    lines
}
