//! Agent channel trait and the queue-backed implementation.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Outbound half of an agent's duplex connection.
///
/// The broker only ever sends text frames through this; reading is done by an
/// external loop that feeds each received frame to `AgentBroker::on_message`.
#[async_trait]
pub trait AgentChannel: Send + Sync {
    /// Transport label used in logs (e.g., "websocket").
    fn kind(&self) -> &str;

    /// Send a single text frame to the agent.
    async fn send(&self, frame: String) -> Result<(), TransportError>;
}

/// Channel that hands frames to a writer task through an mpsc queue.
///
/// The writer owns the real sink (a websocket, a test harness); once it drops
/// its receiver every further `send` fails with a `TransportError`.
#[derive(Debug, Clone)]
pub struct QueuedChannel {
    kind: &'static str,
    tx: mpsc::Sender<String>,
}

impl QueuedChannel {
    /// Create a channel and the receiver its writer task should drain.
    pub fn new(kind: &'static str, buffer: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { kind, tx }, rx)
    }
}

#[async_trait]
impl AgentChannel for QueuedChannel {
    fn kind(&self) -> &str {
        self.kind
    }

    async fn send(&self, frame: String) -> Result<(), TransportError> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| TransportError::closed(format!("{} writer stopped", self.kind)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_reaches_writer() {
        let (channel, mut rx) = QueuedChannel::new("test", 4);
        channel.send("hello".to_string()).await.unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_send_fails_after_writer_drops() {
        let (channel, rx) = QueuedChannel::new("test", 4);
        drop(rx);

        let err = channel.send("hello".to_string()).await.unwrap_err();
        assert!(err.to_string().contains("test writer stopped"));
    }
}
