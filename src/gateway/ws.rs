//! Agent websocket endpoint.
//!
//! Protocol:
//! ```text
//! Agent  -> Server: {"agent_id":"node-1","hostname":"...",...}   (registration)
//! Server -> Agent:  {"status":"registered","agent_id":"node-1"}
//! Server -> Agent:  {"action":"read_file",...,"command_id":"<uuid>"}
//! Agent  -> Server: {"command_id":"<uuid>","data":{...}}
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;

use crate::broker::{AgentBroker, Payload};
use crate::channels::QueuedChannel;
use crate::gateway::GatewayState;
use crate::gateway::types::RegistrationAck;

/// How long a fresh socket may sit before sending its registration frame.
const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Outbound frames buffered per agent before `send` applies backpressure.
const OUTBOUND_BUFFER: usize = 64;

/// GET /api/agent/connect
pub async fn agent_connect(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.broker))
}

async fn handle_socket(socket: WebSocket, broker: Arc<AgentBroker>) {
    let (mut sink, mut stream) = socket.split();

    let first_frame = tokio::time::timeout(REGISTRATION_TIMEOUT, next_text(&mut stream)).await;
    let registration = match first_frame {
        Ok(Some(text)) => text,
        Ok(None) => return,
        Err(_) => {
            tracing::debug!("Agent socket closed: no registration frame");
            return;
        }
    };

    let (agent_id, metadata) = match parse_registration(&registration) {
        Ok(parsed) => parsed,
        Err(reason) => {
            tracing::debug!(reason, "Rejecting agent registration");
            let _ = send_json(&mut sink, &RegistrationAck::rejected(reason)).await;
            let _ = sink.close().await;
            return;
        }
    };

    let (channel, mut outbound) = QueuedChannel::new("websocket", OUTBOUND_BUFFER);
    let token = broker.register(&agent_id, Arc::new(channel), metadata);

    // Acknowledge before the writer task takes over the sink; commands
    // dispatched in the meantime wait in the queue.
    if send_json(&mut sink, &RegistrationAck::registered(&agent_id))
        .await
        .is_err()
    {
        broker.release(&token);
        return;
    }

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        // Queue closed or socket gone: let the read loop see the close.
        let _ = sink.close().await;
    });

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                broker.on_message(&agent_id, text.as_str());
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(agent_id = %agent_id, error = %e, "Agent socket error");
                break;
            }
        }
    }

    broker.release(&token);
    writer.abort();
}

/// Wait for the next text frame, skipping control and binary frames.
async fn next_text(stream: &mut SplitStream<WebSocket>) -> Option<String> {
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => return Some(text.as_str().to_owned()),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
    None
}

/// Extract the agent id and metadata from a registration frame.
///
/// The whole document becomes the agent's metadata.
fn parse_registration(raw: &str) -> Result<(String, Payload), &'static str> {
    let Ok(Value::Object(metadata)) = serde_json::from_str::<Value>(raw) else {
        return Err("invalid registration");
    };

    match metadata.get("agent_id").and_then(Value::as_str) {
        Some(agent_id) if !agent_id.trim().is_empty() => Ok((agent_id.to_string(), metadata)),
        _ => Err("agent_id required"),
    }
}

async fn send_json(
    sink: &mut SplitSink<WebSocket, Message>,
    body: &RegistrationAck,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(body).unwrap_or_default();
    sink.send(Message::Text(text.into())).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_registration_keeps_metadata() {
        let (agent_id, metadata) =
            parse_registration(r#"{"agent_id": "node-1", "hostname": "compute-01"}"#).unwrap();
        assert_eq!(agent_id, "node-1");
        assert_eq!(metadata["hostname"], "compute-01");
    }

    #[test]
    fn test_parse_registration_requires_agent_id() {
        assert_eq!(
            parse_registration(r#"{"hostname": "compute-01"}"#),
            Err("agent_id required")
        );
        assert_eq!(
            parse_registration(r#"{"agent_id": "  "}"#),
            Err("agent_id required")
        );
        assert_eq!(
            parse_registration(r#"{"agent_id": 7}"#),
            Err("agent_id required")
        );
    }

    #[test]
    fn test_parse_registration_rejects_non_object() {
        assert_eq!(parse_registration("hello"), Err("invalid registration"));
        assert_eq!(parse_registration("[]"), Err("invalid registration"));
    }
}
