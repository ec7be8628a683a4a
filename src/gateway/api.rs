//! HTTP handlers that issue commands to agents.
//!
//! These are thin callers of the broker: they build a payload, dispatch it
//! and translate the outcome into an HTTP response.

use std::time::Duration;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

use crate::broker::Payload;
use crate::error::DispatchError;
use crate::gateway::GatewayState;
use crate::gateway::types::{
    AgentListResponse, ErrorResponse, InjectFaultRequest, RawCommandRequest, RootResponse,
    VerifyLineRequest,
};

/// Dispatch failure rendered as an HTTP error.
pub struct ApiError(pub DispatchError);

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            DispatchError::AgentOffline { .. } => StatusCode::NOT_FOUND,
            DispatchError::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
            DispatchError::Transport { .. } => StatusCode::BAD_GATEWAY,
            DispatchError::AgentDisconnected { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse {
            error: self.0.kind(),
            detail: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// -- Handlers --

pub async fn root(State(state): State<GatewayState>) -> Json<RootResponse> {
    Json(RootResponse {
        message: "cimut agent broker",
        status: "online",
        agents_online: state.broker.online_count(),
        commands_pending: state.broker.pending_count(),
    })
}

pub async fn health_check() -> &'static str {
    "ok"
}

/// GET /api/agents
pub async fn list_agents(State(state): State<GatewayState>) -> Json<AgentListResponse> {
    Json(AgentListResponse::from_records(state.broker.list()))
}

/// GET /api/agents/{agent_id}
pub async fn get_agent(
    State(state): State<GatewayState>,
    Path(agent_id): Path<String>,
) -> Response {
    match state.broker.agent(&agent_id) {
        Some(record) => Json(record).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "unknown_agent",
                detail: format!("Agent {} has never registered", agent_id),
            }),
        )
            .into_response(),
    }
}

/// POST /api/agents/{agent_id}/fault
pub async fn inject_fault(
    State(state): State<GatewayState>,
    Path(agent_id): Path<String>,
    Json(req): Json<InjectFaultRequest>,
) -> Result<Json<Payload>, ApiError> {
    let payload = command_payload(json!({
        "action": "modify_file",
        "file_path": req.file_path,
        "line_number": req.line_number,
        "new_content": req.new_content,
    }));

    run_command(&state, &agent_id, payload, req.timeout_ms).await
}

/// POST /api/agents/{agent_id}/verify
pub async fn verify_line(
    State(state): State<GatewayState>,
    Path(agent_id): Path<String>,
    Json(req): Json<VerifyLineRequest>,
) -> Result<Json<Payload>, ApiError> {
    let payload = command_payload(json!({
        "action": "read_file",
        "file_path": req.file_path,
        "line_number": req.line_number,
    }));

    run_command(&state, &agent_id, payload, req.timeout_ms).await
}

/// POST /api/agents/{agent_id}/command
pub async fn raw_command(
    State(state): State<GatewayState>,
    Path(agent_id): Path<String>,
    Json(req): Json<RawCommandRequest>,
) -> Result<Json<Payload>, ApiError> {
    run_command(&state, &agent_id, req.payload, req.timeout_ms).await
}

async fn run_command(
    state: &GatewayState,
    agent_id: &str,
    payload: Payload,
    timeout_ms: Option<u64>,
) -> Result<Json<Payload>, ApiError> {
    let broker = &state.broker;
    let reply = match timeout_ms.map(Duration::from_millis) {
        Some(timeout) => broker.dispatch(agent_id, payload, timeout).await?,
        None => broker.dispatch_default(agent_id, payload).await?,
    };
    Ok(Json(reply))
}

fn command_payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;

    fn status_of(err: DispatchError) -> StatusCode {
        ApiError(err).into_response().status()
    }

    #[test]
    fn test_dispatch_errors_map_to_status_codes() {
        let agent_id = "A".to_string();
        assert_eq!(
            status_of(DispatchError::AgentOffline {
                agent_id: agent_id.clone()
            }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(DispatchError::Timeout {
                agent_id: agent_id.clone(),
                timeout: Duration::from_secs(10),
            }),
            StatusCode::REQUEST_TIMEOUT
        );
        assert_eq!(
            status_of(DispatchError::Transport {
                agent_id: agent_id.clone(),
                source: TransportError::closed("gone"),
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(DispatchError::AgentDisconnected { agent_id }),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_command_payload_from_object() {
        let payload = command_payload(json!({"action": "read_file", "line_number": 3}));
        assert_eq!(payload["action"], "read_file");
        assert_eq!(payload.len(), 2);
    }
}
