//! Error types for the broker and its gateway.

use std::net::SocketAddr;
use std::time::Duration;

/// Failure to hand a frame to an agent's channel.
#[derive(Debug, Clone, thiserror::Error)]
#[error("channel closed: {reason}")]
pub struct TransportError {
    pub reason: String,
}

impl TransportError {
    pub fn closed(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Errors surfaced to the caller of `AgentBroker::dispatch`.
///
/// Malformed or unmatched replies are never represented here; the router
/// drops them without affecting any pending command.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// No live channel registered for the agent at dispatch time.
    #[error("Agent {agent_id} not found or offline")]
    AgentOffline { agent_id: String },

    /// The channel looked live but the send itself failed.
    #[error("Failed to send command to agent {agent_id}: {source}")]
    Transport {
        agent_id: String,
        #[source]
        source: TransportError,
    },

    /// No correlated reply arrived within the bound.
    #[error("Agent {agent_id} did not respond within {timeout:?}")]
    Timeout { agent_id: String, timeout: Duration },

    /// The agent went away while the command was outstanding.
    #[error("Agent {agent_id} disconnected before replying")]
    AgentDisconnected { agent_id: String },
}

impl DispatchError {
    /// Agent the failed command was addressed to.
    pub fn agent_id(&self) -> &str {
        match self {
            DispatchError::AgentOffline { agent_id }
            | DispatchError::Transport { agent_id, .. }
            | DispatchError::Timeout { agent_id, .. }
            | DispatchError::AgentDisconnected { agent_id } => agent_id,
        }
    }

    /// Short machine-readable kind, used in gateway error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::AgentOffline { .. } => "agent_offline",
            DispatchError::Transport { .. } => "transport",
            DispatchError::Timeout { .. } => "timeout",
            DispatchError::AgentDisconnected { .. } => "agent_disconnected",
        }
    }
}

/// Invalid configuration values read from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors from running the HTTP/websocket gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Gateway server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Result type for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;
