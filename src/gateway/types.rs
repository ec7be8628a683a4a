//! Request and response DTOs for the gateway API.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::broker::{AgentRecord, Payload};

// --- Agent directory ---

#[derive(Debug, Serialize)]
pub struct AgentListResponse {
    pub agents: BTreeMap<String, AgentRecord>,
    pub total: usize,
}

impl AgentListResponse {
    pub fn from_records(records: Vec<AgentRecord>) -> Self {
        let total = records.len();
        let agents = records
            .into_iter()
            .map(|record| (record.agent_id.clone(), record))
            .collect();
        Self { agents, total }
    }
}

// --- Commands ---

/// Replace one line of a file on the agent's host.
#[derive(Debug, Deserialize)]
pub struct InjectFaultRequest {
    pub file_path: String,
    pub line_number: u64,
    pub new_content: String,
    /// Per-request override of the default command timeout.
    pub timeout_ms: Option<u64>,
}

/// Read back one line of a file on the agent's host.
#[derive(Debug, Deserialize)]
pub struct VerifyLineRequest {
    pub file_path: String,
    pub line_number: u64,
    pub timeout_ms: Option<u64>,
}

/// Arbitrary command forwarded to the agent untouched.
#[derive(Debug, Deserialize)]
pub struct RawCommandRequest {
    pub payload: Payload,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub detail: String,
}

// --- Agent websocket ---

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum RegistrationAck {
    Registered {
        status: &'static str,
        agent_id: String,
    },
    Rejected {
        error: String,
    },
}

impl RegistrationAck {
    pub fn registered(agent_id: impl Into<String>) -> Self {
        RegistrationAck::Registered {
            status: "registered",
            agent_id: agent_id.into(),
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        RegistrationAck::Rejected {
            error: error.into(),
        }
    }
}

// --- Service ---

#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub message: &'static str,
    pub status: &'static str,
    pub agents_online: usize,
    pub commands_pending: usize,
}
