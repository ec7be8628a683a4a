//! Connection registry: which agents are known and which have a live channel.
//!
//! Not synchronized on its own; `AgentBroker` keeps it behind the same lock
//! as the correlation table.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::broker::Payload;
use crate::channels::AgentChannel;

/// Keys the registry owns in an agent's serialized record.
const RESERVED_KEYS: [&str; 4] = ["agent_id", "status", "connected_at", "disconnected_at"];

/// Liveness of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    Offline,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Online => write!(f, "online"),
            AgentStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Snapshot of what is known about an agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentRecord {
    pub agent_id: String,
    pub status: AgentStatus,
    pub connected_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disconnected_at: Option<DateTime<Utc>>,
    /// Registration metadata, merged across reconnections.
    #[serde(flatten)]
    pub metadata: Payload,
}

/// Identifies one physical connection of an agent.
///
/// A read loop holds the token for its own connection so that tearing it
/// down cannot unregister a newer connection of the same agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionToken {
    agent_id: String,
    connection_id: Uuid,
}

impl ConnectionToken {
    fn new(agent_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            connection_id: Uuid::new_v4(),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }
}

struct LiveConnection {
    token: ConnectionToken,
    channel: Arc<dyn AgentChannel>,
}

struct AgentEntry {
    record: AgentRecord,
    connection: Option<LiveConnection>,
}

#[derive(Default)]
pub(crate) struct Registry {
    agents: HashMap<String, AgentEntry>,
}

impl Registry {
    /// Insert or refresh an agent and attach its channel.
    pub fn register(
        &mut self,
        agent_id: &str,
        channel: Arc<dyn AgentChannel>,
        mut metadata: Payload,
    ) -> ConnectionToken {
        for key in RESERVED_KEYS {
            metadata.remove(key);
        }

        let token = ConnectionToken::new(agent_id);
        let connection = Some(LiveConnection {
            token: token.clone(),
            channel,
        });
        let now = Utc::now();

        match self.agents.get_mut(agent_id) {
            Some(entry) => {
                // Merge, not replace: keys from earlier sessions survive.
                entry.record.metadata.extend(metadata);
                entry.record.status = AgentStatus::Online;
                entry.record.connected_at = now;
                entry.record.disconnected_at = None;
                entry.connection = connection;
            }
            None => {
                self.agents.insert(
                    agent_id.to_string(),
                    AgentEntry {
                        record: AgentRecord {
                            agent_id: agent_id.to_string(),
                            status: AgentStatus::Online,
                            connected_at: now,
                            disconnected_at: None,
                            metadata,
                        },
                        connection,
                    },
                );
            }
        }

        token
    }

    /// Detach the channel and mark the agent offline. Returns whether a live
    /// connection was dropped.
    pub fn unregister(&mut self, agent_id: &str) -> bool {
        let Some(entry) = self.agents.get_mut(agent_id) else {
            return false;
        };
        let was_live = entry.connection.take().is_some();
        if entry.record.status == AgentStatus::Online {
            entry.record.status = AgentStatus::Offline;
            entry.record.disconnected_at = Some(Utc::now());
        }
        was_live
    }

    /// Current channel for an agent, if online.
    pub fn channel(&self, agent_id: &str) -> Option<(ConnectionToken, Arc<dyn AgentChannel>)> {
        self.agents
            .get(agent_id)
            .and_then(|entry| entry.connection.as_ref())
            .map(|conn| (conn.token.clone(), Arc::clone(&conn.channel)))
    }

    /// True if `token` is the agent's current connection.
    pub fn is_current(&self, token: &ConnectionToken) -> bool {
        self.agents
            .get(token.agent_id())
            .and_then(|entry| entry.connection.as_ref())
            .is_some_and(|conn| conn.token == *token)
    }

    pub fn is_online(&self, agent_id: &str) -> bool {
        self.agents
            .get(agent_id)
            .is_some_and(|entry| entry.connection.is_some())
    }

    pub fn get(&self, agent_id: &str) -> Option<AgentRecord> {
        self.agents.get(agent_id).map(|entry| entry.record.clone())
    }

    /// All records, online and offline, ordered by agent id.
    pub fn snapshot(&self) -> Vec<AgentRecord> {
        let mut records: Vec<AgentRecord> = self
            .agents
            .values()
            .map(|entry| entry.record.clone())
            .collect();
        records.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        records
    }

    pub fn online_count(&self) -> usize {
        self.agents
            .values()
            .filter(|entry| entry.connection.is_some())
            .count()
    }
}
