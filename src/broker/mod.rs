//! Agent command broker.
//!
//! Correlates commands sent to remote agents with the replies that come back
//! on the same channel:
//!
//! ```text
//! caller ──dispatch──► correlation table ──send──► agent
//!   ▲                                                │
//!   └──── oneshot ◄── on_message (read loop) ◄───────┘
//! ```
//!
//! The registry and the correlation table sit behind one mutex. It is held
//! only while a map is mutated, never across a send or while a caller waits.
//! Reply, timeout and disconnect race for the same table entry; whichever
//! removes it first decides the outcome.

mod envelope;
mod pending;
mod registry;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::channels::AgentChannel;
use crate::config::BrokerConfig;
use crate::error::{DispatchError, Result};

pub use envelope::{COMMAND_ID_FIELD, encode_command};
pub use registry::{AgentRecord, AgentStatus, ConnectionToken};

use envelope::decode_reply;
use pending::{CorrelationTable, PendingCommand};
use registry::Registry;

/// Opaque JSON object exchanged with agents.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// What the router did with an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Matched a pending command and woke its caller.
    Delivered,
    /// Not parseable as a correlated reply; dropped.
    Malformed,
    /// Parsed, but no pending command for this agent had that id; dropped.
    Unmatched,
}

#[derive(Default)]
struct BrokerState {
    registry: Registry,
    pending: CorrelationTable,
}

/// Shared broker for all agents and callers.
pub struct AgentBroker {
    state: Mutex<BrokerState>,
    default_timeout: Duration,
}

impl AgentBroker {
    /// Create a broker with the given tuning.
    pub fn new(config: &BrokerConfig) -> Self {
        Self {
            state: Mutex::new(BrokerState::default()),
            default_timeout: config.command_timeout,
        }
    }

    /// Timeout used by `dispatch_default`.
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    // -- Lifecycle --

    /// Register (or re-register) an agent on a new channel.
    ///
    /// Metadata is merged into any record kept from a previous session. The
    /// returned token identifies this connection for `release`.
    pub fn register(
        &self,
        agent_id: &str,
        channel: Arc<dyn AgentChannel>,
        metadata: Payload,
    ) -> ConnectionToken {
        let kind = channel.kind().to_string();
        let token = self.state.lock().registry.register(agent_id, channel, metadata);

        tracing::info!(
            agent_id = %agent_id,
            connection_id = %token.connection_id(),
            transport = %kind,
            "Agent registered"
        );
        token
    }

    /// Mark the agent offline and cancel all of its pending commands.
    ///
    /// Waiting dispatchers fail with `AgentDisconnected` right away. Returns
    /// the number of commands cancelled. Unknown agents are a no-op.
    pub fn disconnect(&self, agent_id: &str) -> usize {
        let (was_live, cancelled) = {
            let mut state = self.state.lock();
            let was_live = state.registry.unregister(agent_id);
            (was_live, state.pending.drain_agent(agent_id))
        };

        let count = cancelled.len();
        // Dropping the completion slots outside the lock wakes the waiters.
        drop(cancelled);

        if was_live || count > 0 {
            tracing::info!(agent_id = %agent_id, cancelled = count, "Agent disconnected");
        }
        count
    }

    /// Tear down the connection identified by `token`.
    ///
    /// If the agent has since re-registered on another connection it stays
    /// online; only commands sent over this connection are cancelled.
    pub fn release(&self, token: &ConnectionToken) -> usize {
        let cancelled = {
            let mut state = self.state.lock();
            if state.registry.is_current(token) {
                state.registry.unregister(token.agent_id());
                state.pending.drain_agent(token.agent_id())
            } else {
                state.pending.drain_connection(token.connection_id())
            }
        };

        let count = cancelled.len();
        drop(cancelled);

        tracing::info!(
            agent_id = %token.agent_id(),
            connection_id = %token.connection_id(),
            cancelled = count,
            "Agent connection closed"
        );
        count
    }

    // -- Registry queries --

    pub fn is_online(&self, agent_id: &str) -> bool {
        self.state.lock().registry.is_online(agent_id)
    }

    /// Snapshot of every known agent, online and offline.
    pub fn list(&self) -> Vec<AgentRecord> {
        self.state.lock().registry.snapshot()
    }

    pub fn agent(&self, agent_id: &str) -> Option<AgentRecord> {
        self.state.lock().registry.get(agent_id)
    }

    pub fn online_count(&self) -> usize {
        self.state.lock().registry.online_count()
    }

    /// Number of commands currently awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Number of commands awaiting a reply from one agent.
    pub fn pending_count_for(&self, agent_id: &str) -> usize {
        self.state.lock().pending.count_for(agent_id)
    }

    // -- Dispatch --

    /// Send `payload` to an agent and wait for the correlated reply.
    ///
    /// The reply is returned without its `command_id` field. The command is
    /// never retried; after a `Timeout` the agent may still act on it.
    pub async fn dispatch(
        &self,
        agent_id: &str,
        payload: Payload,
        timeout: Duration,
    ) -> Result<Payload> {
        let (command_id, channel, reply_rx) = {
            let mut state = self.state.lock();
            let (token, channel) =
                state
                    .registry
                    .channel(agent_id)
                    .ok_or_else(|| DispatchError::AgentOffline {
                        agent_id: agent_id.to_string(),
                    })?;

            let command_id = state.pending.fresh_id();
            let (reply_tx, reply_rx) = oneshot::channel();
            state.pending.insert(
                command_id,
                PendingCommand::new(agent_id, token.connection_id(), reply_tx),
            );
            (command_id, channel, reply_rx)
        };

        // Removes the entry on every exit path, including the caller
        // dropping this future mid-wait.
        let _guard = PendingGuard {
            broker: self,
            command_id,
        };

        tracing::debug!(
            agent_id = %agent_id,
            command_id = %command_id,
            timeout_ms = millis(timeout),
            "Dispatching command"
        );

        // One deadline covers both the send, which waits while the agent's
        // outbound queue is full, and the wait for the reply.
        let deadline = tokio::time::Instant::now() + timeout;
        let frame = encode_command(command_id, payload);

        let sent = match tokio::time::timeout_at(deadline, channel.send(frame)).await {
            Ok(sent) => sent,
            Err(_) => {
                tracing::debug!(
                    agent_id = %agent_id,
                    command_id = %command_id,
                    "Command timed out waiting for the outbound queue"
                );
                return Err(DispatchError::Timeout {
                    agent_id: agent_id.to_string(),
                    timeout,
                });
            }
        };
        if let Err(source) = sent {
            tracing::warn!(
                agent_id = %agent_id,
                command_id = %command_id,
                error = %source,
                "Failed to send command"
            );
            return Err(DispatchError::Transport {
                agent_id: agent_id.to_string(),
                source,
            });
        }

        match tokio::time::timeout_at(deadline, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(DispatchError::AgentDisconnected {
                agent_id: agent_id.to_string(),
            }),
            Err(_) => {
                tracing::debug!(
                    agent_id = %agent_id,
                    command_id = %command_id,
                    "Command timed out"
                );
                Err(DispatchError::Timeout {
                    agent_id: agent_id.to_string(),
                    timeout,
                })
            }
        }
    }

    /// `dispatch` with the configured default timeout.
    pub async fn dispatch_default(&self, agent_id: &str, payload: Payload) -> Result<Payload> {
        self.dispatch(agent_id, payload, self.default_timeout).await
    }

    // -- Inbound routing --

    /// Route one frame received on `agent_id`'s channel.
    ///
    /// Never fails: malformed frames and replies with no matching pending
    /// command are dropped so one bad frame cannot affect other commands.
    pub fn on_message(&self, agent_id: &str, raw: &str) -> RouteOutcome {
        let (command_id, reply) = match decode_reply(raw) {
            Ok(decoded) => decoded,
            Err(reason) => {
                tracing::trace!(agent_id = %agent_id, ?reason, "Dropping malformed frame");
                return RouteOutcome::Malformed;
            }
        };

        let matched = self.state.lock().pending.remove_owned(&command_id, agent_id);
        let Some(command) = matched else {
            tracing::trace!(
                agent_id = %agent_id,
                command_id = %command_id,
                "Dropping reply with no pending command"
            );
            return RouteOutcome::Unmatched;
        };

        let elapsed_ms = millis(command.age());
        if command.fulfill(reply) {
            tracing::debug!(
                agent_id = %agent_id,
                command_id = %command_id,
                elapsed_ms,
                "Reply delivered"
            );
            RouteOutcome::Delivered
        } else {
            RouteOutcome::Unmatched
        }
    }
}

impl Default for AgentBroker {
    fn default() -> Self {
        Self::new(&BrokerConfig::default())
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

struct PendingGuard<'a> {
    broker: &'a AgentBroker,
    command_id: Uuid,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.broker.state.lock().pending.remove(&self.command_id);
    }
}
