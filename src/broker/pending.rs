//! Correlation table of commands awaiting a reply.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::broker::Payload;

/// An outstanding command.
///
/// Dropping it without calling `fulfill` closes the completion slot, which the
/// waiting dispatcher observes as a disconnect.
pub(crate) struct PendingCommand {
    agent_id: String,
    connection_id: Uuid,
    created_at: Instant,
    slot: oneshot::Sender<Payload>,
}

impl PendingCommand {
    pub fn new(agent_id: &str, connection_id: Uuid, slot: oneshot::Sender<Payload>) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            connection_id,
            created_at: Instant::now(),
            slot,
        }
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Complete the command. Returns false if the caller stopped waiting.
    pub fn fulfill(self, reply: Payload) -> bool {
        self.slot.send(reply).is_ok()
    }
}

#[derive(Default)]
pub(crate) struct CorrelationTable {
    entries: HashMap<Uuid, PendingCommand>,
}

impl CorrelationTable {
    /// Allocate an identifier not currently in use.
    pub fn fresh_id(&self) -> Uuid {
        loop {
            let id = Uuid::new_v4();
            if !self.entries.contains_key(&id) {
                return id;
            }
        }
    }

    pub fn insert(&mut self, command_id: Uuid, command: PendingCommand) {
        self.entries.insert(command_id, command);
    }

    pub fn remove(&mut self, command_id: &Uuid) -> Option<PendingCommand> {
        self.entries.remove(command_id)
    }

    /// Remove the entry only if it was issued to `agent_id`.
    pub fn remove_owned(&mut self, command_id: &Uuid, agent_id: &str) -> Option<PendingCommand> {
        match self.entries.get(command_id) {
            Some(command) if command.agent_id == agent_id => self.entries.remove(command_id),
            _ => None,
        }
    }

    /// Remove every entry belonging to an agent.
    pub fn drain_agent(&mut self, agent_id: &str) -> Vec<PendingCommand> {
        self.drain_where(|command| command.agent_id == agent_id)
    }

    /// Remove every entry sent over one particular connection.
    pub fn drain_connection(&mut self, connection_id: Uuid) -> Vec<PendingCommand> {
        self.drain_where(|command| command.connection_id == connection_id)
    }

    fn drain_where<F>(&mut self, predicate: F) -> Vec<PendingCommand>
    where
        F: Fn(&PendingCommand) -> bool,
    {
        let ids: Vec<Uuid> = self
            .entries
            .iter()
            .filter(|(_, command)| predicate(command))
            .map(|(id, _)| *id)
            .collect();
        ids.iter()
            .filter_map(|id| self.entries.remove(id))
            .collect()
    }

    #[cfg(test)]
    pub fn contains(&self, command_id: &Uuid) -> bool {
        self.entries.contains_key(command_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn count_for(&self, agent_id: &str) -> usize {
        self.entries
            .values()
            .filter(|command| command.agent_id == agent_id)
            .count()
    }
}
