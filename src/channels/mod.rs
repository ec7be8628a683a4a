//! Transports that carry commands to agents.

mod channel;

pub use channel::{AgentChannel, QueuedChannel};
