//! cimut: command broker for remote fault-injection agents.
//!
//! Agents hold a long-lived websocket to the gateway. Callers dispatch
//! commands to a specific agent through [`broker::AgentBroker`] and wait only
//! for their own correlated reply.

pub mod broker;
pub mod channels;
pub mod config;
pub mod error;
pub mod gateway;

pub use broker::{AgentBroker, AgentRecord, AgentStatus, Payload, RouteOutcome};
pub use config::Config;
pub use error::{DispatchError, TransportError};
