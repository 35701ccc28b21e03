//! Late-join handling
//!
//! Places participants who join a session already in progress and keeps each
//! participant's replicated liveness record current. Everything here runs on
//! the host's tick: each component advances once per tick and suspends by
//! returning.

use std::time::Duration;

use crate::game::world::World;
use crate::net::protocol::CommandChannel;
use crate::net::status_store::StatusStore;

pub mod join;
pub mod manager;
pub mod placement;
pub mod status_sync;

/// Collaborators available during one host tick
pub struct TickContext<'a> {
    pub world: &'a mut dyn World,
    pub store: &'a mut dyn StatusStore,
    pub commands: &'a mut dyn CommandChannel,
    /// Current stage identifier, opaque
    pub stage: &'a str,
    /// Time since the previous tick
    pub dt: Duration,
}
