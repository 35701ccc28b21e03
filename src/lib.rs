//! Late-join placement and status reconciliation
//!
//! Host-side handling for participants entering a shared session that is
//! already running: wait for their avatar to replicate, restore a death
//! recorded on the current stage, otherwise warp them next to the lowest
//! living peer, and keep every participant's replicated liveness current.

pub mod config;
pub mod game;
pub mod host;
pub mod latejoin;
pub mod metrics;
pub mod net;
pub mod util;
