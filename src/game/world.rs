//! Entity directory and physics authority seen by the join protocol
//!
//! The host engine owns the avatars. This module only describes what the
//! protocol needs from it: a directory it can snapshot on demand, a way to
//! force liveness, and enough physics control to warp an avatar safely.

use crate::game::snapshot::ParticipantId;
use crate::util::vec3::Vec3;

/// Per-participant mutable data replicated onto an avatar after it spawns
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AvatarData {
    pub dead: bool,
    pub grounded_position: Option<Vec3>,
}

/// One directory entry, copied out of the host at the time of the call
#[derive(Debug, Clone, PartialEq)]
pub struct EntityView {
    pub owner: ParticipantId,
    /// For logging only
    pub display_name: String,
    pub world_position: Vec3,
    /// Absent until the avatar's data block has replicated
    pub data: Option<AvatarData>,
}

impl EntityView {
    pub fn is_initialized(&self) -> bool {
        self.data.is_some()
    }

    /// Liveness if observable
    pub fn is_alive(&self) -> Option<bool> {
        self.data.map(|d| !d.dead)
    }
}

/// Host world as used by the join protocol.
///
/// Mutators return `false` when the participant's avatar no longer exists, so
/// callers can detect departures at every step without failing.
pub trait World {
    /// Current directory contents, in the host's iteration order
    fn list_entities(&self) -> Vec<EntityView>;

    /// Look up the avatar owned by `id`
    fn entity(&self, id: ParticipantId) -> Option<EntityView> {
        self.list_entities().into_iter().find(|e| e.owner == id)
    }

    /// Force the avatar's liveness flag
    fn set_dead(&mut self, id: ParticipantId, dead: bool) -> bool;

    /// Give or take local physics authority (kinematic when not simulated)
    fn set_simulated(&mut self, id: ParticipantId, simulated: bool) -> bool;

    /// Zero linear and angular velocity
    fn zero_velocity(&mut self, id: ParticipantId) -> bool;

    /// Local-only position change
    fn set_position(&mut self, id: ParticipantId, position: Vec3) -> bool;

    /// Enable or disable collision between two avatars
    fn set_collision(&mut self, a: ParticipantId, b: ParticipantId, enabled: bool) -> bool;

    /// Cast straight down from `origin`; returns the first ground hit within `max_distance`
    fn probe_ground(&self, origin: Vec3, max_distance: f32) -> Option<Vec3>;
}
