//! Per-tick peer views used for placement
//!
//! Snapshots are built fresh for every selection and never mutated, so a
//! multi-tick operation never reads a half-updated peer.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::world::EntityView;
use crate::util::vec3::Vec3;

/// Stable identifier for a session member (survives reconnects within a session)
pub type ParticipantId = Uuid;

/// Immutable view of one peer at the moment placement is computed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerSnapshot {
    pub id: ParticipantId,
    pub alive: bool,
    /// Last point the peer stood on, if it has touched ground
    pub grounded_position: Option<Vec3>,
    pub free_position: Vec3,
}

impl PeerSnapshot {
    pub fn new(
        id: ParticipantId,
        alive: bool,
        grounded_position: Option<Vec3>,
        free_position: Vec3,
    ) -> Self {
        Self {
            id,
            alive,
            grounded_position,
            free_position,
        }
    }

    /// Build a snapshot from a directory entry.
    ///
    /// Entities whose per-participant data block has not replicated yet have
    /// no observable liveness and produce no snapshot.
    pub fn from_view(view: &EntityView) -> Option<Self> {
        let data = view.data.as_ref()?;
        Some(Self {
            id: view.owner,
            alive: !data.dead,
            grounded_position: data.grounded_position,
            free_position: view.world_position,
        })
    }

    /// Vertical coordinate used for ordering: ground height when known
    pub fn effective_y(&self) -> f32 {
        self.grounded_position
            .map(|p| p.y)
            .unwrap_or(self.free_position.y)
    }
}

/// Result of reducing a snapshot set to one peer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacementTarget {
    pub chosen_peer: ParticipantId,
    pub effective_y: f32,
}
