//! In-memory world
//!
//! A small stand-in for the host engine: avatars with kinematic flags and
//! velocities, plus flat platforms for ground probes. The demo host and the
//! protocol tests run against it.

use hashbrown::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::game::snapshot::ParticipantId;
use crate::game::world::{AvatarData, EntityView, World};
use crate::net::protocol::{decode, SentCommand, WarpPayload, WARP_COMMAND};
use crate::util::vec3::Vec3;

/// Avatar state owned by the host
#[derive(Debug, Clone)]
pub struct Avatar {
    pub position: Vec3,
    pub velocity: Vec3,
    pub angular_velocity: Vec3,
    /// False while kinematic (physics does not move it)
    pub simulated: bool,
    /// Replicated data block, absent right after spawn
    pub data: Option<AvatarData>,
    pub owner: ParticipantId,
    pub name: String,
}

impl Avatar {
    pub fn new(owner: ParticipantId, name: String, position: Vec3) -> Self {
        Self {
            position,
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            simulated: true,
            data: None,
            owner,
            name,
        }
    }

    fn view(&self) -> EntityView {
        EntityView {
            owner: self.owner,
            display_name: self.name.clone(),
            world_position: self.position,
            data: self.data,
        }
    }
}

/// Axis-aligned flat walkable surface
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Platform {
    /// Center of the top surface
    pub top: Vec3,
    pub half_x: f32,
    pub half_z: f32,
}

impl Platform {
    pub fn new(top: Vec3, half_x: f32, half_z: f32) -> Self {
        Self { top, half_x, half_z }
    }

    pub fn contains_xz(&self, point: Vec3) -> bool {
        (point.x - self.top.x).abs() <= self.half_x && (point.z - self.top.z).abs() <= self.half_z
    }
}

/// Host world state
#[derive(Debug, Default)]
pub struct WorldState {
    avatars: HashMap<ParticipantId, Avatar>,
    /// Spawn order, used as the directory's iteration order
    order: Vec<ParticipantId>,
    platforms: Vec<Platform>,
    ignored_collisions: HashSet<(ParticipantId, ParticipantId)>,
    pub tick: u64,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_platform(&mut self, platform: Platform) {
        self.platforms.push(platform);
    }

    /// Spawn an avatar with no data block yet
    pub fn spawn_avatar(&mut self, owner: ParticipantId, name: &str, position: Vec3) {
        if self.avatars.insert(owner, Avatar::new(owner, name.to_string(), position)).is_none() {
            self.order.push(owner);
        }
    }

    /// Replicate the avatar's data block
    pub fn initialize_avatar(&mut self, owner: ParticipantId, dead: bool) -> bool {
        match self.avatars.get_mut(&owner) {
            Some(avatar) => {
                avatar.data = Some(AvatarData {
                    dead,
                    grounded_position: None,
                });
                true
            }
            None => false,
        }
    }

    /// Spawn and initialize in one go, grounded at `position`
    pub fn spawn_grounded(&mut self, owner: ParticipantId, name: &str, position: Vec3, dead: bool) {
        self.spawn_avatar(owner, name, position);
        if let Some(avatar) = self.avatars.get_mut(&owner) {
            avatar.data = Some(AvatarData {
                dead,
                grounded_position: Some(position),
            });
        }
    }

    pub fn remove_avatar(&mut self, owner: ParticipantId) -> Option<Avatar> {
        self.order.retain(|id| *id != owner);
        self.ignored_collisions.retain(|(a, b)| *a != owner && *b != owner);
        self.avatars.remove(&owner)
    }

    pub fn avatar(&self, owner: ParticipantId) -> Option<&Avatar> {
        self.avatars.get(&owner)
    }

    pub fn avatar_mut(&mut self, owner: ParticipantId) -> Option<&mut Avatar> {
        self.avatars.get_mut(&owner)
    }

    pub fn collisions_enabled(&self, a: ParticipantId, b: ParticipantId) -> bool {
        !self.ignored_collisions.contains(&Self::pair(a, b))
    }

    fn pair(a: ParticipantId, b: ParticipantId) -> (ParticipantId, ParticipantId) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    /// Integrate simulated avatars and refresh ground contact
    pub fn step(&mut self, dt: f32) {
        self.tick += 1;

        let platforms = &self.platforms;
        for avatar in self.avatars.values_mut() {
            if !avatar.simulated {
                continue;
            }

            avatar.position += avatar.velocity * dt;

            let ground = platforms
                .iter()
                .filter(|p| p.contains_xz(avatar.position))
                .filter(|p| (avatar.position.y - p.top.y).abs() < 0.05)
                .map(|p| avatar.position.with_y(p.top.y))
                .next();

            if let (Some(data), Some(ground)) = (avatar.data.as_mut(), ground) {
                data.grounded_position = Some(ground);
            }
        }
    }

    /// Apply a replicated command as every peer would on receipt
    pub fn apply_command(&mut self, command: &SentCommand) {
        if command.name != WARP_COMMAND {
            debug!("Ignoring unknown command {} for {}", command.name, command.entity);
            return;
        }

        let payload: WarpPayload = match decode(&command.payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Dropping malformed warp for {}: {}", command.entity, e);
                return;
            }
        };

        if !payload.position.is_finite() {
            warn!("Dropping non-finite warp for {}", command.entity);
            return;
        }

        if let Some(avatar) = self.avatars.get_mut(&command.entity) {
            avatar.position = payload.position;
            if payload.ground {
                if let Some(data) = avatar.data.as_mut() {
                    data.grounded_position = Some(payload.position);
                }
            }
        }
    }
}

impl World for WorldState {
    fn list_entities(&self) -> Vec<EntityView> {
        self.order
            .iter()
            .filter_map(|id| self.avatars.get(id))
            .map(Avatar::view)
            .collect()
    }

    fn entity(&self, id: ParticipantId) -> Option<EntityView> {
        self.avatars.get(&id).map(Avatar::view)
    }

    fn set_dead(&mut self, id: ParticipantId, dead: bool) -> bool {
        match self.avatars.get_mut(&id).and_then(|a| a.data.as_mut()) {
            Some(data) => {
                data.dead = dead;
                true
            }
            None => false,
        }
    }

    fn set_simulated(&mut self, id: ParticipantId, simulated: bool) -> bool {
        match self.avatars.get_mut(&id) {
            Some(avatar) => {
                avatar.simulated = simulated;
                true
            }
            None => false,
        }
    }

    fn zero_velocity(&mut self, id: ParticipantId) -> bool {
        match self.avatars.get_mut(&id) {
            Some(avatar) => {
                avatar.velocity = Vec3::ZERO;
                avatar.angular_velocity = Vec3::ZERO;
                true
            }
            None => false,
        }
    }

    fn set_position(&mut self, id: ParticipantId, position: Vec3) -> bool {
        match self.avatars.get_mut(&id) {
            Some(avatar) => {
                avatar.position = position;
                true
            }
            None => false,
        }
    }

    fn set_collision(&mut self, a: ParticipantId, b: ParticipantId, enabled: bool) -> bool {
        if !self.avatars.contains_key(&a) || !self.avatars.contains_key(&b) {
            return false;
        }

        let pair = Self::pair(a, b);
        if enabled {
            self.ignored_collisions.remove(&pair);
        } else {
            self.ignored_collisions.insert(pair);
        }
        true
    }

    fn probe_ground(&self, origin: Vec3, max_distance: f32) -> Option<Vec3> {
        // Highest surface below the origin within range
        self.platforms
            .iter()
            .filter(|p| p.contains_xz(origin))
            .filter(|p| p.top.y <= origin.y && origin.y - p.top.y <= max_distance)
            .map(|p| p.top.y)
            .fold(None, |best: Option<f32>, y| match best {
                Some(b) if b >= y => Some(b),
                _ => Some(y),
            })
            .map(|y| origin.with_y(y))
    }
}
