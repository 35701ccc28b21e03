//! Warping a late joiner next to its placement target
//!
//! The joiner is made kinematic first, then moved with a single replicated
//! command so every peer sees the same arrival point. A local correction
//! follows once replication has had time to land, and physics authority is
//! handed back last. Authority is restored on every exit path.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use smallvec::SmallVec;
use std::f32::consts::TAU;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::LateJoinConfig;
use crate::game::snapshot::{ParticipantId, PeerSnapshot, PlacementTarget};
use crate::game::world::World;
use crate::latejoin::TickContext;
use crate::net::protocol::{encode, SendError, WarpPayload, WARP_COMMAND};
use crate::util::timer::WaitTimer;
use crate::util::vec3::Vec3;

/// Number of lateral directions probed around the target
pub const LATERAL_DIRECTIONS: usize = 8;

/// Placement parameters taken from [`LateJoinConfig`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacementSettings {
    pub replication_grace: Duration,
    pub restore_grace: Duration,
    pub lateral_offset: f32,
    pub ground_tolerance: f32,
    pub probe_height: f32,
    pub probe_distance: f32,
    pub fallback_height: f32,
    pub arrival_clearance: f32,
    pub suppress_collision: bool,
}

impl PlacementSettings {
    pub fn from_config(config: &LateJoinConfig) -> Self {
        Self {
            replication_grace: config.replication_grace,
            restore_grace: config.restore_grace,
            lateral_offset: config.lateral_offset,
            ground_tolerance: config.ground_tolerance,
            probe_height: config.probe_height,
            probe_distance: config.probe_distance,
            fallback_height: config.fallback_height,
            arrival_clearance: config.arrival_clearance,
            suppress_collision: config.suppress_collision,
        }
    }
}

impl Default for PlacementSettings {
    fn default() -> Self {
        Self::from_config(&LateJoinConfig::default())
    }
}

/// Why a placement stopped early
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlacementError {
    #[error("Joining avatar disappeared")]
    JoinerLost,
    #[error("Placement target disappeared")]
    TargetLost,
    #[error("Warp command failed: {0}")]
    Send(#[from] SendError),
}

/// Pick the arrival point next to `target`.
///
/// Lateral points around the target whose ground lies within tolerance of the
/// target's own ground are valid; one is chosen uniformly at random so
/// successive joiners do not stack. With no valid lateral point the joiner
/// arrives straight above the target.
pub fn arrival_point<R: Rng + ?Sized>(
    target: &PeerSnapshot,
    world: &dyn World,
    settings: &PlacementSettings,
    rng: &mut R,
) -> Vec3 {
    let base = target.grounded_position.unwrap_or(target.free_position);
    let ground_y = target.effective_y();

    let mut candidates: SmallVec<[Vec3; LATERAL_DIRECTIONS]> = SmallVec::new();
    for i in 0..LATERAL_DIRECTIONS {
        let yaw = i as f32 * TAU / LATERAL_DIRECTIONS as f32;
        let origin = (base + Vec3::from_yaw(yaw) * settings.lateral_offset)
            .with_y(ground_y + settings.probe_height);

        if let Some(hit) = world.probe_ground(origin, settings.probe_distance) {
            if (hit.y - ground_y).abs() <= settings.ground_tolerance {
                candidates.push(hit + Vec3::UP * settings.arrival_clearance);
            }
        }
    }

    match candidates.choose(rng) {
        Some(point) => *point,
        None => target.free_position + Vec3::UP * settings.fallback_height,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    /// Take physics authority away from the joiner
    Freeze,
    /// Compute the arrival point and send the replicated warp
    Warp,
    /// Wait for the warp to reach every peer, then correct locally
    Replicating { timer: WaitTimer, arrival: Vec3 },
    /// Let the correction settle before handing authority back
    Settling { timer: WaitTimer, arrival: Vec3 },
    Done,
}

/// One placement of one joiner, advanced once per host tick
#[derive(Debug)]
pub struct PlacementTask {
    joiner: ParticipantId,
    target: PlacementTarget,
    settings: PlacementSettings,
    phase: Phase,
    suspended: bool,
    collision_suppressed: bool,
    command_sent: bool,
    outcome: Option<Result<Vec3, PlacementError>>,
    rng: StdRng,
}

impl PlacementTask {
    pub fn new(joiner: ParticipantId, target: PlacementTarget, settings: PlacementSettings) -> Self {
        Self::with_rng(joiner, target, settings, StdRng::from_entropy())
    }

    /// Same as [`PlacementTask::new`] with a caller-provided RNG
    pub fn with_rng(
        joiner: ParticipantId,
        target: PlacementTarget,
        settings: PlacementSettings,
        rng: StdRng,
    ) -> Self {
        Self {
            joiner,
            target,
            settings,
            phase: Phase::Freeze,
            suspended: false,
            collision_suppressed: false,
            command_sent: false,
            outcome: None,
            rng,
        }
    }

    pub fn target(&self) -> PlacementTarget {
        self.target
    }

    /// Whether the replicated warp went out
    pub fn command_sent(&self) -> bool {
        self.command_sent
    }

    /// Whether the joiner is currently kinematic because of this task
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Advance by one tick. Returns the arrival point or the reason for
    /// stopping once the placement is over.
    pub fn tick(&mut self, ctx: &mut TickContext<'_>) -> Option<Result<Vec3, PlacementError>> {
        let mut dt = ctx.dt;

        loop {
            match self.phase {
                Phase::Freeze => {
                    if !ctx.world.set_simulated(self.joiner, false) {
                        return Some(self.finish(ctx, Err(PlacementError::JoinerLost)));
                    }
                    self.suspended = true;
                    ctx.world.zero_velocity(self.joiner);
                    debug!("Froze physics for {}", self.joiner);

                    // Kinematic flag takes effect on the next physics step
                    self.phase = Phase::Warp;
                    return None;
                }
                Phase::Warp => match self.warp(ctx) {
                    Ok(arrival) => {
                        self.phase = Phase::Replicating {
                            timer: WaitTimer::new(self.settings.replication_grace),
                            arrival,
                        };
                    }
                    Err(e) => return Some(self.finish(ctx, Err(e))),
                },
                Phase::Replicating { mut timer, arrival } => {
                    if !timer.advance(dt) {
                        self.phase = Phase::Replicating { timer, arrival };
                        return None;
                    }

                    // Late physics steps may have nudged the avatar before the warp landed
                    if !ctx.world.set_position(self.joiner, arrival) {
                        return Some(self.finish(ctx, Err(PlacementError::JoinerLost)));
                    }
                    ctx.world.zero_velocity(self.joiner);

                    self.phase = Phase::Settling {
                        timer: WaitTimer::new(self.settings.restore_grace),
                        arrival,
                    };
                }
                Phase::Settling { mut timer, arrival } => {
                    if !timer.advance(dt) {
                        self.phase = Phase::Settling { timer, arrival };
                        return None;
                    }
                    return Some(self.finish(ctx, Ok(arrival)));
                }
                Phase::Done => return self.outcome.clone(),
            }

            // A phase entered this tick starts its wait from zero
            dt = Duration::ZERO;
        }
    }

    fn warp(&mut self, ctx: &mut TickContext<'_>) -> Result<Vec3, PlacementError> {
        let target = ctx
            .world
            .entity(self.target.chosen_peer)
            .as_ref()
            .and_then(PeerSnapshot::from_view)
            .ok_or(PlacementError::TargetLost)?;

        if ctx.world.entity(self.joiner).is_none() {
            return Err(PlacementError::JoinerLost);
        }

        if self.settings.suppress_collision
            && ctx.world.set_collision(self.joiner, target.id, false)
        {
            self.collision_suppressed = true;
        }

        let arrival = arrival_point(&target, &*ctx.world, &self.settings, &mut self.rng);
        let payload = encode(&WarpPayload {
            position: arrival,
            ground: false,
        })
        .map_err(SendError::from)?;

        ctx.commands.send_to_all(self.joiner, WARP_COMMAND, payload)?;
        self.command_sent = true;

        info!(
            "Warping {} to {} at ({:.2}, {:.2}, {:.2})",
            self.joiner, target.id, arrival.x, arrival.y, arrival.z
        );
        Ok(arrival)
    }

    /// Hand authority back and record the outcome
    fn finish(
        &mut self,
        ctx: &mut TickContext<'_>,
        outcome: Result<Vec3, PlacementError>,
    ) -> Result<Vec3, PlacementError> {
        if self.suspended {
            // A departed joiner has nothing left to restore
            ctx.world.set_simulated(self.joiner, true);
            self.suspended = false;
        }

        if self.collision_suppressed {
            ctx.world
                .set_collision(self.joiner, self.target.chosen_peer, true);
            self.collision_suppressed = false;
        }

        if let Err(e) = &outcome {
            warn!("Placement of {} stopped: {}", self.joiner, e);
        }

        self.phase = Phase::Done;
        self.outcome = Some(outcome.clone());
        outcome
    }
}
