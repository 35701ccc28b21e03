//! Simulated session host
//!
//! Wires the late-join protocol to an in-memory world, property table and
//! loopback command channel. Commands sent during a tick are applied to the
//! world at the end of that tick, the way peers would receive them.

use std::sync::Arc;
use std::time::Duration;

use crate::config::LateJoinConfig;
use crate::game::snapshot::ParticipantId;
use crate::game::state::WorldState;
use crate::latejoin::manager::{JoinReport, LateJoinManager};
use crate::latejoin::TickContext;
use crate::metrics::Metrics;
use crate::net::protocol::LoopbackChannel;
use crate::net::session::MembershipEvent;
use crate::net::status_store::RoomPropertiesStore;

pub struct SessionHost {
    pub world: WorldState,
    pub store: RoomPropertiesStore,
    pub channel: LoopbackChannel,
    stage: String,
    manager: LateJoinManager,
}

impl SessionHost {
    pub fn new(config: LateJoinConfig, metrics: Arc<Metrics>, stage: &str) -> Self {
        Self {
            world: WorldState::new(),
            store: RoomPropertiesStore::new(),
            channel: LoopbackChannel::new(),
            stage: stage.to_string(),
            manager: LateJoinManager::new(config, metrics),
        }
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Move the session to another stage; later writes carry the new tag
    pub fn set_stage(&mut self, stage: &str) {
        tracing::info!("Stage changed: {} -> {}", self.stage, stage);
        self.stage = stage.to_string();
    }

    pub fn manager(&self) -> &LateJoinManager {
        &self.manager
    }

    pub fn handle_event(&mut self, event: MembershipEvent) {
        let mut ctx = TickContext {
            world: &mut self.world,
            store: &mut self.store,
            commands: &mut self.channel,
            stage: &self.stage,
            dt: Duration::ZERO,
        };
        self.manager.handle_event(event, &mut ctx);
    }

    pub fn join(&mut self, id: ParticipantId) {
        self.handle_event(MembershipEvent::Joined(id));
    }

    /// Report a departure, then remove the avatar
    pub fn leave(&mut self, id: ParticipantId) {
        self.handle_event(MembershipEvent::Left(id));
        self.world.remove_avatar(id);
    }

    /// One host tick: physics, protocol, then command delivery
    pub fn tick(&mut self, dt: Duration) -> Vec<JoinReport> {
        self.world.step(dt.as_secs_f32());

        let reports = {
            let mut ctx = TickContext {
                world: &mut self.world,
                store: &mut self.store,
                commands: &mut self.channel,
                stage: &self.stage,
                dt,
            };
            self.manager.tick(&mut ctx)
        };

        for command in self.channel.drain() {
            self.world.apply_command(&command);
        }

        reports
    }
}
