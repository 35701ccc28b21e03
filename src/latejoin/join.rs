//! Per-join reconciliation
//!
//! One [`JoinReconciler`] runs for each participant entering a session in
//! progress. It waits for the avatar and its data block to replicate, lets
//! the host's own join sync settle, restores a death recorded on the current
//! stage, and otherwise places the joiner next to the lowest living peer.

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::LateJoinConfig;
use crate::game::selector::{select, sort_for_selection};
use crate::game::snapshot::{ParticipantId, PeerSnapshot};
use crate::latejoin::placement::{PlacementError, PlacementSettings, PlacementTask};
use crate::latejoin::TickContext;
use crate::net::status_store::{StatusRecord, StoreError};
use crate::util::timer::WaitTimer;
use crate::util::vec3::Vec3;

/// Timing and placement parameters for one reconciliation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JoinSettings {
    pub entity_timeout: Duration,
    pub data_timeout: Duration,
    pub settle_delay: Duration,
    pub selection_delay: Duration,
    pub placement: PlacementSettings,
}

impl JoinSettings {
    pub fn from_config(config: &LateJoinConfig) -> Self {
        Self {
            entity_timeout: config.entity_timeout,
            data_timeout: config.data_timeout,
            settle_delay: config.settle_delay,
            selection_delay: config.selection_delay,
            placement: PlacementSettings::from_config(config),
        }
    }
}

impl Default for JoinSettings {
    fn default() -> Self {
        Self::from_config(&LateJoinConfig::default())
    }
}

/// Why a reconciliation ended without placing the joiner
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AbortReason {
    #[error("Avatar never appeared")]
    EntityTimeout,
    #[error("Avatar data never replicated")]
    DataTimeout,
    #[error("No living peer to place next to")]
    NoTarget,
    #[error("Participant left mid-join")]
    EntityLost,
    #[error("Placement failed: {0}")]
    Placement(#[from] PlacementError),
}

/// Terminal result of one reconciliation
#[derive(Debug, Clone, PartialEq)]
pub enum JoinOutcome {
    /// Died earlier on this stage; kept dead and not placed
    RestoredDead,
    /// Warped next to `target`
    Placed {
        target: ParticipantId,
        arrival: Vec3,
        /// Final liveness written to the status store
        dead: bool,
        /// Write error, if the status write failed (non-fatal)
        write_error: Option<StoreError>,
    },
    Aborted(AbortReason),
}

/// Observable state of a reconciler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinPhase {
    AwaitingEntity,
    AwaitingInitialization,
    SettlingNetwork,
    ReconcilingStatus,
    SelectingPlacement,
    AwaitingPlacement,
    Finished,
}

#[derive(Debug)]
enum State {
    AwaitingEntity(WaitTimer),
    AwaitingInitialization(WaitTimer),
    SettlingNetwork(WaitTimer),
    ReconcilingStatus,
    SelectingPlacement {
        timer: WaitTimer,
        prior: Option<StatusRecord>,
    },
    AwaitingPlacement {
        task: Box<PlacementTask>,
        prior: Option<StatusRecord>,
    },
    Finished(JoinOutcome),
}

enum Step {
    /// Suspend until the next tick
    Yield(State),
    /// Transition and keep going this tick
    Next(State),
}

/// Join state machine for one participant
#[derive(Debug)]
pub struct JoinReconciler {
    participant: ParticipantId,
    display_name: Option<String>,
    settings: JoinSettings,
    state: State,
    warp_sent: bool,
    status_read: bool,
}

impl JoinReconciler {
    pub fn new(participant: ParticipantId, settings: JoinSettings) -> Self {
        Self {
            participant,
            display_name: None,
            settings,
            state: State::AwaitingEntity(WaitTimer::new(settings.entity_timeout)),
            warp_sent: false,
            status_read: false,
        }
    }

    pub fn participant(&self) -> ParticipantId {
        self.participant
    }

    pub fn phase(&self) -> JoinPhase {
        match &self.state {
            State::AwaitingEntity(_) => JoinPhase::AwaitingEntity,
            State::AwaitingInitialization(_) => JoinPhase::AwaitingInitialization,
            State::SettlingNetwork(_) => JoinPhase::SettlingNetwork,
            State::ReconcilingStatus => JoinPhase::ReconcilingStatus,
            State::SelectingPlacement { .. } => JoinPhase::SelectingPlacement,
            State::AwaitingPlacement { .. } => JoinPhase::AwaitingPlacement,
            State::Finished(_) => JoinPhase::Finished,
        }
    }

    pub fn outcome(&self) -> Option<&JoinOutcome> {
        match &self.state {
            State::Finished(outcome) => Some(outcome),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, State::Finished(_))
    }

    /// Whether the replicated warp for this join went out
    pub fn warp_sent(&self) -> bool {
        self.warp_sent
    }

    /// Whether the stored status record has been consulted. Until then the
    /// avatar's liveness says nothing about a recorded death.
    pub fn status_read(&self) -> bool {
        self.status_read
    }

    /// Advance by one tick; returns the outcome once finished
    pub fn tick(&mut self, ctx: &mut TickContext<'_>) -> Option<JoinOutcome> {
        let mut dt = ctx.dt;

        loop {
            if let State::Finished(outcome) = &self.state {
                return Some(outcome.clone());
            }

            let state = std::mem::replace(&mut self.state, State::ReconcilingStatus);
            match self.step(state, ctx, dt) {
                Step::Yield(state) => {
                    self.state = state;
                    return None;
                }
                Step::Next(state) => {
                    self.state = state;
                    // A state entered this tick starts its wait from zero
                    dt = Duration::ZERO;
                }
            }
        }
    }

    fn step(&mut self, state: State, ctx: &mut TickContext<'_>, dt: Duration) -> Step {
        let id = self.participant;

        match state {
            State::AwaitingEntity(mut timer) => match ctx.world.entity(id) {
                Some(view) => {
                    info!("Avatar for {} ({}) is present", view.display_name, id);
                    self.display_name = Some(view.display_name);
                    Step::Next(State::AwaitingInitialization(WaitTimer::new(
                        self.settings.data_timeout,
                    )))
                }
                None if timer.advance(dt) => {
                    warn!(
                        "Gave up on {} after {:?}: avatar never appeared",
                        id,
                        timer.elapsed()
                    );
                    Step::Next(State::Finished(JoinOutcome::Aborted(AbortReason::EntityTimeout)))
                }
                None => Step::Yield(State::AwaitingEntity(timer)),
            },

            State::AwaitingInitialization(mut timer) => match ctx.world.entity(id) {
                None => self.lost("waiting for avatar data"),
                Some(view) if view.is_initialized() => {
                    debug!("Avatar data for {} replicated", self.label());
                    Step::Next(State::SettlingNetwork(WaitTimer::new(self.settings.settle_delay)))
                }
                Some(_) if timer.advance(dt) => {
                    warn!(
                        "Gave up on {} after {:?}: avatar data never replicated",
                        self.label(),
                        timer.elapsed()
                    );
                    Step::Next(State::Finished(JoinOutcome::Aborted(AbortReason::DataTimeout)))
                }
                Some(_) => Step::Yield(State::AwaitingInitialization(timer)),
            },

            State::SettlingNetwork(mut timer) => {
                if !timer.advance(dt) {
                    return Step::Yield(State::SettlingNetwork(timer));
                }
                if ctx.world.entity(id).is_none() {
                    return self.lost("settling");
                }
                Step::Next(State::ReconcilingStatus)
            }

            State::ReconcilingStatus => {
                // Absent record: unknown, assume alive with no stage affinity
                let prior = ctx.store.get(id);
                self.status_read = true;

                if let Some(record) = prior.as_ref().filter(|r| r.is_dead_in(ctx.stage)) {
                    if !ctx.world.set_dead(id, true) {
                        return self.lost("restoring death");
                    }
                    info!(
                        "{} died earlier on stage {}, keeping them dead",
                        self.label(),
                        record.stage_tag
                    );
                    return Step::Next(State::Finished(JoinOutcome::RestoredDead));
                }

                debug!("Prior status for {}: {:?}", self.label(), prior);
                Step::Next(State::SelectingPlacement {
                    timer: WaitTimer::new(self.settings.selection_delay),
                    prior,
                })
            }

            State::SelectingPlacement { mut timer, prior } => {
                if !timer.advance(dt) {
                    return Step::Yield(State::SelectingPlacement { timer, prior });
                }
                if ctx.world.entity(id).is_none() {
                    return self.lost("selecting a target");
                }

                let mut snapshots: Vec<PeerSnapshot> = ctx
                    .world
                    .list_entities()
                    .iter()
                    .filter_map(PeerSnapshot::from_view)
                    .collect();
                sort_for_selection(&mut snapshots);

                match select(&snapshots, id) {
                    Some(target) => {
                        info!(
                            "Placing {} next to {} (y = {:.2})",
                            self.label(),
                            target.chosen_peer,
                            target.effective_y
                        );
                        let task = PlacementTask::new(id, target, self.settings.placement);
                        Step::Next(State::AwaitingPlacement {
                            task: Box::new(task),
                            prior,
                        })
                    }
                    None => {
                        warn!(
                            "No valid placement target for {}, leaving them at the entry point",
                            self.label()
                        );
                        Step::Next(State::Finished(JoinOutcome::Aborted(AbortReason::NoTarget)))
                    }
                }
            }

            State::AwaitingPlacement { mut task, prior } => {
                let result = task.tick(ctx);
                self.warp_sent |= task.command_sent();

                match result {
                    None => Step::Yield(State::AwaitingPlacement { task, prior }),
                    Some(Err(e)) => {
                        Step::Next(State::Finished(JoinOutcome::Aborted(AbortReason::Placement(e))))
                    }
                    Some(Ok(arrival)) => {
                        Step::Next(self.complete(ctx, task.target().chosen_peer, arrival, prior))
                    }
                }
            }

            State::Finished(outcome) => Step::Yield(State::Finished(outcome)),
        }
    }

    /// Post-placement liveness fix-up and status write
    fn complete(
        &self,
        ctx: &mut TickContext<'_>,
        target: ParticipantId,
        arrival: Vec3,
        prior: Option<StatusRecord>,
    ) -> State {
        let id = self.participant;

        // A death recorded on another stage does not carry forward
        if let Some(record) = prior.as_ref().filter(|r| r.dead && r.stage_tag != ctx.stage) {
            if ctx.world.set_dead(id, false) {
                info!(
                    "Reviving {}: recorded death was on stage {}, now {}",
                    self.label(),
                    record.stage_tag,
                    ctx.stage
                );
            }
        }

        let dead = match ctx.world.entity(id).and_then(|v| v.is_alive()) {
            Some(alive) => !alive,
            None => {
                warn!("{} left right after placement, status not written", self.label());
                return State::Finished(JoinOutcome::Aborted(AbortReason::EntityLost));
            }
        };

        let record = StatusRecord::new(id, dead, ctx.stage);
        let write_error = match ctx.store.set(&record) {
            Ok(ack) => {
                debug!("Wrote status for {} at revision {}", self.label(), ack.revision);
                None
            }
            Err(e) => {
                warn!("Failed to persist status for {}: {}", self.label(), e);
                Some(e)
            }
        };

        State::Finished(JoinOutcome::Placed {
            target,
            arrival,
            dead,
            write_error,
        })
    }

    fn lost(&self, during: &str) -> Step {
        warn!("{} left while {}", self.label(), during);
        Step::Next(State::Finished(JoinOutcome::Aborted(AbortReason::EntityLost)))
    }

    fn label(&self) -> String {
        match &self.display_name {
            Some(name) => format!("{} ({})", name, self.participant),
            None => self.participant.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{Platform, WorldState};
    use crate::game::world::World;
    use crate::net::protocol::LoopbackChannel;
    use crate::net::status_store::{RoomPropertiesStore, StatusStore};
    use tokio_test::assert_ok;
    use uuid::Uuid;

    const DT: Duration = Duration::from_millis(100);

    struct Session {
        world: WorldState,
        store: RoomPropertiesStore,
        channel: LoopbackChannel,
        stage: String,
    }

    impl Session {
        fn new(stage: &str) -> Self {
            let mut world = WorldState::new();
            world.add_platform(Platform::new(Vec3::new(0.0, 0.0, 0.0), 100.0, 100.0));
            world.add_platform(Platform::new(Vec3::new(20.0, 4.0, 0.0), 5.0, 5.0));
            world.add_platform(Platform::new(Vec3::new(-20.0, 10.0, 0.0), 5.0, 5.0));
            Self {
                world,
                store: RoomPropertiesStore::new(),
                channel: LoopbackChannel::new(),
                stage: stage.to_string(),
            }
        }

        fn tick(&mut self, reconciler: &mut JoinReconciler) -> Option<JoinOutcome> {
            let mut ctx = TickContext {
                world: &mut self.world,
                store: &mut self.store,
                commands: &mut self.channel,
                stage: &self.stage,
                dt: DT,
            };
            reconciler.tick(&mut ctx)
        }

        fn run(&mut self, reconciler: &mut JoinReconciler, max_ticks: usize) -> Option<JoinOutcome> {
            for _ in 0..max_ticks {
                if let Some(outcome) = self.tick(reconciler) {
                    return Some(outcome);
                }
            }
            None
        }
    }

    /// A at y=10, B at y=4, C dead at y=0
    fn populate(session: &mut Session) -> (ParticipantId, ParticipantId, ParticipantId) {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        session.world.spawn_grounded(a, "A", Vec3::new(-20.0, 10.0, 0.0), false);
        session.world.spawn_grounded(b, "B", Vec3::new(20.0, 4.0, 0.0), false);
        session.world.spawn_grounded(c, "C", Vec3::new(0.0, 0.0, 0.0), true);
        (a, b, c)
    }

    fn spawn_joiner(session: &mut Session) -> ParticipantId {
        let d = Uuid::new_v4();
        session.world.spawn_grounded(d, "D", Vec3::new(0.0, 0.0, 50.0), false);
        d
    }

    #[test]
    fn test_places_next_to_lowest_living_peer() {
        let mut session = Session::new("Stage1");
        let (_, b, _) = populate(&mut session);
        let d = spawn_joiner(&mut session);

        let mut reconciler = JoinReconciler::new(d, JoinSettings::default());
        let outcome = session.run(&mut reconciler, 200).unwrap();

        match outcome {
            JoinOutcome::Placed {
                target,
                arrival,
                dead,
                write_error,
            } => {
                assert_eq!(target, b);
                assert!(!dead);
                assert!(write_error.is_none());
                assert!(arrival.horizontal_distance_to(Vec3::new(20.0, 4.0, 0.0)) < 2.0);
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        assert_eq!(session.store.get(d), Some(StatusRecord::new(d, false, "Stage1")));
        assert_eq!(session.channel.sent_total(), 1);
        assert!(reconciler.warp_sent());
        assert!(session.world.avatar(d).unwrap().simulated);
    }

    #[test]
    fn test_dead_on_same_stage_stays_dead() {
        let mut session = Session::new("Stage3");
        populate(&mut session);
        let p = spawn_joiner(&mut session);
        assert_ok!(session.store.set(&StatusRecord::new(p, true, "Stage3")));
        let revision = session.store.revision();

        let mut reconciler = JoinReconciler::new(p, JoinSettings::default());
        let outcome = session.run(&mut reconciler, 200).unwrap();

        assert_eq!(outcome, JoinOutcome::RestoredDead);
        assert_eq!(session.world.entity(p).unwrap().is_alive(), Some(false));
        assert!(reconciler.status_read());
        assert_eq!(session.channel.sent_total(), 0);
        assert!(!reconciler.warp_sent());
        // Nothing further written
        assert_eq!(session.store.revision(), revision);
    }

    #[test]
    fn test_dead_on_previous_stage_is_revived() {
        let mut session = Session::new("Stage4");
        populate(&mut session);
        let p = spawn_joiner(&mut session);
        session.world.set_dead(p, true);
        assert_ok!(session.store.set(&StatusRecord::new(p, true, "Stage3")));

        let mut reconciler = JoinReconciler::new(p, JoinSettings::default());
        let outcome = session.run(&mut reconciler, 200).unwrap();

        assert!(matches!(outcome, JoinOutcome::Placed { dead: false, .. }));
        assert_eq!(session.world.entity(p).unwrap().is_alive(), Some(true));
        assert_eq!(session.store.get(p), Some(StatusRecord::new(p, false, "Stage4")));
        assert_eq!(session.channel.sent_total(), 1);
    }

    #[test]
    fn test_entity_timeout() {
        let mut session = Session::new("Stage1");
        populate(&mut session);
        let ghost = Uuid::new_v4();

        let mut reconciler = JoinReconciler::new(ghost, JoinSettings::default());

        // 10s at 100ms per tick
        for _ in 0..99 {
            assert!(session.tick(&mut reconciler).is_none());
            assert_eq!(reconciler.phase(), JoinPhase::AwaitingEntity);
        }
        let outcome = session.tick(&mut reconciler).unwrap();

        assert_eq!(outcome, JoinOutcome::Aborted(AbortReason::EntityTimeout));
        assert_eq!(session.store.revision(), 0);
        assert_eq!(session.channel.sent_total(), 0);
        assert!(!reconciler.status_read());
    }

    #[test]
    fn test_data_timeout() {
        let mut session = Session::new("Stage1");
        populate(&mut session);
        let p = Uuid::new_v4();
        session.world.spawn_avatar(p, "Uninitialized", Vec3::ZERO);

        let settings = JoinSettings {
            data_timeout: Duration::from_secs(1),
            ..Default::default()
        };
        let mut reconciler = JoinReconciler::new(p, settings);
        let outcome = session.run(&mut reconciler, 50).unwrap();

        assert_eq!(outcome, JoinOutcome::Aborted(AbortReason::DataTimeout));
        assert_eq!(session.store.revision(), 0);
    }

    #[test]
    fn test_entity_arrives_late() {
        let mut session = Session::new("Stage1");
        populate(&mut session);
        let p = Uuid::new_v4();
        let mut reconciler = JoinReconciler::new(p, JoinSettings::default());

        for _ in 0..20 {
            assert!(session.tick(&mut reconciler).is_none());
        }
        session.world.spawn_avatar(p, "Slow", Vec3::new(0.0, 0.0, 30.0));
        session.tick(&mut reconciler);
        assert_eq!(reconciler.phase(), JoinPhase::AwaitingInitialization);

        for _ in 0..5 {
            session.tick(&mut reconciler);
        }
        session.world.initialize_avatar(p, false);
        session.tick(&mut reconciler);
        assert_eq!(reconciler.phase(), JoinPhase::SettlingNetwork);

        let outcome = session.run(&mut reconciler, 200).unwrap();
        assert!(matches!(outcome, JoinOutcome::Placed { .. }));
    }

    #[test]
    fn test_settle_delay_precedes_status_read() {
        let mut session = Session::new("Stage2");
        populate(&mut session);
        let p = spawn_joiner(&mut session);
        let mut reconciler = JoinReconciler::new(p, JoinSettings::default());

        // First tick: entity and data present, settling starts
        session.tick(&mut reconciler);
        assert_eq!(reconciler.phase(), JoinPhase::SettlingNetwork);

        // The host's own sync lands during the settle window
        for _ in 0..14 {
            session.tick(&mut reconciler);
            assert_eq!(reconciler.phase(), JoinPhase::SettlingNetwork);
        }
        assert_ok!(session.store.set(&StatusRecord::new(p, true, "Stage2")));

        session.tick(&mut reconciler);
        assert_eq!(reconciler.outcome(), Some(&JoinOutcome::RestoredDead));
    }

    #[test]
    fn test_no_target_when_everyone_else_is_dead() {
        let mut session = Session::new("Stage1");
        let c = Uuid::new_v4();
        session.world.spawn_grounded(c, "C", Vec3::ZERO, true);
        let p = spawn_joiner(&mut session);

        let mut reconciler = JoinReconciler::new(p, JoinSettings::default());
        let outcome = session.run(&mut reconciler, 200).unwrap();

        assert_eq!(outcome, JoinOutcome::Aborted(AbortReason::NoTarget));
        assert_eq!(session.channel.sent_total(), 0);
        assert_eq!(session.store.revision(), 0);
    }

    #[test]
    fn test_joiner_leaves_mid_flight() {
        let mut session = Session::new("Stage1");
        populate(&mut session);
        let p = spawn_joiner(&mut session);
        let mut reconciler = JoinReconciler::new(p, JoinSettings::default());

        for _ in 0..5 {
            session.tick(&mut reconciler);
        }
        session.world.remove_avatar(p);

        let outcome = session.run(&mut reconciler, 200).unwrap();
        assert_eq!(outcome, JoinOutcome::Aborted(AbortReason::EntityLost));
        assert_eq!(session.channel.sent_total(), 0);
    }

    #[test]
    fn test_target_leaves_during_placement() {
        let mut session = Session::new("Stage1");
        let (_, b, _) = populate(&mut session);
        let p = spawn_joiner(&mut session);
        let mut reconciler = JoinReconciler::new(p, JoinSettings::default());

        while reconciler.phase() != JoinPhase::AwaitingPlacement {
            assert!(session.tick(&mut reconciler).is_none());
        }
        session.world.remove_avatar(b);

        let outcome = session.run(&mut reconciler, 200).unwrap();
        assert_eq!(
            outcome,
            JoinOutcome::Aborted(AbortReason::Placement(PlacementError::TargetLost))
        );
        assert!(session.world.avatar(p).unwrap().simulated);
        assert_eq!(session.store.revision(), 0);
    }

    #[test]
    fn test_write_failure_is_not_fatal() {
        let mut session = Session::new("Stage1");
        populate(&mut session);
        let p = spawn_joiner(&mut session);
        session.store.set_offline(true);

        let mut reconciler = JoinReconciler::new(p, JoinSettings::default());
        let outcome = session.run(&mut reconciler, 200).unwrap();

        match outcome {
            JoinOutcome::Placed { write_error, .. } => {
                assert_eq!(write_error, Some(StoreError::Offline));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(session.channel.sent_total(), 1);
    }

    #[test]
    fn test_finished_reconciler_is_idempotent() {
        let mut session = Session::new("Stage1");
        let ghost = Uuid::new_v4();
        let settings = JoinSettings {
            entity_timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let mut reconciler = JoinReconciler::new(ghost, settings);

        let first = session.tick(&mut reconciler).unwrap();
        let second = session.tick(&mut reconciler).unwrap();
        assert_eq!(first, second);
        assert!(reconciler.is_finished());
    }
}
