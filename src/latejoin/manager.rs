use hashbrown::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::LateJoinConfig;
use crate::game::snapshot::ParticipantId;
use crate::latejoin::join::{AbortReason, JoinOutcome, JoinReconciler, JoinSettings};
use crate::latejoin::status_sync::StatusSyncLoop;
use crate::latejoin::TickContext;
use crate::metrics::Metrics;
use crate::net::session::MembershipEvent;

/// A reconciliation that finished this tick
#[derive(Debug, Clone, PartialEq)]
pub struct JoinReport {
    pub participant: ParticipantId,
    pub outcome: JoinOutcome,
}

/// Routes membership events to per-participant reconcilers and drives them,
/// together with the status sync pass, once per host tick
pub struct LateJoinManager {
    config: LateJoinConfig,
    settings: JoinSettings,
    reconcilers: HashMap<ParticipantId, JoinReconciler>,
    /// Joins that gave up before reading the stored status. Their avatars
    /// stay out of the sync pass until the next join or leave.
    unreconciled: HashSet<ParticipantId>,
    sync: StatusSyncLoop,
    metrics: Arc<Metrics>,
}

impl LateJoinManager {
    pub fn new(config: LateJoinConfig, metrics: Arc<Metrics>) -> Self {
        let settings = JoinSettings::from_config(&config);
        Self {
            config,
            settings,
            reconcilers: HashMap::new(),
            unreconciled: HashSet::new(),
            sync: StatusSyncLoop::new(),
            metrics,
        }
    }

    /// Start reconciling a participant who entered the running session
    pub fn on_member_joined(&mut self, id: ParticipantId, stage: &str) -> Result<(), ManagerError> {
        if self.config.is_lobby_stage(stage) {
            self.metrics.joins_ignored.fetch_add(1, Ordering::Relaxed);
            debug!("Ignoring join of {} on lobby stage {}", id, stage);
            return Err(ManagerError::LobbyStage(stage.to_string()));
        }

        if self.reconcilers.contains_key(&id) {
            self.metrics.joins_ignored.fetch_add(1, Ordering::Relaxed);
            warn!("Duplicate join for {}, reconciliation already running", id);
            return Err(ManagerError::AlreadyReconciling);
        }

        info!("Late join from {} on stage {}", id, stage);
        self.unreconciled.remove(&id);
        self.reconcilers.insert(id, JoinReconciler::new(id, self.settings));
        self.metrics.joins_started.fetch_add(1, Ordering::Relaxed);
        self.update_in_flight();
        Ok(())
    }

    /// Drop any in-flight reconciliation and persist the leaver's liveness
    pub fn on_member_left(&mut self, id: ParticipantId, ctx: &mut TickContext<'_>) {
        if let Some(reconciler) = self.reconciler_removed(id) {
            // Its avatar's liveness was never reconciled; writing it could bury a stored death
            info!(
                "{} left during {:?}, reconciliation dropped",
                id,
                reconciler.phase()
            );
            self.metrics
                .record_outcome(&JoinOutcome::Aborted(AbortReason::EntityLost));
            return;
        }

        if self.unreconciled.remove(&id) {
            info!("{} left before their status was reconciled, nothing stored", id);
            return;
        }

        match self.sync.write_departure(id, ctx) {
            Ok(Some(dead)) => {
                self.metrics.status_writes.fetch_add(1, Ordering::Relaxed);
                info!("{} left, stored dead={}", id, dead);
            }
            Ok(None) => debug!("{} left with no status to store", id),
            Err(_) => {
                self.metrics
                    .status_write_failures
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn handle_event(&mut self, event: MembershipEvent, ctx: &mut TickContext<'_>) {
        debug!("Membership event for {}: {:?}", event.participant(), event);
        match event {
            MembershipEvent::Joined(id) => {
                if let Err(e) = self.on_member_joined(id, ctx.stage) {
                    debug!("Join of {} not handled: {}", id, e);
                }
            }
            MembershipEvent::Left(id) => self.on_member_left(id, ctx),
        }
    }

    /// Advance every reconciler, then push liveness changes for everyone else
    pub fn tick(&mut self, ctx: &mut TickContext<'_>) -> Vec<JoinReport> {
        let mut finished = Vec::new();

        for (id, reconciler) in self.reconcilers.iter_mut() {
            if let Some(outcome) = reconciler.tick(ctx) {
                if reconciler.warp_sent() {
                    self.metrics.warp_commands_sent.fetch_add(1, Ordering::Relaxed);
                }
                if !reconciler.status_read() {
                    self.unreconciled.insert(*id);
                }
                finished.push(JoinReport {
                    participant: *id,
                    outcome,
                });
            }
        }

        for report in &finished {
            self.reconcilers.remove(&report.participant);
            self.metrics.record_outcome(&report.outcome);

            match &report.outcome {
                JoinOutcome::Placed {
                    dead,
                    write_error: None,
                    ..
                } => self.sync.note_written(report.participant, *dead),
                // Already stored as dead on this stage
                JoinOutcome::RestoredDead => self.sync.note_written(report.participant, true),
                _ => {}
            }
        }
        self.update_in_flight();

        let reconcilers = &self.reconcilers;
        let unreconciled = &self.unreconciled;
        let sync = self.sync.tick(ctx, |id| {
            reconcilers.contains_key(&id) || unreconciled.contains(&id)
        });
        self.metrics
            .status_writes
            .fetch_add(sync.writes as u64, Ordering::Relaxed);
        self.metrics
            .status_write_failures
            .fetch_add(sync.failures as u64, Ordering::Relaxed);

        finished
    }

    pub fn in_flight(&self) -> usize {
        self.reconcilers.len()
    }

    pub fn is_reconciling(&self, id: ParticipantId) -> bool {
        self.reconcilers.contains_key(&id)
    }

    /// Whether `id` is held out of the sync pass after a join that never
    /// reached its status read
    pub fn is_unreconciled(&self, id: ParticipantId) -> bool {
        self.unreconciled.contains(&id)
    }

    pub fn status_sync(&self) -> &StatusSyncLoop {
        &self.sync
    }

    fn reconciler_removed(&mut self, id: ParticipantId) -> Option<JoinReconciler> {
        let removed = self.reconcilers.remove(&id);
        if removed.is_some() {
            self.update_in_flight();
        }
        removed
    }

    fn update_in_flight(&self) {
        self.metrics
            .reconcilers_in_flight
            .store(self.reconcilers.len() as u64, Ordering::Relaxed);
    }
}

/// Why a join event was not picked up
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManagerError {
    #[error("Already reconciling this participant")]
    AlreadyReconciling,
    #[error("Stage {0} is a lobby stage")]
    LobbyStage(String),
}
