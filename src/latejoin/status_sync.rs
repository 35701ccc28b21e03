//! Periodic liveness push
//!
//! Keeps every participant's status record fresh without waiting for a join:
//! each tick, observed liveness is compared with the last value written and
//! only changes are pushed.

use hashbrown::HashMap;
use tracing::{debug, warn};

use crate::game::snapshot::ParticipantId;
use crate::latejoin::TickContext;
use crate::net::status_store::{StatusRecord, StoreError};

/// Result of one sync pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub writes: u32,
    pub failures: u32,
}

/// Liveness change detector backed by a process-local cache
#[derive(Debug, Default)]
pub struct StatusSyncLoop {
    /// Last liveness successfully written per participant (true = dead)
    cache: HashMap<ParticipantId, bool>,
}

impl StatusSyncLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last liveness written for `id`
    pub fn cached(&self, id: ParticipantId) -> Option<bool> {
        self.cache.get(&id).copied()
    }

    /// Record a write made elsewhere so it is not repeated
    pub fn note_written(&mut self, id: ParticipantId, dead: bool) {
        self.cache.insert(id, dead);
    }

    /// Push every observed liveness change. Participants for which `skip`
    /// returns true are left alone this pass.
    pub fn tick<F>(&mut self, ctx: &mut TickContext<'_>, skip: F) -> SyncReport
    where
        F: Fn(ParticipantId) -> bool,
    {
        let mut report = SyncReport::default();

        for view in ctx.world.list_entities() {
            if skip(view.owner) {
                continue;
            }
            let Some(alive) = view.is_alive() else {
                continue;
            };
            let dead = !alive;

            // First sighting counts as a change
            if self.cache.get(&view.owner) == Some(&dead) {
                continue;
            }

            let record = StatusRecord::new(view.owner, dead, ctx.stage);
            match ctx.store.set(&record) {
                Ok(_) => {
                    debug!(
                        "Synced {} ({}) dead={} on {}",
                        view.display_name, view.owner, dead, ctx.stage
                    );
                    self.cache.insert(view.owner, dead);
                    report.writes += 1;
                }
                Err(e) => {
                    // Cache untouched so the next pass retries
                    warn!(
                        "Status sync for {} ({}) failed: {}",
                        view.display_name, view.owner, e
                    );
                    report.failures += 1;
                }
            }
        }

        report
    }

    /// Write a departing participant's liveness right away. Uses the live
    /// avatar when it is still observable, the cached value otherwise.
    /// `Ok(None)` means nothing is known about the participant.
    pub fn write_departure(
        &mut self,
        id: ParticipantId,
        ctx: &mut TickContext<'_>,
    ) -> Result<Option<bool>, StoreError> {
        let dead = match ctx.world.entity(id).and_then(|v| v.is_alive()) {
            Some(alive) => !alive,
            None => match self.cached(id) {
                Some(dead) => dead,
                None => return Ok(None),
            },
        };

        if let Err(e) = ctx.store.set(&StatusRecord::new(id, dead, ctx.stage)) {
            warn!("Departure write for {} failed: {}", id, e);
            return Err(e);
        }

        debug!("Wrote departure status for {} dead={}", id, dead);
        self.cache.insert(id, dead);
        Ok(Some(dead))
    }
}
