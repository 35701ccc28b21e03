//! Replicated per-participant status
//!
//! The session's shared property table is eventually consistent and
//! last-write-wins per key. Callers see structured [`StatusRecord`]s; the
//! backing table stores one liveness key and one stage key per participant.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::game::snapshot::ParticipantId;

/// Persisted liveness of one participant, tagged with the stage it applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub participant_id: ParticipantId,
    pub dead: bool,
    pub stage_tag: String,
}

impl StatusRecord {
    pub fn new(participant_id: ParticipantId, dead: bool, stage_tag: &str) -> Self {
        Self {
            participant_id,
            dead,
            stage_tag: stage_tag.to_string(),
        }
    }

    /// Death recorded for this very stage
    pub fn is_dead_in(&self, stage: &str) -> bool {
        self.dead && self.stage_tag == stage
    }
}

/// Store acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Store-wide write counter after this write
    pub revision: u64,
}

/// Write failures. Never fatal: callers log and retry on a later tick.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Status store is offline")]
    Offline,
}

/// Session-scoped status table.
///
/// `get` may return stale data or nothing at all; absence means "unknown,
/// assume alive, no stage affinity".
pub trait StatusStore {
    fn get(&self, participant_id: ParticipantId) -> Option<StatusRecord>;
    fn set(&mut self, record: &StatusRecord) -> Result<Ack, StoreError>;
}

/// Raw property value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Bool(bool),
    Text(String),
}

/// In-memory session property table using `dead_{id}` / `stage_{id}` keys
#[derive(Debug, Default)]
pub struct RoomPropertiesStore {
    properties: HashMap<String, PropertyValue>,
    revision: u64,
    offline: bool,
}

impl RoomPropertiesStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing the session (writes fail until back online)
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Raw property access, as another client's writes would land
    pub fn set_property(&mut self, key: String, value: PropertyValue) {
        self.properties.insert(key, value);
        self.revision += 1;
    }

    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    fn dead_key(id: ParticipantId) -> String {
        format!("dead_{}", id)
    }

    fn stage_key(id: ParticipantId) -> String {
        format!("stage_{}", id)
    }
}

impl StatusStore for RoomPropertiesStore {
    fn get(&self, participant_id: ParticipantId) -> Option<StatusRecord> {
        // Liveness key is authoritative; a record without it is unknown
        let dead = match self.properties.get(&Self::dead_key(participant_id))? {
            PropertyValue::Bool(dead) => *dead,
            PropertyValue::Text(_) => return None,
        };

        // Missing or mistyped stage tag: no stage affinity
        let stage_tag = match self.properties.get(&Self::stage_key(participant_id)) {
            Some(PropertyValue::Text(stage)) => stage.clone(),
            _ => String::new(),
        };

        Some(StatusRecord {
            participant_id,
            dead,
            stage_tag,
        })
    }

    fn set(&mut self, record: &StatusRecord) -> Result<Ack, StoreError> {
        if self.offline {
            return Err(StoreError::Offline);
        }

        // Both keys in one write so a reader never pairs a new flag with an old stage
        self.properties.insert(
            Self::dead_key(record.participant_id),
            PropertyValue::Bool(record.dead),
        );
        self.properties.insert(
            Self::stage_key(record.participant_id),
            PropertyValue::Text(record.stage_tag.clone()),
        );
        self.revision += 1;

        Ok(Ack {
            revision: self.revision,
        })
    }
}
