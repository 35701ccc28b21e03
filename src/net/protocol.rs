use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::game::snapshot::ParticipantId;
use crate::util::vec3::Vec3;

/// Replicated command that moves an avatar on every peer
pub const WARP_COMMAND: &str = "warp_player";

/// Payload of [`WARP_COMMAND`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WarpPayload {
    /// Arrival point
    pub position: Vec3,
    /// Whether receivers should also record the point as ground contact
    pub ground: bool,
}

/// Fire-and-forget command fan-out to every session member
pub trait CommandChannel {
    fn send_to_all(
        &mut self,
        entity: ParticipantId,
        command: &str,
        payload: Vec<u8>,
    ) -> Result<(), SendError>;
}

/// Errors from the replicated command channel
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("Failed to encode command: {0}")]
    Encode(String),
    #[error("Command channel closed")]
    ChannelClosed,
}

impl From<EncodeError> for SendError {
    fn from(e: EncodeError) -> Self {
        SendError::Encode(e.0)
    }
}

/// A command as it left the local channel
#[derive(Debug, Clone, PartialEq)]
pub struct SentCommand {
    pub entity: ParticipantId,
    pub name: String,
    pub payload: Vec<u8>,
}

/// In-process channel: queues commands until the host applies them
#[derive(Debug, Default)]
pub struct LoopbackChannel {
    outbox: VecDeque<SentCommand>,
    closed: bool,
    sent_total: u64,
}

impl LoopbackChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the channel; further sends fail
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn reopen(&mut self) {
        self.closed = false;
    }

    /// Take everything queued since the last drain
    pub fn drain(&mut self) -> Vec<SentCommand> {
        self.outbox.drain(..).collect()
    }

    pub fn pending(&self) -> usize {
        self.outbox.len()
    }

    pub fn sent_total(&self) -> u64 {
        self.sent_total
    }
}

impl CommandChannel for LoopbackChannel {
    fn send_to_all(
        &mut self,
        entity: ParticipantId,
        command: &str,
        payload: Vec<u8>,
    ) -> Result<(), SendError> {
        if self.closed {
            return Err(SendError::ChannelClosed);
        }

        self.outbox.push_back(SentCommand {
            entity,
            name: command.to_string(),
            payload,
        });
        self.sent_total += 1;
        Ok(())
    }
}

/// Encode a payload using bincode
/// Uses legacy config for fixed-size integers (matches the engine's wire layout)
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, EncodeError> {
    bincode::serde::encode_to_vec(message, bincode::config::legacy())
        .map_err(|e| EncodeError(e.to_string()))
}

/// Decode a payload using bincode
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, DecodeError> {
    bincode::serde::decode_from_slice(data, bincode::config::legacy())
        .map(|(msg, _)| msg)
        .map_err(|e| DecodeError(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);
