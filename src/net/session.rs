use crate::game::snapshot::ParticipantId;

/// Session membership change reported by the host's networking layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipEvent {
    /// A participant entered the running session
    Joined(ParticipantId),
    /// A participant left or dropped
    Left(ParticipantId),
}

impl MembershipEvent {
    pub fn participant(&self) -> ParticipantId {
        match self {
            MembershipEvent::Joined(id) | MembershipEvent::Left(id) => *id,
        }
    }
}
