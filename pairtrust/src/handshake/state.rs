// Handshake state machine.

use std::fmt;

/// Where a session stands. States only move forward; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// No connection yet; this side has not decided whether to listen or
    /// connect.
    RoleUndetermined,

    /// A connection exists and the role is fixed.
    Connected,

    /// Both public keys have crossed the wire; the peer key is imported.
    KeysExchanged,

    /// Both sides hold the same session key.
    SessionKeyEstablished,

    /// At least one integrity or authenticated round has completed.
    Verified {
        /// Rounds completed so far, sent or received.
        rounds: u32,
    },

    /// Channel resources released. No further operations are valid.
    Closed,
}

impl HandshakeState {
    /// Human-readable label for the current state (used in error messages).
    pub fn label(&self) -> &'static str {
        match self {
            HandshakeState::RoleUndetermined => "RoleUndetermined",
            HandshakeState::Connected => "Connected",
            HandshakeState::KeysExchanged => "KeysExchanged",
            HandshakeState::SessionKeyEstablished => "SessionKeyEstablished",
            HandshakeState::Verified { .. } => "Verified",
            HandshakeState::Closed => "Closed",
        }
    }

    /// `true` once the session key is shared and rounds may run.
    pub fn has_session_key(&self) -> bool {
        matches!(
            self,
            HandshakeState::SessionKeyEstablished | HandshakeState::Verified { .. }
        )
    }

    /// Number of completed rounds.
    pub fn rounds(&self) -> u32 {
        match self {
            HandshakeState::Verified { rounds } => *rounds,
            _ => 0,
        }
    }

    /// The state after one more completed round. The counter saturates.
    pub fn after_round(&self) -> HandshakeState {
        HandshakeState::Verified {
            rounds: self.rounds().saturating_add(1),
        }
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeState::Verified { rounds } => write!(f, "Verified({rounds})"),
            other => f.write_str(other.label()),
        }
    }
}
