// Messages exchanged in the repeatable rounds after the handshake.
//
// Each field travels as its own frame, in declaration order.

use bytes::Bytes;
use serde::Serialize;

/// Integrity round: the message, then HMAC-SHA256(session key, message).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityRound {
    pub message: Bytes,
    pub digest: Vec<u8>,
}

/// Authenticated round: an integrity round plus the sender's RSA signature
/// over the digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedRound {
    pub message: Bytes,
    pub digest: Vec<u8>,
    pub signature: Vec<u8>,
}

/// Verdict on a received round. Tampering is reported here, never as an
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RoundOutcome {
    /// The received digest matches the one recomputed over the message.
    pub intact: bool,
    /// Whether the signature verified against the peer's key; `None` for
    /// integrity-only rounds.
    pub signature_valid: Option<bool>,
}

impl RoundOutcome {
    /// Intact and, where a signature was sent, validly signed.
    pub fn is_trusted(&self) -> bool {
        self.intact && self.signature_valid.unwrap_or(true)
    }
}

/// Everything the receiving side saw and computed during one round.
#[derive(Debug, Clone)]
pub struct ReceivedRound {
    pub message: Bytes,
    pub received_digest: Bytes,
    pub computed_digest: [u8; 32],
    pub signature: Option<Bytes>,
    pub outcome: RoundOutcome,
}
