// PairTrust: RSA identity, AES/HMAC session key and the PairLink handshake
//
// Crate root: module declarations and public re-exports.

pub mod config;
pub mod crypto;
pub mod error;
pub mod handshake;
pub mod logging;

// Re-export key types at crate root for convenience.
pub use config::SessionConfig;
pub use crypto::identity::Identity;
pub use crypto::symmetric::SessionKey;
pub use error::{PairTrustError, Result};
pub use handshake::messages::{AuthenticatedRound, IntegrityRound, ReceivedRound, RoundOutcome};
pub use handshake::protocol::Session;
pub use handshake::state::HandshakeState;
pub use pairstream::Role;
