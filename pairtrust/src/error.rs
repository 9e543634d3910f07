// PairTrust error types

use thiserror::Error;

/// Top-level error type for the PairTrust crate.
#[derive(Debug, Error)]
pub enum PairTrustError {
    // ── Crypto errors ───────────────────────────────────────────────────
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("plaintext too large for RSA-OAEP: {len} bytes exceeds maximum {max}")]
    PlaintextTooLarge { len: usize, max: usize },

    #[error("signing failed: {0}")]
    Signing(String),

    // ── Sequencing errors ───────────────────────────────────────────────
    #[error("peer public key unknown: exchange public keys first")]
    MissingPeerKey,

    #[error("keypair not generated: export the public key first")]
    MissingPrivateKey,

    #[error("session key not established")]
    MissingSessionKey,

    #[error("invalid handshake state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    // ── Handshake errors ────────────────────────────────────────────────
    #[error("handshake error: {0}")]
    Handshake(String),

    #[error("transport error: {0}")]
    Transport(#[from] pairstream::PairStreamError),

    // ── Configuration ───────────────────────────────────────────────────
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("configuration parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

/// Crate-level result alias.
pub type Result<T> = std::result::Result<T, PairTrustError>;
