use std::net::SocketAddr;

use thiserror::Error;

/// All errors produced by the PairStream framed channel.
#[derive(Debug, Error)]
pub enum PairStreamError {
    // ── Transport errors: the connection is no longer usable ─────────────
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("connection failed: accept returned {0}")]
    AcceptFailed(#[source] std::io::Error),

    #[error("no peer is listening on {0}")]
    NotListening(SocketAddr),

    #[error("connection is closed")]
    ConnectionClosed,

    #[error("listener is closed")]
    ListenerClosed,

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("accept task cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // ── Framing errors: the frame is invalid, the stream stays open ──────
    #[error("payload too large: {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("malformed length header: {0:?}")]
    MalformedHeader(String),

    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

impl PairStreamError {
    /// `true` for errors that leave the connection open (bad frame, not a
    /// broken stream).
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            PairStreamError::FrameTooLarge { .. }
                | PairStreamError::MalformedHeader(_)
                | PairStreamError::Truncated { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PairStreamError>;
