// PairLink session orchestrator: role negotiation, public key exchange,
// session key transport, then repeatable integrity / authenticated rounds.
//
//   Initiator (connects)                Responder (listens)
//     |<------- Responder public key ------|
//     |-------- Initiator public key ----->|
//     |-------- RSA-OAEP(session key) ---->|
//     |======== rounds, either way ========|
//
// Every message is one frame. Each step is a blocking round trip; nothing
// is retried and a failed step leaves the state where it was, for the
// caller to abandon.

use std::net::SocketAddr;

use bytes::Bytes;
use pairstream::{Connection, Listener, PairStreamError, Probe, Role};
use zeroize::Zeroize;

use crate::config::SessionConfig;
use crate::crypto::identity::Identity;
use crate::crypto::symmetric::{self, SessionKey};
use crate::error::{PairTrustError, Result};
use crate::handshake::messages::{AuthenticatedRound, IntegrityRound, ReceivedRound, RoundOutcome};
use crate::handshake::state::HandshakeState;

/// One side of a PairLink session. Owns its connection, keypair and session
/// key, so independent sessions can coexist in one process.
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    identity: Identity,
    session_key: Option<SessionKey>,
    listener: Option<Listener>,
    connection: Option<Connection>,
    role: Option<Role>,
    state: HandshakeState,
}

impl Session {
    /// Create a session in `RoleUndetermined`. The keypair is generated
    /// lazily during public key exchange.
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let identity = Identity::new(config.rsa_bits)?;
        Ok(Self {
            config,
            identity,
            session_key: None,
            listener: None,
            connection: None,
            role: None,
            state: HandshakeState::RoleUndetermined,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// `None` until connected.
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The shared key, once established.
    pub fn session_key(&self) -> Option<&SessionKey> {
        self.session_key.as_ref()
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    fn invalid(&self, to: &str) -> PairTrustError {
        PairTrustError::InvalidStateTransition {
            from: self.state.label().into(),
            to: to.into(),
        }
    }

    fn expect_state(&self, expected: HandshakeState, to: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(self.invalid(to))
        }
    }

    fn transition(&mut self, next: HandshakeState) {
        tracing::debug!(from = %self.state, to = %next, role = ?self.role, "handshake transition");
        self.state = next;
    }

    fn conn(&self) -> Result<&Connection> {
        self.connection
            .as_ref()
            .ok_or(PairTrustError::Transport(PairStreamError::ConnectionClosed))
    }

    fn role_or_err(&self) -> Result<Role> {
        self.role
            .ok_or_else(|| PairTrustError::Handshake("role not yet determined".into()))
    }

    // ── RoleUndetermined -> Connected ────────────────────────────────────

    /// Probe the configured address. If a peer is listening, connect to it
    /// (reusing the probe socket) as the Initiator. Otherwise ask
    /// `elect_listener`; if it agrees, listen and wait for the peer as the
    /// Responder.
    ///
    /// Returns `None` when nobody is listening and this side declined to
    /// listen; the caller may ask again.
    pub async fn negotiate_role<F>(&mut self, elect_listener: F) -> Result<Option<Role>>
    where
        F: FnOnce() -> bool,
    {
        self.expect_state(HandshakeState::RoleUndetermined, "Connected")?;

        let probe = pairstream::probe(self.config.address, &self.config.channel_config()).await;
        if probe.is_live() {
            tracing::info!(addr = %self.config.address, "peer is listening, connecting");
            self.connect_probe(probe)?;
            return Ok(Some(Role::Initiator));
        }

        if !elect_listener() {
            return Ok(None);
        }
        self.listen().await?;
        self.accept().await?;
        Ok(Some(Role::Responder))
    }

    /// Bind the configured address. Returns the bound address, which differs
    /// from the configured one when binding port 0.
    pub async fn listen(&mut self) -> Result<SocketAddr> {
        self.expect_state(HandshakeState::RoleUndetermined, "Listening")?;
        if let Some(listener) = &self.listener {
            return Ok(listener.local_addr());
        }
        let listener =
            Listener::bind(self.config.address, self.config.channel_config()).await?;
        let addr = listener.local_addr();
        self.listener = Some(listener);
        Ok(addr)
    }

    /// Wait for the peer on the bound listener. A failed accept leaves the
    /// listener open for another attempt.
    pub async fn accept(&mut self) -> Result<()> {
        self.expect_state(HandshakeState::RoleUndetermined, "Connected")?;
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| PairTrustError::Handshake("accept before listen".into()))?;
        let conn = listener.accept().await?;
        self.attach(conn);
        Ok(())
    }

    /// Open a fresh connection to the configured address.
    pub async fn connect(&mut self) -> Result<()> {
        self.connect_to(self.config.address).await
    }

    /// Open a fresh connection to `addr`.
    pub async fn connect_to(&mut self, addr: SocketAddr) -> Result<()> {
        self.expect_state(HandshakeState::RoleUndetermined, "Connected")?;
        let conn = pairstream::connect(addr, &self.config.channel_config()).await?;
        self.attach(conn);
        Ok(())
    }

    /// Connect by promoting a live probe socket.
    pub fn connect_probe(&mut self, probe: Probe) -> Result<()> {
        self.expect_state(HandshakeState::RoleUndetermined, "Connected")?;
        let conn = probe.into_connection(&self.config.channel_config())?;
        self.attach(conn);
        Ok(())
    }

    fn attach(&mut self, conn: Connection) {
        let role = conn.role();
        tracing::info!(%role, peer = %conn.peer_addr(), "connected");
        self.role = Some(role);
        self.connection = Some(conn);
        self.transition(HandshakeState::Connected);
    }

    // ── Connected -> KeysExchanged ───────────────────────────────────────

    /// Swap encoded public keys. The Responder sends first and the Initiator
    /// receives first, so neither side waits on the other.
    pub async fn exchange_public_keys(&mut self) -> Result<()> {
        self.expect_state(HandshakeState::Connected, "KeysExchanged")?;
        let role = self.role_or_err()?;
        let ours = self.identity.export_public_key()?;

        let conn = self.conn()?;
        let theirs = match role {
            Role::Responder => {
                conn.send(&ours).await?;
                conn.receive().await?
            }
            Role::Initiator => {
                let theirs = conn.receive().await?;
                conn.send(&ours).await?;
                theirs
            }
        };

        self.identity.import_peer_public_key(&theirs)?;
        tracing::info!(
            %role,
            peer = self.identity.peer_fingerprint().unwrap_or_default(),
            "public keys exchanged"
        );
        self.transition(HandshakeState::KeysExchanged);
        Ok(())
    }

    // ── KeysExchanged -> SessionKeyEstablished ───────────────────────────

    /// The Initiator generates the session key and sends it RSA-encrypted;
    /// the Responder decrypts it. A corrupted transport fails here rather
    /// than yielding a different key.
    pub async fn establish_session_key(&mut self) -> Result<()> {
        self.expect_state(HandshakeState::KeysExchanged, "SessionKeyEstablished")?;
        let role = self.role_or_err()?;
        let conn = self.conn()?;

        let key = match role {
            Role::Initiator => {
                let key = SessionKey::generate();
                let sealed = self.identity.encrypt_for_peer(key.as_bytes())?;
                conn.send(&sealed).await?;
                key
            }
            Role::Responder => {
                let sealed = conn.receive().await?;
                let mut raw = self.identity.decrypt_mine(&sealed)?;
                let key = SessionKey::from_bytes(&raw);
                raw.zeroize();
                key?
            }
        };

        tracing::info!(%role, "session key established");
        self.session_key = Some(key);
        self.transition(HandshakeState::SessionKeyEstablished);
        Ok(())
    }

    // ── Rounds ───────────────────────────────────────────────────────────

    fn established_key(&self, to: &str) -> Result<&SessionKey> {
        if !self.state.has_session_key() {
            return Err(self.invalid(to));
        }
        self.session_key
            .as_ref()
            .ok_or(PairTrustError::MissingSessionKey)
    }

    fn complete_round(&mut self) {
        self.transition(self.state.after_round());
    }

    /// Send `message` AES-encrypted under the session key as one frame.
    pub async fn send_confidential(&mut self, message: &[u8]) -> Result<()> {
        let key = self.established_key("ConfidentialSent")?;
        let sealed = symmetric::encrypt(key, message)?;
        self.conn()?.send(&sealed).await?;
        tracing::debug!(len = message.len(), "confidential message sent");
        Ok(())
    }

    /// Receive and decrypt one confidential frame. A frame not produced
    /// under the shared key is a hard `Decryption` error.
    pub async fn receive_confidential(&mut self) -> Result<Vec<u8>> {
        let key = self.established_key("ConfidentialReceived")?;
        let sealed = self.conn()?.receive().await?;
        let message = symmetric::decrypt(key, &sealed)?;
        tracing::debug!(len = message.len(), "confidential message received");
        Ok(message)
    }

    /// Build an integrity round for `message` without sending it.
    pub fn prepare_integrity_round(&self, message: &[u8]) -> Result<IntegrityRound> {
        let key = self.established_key("Verified")?;
        let digest = symmetric::keyed_hash(key, message)?;
        Ok(IntegrityRound {
            message: Bytes::copy_from_slice(message),
            digest: digest.to_vec(),
        })
    }

    /// Send a prepared integrity round: message frame, then digest frame.
    pub async fn send_integrity_round(&mut self, round: &IntegrityRound) -> Result<()> {
        self.established_key("Verified")?;
        let conn = self.conn()?;
        conn.send(&round.message).await?;
        conn.send(&round.digest).await?;
        tracing::debug!(len = round.message.len(), "integrity round sent");
        self.complete_round();
        Ok(())
    }

    /// Receive message and digest, recompute the keyed hash and compare in
    /// constant time.
    pub async fn receive_integrity_round(&mut self) -> Result<ReceivedRound> {
        let key = self.established_key("Verified")?;
        let conn = self.conn()?;
        let message = conn.receive().await?;
        let received_digest = conn.receive().await?;

        let computed_digest = symmetric::keyed_hash(key, &message)?;
        let intact = symmetric::constant_time_eq(&received_digest, &computed_digest);
        if !intact {
            tracing::warn!(len = message.len(), "integrity round: message was modified");
        }

        self.complete_round();
        Ok(ReceivedRound {
            message,
            received_digest,
            computed_digest,
            signature: None,
            outcome: RoundOutcome {
                intact,
                signature_valid: None,
            },
        })
    }

    /// Build an authenticated round: keyed hash of `message`, signed with
    /// this side's private key.
    pub fn prepare_authenticated_round(&self, message: &[u8]) -> Result<AuthenticatedRound> {
        let IntegrityRound { message, digest } = self.prepare_integrity_round(message)?;
        let signature = self.identity.sign(&digest)?;
        Ok(AuthenticatedRound {
            message,
            digest,
            signature,
        })
    }

    /// Send message, digest and signature as three frames.
    pub async fn send_authenticated_round(&mut self, round: &AuthenticatedRound) -> Result<()> {
        self.established_key("Verified")?;
        let conn = self.conn()?;
        conn.send(&round.message).await?;
        conn.send(&round.digest).await?;
        conn.send(&round.signature).await?;
        tracing::debug!(len = round.message.len(), "authenticated round sent");
        self.complete_round();
        Ok(())
    }

    /// Receive an authenticated round and report both the integrity check
    /// and the signature check against the peer's imported public key.
    pub async fn receive_authenticated_round(&mut self) -> Result<ReceivedRound> {
        let key = self.established_key("Verified")?;
        let conn = self.conn()?;
        let message = conn.receive().await?;
        let received_digest = conn.receive().await?;
        let signature = conn.receive().await?;

        let computed_digest = symmetric::keyed_hash(key, &message)?;
        let intact = symmetric::constant_time_eq(&received_digest, &computed_digest);
        let signature_valid = self.identity.verify(&received_digest, &signature)?;
        if !intact || !signature_valid {
            tracing::warn!(intact, signature_valid, "authenticated round failed verification");
        }

        self.complete_round();
        Ok(ReceivedRound {
            message,
            received_digest,
            computed_digest,
            signature: Some(signature),
            outcome: RoundOutcome {
                intact,
                signature_valid: Some(signature_valid),
            },
        })
    }

    // ── -> Closed ────────────────────────────────────────────────────────

    /// Release the connection and, on the listening side, the accept
    /// socket. Closing twice is a no-op.
    pub async fn close(&mut self) {
        if self.state == HandshakeState::Closed {
            return;
        }
        if let Some(conn) = self.connection.take() {
            conn.close().await;
        }
        if let Some(listener) = self.listener.take() {
            listener.close();
        }
        self.transition(HandshakeState::Closed);
    }
}
