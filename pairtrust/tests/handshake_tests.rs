// Integration tests for the PairLink handshake over loopback TCP.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::timeout;

use pairstream::ChannelConfig;
use pairtrust::crypto::identity::{Identity, MIN_RSA_BITS};
use pairtrust::crypto::symmetric::{keyed_hash, SessionKey};
use pairtrust::{HandshakeState, PairTrustError, Role, Session, SessionConfig};

const GUARD: Duration = Duration::from_secs(30);

fn test_config(address: SocketAddr) -> SessionConfig {
    SessionConfig {
        address,
        rsa_bits: MIN_RSA_BITS,
        ..SessionConfig::default()
    }
}

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// Run the handshake through `SessionKeyEstablished` on both sides.
/// Returns `(initiator, responder)`.
async fn established_pair() -> (Session, Session) {
    let mut responder = Session::new(test_config(loopback())).unwrap();
    let addr = responder.listen().await.unwrap();
    let mut initiator = Session::new(test_config(addr)).unwrap();

    let (r, i) = timeout(GUARD, async {
        tokio::join!(
            async {
                responder.accept().await?;
                responder.exchange_public_keys().await?;
                responder.establish_session_key().await?;
                Ok::<(), PairTrustError>(())
            },
            async {
                initiator.connect().await?;
                initiator.exchange_public_keys().await?;
                initiator.establish_session_key().await?;
                Ok::<(), PairTrustError>(())
            },
        )
    })
    .await
    .expect("handshake timed out");
    r.expect("responder handshake");
    i.expect("initiator handshake");

    (initiator, responder)
}

// ── Full session ─────────────────────────────────────────────────────────

#[tokio::test]
async fn handshake_agrees_on_session_key() {
    let (initiator, responder) = established_pair().await;

    assert_eq!(initiator.role(), Some(Role::Initiator));
    assert_eq!(responder.role(), Some(Role::Responder));
    assert_eq!(initiator.state(), HandshakeState::SessionKeyEstablished);
    assert_eq!(responder.state(), HandshakeState::SessionKeyEstablished);

    let a = initiator.session_key().expect("initiator key");
    let b = responder.session_key().expect("responder key");
    assert_eq!(a, b);

    assert!(initiator.identity().has_peer_key());
    assert!(responder.identity().has_peer_key());
    assert!(initiator.identity().peer_fingerprint().is_some());
    assert!(responder.identity().peer_fingerprint().is_some());
}

#[tokio::test]
async fn integrity_round_detects_tampered_digest() {
    let (mut initiator, mut responder) = established_pair().await;

    let round = initiator.prepare_integrity_round(b"abc").unwrap();
    let expected = keyed_hash(initiator.session_key().unwrap(), b"abc").unwrap();
    assert_eq!(round.digest, expected.to_vec());

    initiator.send_integrity_round(&round).await.unwrap();
    let received = timeout(GUARD, responder.receive_integrity_round())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&received.message[..], b"abc");
    assert!(received.outcome.intact);
    assert_eq!(received.outcome.signature_valid, None);
    assert!(received.outcome.is_trusted());

    let mut tampered = round.clone();
    tampered.digest[0] ^= 0x01;
    initiator.send_integrity_round(&tampered).await.unwrap();
    let received = timeout(GUARD, responder.receive_integrity_round())
        .await
        .unwrap()
        .unwrap();
    assert!(!received.outcome.intact);
    assert!(!received.outcome.is_trusted());

    assert_eq!(initiator.state(), HandshakeState::Verified { rounds: 2 });
    assert_eq!(responder.state(), HandshakeState::Verified { rounds: 2 });
}

#[tokio::test]
async fn integrity_round_detects_tampered_message() {
    let (mut initiator, mut responder) = established_pair().await;

    let mut round = initiator.prepare_integrity_round(b"pay 100 to bob").unwrap();
    round.message = Bytes::from_static(b"pay 900 to bob");
    initiator.send_integrity_round(&round).await.unwrap();

    let received = timeout(GUARD, responder.receive_integrity_round())
        .await
        .unwrap()
        .unwrap();
    assert!(!received.outcome.intact);
    assert_ne!(&received.received_digest[..], &received.computed_digest[..]);
}

#[tokio::test]
async fn authenticated_round_reports_signature_validity() {
    let (mut initiator, mut responder) = established_pair().await;

    let round = initiator.prepare_authenticated_round(b"signed hello").unwrap();
    initiator.send_authenticated_round(&round).await.unwrap();
    let received = timeout(GUARD, responder.receive_authenticated_round())
        .await
        .unwrap()
        .unwrap();
    assert!(received.outcome.intact);
    assert_eq!(received.outcome.signature_valid, Some(true));
    assert_eq!(received.signature.as_deref(), Some(&round.signature[..]));

    let mut forged = round.clone();
    let last = forged.signature.len() - 1;
    forged.signature[last] ^= 0x01;
    initiator.send_authenticated_round(&forged).await.unwrap();
    let received = timeout(GUARD, responder.receive_authenticated_round())
        .await
        .unwrap()
        .unwrap();
    assert!(received.outcome.intact);
    assert_eq!(received.outcome.signature_valid, Some(false));
    assert!(!received.outcome.is_trusted());
}

#[tokio::test]
async fn authenticated_round_with_altered_digest_fails_both_checks() {
    let (mut initiator, mut responder) = established_pair().await;

    let mut round = initiator.prepare_authenticated_round(b"digest swap").unwrap();
    round.digest[5] ^= 0x40;
    initiator.send_authenticated_round(&round).await.unwrap();
    let received = timeout(GUARD, responder.receive_authenticated_round())
        .await
        .unwrap()
        .unwrap();
    assert!(!received.outcome.intact);
    assert_eq!(received.outcome.signature_valid, Some(false));
}

#[tokio::test]
async fn rounds_run_in_either_direction() {
    let (mut initiator, mut responder) = established_pair().await;

    let round = responder.prepare_authenticated_round(b"from the listener").unwrap();
    responder.send_authenticated_round(&round).await.unwrap();
    let received = timeout(GUARD, initiator.receive_authenticated_round())
        .await
        .unwrap()
        .unwrap();
    assert!(received.outcome.is_trusted());
    assert_eq!(&received.message[..], b"from the listener");
}

#[tokio::test]
async fn confidential_message_roundtrip() {
    let (mut initiator, mut responder) = established_pair().await;

    initiator.send_confidential(b"thirty bytes of secret payload").await.unwrap();
    let plain = timeout(GUARD, responder.receive_confidential())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(plain, b"thirty bytes of secret payload");
    assert_eq!(responder.state(), HandshakeState::SessionKeyEstablished);
}

// ── Key transport tampering ──────────────────────────────────────────────

#[tokio::test]
async fn bit_flipped_session_key_fails_at_decrypt() {
    let mut responder = Session::new(test_config(loopback())).unwrap();
    let addr = responder.listen().await.unwrap();

    // A hand-driven initiator that corrupts the transported key.
    let attacker = tokio::spawn(async move {
        let conn = pairstream::connect(addr, &ChannelConfig::default())
            .await
            .unwrap();
        let mut identity = Identity::new(MIN_RSA_BITS).unwrap();
        let theirs = conn.receive().await.unwrap();
        identity.import_peer_public_key(&theirs).unwrap();
        conn.send(&identity.export_public_key().unwrap()).await.unwrap();

        let key = SessionKey::generate();
        let mut sealed = identity.encrypt_for_peer(key.as_bytes()).unwrap();
        let mid = sealed.len() / 2;
        sealed[mid] ^= 0x01;
        conn.send(&sealed).await.unwrap();
        conn
    });

    timeout(GUARD, async {
        responder.accept().await.unwrap();
        responder.exchange_public_keys().await.unwrap();
    })
    .await
    .expect("key exchange timed out");

    let err = timeout(GUARD, responder.establish_session_key())
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, PairTrustError::Decryption(_)), "got {err:?}");
    assert_eq!(responder.state(), HandshakeState::KeysExchanged);
    assert!(responder.session_key().is_none());

    let conn = attacker.await.unwrap();
    conn.close().await;
}

// ── Role negotiation ─────────────────────────────────────────────────────

#[tokio::test]
async fn negotiate_connects_when_peer_listens() {
    let mut responder = Session::new(test_config(loopback())).unwrap();
    let addr = responder.listen().await.unwrap();
    let mut initiator = Session::new(test_config(addr)).unwrap();

    let (r, i) = timeout(GUARD, async {
        tokio::join!(
            async {
                responder.accept().await?;
                responder.exchange_public_keys().await?;
                Ok::<(), PairTrustError>(())
            },
            async {
                let role = initiator
                    .negotiate_role(|| panic!("must not be asked to listen"))
                    .await?;
                initiator.exchange_public_keys().await?;
                Ok::<_, PairTrustError>(role)
            },
        )
    })
    .await
    .expect("negotiation timed out");
    r.unwrap();
    assert_eq!(i.unwrap(), Some(Role::Initiator));
    assert_eq!(initiator.state(), HandshakeState::KeysExchanged);
    assert_eq!(responder.state(), HandshakeState::KeysExchanged);
}

#[tokio::test]
async fn negotiate_declined_stays_undetermined() {
    let probe_target = {
        let socket = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        socket.local_addr().unwrap()
    };
    let mut session = Session::new(test_config(probe_target)).unwrap();
    let role = timeout(GUARD, session.negotiate_role(|| false))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(role, None);
    assert_eq!(session.state(), HandshakeState::RoleUndetermined);
    assert_eq!(session.role(), None);
}

// ── Sequencing and close ─────────────────────────────────────────────────

#[tokio::test]
async fn operations_before_prerequisites_are_sequencing_errors() {
    let mut session = Session::new(test_config(loopback())).unwrap();
    assert!(matches!(
        session.receive_integrity_round().await,
        Err(PairTrustError::InvalidStateTransition { .. })
    ));
    assert!(matches!(
        session.prepare_authenticated_round(b"x"),
        Err(PairTrustError::InvalidStateTransition { .. })
    ));
    assert!(matches!(
        session.receive_confidential().await,
        Err(PairTrustError::InvalidStateTransition { .. })
    ));
}

#[tokio::test]
async fn close_twice_then_operations_fail() {
    let (mut initiator, mut responder) = established_pair().await;

    initiator.close().await;
    initiator.close().await;
    responder.close().await;
    responder.close().await;
    assert_eq!(initiator.state(), HandshakeState::Closed);
    assert_eq!(responder.state(), HandshakeState::Closed);
    assert!(initiator.connection().is_none());

    assert!(matches!(
        initiator.send_confidential(b"late").await,
        Err(PairTrustError::InvalidStateTransition { .. })
    ));
    assert!(matches!(
        responder.prepare_integrity_round(b"late"),
        Err(PairTrustError::InvalidStateTransition { .. })
    ));
}

#[tokio::test]
async fn peer_close_surfaces_as_transport_error() {
    let (mut initiator, mut responder) = established_pair().await;

    initiator.close().await;
    let err = timeout(GUARD, responder.receive_integrity_round())
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, PairTrustError::Transport(_)), "got {err:?}");
}
