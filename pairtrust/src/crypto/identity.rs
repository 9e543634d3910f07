// RSA identity: lazily generated keypair, peer public key import, OAEP
// encrypt/decrypt and PKCS#1 v1.5 sign/verify.

use std::fmt;

use rand::rngs::OsRng;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use crate::crypto::hash::fingerprint;
use crate::error::{PairTrustError, Result};

/// Modulus size used when none is configured.
pub const DEFAULT_RSA_BITS: usize = 2048;

/// Smallest modulus accepted. Still leaves room for a SHA-256 OAEP block
/// carrying a 32-byte digest.
pub const MIN_RSA_BITS: usize = 1024;

/// OAEP overhead is two SHA-256 digests plus two bytes.
const OAEP_OVERHEAD: usize = 2 * 32 + 2;

struct PeerKey {
    key: RsaPublicKey,
    fingerprint: String,
}

/// This process's RSA keypair plus the peer's public key once learned.
///
/// The keypair is generated on first use and kept for the lifetime of the
/// identity. The private half never leaves it.
pub struct Identity {
    bits: usize,
    keypair: Option<RsaPrivateKey>,
    peer: Option<PeerKey>,
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("bits", &self.bits)
            .field("generated", &self.keypair.is_some())
            .field("peer", &self.peer.as_ref().map(|p| p.fingerprint.as_str()))
            .finish()
    }
}

impl Identity {
    /// An identity whose keypair will be generated with `bits` on first use.
    pub fn new(bits: usize) -> Result<Self> {
        if bits < MIN_RSA_BITS {
            return Err(PairTrustError::KeyGeneration(format!(
                "RSA modulus of {bits} bits is below the minimum of {MIN_RSA_BITS}"
            )));
        }
        Ok(Self {
            bits,
            keypair: None,
            peer: None,
        })
    }

    /// Create an identity and generate its keypair immediately.
    pub fn generate(bits: usize) -> Result<Self> {
        let mut identity = Self::new(bits)?;
        identity.keypair()?;
        Ok(identity)
    }

    pub fn bits(&self) -> usize {
        self.bits
    }

    /// Return the keypair, generating it from the OS CSPRNG on first call.
    pub fn keypair(&mut self) -> Result<&RsaPrivateKey> {
        let key = match self.keypair.take() {
            Some(key) => key,
            None => {
                let key = RsaPrivateKey::new(&mut OsRng, self.bits)
                    .map_err(|e| PairTrustError::KeyGeneration(e.to_string()))?;
                tracing::info!(bits = self.bits, "generated RSA keypair");
                key
            }
        };
        Ok(self.keypair.insert(key))
    }

    /// Our public key as X.509 SubjectPublicKeyInfo DER.
    pub fn export_public_key(&mut self) -> Result<Vec<u8>> {
        let public = self.keypair()?.to_public_key();
        let der = public
            .to_public_key_der()
            .map_err(|e| PairTrustError::InvalidKey(format!("encode public key: {e}")))?;
        Ok(der.as_bytes().to_vec())
    }

    /// Decode and store the peer's public key.
    ///
    /// Malformed input leaves any previously stored peer key in place. The
    /// key is trusted on first use; its fingerprint is logged, not checked.
    pub fn import_peer_public_key(&mut self, encoded: &[u8]) -> Result<()> {
        let key = RsaPublicKey::from_public_key_der(encoded)
            .map_err(|e| PairTrustError::InvalidKey(format!("decode peer public key: {e}")))?;
        let fingerprint = fingerprint(encoded);
        tracing::info!(peer = %fingerprint, bits = key.size() * 8, "imported peer public key");
        self.peer = Some(PeerKey { key, fingerprint });
        Ok(())
    }

    pub fn has_peer_key(&self) -> bool {
        self.peer.is_some()
    }

    /// Fingerprint of the imported peer key, if any.
    pub fn peer_fingerprint(&self) -> Option<&str> {
        self.peer.as_ref().map(|p| p.fingerprint.as_str())
    }

    /// Largest plaintext `encrypt_for_peer` accepts for the current peer key.
    pub fn max_plaintext_len(&self) -> Result<usize> {
        let peer = self.peer.as_ref().ok_or(PairTrustError::MissingPeerKey)?;
        Ok(peer.key.size().saturating_sub(OAEP_OVERHEAD))
    }

    /// RSA-OAEP(SHA-256) encrypt a short payload to the peer.
    pub fn encrypt_for_peer(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let peer = self.peer.as_ref().ok_or(PairTrustError::MissingPeerKey)?;
        let max = peer.key.size().saturating_sub(OAEP_OVERHEAD);
        if plaintext.len() > max {
            return Err(PairTrustError::PlaintextTooLarge {
                len: plaintext.len(),
                max,
            });
        }
        peer.key
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)
            .map_err(|e| PairTrustError::Encryption(e.to_string()))
    }

    /// RSA-OAEP(SHA-256) decrypt with our private key.
    pub fn decrypt_mine(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let key = self
            .keypair
            .as_ref()
            .ok_or(PairTrustError::MissingPrivateKey)?;
        key.decrypt(Oaep::new::<Sha256>(), ciphertext)
            .map_err(|e| PairTrustError::Decryption(e.to_string()))
    }

    /// Sign `digest` (RSASSA-PKCS1-v1_5 over SHA-256). Deterministic.
    pub fn sign(&self, digest: &[u8]) -> Result<Vec<u8>> {
        let key = self
            .keypair
            .as_ref()
            .ok_or(PairTrustError::MissingPrivateKey)?;
        let signing_key = SigningKey::<Sha256>::new(key.clone());
        let signature = signing_key
            .try_sign(digest)
            .map_err(|e| PairTrustError::Signing(e.to_string()))?;
        Ok(signature.to_vec())
    }

    /// Check a signature over `digest` against the peer's public key.
    ///
    /// A wrong or malformed signature is `Ok(false)`, never an error.
    pub fn verify(&self, digest: &[u8], signature: &[u8]) -> Result<bool> {
        let peer = self.peer.as_ref().ok_or(PairTrustError::MissingPeerKey)?;
        let Ok(signature) = Signature::try_from(signature) else {
            return Ok(false);
        };
        let verifying_key = VerifyingKey::<Sha256>::new(peer.key.clone());
        Ok(verifying_key.verify(digest, &signature).is_ok())
    }
}
