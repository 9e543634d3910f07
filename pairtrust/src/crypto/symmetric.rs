// Session key, AES-128-CBC encrypt / decrypt, HMAC-SHA256 keyed hash.
//
// Confidentiality and integrity are separate steps: the cipher carries no
// authentication tag, and integrity rounds use `keyed_hash` on their own.

use std::fmt;

use aes::Aes128;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{PairTrustError, Result};

/// Session key length in bytes (AES-128).
pub const SESSION_KEY_LEN: usize = 16;

/// CBC initialisation vector length, prepended to every ciphertext.
pub const IV_LEN: usize = 16;

const BLOCK_LEN: usize = 16;

/// HMAC-SHA256 output length.
pub const DIGEST_LEN: usize = 32;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type HmacSha256 = Hmac<Sha256>;

/// Symmetric key shared by both peers once the handshake transports it.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    /// Fresh random key from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut key = [0u8; SESSION_KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Rebuild a key from its raw bytes, e.g. after RSA transport.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let key: [u8; SESSION_KEY_LEN] = bytes.try_into().map_err(|_| {
            PairTrustError::InvalidKey(format!(
                "session key must be {SESSION_KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(key))
    }

    /// Owned copy of the raw key, wiped when dropped.
    pub fn to_bytes(&self) -> Zeroizing<[u8; SESSION_KEY_LEN]> {
        Zeroizing::new(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.0
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        self.0[..].ct_eq(&other.0[..]).into()
    }
}

impl Eq for SessionKey {}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// AES-128-CBC encrypt with PKCS#7 padding under a fresh random IV.
///
/// Returns IV || ciphertext.
pub fn encrypt(key: &SessionKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    encrypt_with_iv(key, &iv, plaintext)
}

/// As `encrypt`, with a caller-chosen IV. Never reuse an IV under one key.
pub fn encrypt_with_iv(key: &SessionKey, iv: &[u8; IV_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes128CbcEnc::new_from_slices(key.as_bytes(), iv)
        .map_err(|e| PairTrustError::Encryption(format!("cipher init: {e}")))?;
    let body = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    let mut out = Vec::with_capacity(IV_LEN + body.len());
    out.extend_from_slice(iv);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decrypt IV || ciphertext produced by `encrypt`.
///
/// A wrong key or altered ciphertext almost always breaks the padding and
/// yields `Decryption`. CBC has no tag, so a small fraction of alterations
/// still decrypt to garbage; integrity is the keyed hash's job.
pub fn decrypt(key: &SessionKey, data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < IV_LEN + BLOCK_LEN || (data.len() - IV_LEN) % BLOCK_LEN != 0 {
        return Err(PairTrustError::Decryption(format!(
            "ciphertext of {} bytes is not IV plus whole blocks",
            data.len()
        )));
    }
    let (iv, body) = data.split_at(IV_LEN);
    let cipher = Aes128CbcDec::new_from_slices(key.as_bytes(), iv)
        .map_err(|e| PairTrustError::Decryption(format!("cipher init: {e}")))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(body)
        .map_err(|_| PairTrustError::Decryption("bad padding: wrong key or tampered ciphertext".into()))
}

/// HMAC-SHA256 of `message` under the session key.
pub fn keyed_hash(key: &SessionKey, message: &[u8]) -> Result<[u8; DIGEST_LEN]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
        .map_err(|e| PairTrustError::InvalidKey(format!("hmac init: {e}")))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().into())
}

/// Byte equality whose running time does not depend on where the first
/// difference sits. Different lengths compare unequal.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Random application payload of `len` bytes.
pub fn random_message(len: usize) -> Vec<u8> {
    let mut message = vec![0u8; len];
    OsRng.fill_bytes(&mut message);
    message
}
