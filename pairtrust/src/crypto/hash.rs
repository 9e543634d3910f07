// SHA-256 hashing and public key fingerprints.

use sha2::{Digest, Sha256};

/// SHA-256 hash of `data`, returning a 32-byte digest.
pub fn hash_sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    out
}

/// Human-readable fingerprint of an encoded public key: colon-separated hex
/// of the first 16 bytes of its SHA-256.
pub fn fingerprint(encoded_key: &[u8]) -> String {
    hash_sha256(encoded_key)[..16]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}
