//! # Session Key Derivation
//!
//! `key = SHA-256(secret + "_" + nonce + "_" + timestamp)`
//!
//! Both directions of an exchange use this derivation: the client with its
//! own nonce/timestamp, the server with freshly generated ones.

use sha2::{Digest, Sha256};
use zeroize::Zeroize;

/// Derived key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;

/// Single-message symmetric key (256-bit).
#[derive(Clone, PartialEq, Eq, Zeroize)]
#[zeroize(drop)]
pub struct SessionKey([u8; KEY_LEN]);

impl SessionKey {
    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Get inner bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Derive the key for one message.
///
/// Deterministic: the same `(secret, nonce, timestamp)` triple always yields
/// the same key, and changing any component changes it.
pub fn derive_key(secret: &str, nonce: &str, timestamp: i64) -> SessionKey {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b"_");
    hasher.update(nonce.as_bytes());
    hasher.update(b"_");
    hasher.update(timestamp.to_string().as_bytes());

    let mut bytes = [0u8; KEY_LEN];
    bytes.copy_from_slice(&hasher.finalize());
    SessionKey(bytes)
}
