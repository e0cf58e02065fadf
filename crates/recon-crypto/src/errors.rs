//! Crypto error types.

use thiserror::Error;

/// Cryptographic operation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed (bad padding, wrong key, or non UTF-8 plaintext)
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// Envelope is not valid base64
    #[error("Invalid envelope encoding: {0}")]
    InvalidEncoding(String),

    /// Envelope shorter than the IV it must start with
    #[error("Envelope too short: expected at least {minimum} bytes, got {actual}")]
    EnvelopeTooShort {
        /// Minimum decoded length in bytes
        minimum: usize,
        /// Actual decoded length in bytes
        actual: usize,
    },

    /// Invalid key length
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length in bytes
        expected: usize,
        /// Actual key length in bytes
        actual: usize,
    },
}
