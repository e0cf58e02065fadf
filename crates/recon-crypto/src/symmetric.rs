//! # Symmetric Envelopes
//!
//! AES-256-CBC with PKCS#7 padding. Wire layout before base64 framing:
//!
//! ```text
//! ┌──────────────┬────────────────────────────┐
//! │  IV (16 B)   │  ciphertext (n * 16 B)     │
//! └──────────────┴────────────────────────────┘
//! ```

use crate::{CryptoError, SessionKey};
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD, Engine as _};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Initialization vector length in bytes (one AES block).
pub const IV_LEN: usize = 16;

/// Encrypt `plaintext` under `key` and return the base64 envelope.
///
/// A new random IV is drawn on every call.
///
/// # Errors
///
/// Returns `CryptoError::EncryptionFailed` if the cipher cannot be keyed.
pub fn encrypt(plaintext: &str, key: &SessionKey) -> Result<String, CryptoError> {
    let mut iv = [0u8; IV_LEN];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut iv);
    encrypt_with_iv(plaintext.as_bytes(), key, &iv)
}

fn encrypt_with_iv(
    plaintext: &[u8],
    key: &SessionKey,
    iv: &[u8; IV_LEN],
) -> Result<String, CryptoError> {
    let cipher = Aes256CbcEnc::new_from_slices(key.as_bytes(), iv)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut envelope = Vec::with_capacity(IV_LEN + ciphertext.len());
    envelope.extend_from_slice(iv);
    envelope.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(envelope))
}

/// Open a base64 envelope produced by [`encrypt`].
///
/// # Errors
///
/// - `CryptoError::InvalidEncoding` - not base64
/// - `CryptoError::EnvelopeTooShort` - decoded length under [`IV_LEN`]
/// - `CryptoError::DecryptionFailed` - bad block length, bad padding, or the
///   plaintext is not UTF-8 (almost always a wrong key)
pub fn decrypt(envelope_b64: &str, key: &SessionKey) -> Result<String, CryptoError> {
    let envelope = STANDARD
        .decode(envelope_b64)
        .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;

    if envelope.len() < IV_LEN {
        return Err(CryptoError::EnvelopeTooShort {
            minimum: IV_LEN,
            actual: envelope.len(),
        });
    }

    let (iv, ciphertext) = envelope.split_at(IV_LEN);
    let cipher = Aes256CbcDec::new_from_slices(key.as_bytes(), iv)
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;
    let plaintext = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed("invalid padding".into()))?;

    String::from_utf8(plaintext)
        .map_err(|_| CryptoError::DecryptionFailed("plaintext is not valid UTF-8".into()))
}
