//! # Recon Crypto - Per-Message Envelope Primitives
//!
//! Every request and every response in the Recon protocol is sealed under a
//! key that exists for exactly one message.
//!
//! ## Components
//!
//! | Module | Algorithm | Use Case |
//! |--------|-----------|----------|
//! | `hashing` | SHA-256 | Session key derivation from `secret_nonce_timestamp` |
//! | `symmetric` | AES-256-CBC + PKCS#7 | Payload encryption, IV prepended, base64 framed |
//!
//! ## Security Properties
//!
//! - A fresh 16-byte IV is drawn per call, so identical plaintexts never
//!   produce identical envelopes.
//! - Derived keys are zeroized on drop.
//! - CBC carries no authentication tag. Integrity comes from the protocol
//!   layer (required payload prefix, nonce and timestamp binding).

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod errors;
pub mod hashing;
pub mod symmetric;

// Re-exports
pub use errors::CryptoError;
pub use hashing::{derive_key, SessionKey};
pub use symmetric::{decrypt, encrypt, IV_LEN};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
