//! # Attack Simulations
//!
//! Each module plays one class of hostile client against an in-process
//! gateway and asserts the defense holds.
//!
//! - `replay` - resubmitting captured requests, clock skew abuse
//! - `flooding` - request floods against the per-address limiter
//! - `tampering` - ciphertext and envelope manipulation
//! - `spoofing` - forged forwarding headers and allow-list bypass

pub mod flooding;
pub mod replay;
pub mod spoofing;
pub mod tampering;
