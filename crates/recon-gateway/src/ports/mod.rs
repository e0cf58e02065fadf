//! Ports for the command gateway.

pub mod outbound;

pub use outbound::*;
