//! Domain types for the command gateway.
//!
//! This module contains the core types, configuration, and error handling.
//! Concurrency state (nonce and rate tables) lives in `middleware`.

pub mod config;
pub mod credential;
pub mod error;
pub mod outcome;
pub mod types;

// Re-exports for convenience
pub use config::{ExecutionConfig, GatewayConfig};
pub use credential::{Credential, ExecutionContext, PrivilegeSpec};
pub use error::{ApiError, ApiResult, ExecutionError, GatewayError};
pub use outcome::{strip_formatting, CapturedOutput, ExecutionOutcome};
pub use types::*;
