// Allow missing docs for internal items in development
#![allow(missing_docs)]

//! Recon Gateway - authenticated remote command execution over HTTP.
//!
//! A client holding a shared secret seals a command under a key derived from
//! `(secret, nonce, timestamp)` and POSTs it to `/`. The gateway checks rate,
//! identity, source address, freshness and nonce uniqueness, decrypts the
//! command, runs it on the owner context of its target and returns the output
//! sealed under a fresh server nonce.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       RECON GATEWAY                              │
//! ├──────────────────────────────────────────────────────────────────┤
//! │   POST /  ──►  ClientIp → RateLimit → Parse → Directory          │
//! │                   → AllowList → Timestamp → Nonce → Decrypt      │
//! │                                   │                              │
//! │  ┌────────────────────────────────┴──────────────────────────┐   │
//! │  │                   Command Bridge                          │   │
//! │  │   oneshot handoff · scoped privileges · output capture    │   │
//! │  └──────────────┬──────────────────────────┬─────────────────┘   │
//! │                 │ online                   │ offline + queue     │
//! │                 ▼                          ▼                     │
//! │        ExecutionHost owner         OfflineQueue (replayed        │
//! │        (console / actor)           on actor arrival)             │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use recon_gateway::{GatewayConfig, GatewayDependencies, GatewayService};
//!
//! let mut service = GatewayService::new(GatewayConfig::default(), deps)?;
//! let addr = service.start().await?;
//! ```
//!
//! # Security
//!
//! - Per-IP sliding-window rate limiting, applied before the body is read
//! - Global and per-credential source address allow-lists
//! - Timestamp tolerance plus a bounded-lifetime nonce table
//! - AES-256-CBC envelopes keyed per request; replies use a fresh server nonce

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod bridge;
pub mod client;
pub mod domain;
pub mod handler;
pub mod middleware;
pub mod ports;
pub mod service;

/// Tracing target for per-request audit records.
pub const AUDIT_TARGET: &str = "recon::audit";

// Re-exports
pub use adapters::{
    CachedUserDirectory, CaptureRegistry, JsonFileStorage, LocalExecutionHost, MemoryStorage,
    OfflineQueueStore,
};
pub use bridge::{CommandBridge, ExecutionRequest};
pub use client::{ClientCredentials, ClientError, CommandReply, ReconClient};
pub use domain::{
    ApiError, CommandRequest, CommandResponse, Credential, ExecutionContext, ExecutionOutcome,
    GatewayConfig, GatewayError, PrivilegeSpec,
};
pub use handler::GatewayHandler;
pub use service::{GatewayDependencies, GatewayService};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
