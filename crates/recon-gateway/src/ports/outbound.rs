//! Outbound ports for the command gateway.
//!
//! The gateway owns none of these collaborators. Each deployment plugs in its
//! own host runtime, user store and queue store behind these traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{CapturedOutput, Credential, ExecutionContext};

/// Time source trait for testability
pub trait TimeSource: Send + Sync {
    /// Wall clock, unix seconds
    fn now(&self) -> u64;
}

/// System time implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            // Clock before Unix epoch - return 0 rather than panic
            .unwrap_or(0)
    }
}

// =============================================================================
// USER DIRECTORY
// =============================================================================

/// User directory errors
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage document is malformed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid credential: {0}")]
    InvalidCredential(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Read/write contract of the credential store.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Credential for `identity`, if any
    async fn lookup(&self, identity: &str) -> Option<Credential>;
    /// Insert or replace by identity
    async fn upsert(&self, credential: Credential) -> Result<(), DirectoryError>;
    /// Remove by identity; `Ok(false)` if it did not exist
    async fn remove(&self, identity: &str) -> Result<bool, DirectoryError>;
    /// Whether `identity` exists
    async fn exists(&self, identity: &str) -> bool;
    /// First credential that targets `actor`
    async fn find_by_actor(&self, actor: &str) -> Option<Credential>;
}

// =============================================================================
// OFFLINE QUEUE
// =============================================================================

/// Offline queue errors
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("queue document is malformed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A command parked for an offline actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedCommand {
    /// Command text, prefix already stripped
    pub command: String,
    /// When it was queued, unix seconds
    #[serde(rename = "timestamp")]
    pub enqueued_at: i64,
    /// Identity of the credential that queued it
    #[serde(rename = "user")]
    pub requester: String,
}

/// Enqueue/dequeue contract of the offline queue store.
#[async_trait]
pub trait OfflineQueue: Send + Sync {
    /// Append to `actor`'s queue
    async fn enqueue(&self, actor: &str, command: &str, requester: &str) -> Result<(), QueueError>;

    /// Take everything queued for `actor`, oldest first, leaving it empty
    async fn drain_and_clear(&self, actor: &str) -> Result<Vec<QueuedCommand>, QueueError>;

    /// Put drained entries back in front of anything queued since
    async fn requeue(&self, actor: &str, entries: Vec<QueuedCommand>) -> Result<(), QueueError> {
        let newer = self.drain_and_clear(actor).await?;
        for entry in entries.into_iter().chain(newer) {
            self.enqueue(actor, &entry.command, &entry.requester).await?;
        }
        Ok(())
    }

    /// Drop expired entries; returns how many were removed
    async fn purge_expired(&self) -> Result<usize, QueueError> {
        Ok(0)
    }
}

// =============================================================================
// EXECUTION HOST
// =============================================================================

/// Host runtime errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("owner context unavailable: {0}")]
    OwnerUnavailable(String),
    #[error("operation rejected: {0}")]
    Rejected(String),
}

/// Error raised by a dispatch itself (as opposed to a `false` return).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("{0}")]
    Failed(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

/// Handle for a temporary permission attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GrantId(pub u64);

/// What an owner task can do to the context it runs in.
///
/// Only ever handed out by the owner context itself, so every call happens on
/// the thread that owns the underlying state.
pub trait OwnerScope {
    /// Context this scope belongs to
    fn context(&self) -> &ExecutionContext;
    /// Run one command; `Ok(false)` is the command's own failure signal.
    ///
    /// Lines the command addresses to its sender go to `output` only, so
    /// two dispatches on the same context never see each other's replies.
    /// With no handle they go to whatever is capturing the context.
    fn dispatch(&mut self, command: &str, output: Option<CaptureHandle>) -> Result<bool, DispatchError>;
    /// Current elevation state
    fn is_elevated(&self) -> bool;
    /// Change elevation state
    fn set_elevated(&mut self, elevated: bool) -> Result<(), HostError>;
    /// Attach permissions until [`OwnerScope::detach_grants`]
    fn attach_grants(&mut self, grants: &[String]) -> Result<GrantId, HostError>;
    /// Remove a previous attachment
    fn detach_grants(&mut self, grant: GrantId) -> Result<(), HostError>;
}

/// Unit of work run on an owner context.
pub type OwnerTask = Box<dyn FnOnce(&mut dyn OwnerScope) + Send + 'static>;

/// Partitioned-ownership runtime that executes commands.
pub trait ExecutionHost: Send + Sync {
    /// Queue `task` on the single global owner
    fn schedule_on_global_owner(&self, task: OwnerTask) -> Result<(), HostError>;

    /// Queue `task` on the owner of `actor`. `Ok(false)` means the actor is
    /// not present; the task is dropped without running.
    fn schedule_on_actor_owner(&self, actor: &str, task: OwnerTask) -> Result<bool, HostError>;
}

// =============================================================================
// OUTPUT CAPTURE
// =============================================================================

/// Handle for one active capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureHandle(pub u64);

/// Collects the lines a context emits between begin and end.
///
/// A capture receives the replies of the dispatch it was handed to, plus
/// ambient lines addressed to its actor context. Console captures only ever
/// receive their own dispatch's replies.
pub trait OutputCapture: Send + Sync {
    /// Start collecting output for `context`
    fn begin_capture(&self, context: &ExecutionContext) -> CaptureHandle;
    /// Stop collecting and return everything seen
    fn end_capture(&self, handle: CaptureHandle) -> CapturedOutput;
}
