//! Gateway error taxonomy and HTTP status mapping.
//!
//! Every pipeline stage fails with one [`ApiError`]; the handler turns it into
//! a plaintext `{"success":false,"error":...}` body. Pre-authentication
//! failures cannot be encrypted because no shared key exists yet.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::fmt;

use crate::domain::types::FailureBody;

/// Malformed or misdirected requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Anything other than POST
    #[error("only POST is accepted")]
    BadMethod,
    /// Anything other than `/`
    #[error("only the root path is served")]
    BadPath,
    /// Body is not a JSON object of the expected shape
    #[error("invalid json")]
    InvalidJson,
    /// One of user/nonce/timestamp/command is absent
    #[error("missing required fields")]
    MissingFields,
    /// Decrypted payload lacks the protocol tag
    #[error("invalid command format")]
    BadPrefix,
    /// Body could not be read (too large or connection error)
    #[error("unreadable request body")]
    UnreadableBody,
}

/// Which allow-list rejected the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowListScope {
    /// Gateway-wide list
    Global,
    /// List attached to the credential
    Credential,
}

impl fmt::Display for AllowListScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllowListScope::Global => f.write_str("global"),
            AllowListScope::Credential => f.write_str("user"),
        }
    }
}

/// Identity and network-origin failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No credential under that identity
    #[error("unknown user")]
    UnknownIdentity,
    /// Caller address not on a non-empty allow-list
    #[error("ip address not allowed ({0} allow-list)")]
    IpNotAllowed(AllowListScope),
}

/// Freshness failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ReplayError {
    /// Client clock too far from server clock
    #[error("timestamp out of range")]
    TimestampOutOfRange,
    /// Nonce already seen inside the replay window
    #[error("nonce already used")]
    NonceReused,
}

/// Payload could not be opened with the derived key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecryptError {
    /// Wrong secret, tampered envelope, or garbage
    #[error("decryption failed")]
    DecryptFailed,
}

/// A terminal pipeline failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// 400/401/404 depending on the variant
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// 401/403
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// 401
    #[error(transparent)]
    Replay(#[from] ReplayError),
    /// 401
    #[error(transparent)]
    Crypto(#[from] DecryptError),
    /// 429
    #[error("rate limit exceeded")]
    RateLimited,
    /// 500; the detail is logged, never returned
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// HTTP status for this failure
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Protocol(ProtocolError::BadMethod | ProtocolError::BadPath) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Protocol(
                ProtocolError::InvalidJson
                | ProtocolError::MissingFields
                | ProtocolError::UnreadableBody,
            ) => StatusCode::BAD_REQUEST,
            ApiError::Protocol(ProtocolError::BadPrefix) => StatusCode::UNAUTHORIZED,
            ApiError::Auth(AuthError::UnknownIdentity) => StatusCode::UNAUTHORIZED,
            ApiError::Auth(AuthError::IpNotAllowed(_)) => StatusCode::FORBIDDEN,
            ApiError::Replay(_) | ApiError::Crypto(_) => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-safe message
    pub fn public_message(&self) -> String {
        match self {
            ApiError::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }

    /// Short label used in audit records
    pub fn audit_label(&self) -> &'static str {
        match self {
            ApiError::Protocol(ProtocolError::BadMethod) => "bad method",
            ApiError::Protocol(ProtocolError::BadPath) => "bad path",
            ApiError::Protocol(ProtocolError::InvalidJson) => "invalid json",
            ApiError::Protocol(ProtocolError::MissingFields) => "missing fields",
            ApiError::Protocol(ProtocolError::BadPrefix) => "invalid prefix",
            ApiError::Protocol(ProtocolError::UnreadableBody) => "unreadable body",
            ApiError::Auth(AuthError::UnknownIdentity) => "unknown user",
            ApiError::Auth(AuthError::IpNotAllowed(_)) => "blocked",
            ApiError::Replay(ReplayError::TimestampOutOfRange) => "invalid timestamp",
            ApiError::Replay(ReplayError::NonceReused) => "duplicate nonce",
            ApiError::Crypto(_) => "decrypt failed",
            ApiError::RateLimited => "rate limited",
            ApiError::Internal(_) => "internal error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = FailureBody {
            success: false,
            error: self.public_message(),
        };
        (self.status(), Json(body)).into_response()
    }
}

/// Result type for pipeline stages
pub type ApiResult<T> = Result<T, ApiError>;

/// Failures inside the command bridge. Never surfaced as an HTTP error:
/// they become `ExecutionOutcome { success: false, error }`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    /// Actor absent and queuing not permitted
    #[error("actor offline")]
    ActorOfflineQueueDisabled,
    /// Dispatch raised an error or panicked
    #[error("command execution failed: {0}")]
    DispatchException(String),
    /// Deadline elapsed before the owner context reported back
    #[error("internal timeout")]
    InternalTimeout,
    /// Dispatch ran and returned `false`
    #[error("command returned failure")]
    DispatchReturnedFailure,
    /// The owner context refused or dropped the task
    #[error("scheduling failed: {0}")]
    Scheduling(String),
    /// The offline queue could not take the command
    #[error("queue unavailable: {0}")]
    QueueUnavailable(String),
}

/// Gateway-level errors (service lifecycle, internal use)
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Server socket bind error
    #[error("server bind error: {0}")]
    Bind(String),

    /// Server stopped with an I/O error
    #[error("server error: {0}")]
    Serve(String),

    /// Service already running
    #[error("gateway already started")]
    AlreadyStarted,

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}
