//! Wire types for the single `POST /` endpoint.

use serde::{Deserialize, Serialize};

use crate::domain::error::ProtocolError;

/// Tag every decrypted command payload must start with.
pub const COMMAND_PREFIX: &str = "RCON_";

/// A sealed command as sent by a client.
///
/// `command` is the base64 envelope of `RCON_<command text>` under
/// `derive_key(secret, nonce, timestamp)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Credential identity
    pub user: String,
    /// Client nonce, single use
    pub nonce: String,
    /// Client clock, unix seconds
    pub timestamp: i64,
    /// Queue the command if the target actor is offline
    #[serde(default)]
    pub queue: bool,
    /// Base64 envelope
    pub command: String,
}

/// Request body as received. Every field is optional so that presence is
/// checked separately from shape.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct IncomingRequest {
    user: Option<String>,
    nonce: Option<String>,
    timestamp: Option<i64>,
    queue: Option<bool>,
    command: Option<String>,
}

impl IncomingRequest {
    pub(crate) fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(body).map_err(|_| ProtocolError::InvalidJson)
    }

    pub(crate) fn into_command_request(self) -> Result<CommandRequest, ProtocolError> {
        match (self.user, self.nonce, self.timestamp, self.command) {
            (Some(user), Some(nonce), Some(timestamp), Some(command)) => Ok(CommandRequest {
                user,
                nonce,
                timestamp,
                queue: self.queue.unwrap_or(false),
                command,
            }),
            _ => Err(ProtocolError::MissingFields),
        }
    }
}

/// Reply to an authenticated request.
///
/// `nonce`/`timestamp` are freshly generated by the server; `response` and
/// `plainResponse` are sealed under `derive_key(secret, nonce, timestamp)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    /// Echo of the credential identity
    pub user: String,
    /// Server nonce
    pub nonce: String,
    /// Server clock, unix seconds
    pub timestamp: i64,
    /// Outcome of the command itself
    pub success: bool,
    /// Sealed output with formatting codes
    pub response: String,
    /// Sealed output without formatting codes
    pub plain_response: String,
    /// Present only when `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of every non-200 reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureBody {
    /// Always false
    pub success: bool,
    /// Human-readable reason
    pub error: String,
}
