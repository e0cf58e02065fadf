//! Client side of the protocol: sealing commands and opening replies.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::RngCore;
use recon_crypto::{decrypt, derive_key, encrypt, CryptoError};
use thiserror::Error;

use crate::domain::types::{CommandRequest, CommandResponse, FailureBody, COMMAND_PREFIX};

/// Client-side failures
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("gateway rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("reply could not be opened: {0}")]
    Crypto(#[from] CryptoError),

    #[error("reply is for user {0}")]
    WrongUser(String),

    #[error("reply reused the request nonce")]
    NonceReused,
}

/// Decrypted reply to one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub success: bool,
    /// Output with formatting codes
    pub rich_text: String,
    /// Output without formatting codes
    pub plain_text: String,
    pub error: Option<String>,
}

/// A credential as held by the client.
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub user: String,
    pub secret: String,
}

impl ClientCredentials {
    pub fn new(user: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            secret: secret.into(),
        }
    }

    /// Build a request body for `command` under the given nonce and timestamp.
    pub fn seal(
        &self,
        command: &str,
        queue: bool,
        nonce: &str,
        timestamp: i64,
    ) -> Result<CommandRequest, ClientError> {
        let key = derive_key(&self.secret, nonce, timestamp);
        let sealed = encrypt(&format!("{COMMAND_PREFIX}{command}"), &key)?;
        Ok(CommandRequest {
            user: self.user.clone(),
            nonce: nonce.to_string(),
            timestamp,
            queue,
            command: sealed,
        })
    }

    /// Open a 200 reply using the server's nonce and timestamp.
    pub fn open(&self, response: &CommandResponse) -> Result<CommandReply, ClientError> {
        if response.user != self.user {
            return Err(ClientError::WrongUser(response.user.clone()));
        }
        let key = derive_key(&self.secret, &response.nonce, response.timestamp);
        Ok(CommandReply {
            success: response.success,
            rich_text: decrypt(&response.response, &key)?,
            plain_text: decrypt(&response.plain_response, &key)?,
            error: response.error.clone(),
        })
    }
}

/// Fresh random nonce, 16 bytes hex encoded.
pub fn random_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// HTTP client for a command gateway.
#[derive(Debug, Clone)]
pub struct ReconClient {
    http: reqwest::Client,
    endpoint: String,
    credentials: ClientCredentials,
}

impl ReconClient {
    /// `base_url` is the gateway root, e.g. `http://127.0.0.1:4567`.
    pub fn new(base_url: &str, credentials: ClientCredentials) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/", base_url.trim_end_matches('/')),
            credentials,
        })
    }

    pub fn credentials(&self) -> &ClientCredentials {
        &self.credentials
    }

    /// Seal, send and open one command.
    pub async fn send_command(&self, command: &str, queue: bool) -> Result<CommandReply, ClientError> {
        let nonce = random_nonce();
        let request = self
            .credentials
            .seal(command, queue, &nonce, unix_now())?;
        let response = self.send_raw(&request).await?;
        if response.nonce == nonce {
            return Err(ClientError::NonceReused);
        }
        self.credentials.open(&response)
    }

    /// Send an already sealed request and return the sealed reply.
    pub async fn send_raw(&self, request: &CommandRequest) -> Result<CommandResponse, ClientError> {
        let response = self.http.post(&self.endpoint).json(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<CommandResponse>().await?);
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<FailureBody>(&text)
            .map(|body| body.error)
            .unwrap_or(text);
        Err(ClientError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
