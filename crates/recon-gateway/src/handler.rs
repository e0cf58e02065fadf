//! Request pipeline for `POST /`.
//!
//! Stages run strictly in this order; the first failure is terminal:
//!
//! | # | Stage | Failure |
//! |---|-------|---------|
//! | 1 | method / path | 404 |
//! | 2 | rate limit by client address | 429 |
//! | 3 | body read + JSON parse | 400 |
//! | 4 | required fields | 400 |
//! | 5 | identity lookup | 401 |
//! | 6 | global, then per-credential allow-list | 403 |
//! | 7 | timestamp freshness | 401 |
//! | 8 | nonce single use | 401 |
//! | 9 | decrypt | 401 |
//! | 10 | `RCON_` tag | 401 |
//! | 11 | bridge dispatch | in body |
//! | 12 | sealed response | 500 if sealing fails |
//!
//! A panic anywhere in the pipeline becomes a generic 500.

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Method, Request};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::FutureExt;
use recon_crypto::{decrypt, derive_key, encrypt};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bridge::{CommandBridge, ExecutionRequest};
use crate::bridge::privilege::panic_message;
use crate::domain::error::{AllowListScope, AuthError, DecryptError, ProtocolError};
use crate::domain::{
    ApiError, ApiResult, CommandRequest, CommandResponse, Credential, ExecutionOutcome,
    GatewayConfig, IncomingRequest, COMMAND_PREFIX,
};
use crate::middleware::{AllowList, ClientIp, RateLimitState, ReplayGuard};
use crate::ports::{TimeSource, UserDirectory};
use crate::AUDIT_TARGET;

/// What gets written to the audit log for one request.
#[derive(Debug)]
struct AuditRecord {
    ip: IpAddr,
    user: Option<String>,
    command: Option<String>,
}

impl AuditRecord {
    fn user(&self) -> &str {
        self.user.as_deref().unwrap_or("-")
    }
}

/// Shared state behind the single route.
pub struct GatewayHandler {
    rate_limit: Arc<RateLimitState>,
    replay: Arc<ReplayGuard>,
    global_allow_list: AllowList,
    directory: Arc<dyn UserDirectory>,
    bridge: Arc<CommandBridge>,
    clock: Arc<dyn TimeSource>,
    max_body_bytes: usize,
    allow_queue_for_all_users: bool,
}

impl GatewayHandler {
    pub fn new(
        config: &GatewayConfig,
        rate_limit: Arc<RateLimitState>,
        replay: Arc<ReplayGuard>,
        directory: Arc<dyn UserDirectory>,
        bridge: Arc<CommandBridge>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            rate_limit,
            replay,
            global_allow_list: AllowList::new(&config.security.global_ip_allowlist),
            directory,
            bridge,
            clock,
            max_body_bytes: config.http.max_body_bytes,
            allow_queue_for_all_users: config.execution.allow_queue_for_all_users,
        }
    }

    /// Run one request through the pipeline. Never fails; every outcome is a
    /// JSON response.
    pub async fn handle(&self, request: Request<Body>) -> Response {
        let mut audit = AuditRecord {
            ip: client_ip(&request),
            user: None,
            command: None,
        };

        let result = AssertUnwindSafe(self.process(request, &mut audit))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(response)) => {
                info!(
                    target: AUDIT_TARGET,
                    ip = %audit.ip,
                    user = %audit.user(),
                    command = %audit.command.as_deref().unwrap_or(""),
                    success = response.success,
                    outcome = "accepted",
                    "Command accepted"
                );
                Json(response).into_response()
            }
            Ok(Err(err)) => {
                if let ApiError::Internal(detail) = &err {
                    error!(ip = %audit.ip, user = %audit.user(), detail = %detail, "Internal error");
                }
                warn!(
                    target: AUDIT_TARGET,
                    ip = %audit.ip,
                    user = %audit.user(),
                    outcome = err.audit_label(),
                    "Request rejected"
                );
                err.into_response()
            }
            Err(panic) => {
                let detail = panic_message(panic.as_ref());
                error!(ip = %audit.ip, user = %audit.user(), panic = %detail, "Request handler panicked");
                ApiError::Internal(detail).into_response()
            }
        }
    }

    async fn process(
        &self,
        request: Request<Body>,
        audit: &mut AuditRecord,
    ) -> ApiResult<CommandResponse> {
        if request.method() != Method::POST {
            return Err(ProtocolError::BadMethod.into());
        }
        if request.uri().path() != "/" {
            return Err(ProtocolError::BadPath.into());
        }

        if !self.rate_limit.allow(&audit.ip.to_string()) {
            return Err(ApiError::RateLimited);
        }

        let body = axum::body::to_bytes(request.into_body(), self.max_body_bytes)
            .await
            .map_err(|e| {
                debug!(error = %e, "Failed to read request body");
                ProtocolError::UnreadableBody
            })?;
        let request = IncomingRequest::parse(&body)?.into_command_request()?;
        audit.user = Some(request.user.clone());

        let credential = self
            .directory
            .lookup(&request.user)
            .await
            .ok_or(AuthError::UnknownIdentity)?;

        if !self.global_allow_list.permits(audit.ip) {
            return Err(AuthError::IpNotAllowed(AllowListScope::Global).into());
        }
        if !AllowList::new(&credential.ip_allow_list).permits(audit.ip) {
            return Err(AuthError::IpNotAllowed(AllowListScope::Credential).into());
        }

        self.replay
            .check_timestamp(request.timestamp, self.clock.now())?;
        self.replay.check_and_record_nonce(&request.nonce)?;

        let key = derive_key(&credential.secret, &request.nonce, request.timestamp);
        let plaintext = decrypt(&request.command, &key).map_err(|e| {
            debug!(user = %request.user, error = %e, "Decryption failed");
            DecryptError::DecryptFailed
        })?;
        let command = plaintext
            .strip_prefix(COMMAND_PREFIX)
            .ok_or(ProtocolError::BadPrefix)?;
        audit.command = Some(command.to_string());

        let outcome = self
            .bridge
            .execute(ExecutionRequest::for_credential(
                &credential,
                command,
                request.queue,
                self.allow_queue_for_all_users,
            ))
            .await;

        self.seal(&credential, &request, outcome)
    }

    /// Encrypt `outcome` under a fresh server nonce and timestamp.
    fn seal(
        &self,
        credential: &Credential,
        request: &CommandRequest,
        outcome: ExecutionOutcome,
    ) -> ApiResult<CommandResponse> {
        let nonce = server_nonce(&request.nonce);
        let mut timestamp = self.clock.now() as i64;
        if timestamp == request.timestamp {
            timestamp += 1;
        }

        let key = derive_key(&credential.secret, &nonce, timestamp);
        let response =
            encrypt(&outcome.rich_text, &key).map_err(|e| ApiError::Internal(e.to_string()))?;
        let plain_response =
            encrypt(&outcome.plain_text, &key).map_err(|e| ApiError::Internal(e.to_string()))?;

        let error = if outcome.success {
            None
        } else {
            Some(outcome.error.unwrap_or_else(|| "command failed".to_string()))
        };

        Ok(CommandResponse {
            user: credential.identity.clone(),
            nonce,
            timestamp,
            success: outcome.success,
            response,
            plain_response,
            error,
        })
    }
}

fn client_ip(request: &Request<Body>) -> IpAddr {
    if let Some(ClientIp(ip)) = request.extensions().get::<ClientIp>() {
        return *ip;
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Random nonce distinct from the client's.
fn server_nonce(client_nonce: &str) -> String {
    loop {
        let nonce = Uuid::new_v4().simple().to_string();
        if nonce != client_nonce {
            return nonce;
        }
    }
}
