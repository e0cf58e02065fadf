//! Command execution bridge.
//!
//! Moves a decrypted command from a request task onto the owner context of
//! its target, waits for the dispatch under a deadline, then waits a short
//! grace period for trailing output.
//!
//! ```text
//! Idle → Scheduled → Dispatching → AwaitingTrailingOutput → Completed
//!                  ↘             ↘                         ↘
//!                   TimedOut       Faulted                   TimedOut
//! ```
//!
//! `execute` never fails: every internal error becomes an
//! [`ExecutionOutcome`] with `success: false`. A task abandoned at the
//! deadline is not cancelled and may still run.

use std::fmt;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::bridge::privilege::dispatch_guarded;
use crate::domain::{
    CapturedOutput, Credential, ExecutionConfig, ExecutionContext, ExecutionError,
    ExecutionOutcome, PrivilegeSpec,
};
use crate::ports::{
    CaptureHandle, DispatchError, ExecutionHost, OfflineQueue, OutputCapture, OwnerScope, OwnerTask,
    QueuedCommand, UserDirectory,
};
use crate::AUDIT_TARGET;

/// Lifecycle of one bridge invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationPhase {
    Scheduled,
    Dispatching,
    AwaitingTrailingOutput,
    Completed,
    TimedOut,
    Faulted,
}

impl fmt::Display for InvocationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InvocationPhase::Scheduled => "scheduled",
            InvocationPhase::Dispatching => "dispatching",
            InvocationPhase::AwaitingTrailingOutput => "awaiting-trailing-output",
            InvocationPhase::Completed => "completed",
            InvocationPhase::TimedOut => "timed-out",
            InvocationPhase::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// One command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    /// Where to dispatch
    pub context: ExecutionContext,
    /// Command text without the protocol tag
    pub command: String,
    /// Applied around an actor dispatch; ignored for the console
    pub privileges: PrivilegeSpec,
    /// Identity recorded with queued commands
    pub requester: String,
    /// Caller asked for queuing if the actor is offline
    pub wants_queue: bool,
    /// Queuing is permitted for this caller
    pub queue_allowed: bool,
}

impl ExecutionRequest {
    /// Build a request for `credential`. Queuing is permitted when either
    /// the credential or the gateway-wide policy allows it.
    pub fn for_credential(
        credential: &Credential,
        command: impl Into<String>,
        wants_queue: bool,
        allow_queue_for_all: bool,
    ) -> Self {
        let context = credential.execution_context();
        let privileges = match context {
            ExecutionContext::Console => PrivilegeSpec::default(),
            ExecutionContext::Actor(_) => credential.privileges(),
        };
        Self {
            context,
            command: command.into(),
            privileges,
            requester: credential.identity.clone(),
            wants_queue,
            queue_allowed: allow_queue_for_all || credential.offline_queue_allowed,
        }
    }

    fn queue_honored(&self) -> bool {
        self.wants_queue && self.queue_allowed
    }
}

/// Capture that is ended exactly once, even if the owning task is dropped.
struct PendingCapture {
    capture: Arc<dyn OutputCapture>,
    handle: Option<CaptureHandle>,
}

impl PendingCapture {
    fn begin(capture: Arc<dyn OutputCapture>, context: &ExecutionContext) -> Self {
        let handle = capture.begin_capture(context);
        Self {
            capture,
            handle: Some(handle),
        }
    }

    fn handle(&self) -> Option<CaptureHandle> {
        self.handle
    }

    fn finish(mut self) -> CapturedOutput {
        match self.handle.take() {
            Some(handle) => self.capture.end_capture(handle),
            None => CapturedOutput::default(),
        }
    }
}

impl Drop for PendingCapture {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.capture.end_capture(handle);
        }
    }
}

/// What the owner context sends back.
struct DispatchReport {
    result: Result<bool, DispatchError>,
    capture: PendingCapture,
}

/// Bridge between request tasks and owner contexts.
pub struct CommandBridge {
    config: ExecutionConfig,
    host: Arc<dyn ExecutionHost>,
    capture: Arc<dyn OutputCapture>,
    queue: Arc<dyn OfflineQueue>,
    directory: Arc<dyn UserDirectory>,
}

impl CommandBridge {
    pub fn new(
        config: ExecutionConfig,
        host: Arc<dyn ExecutionHost>,
        capture: Arc<dyn OutputCapture>,
        queue: Arc<dyn OfflineQueue>,
        directory: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            config,
            host,
            capture,
            queue,
            directory,
        }
    }

    /// Run `request` and report its outcome. Returns within the configured
    /// deadline.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionOutcome {
        let deadline = Instant::now() + self.config.deadline;
        let context = request.context.clone();

        match self.run(request, deadline).await {
            Ok(outcome) => outcome,
            Err(error) => {
                let phase = match error {
                    ExecutionError::InternalTimeout => InvocationPhase::TimedOut,
                    _ => InvocationPhase::Faulted,
                };
                warn!(context = %context, phase = %phase, error = %error, "Command execution failed");
                ExecutionOutcome::failed(&error)
            }
        }
    }

    async fn run(
        &self,
        request: ExecutionRequest,
        deadline: Instant,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let (tx, rx) = oneshot::channel();
        let task = owner_task(
            Arc::clone(&self.capture),
            request.command.clone(),
            request.privileges.clone(),
            tx,
        );

        match &request.context {
            ExecutionContext::Console => self
                .host
                .schedule_on_global_owner(task)
                .map_err(|e| ExecutionError::Scheduling(e.to_string()))?,
            ExecutionContext::Actor(actor) => {
                let scheduled = self
                    .host
                    .schedule_on_actor_owner(actor, task)
                    .map_err(|e| ExecutionError::Scheduling(e.to_string()))?;
                if !scheduled {
                    return self.park_for_offline_actor(actor, &request).await;
                }
            }
        }
        debug!(context = %request.context, phase = %InvocationPhase::Scheduled, "Command scheduled");

        let DispatchReport { result, capture } = match timeout_at(deadline, rx).await {
            Err(_) => return Err(ExecutionError::InternalTimeout),
            Ok(Err(_)) => {
                return Err(ExecutionError::Scheduling(
                    "owner context dropped the task".to_string(),
                ))
            }
            Ok(Ok(report)) => report,
        };

        let dispatched = match result {
            Ok(dispatched) => dispatched,
            Err(e) => {
                drop(capture);
                return Err(ExecutionError::DispatchException(e.to_string()));
            }
        };

        debug!(
            context = %request.context,
            phase = %InvocationPhase::AwaitingTrailingOutput,
            dispatched,
            "Waiting for trailing output"
        );
        let grace_end = (Instant::now() + self.config.grace_period).min(deadline);
        sleep_until(grace_end).await;
        let output = capture.finish();

        debug!(context = %request.context, phase = %InvocationPhase::Completed, "Command completed");
        Ok(ExecutionOutcome::completed(dispatched, output))
    }

    async fn park_for_offline_actor(
        &self,
        actor: &str,
        request: &ExecutionRequest,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        if !request.queue_honored() {
            return Err(ExecutionError::ActorOfflineQueueDisabled);
        }

        self.queue
            .enqueue(actor, &request.command, &request.requester)
            .await
            .map_err(|e| ExecutionError::QueueUnavailable(e.to_string()))?;

        info!(
            target: AUDIT_TARGET,
            actor = %actor,
            requester = %request.requester,
            command = %request.command,
            "Command queued for offline actor"
        );
        Ok(ExecutionOutcome::queued())
    }

    /// Replay everything queued for `actor` on its owner context, after the
    /// configured join delay. Returns how many entries were handed over.
    pub async fn deliver_queued(&self, actor: &str) -> Result<usize, ExecutionError> {
        tokio::time::sleep(self.config.join_delivery_delay).await;

        let entries = self
            .queue
            .drain_and_clear(actor)
            .await
            .map_err(|e| ExecutionError::QueueUnavailable(e.to_string()))?;
        if entries.is_empty() {
            return Ok(0);
        }

        let mut batch = Vec::with_capacity(entries.len());
        for entry in &entries {
            let privileges = match self.directory.lookup(&entry.requester).await {
                Some(credential) => credential.privileges(),
                None => {
                    debug!(requester = %entry.requester, "Requester removed, delivering without privileges");
                    PrivilegeSpec::default()
                }
            };
            batch.push((entry.clone(), privileges));
        }

        let count = batch.len();
        let actor_name = actor.to_string();
        let task: OwnerTask = Box::new(move |scope: &mut dyn OwnerScope| {
            for (entry, privileges) in batch {
                replay_entry(scope, &actor_name, &entry, &privileges);
            }
        });

        match self.host.schedule_on_actor_owner(actor, task) {
            Ok(true) => {
                info!(actor = %actor, count, "Delivering queued commands");
                Ok(count)
            }
            Ok(false) => {
                debug!(actor = %actor, count, "Actor left before delivery, requeueing");
                self.restore(actor, entries).await?;
                Ok(0)
            }
            Err(e) => {
                self.restore(actor, entries).await?;
                Err(ExecutionError::Scheduling(e.to_string()))
            }
        }
    }

    async fn restore(&self, actor: &str, entries: Vec<QueuedCommand>) -> Result<(), ExecutionError> {
        self.queue
            .requeue(actor, entries)
            .await
            .map_err(|e| ExecutionError::QueueUnavailable(e.to_string()))
    }
}

fn owner_task(
    capture: Arc<dyn OutputCapture>,
    command: String,
    privileges: PrivilegeSpec,
    reply: oneshot::Sender<DispatchReport>,
) -> OwnerTask {
    Box::new(move |scope: &mut dyn OwnerScope| {
        let pending = PendingCapture::begin(capture, scope.context());
        debug!(context = %scope.context(), phase = %InvocationPhase::Dispatching, "Dispatching command");
        let result = dispatch_guarded(scope, &command, &privileges, pending.handle());

        // Receiver gone means the caller hit its deadline; the capture ends on drop
        let _ = reply.send(DispatchReport {
            result,
            capture: pending,
        });
    })
}

fn replay_entry(
    scope: &mut dyn OwnerScope,
    actor: &str,
    entry: &QueuedCommand,
    privileges: &PrivilegeSpec,
) {
    // Nobody is waiting on a replayed entry, so its replies are ambient
    match dispatch_guarded(scope, &entry.command, privileges, None) {
        Ok(true) => info!(
            target: AUDIT_TARGET,
            actor = %actor,
            requester = %entry.requester,
            command = %entry.command,
            "Delivered queued command"
        ),
        Ok(false) => warn!(
            target: AUDIT_TARGET,
            actor = %actor,
            requester = %entry.requester,
            command = %entry.command,
            "Queued command returned failure"
        ),
        Err(e) => warn!(
            target: AUDIT_TARGET,
            actor = %actor,
            requester = %entry.requester,
            command = %entry.command,
            error = %e,
            "Queued command failed"
        ),
    }
}
