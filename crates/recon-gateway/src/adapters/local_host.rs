//! In-process execution host.
//!
//! One global owner (the console) plus a fixed set of partition owners, each
//! running on its own OS thread and draining a channel of owner tasks. An
//! actor lives in exactly one partition and its state is only touched from
//! that partition's thread.

use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::adapters::capture::CaptureRegistry;
use crate::bridge::privilege::panic_message;
use crate::domain::ExecutionContext;
use crate::ports::{
    CaptureHandle, DispatchError, ExecutionHost, GrantId, HostError, OwnerScope, OwnerTask,
};

/// Command semantics supplied by the embedding application.
pub trait CommandDispatcher: Send + Sync + 'static {
    /// Run `command` as `sender`; `Ok(false)` signals a usage-level failure.
    fn dispatch(&self, sender: &mut CommandSender<'_>, command: &str) -> Result<bool, DispatchError>;
}

/// An actor as it joins the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorProfile {
    pub name: String,
    /// Elevated independent of any command
    pub elevated: bool,
}

impl ActorProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            elevated: false,
        }
    }

    pub fn elevated(mut self) -> Self {
        self.elevated = true;
        self
    }
}

/// Observable state of one actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorSnapshot {
    pub elevated: bool,
    /// Currently attached permissions, sorted
    pub grants: Vec<String>,
}

struct Shared {
    dispatcher: Arc<dyn CommandDispatcher>,
    capture: Arc<CaptureRegistry>,
    routes: DashMap<String, usize>,
}

/// Who is running a command, as seen by a [`CommandDispatcher`].
pub struct CommandSender<'a> {
    context: &'a ExecutionContext,
    output: Option<CaptureHandle>,
    elevated: bool,
    permissions: BTreeSet<String>,
    shared: &'a Shared,
}

impl CommandSender<'_> {
    /// Actor name, or `console`
    pub fn name(&self) -> &str {
        self.context.actor().unwrap_or("console")
    }

    pub fn context(&self) -> &ExecutionContext {
        self.context
    }

    pub fn is_elevated(&self) -> bool {
        self.elevated
    }

    /// Elevated senders hold every permission.
    pub fn has_permission(&self, permission: &str) -> bool {
        self.elevated || self.permissions.contains(permission)
    }

    pub fn permissions(&self) -> impl Iterator<Item = &str> {
        self.permissions.iter().map(String::as_str)
    }

    /// Print a line to this sender.
    pub fn send_message(&self, line: impl AsRef<str>) {
        reply(&self.shared.capture, self.context, self.output, line.as_ref());
    }

    /// Print a line to this sender and every online actor.
    pub fn broadcast(&self, line: impl AsRef<str>) {
        let line = line.as_ref();
        if let Some(handle) = self.output {
            self.shared.capture.emit_to(handle, line);
        }
        for actor in self.online_actors() {
            self.shared
                .capture
                .emit_except(&ExecutionContext::Actor(actor), line, self.output);
        }
    }

    /// Names of online actors, sorted
    pub fn online_actors(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.routes.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Handle for output produced after the dispatch returns.
    pub fn deferred_output(&self) -> DeferredOutput {
        DeferredOutput {
            capture: Arc::clone(&self.shared.capture),
            context: self.context.clone(),
            output: self.output,
        }
    }
}

/// Sends lines to one sender from any thread. Lines sent after the
/// dispatch's capture has ended are dropped.
#[derive(Clone)]
pub struct DeferredOutput {
    capture: Arc<CaptureRegistry>,
    context: ExecutionContext,
    output: Option<CaptureHandle>,
}

impl DeferredOutput {
    pub fn send_message(&self, line: impl AsRef<str>) {
        reply(&self.capture, &self.context, self.output, line.as_ref());
    }
}

fn reply(capture: &CaptureRegistry, context: &ExecutionContext, output: Option<CaptureHandle>, line: &str) {
    match output {
        Some(handle) => capture.emit_to(handle, line),
        None => capture.emit(context, line),
    }
}

// =============================================================================
// OWNER SCOPES
// =============================================================================

struct ConsoleScope<'a> {
    context: ExecutionContext,
    shared: &'a Shared,
}

impl OwnerScope for ConsoleScope<'_> {
    fn context(&self) -> &ExecutionContext {
        &self.context
    }

    fn dispatch(&mut self, command: &str, output: Option<CaptureHandle>) -> Result<bool, DispatchError> {
        let mut sender = CommandSender {
            context: &self.context,
            output,
            elevated: true,
            permissions: BTreeSet::new(),
            shared: self.shared,
        };
        self.shared.dispatcher.dispatch(&mut sender, command)
    }

    fn is_elevated(&self) -> bool {
        true
    }

    fn set_elevated(&mut self, _elevated: bool) -> Result<(), HostError> {
        Ok(())
    }

    fn attach_grants(&mut self, _grants: &[String]) -> Result<GrantId, HostError> {
        Ok(GrantId(0))
    }

    fn detach_grants(&mut self, _grant: GrantId) -> Result<(), HostError> {
        Ok(())
    }
}

struct ActorState {
    elevated: bool,
    grants: BTreeMap<u64, Vec<String>>,
}

impl ActorState {
    fn effective_permissions(&self) -> BTreeSet<String> {
        self.grants.values().flatten().cloned().collect()
    }

    fn snapshot(&self) -> ActorSnapshot {
        ActorSnapshot {
            elevated: self.elevated,
            grants: self.effective_permissions().into_iter().collect(),
        }
    }
}

struct ActorScope<'a> {
    context: ExecutionContext,
    state: &'a mut ActorState,
    next_grant: &'a mut u64,
    shared: &'a Shared,
}

impl OwnerScope for ActorScope<'_> {
    fn context(&self) -> &ExecutionContext {
        &self.context
    }

    fn dispatch(&mut self, command: &str, output: Option<CaptureHandle>) -> Result<bool, DispatchError> {
        let mut sender = CommandSender {
            context: &self.context,
            output,
            elevated: self.state.elevated,
            permissions: self.state.effective_permissions(),
            shared: self.shared,
        };
        self.shared.dispatcher.dispatch(&mut sender, command)
    }

    fn is_elevated(&self) -> bool {
        self.state.elevated
    }

    fn set_elevated(&mut self, elevated: bool) -> Result<(), HostError> {
        self.state.elevated = elevated;
        Ok(())
    }

    fn attach_grants(&mut self, grants: &[String]) -> Result<GrantId, HostError> {
        *self.next_grant += 1;
        let id = *self.next_grant;
        self.state.grants.insert(id, grants.to_vec());
        Ok(GrantId(id))
    }

    fn detach_grants(&mut self, grant: GrantId) -> Result<(), HostError> {
        self.state
            .grants
            .remove(&grant.0)
            .map(|_| ())
            .ok_or_else(|| HostError::Rejected(format!("unknown grant {}", grant.0)))
    }
}

// =============================================================================
// HOST
// =============================================================================

enum PartitionMsg {
    Join(ActorProfile),
    Leave(String),
    Run { actor: String, task: OwnerTask },
    Inspect {
        actor: String,
        reply: oneshot::Sender<Option<ActorSnapshot>>,
    },
}

/// Reference [`ExecutionHost`] running owner contexts on dedicated threads.
pub struct LocalExecutionHost {
    shared: Arc<Shared>,
    console: mpsc::UnboundedSender<OwnerTask>,
    partitions: Vec<mpsc::UnboundedSender<PartitionMsg>>,
    arrivals: broadcast::Sender<String>,
    next_partition: AtomicUsize,
}

impl LocalExecutionHost {
    /// Start the console owner and `partitions` partition owners. Threads
    /// stop when the host is dropped.
    pub fn start(
        partitions: usize,
        dispatcher: Arc<dyn CommandDispatcher>,
        capture: Arc<CaptureRegistry>,
    ) -> Result<Self, HostError> {
        let shared = Arc::new(Shared {
            dispatcher,
            capture,
            routes: DashMap::new(),
        });

        let (console, console_rx) = mpsc::unbounded_channel();
        let console_shared = Arc::clone(&shared);
        std::thread::Builder::new()
            .name("recon-console".to_string())
            .spawn(move || run_console(console_rx, console_shared))
            .map_err(|e| HostError::OwnerUnavailable(e.to_string()))?;

        let mut senders = Vec::with_capacity(partitions.max(1));
        for index in 0..partitions.max(1) {
            let (tx, rx) = mpsc::unbounded_channel();
            let partition_shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name(format!("recon-partition-{index}"))
                .spawn(move || run_partition(index, rx, partition_shared))
                .map_err(|e| HostError::OwnerUnavailable(e.to_string()))?;
            senders.push(tx);
        }

        let (arrivals, _) = broadcast::channel(64);
        info!(partitions = senders.len(), "Execution host started");

        Ok(Self {
            shared,
            console,
            partitions: senders,
            arrivals,
            next_partition: AtomicUsize::new(0),
        })
    }

    /// Bring an actor online and announce it to arrival subscribers.
    pub fn join_actor(&self, profile: ActorProfile) -> Result<(), HostError> {
        let name = profile.name.clone();
        let index = match self.shared.routes.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(HostError::Rejected(format!("{name} is already online")));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let index = self.next_partition.fetch_add(1, Ordering::Relaxed) % self.partitions.len();
                // Join is queued while the route entry is locked, so no Run
                // for this actor can be sent ahead of it.
                self.send_to(index, PartitionMsg::Join(profile))?;
                slot.insert(index);
                index
            }
        };

        debug!(actor = %name, partition = index, "Actor joined");
        // No subscribers is fine
        let _ = self.arrivals.send(name);
        Ok(())
    }

    /// Take an actor offline; `false` if it was not online.
    pub fn leave_actor(&self, name: &str) -> bool {
        match self.shared.routes.remove(name) {
            Some((_, index)) => {
                if let Err(e) = self.send_to(index, PartitionMsg::Leave(name.to_string())) {
                    warn!(actor = %name, error = %e, "Leave not delivered");
                }
                debug!(actor = %name, "Actor left");
                true
            }
            None => false,
        }
    }

    pub fn is_online(&self, name: &str) -> bool {
        self.shared.routes.contains_key(name)
    }

    /// Names of online actors, sorted
    pub fn online_actors(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.routes.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Receive the name of every actor that joins from now on.
    pub fn subscribe_arrivals(&self) -> broadcast::Receiver<String> {
        self.arrivals.subscribe()
    }

    /// Emit an ambient line to `context` from any thread.
    pub fn message(&self, context: &ExecutionContext, line: &str) {
        self.shared.capture.emit(context, line);
    }

    /// Read an actor's state on its owner thread.
    pub async fn actor_snapshot(&self, name: &str) -> Option<ActorSnapshot> {
        let index = *self.shared.routes.get(name)?;
        let (reply, rx) = oneshot::channel();
        self.send_to(
            index,
            PartitionMsg::Inspect {
                actor: name.to_string(),
                reply,
            },
        )
        .ok()?;
        rx.await.ok().flatten()
    }

    fn send_to(&self, index: usize, msg: PartitionMsg) -> Result<(), HostError> {
        self.partitions
            .get(index)
            .ok_or_else(|| HostError::OwnerUnavailable(format!("partition {index}")))?
            .send(msg)
            .map_err(|_| HostError::OwnerUnavailable(format!("partition {index} stopped")))
    }
}

impl ExecutionHost for LocalExecutionHost {
    fn schedule_on_global_owner(&self, task: OwnerTask) -> Result<(), HostError> {
        self.console
            .send(task)
            .map_err(|_| HostError::OwnerUnavailable("console stopped".to_string()))
    }

    fn schedule_on_actor_owner(&self, actor: &str, task: OwnerTask) -> Result<bool, HostError> {
        let Some(route) = self.shared.routes.get(actor) else {
            return Ok(false);
        };
        let index = *route;
        // Hold the route while sending so a concurrent leave queues after us
        self.send_to(
            index,
            PartitionMsg::Run {
                actor: actor.to_string(),
                task,
            },
        )?;
        drop(route);
        Ok(true)
    }
}

fn run_contained(scope: &mut dyn OwnerScope, task: OwnerTask) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| task(scope))) {
        error!(
            context = %scope.context(),
            panic = %panic_message(panic.as_ref()),
            "Owner task panicked"
        );
    }
}

fn run_console(mut rx: mpsc::UnboundedReceiver<OwnerTask>, shared: Arc<Shared>) {
    let mut scope = ConsoleScope {
        context: ExecutionContext::Console,
        shared: &shared,
    };
    while let Some(task) = rx.blocking_recv() {
        run_contained(&mut scope, task);
    }
    debug!("Console owner stopped");
}

fn run_partition(index: usize, mut rx: mpsc::UnboundedReceiver<PartitionMsg>, shared: Arc<Shared>) {
    let mut actors: HashMap<String, ActorState> = HashMap::new();
    let mut next_grant = 0u64;

    while let Some(msg) = rx.blocking_recv() {
        match msg {
            PartitionMsg::Join(profile) => {
                actors.insert(
                    profile.name,
                    ActorState {
                        elevated: profile.elevated,
                        grants: BTreeMap::new(),
                    },
                );
            }
            PartitionMsg::Leave(name) => {
                actors.remove(&name);
            }
            PartitionMsg::Run { actor, task } => match actors.get_mut(&actor) {
                Some(state) => {
                    let mut scope = ActorScope {
                        context: ExecutionContext::Actor(actor),
                        state,
                        next_grant: &mut next_grant,
                        shared: &shared,
                    };
                    run_contained(&mut scope, task);
                }
                None => {
                    warn!(actor = %actor, partition = index, "Actor departed before its task ran");
                }
            },
            PartitionMsg::Inspect { actor, reply } => {
                let _ = reply.send(actors.get(&actor).map(ActorState::snapshot));
            }
        }
    }
    debug!(partition = index, "Partition owner stopped");
}
