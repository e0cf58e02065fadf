//! Credentials and the execution target they resolve to.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// An API credential, owned by the user directory.
///
/// `identity` is unique and is the lookup key. List-valued fields are stored
/// as JSON arrays.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// Caller-supplied name used in the `user` field
    pub identity: String,
    /// Shared secret for key derivation
    pub secret: String,
    /// Addresses allowed to use this credential (empty = any)
    #[serde(default)]
    pub ip_allow_list: BTreeSet<String>,
    /// Actor to run as; absent runs on the console
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_target: Option<String>,
    /// Permissions attached to the actor for the duration of a call
    #[serde(default)]
    pub privilege_grants: BTreeSet<String>,
    /// Elevate the actor for the duration of a call
    #[serde(default)]
    pub elevate_privilege: bool,
    /// Queue commands for this actor while it is offline
    #[serde(default)]
    pub offline_queue_allowed: bool,
}

impl Credential {
    /// Console credential with no restrictions.
    pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            secret: secret.into(),
            ip_allow_list: BTreeSet::new(),
            execution_target: None,
            privilege_grants: BTreeSet::new(),
            elevate_privilege: false,
            offline_queue_allowed: false,
        }
    }

    /// Run as `actor` instead of the console.
    pub fn with_target(mut self, actor: impl Into<String>) -> Self {
        self.execution_target = Some(actor.into());
        self
    }

    /// Add an allowed caller address.
    pub fn with_allowed_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_allow_list.insert(ip.into());
        self
    }

    /// Add a temporary permission grant.
    pub fn with_grant(mut self, permission: impl Into<String>) -> Self {
        self.privilege_grants.insert(permission.into());
        self
    }

    /// Request elevation while executing.
    pub fn elevated(mut self) -> Self {
        self.elevate_privilege = true;
        self
    }

    /// Permit offline queuing.
    pub fn with_offline_queue(mut self) -> Self {
        self.offline_queue_allowed = true;
        self
    }

    /// Where commands for this credential are dispatched. An empty target
    /// name counts as no target.
    pub fn execution_context(&self) -> ExecutionContext {
        match self.execution_target.as_deref().map(str::trim) {
            Some(actor) if !actor.is_empty() => ExecutionContext::Actor(actor.to_string()),
            _ => ExecutionContext::Console,
        }
    }

    /// Privileges to apply around each dispatch.
    pub fn privileges(&self) -> PrivilegeSpec {
        PrivilegeSpec {
            elevate: self.elevate_privilege,
            grants: self.privilege_grants.iter().cloned().collect(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .field("ip_allow_list", &self.ip_allow_list)
            .field("execution_target", &self.execution_target)
            .field("privilege_grants", &self.privilege_grants)
            .field("elevate_privilege", &self.elevate_privilege)
            .field("offline_queue_allowed", &self.offline_queue_allowed)
            .finish()
    }
}

/// Where a command runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExecutionContext {
    /// The single global owner
    Console,
    /// A named actor, mutated only by its own owner
    Actor(String),
}

impl ExecutionContext {
    /// Actor name, if any
    pub fn actor(&self) -> Option<&str> {
        match self {
            ExecutionContext::Console => None,
            ExecutionContext::Actor(name) => Some(name),
        }
    }
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionContext::Console => f.write_str("console"),
            ExecutionContext::Actor(name) => write!(f, "actor:{name}"),
        }
    }
}

/// Temporary privileges applied around one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrivilegeSpec {
    /// Elevate if the actor is not already elevated
    pub elevate: bool,
    /// Permissions to attach
    pub grants: Vec<String>,
}

impl PrivilegeSpec {
    /// Nothing to apply
    pub fn is_empty(&self) -> bool {
        !self.elevate && self.grants.is_empty()
    }
}
