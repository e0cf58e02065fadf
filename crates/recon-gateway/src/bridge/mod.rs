//! Command execution bridge: owner-context scheduling, scoped privileges and
//! bounded output capture.

pub mod executor;
pub mod privilege;

pub use executor::{CommandBridge, ExecutionRequest, InvocationPhase};
pub use privilege::{dispatch_guarded, ScopedPrivileges};
