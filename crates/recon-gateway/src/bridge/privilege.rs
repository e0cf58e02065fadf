//! Scoped privilege elevation.
//!
//! [`ScopedPrivileges`] applies a [`PrivilegeSpec`] to an owner scope and
//! reverts it on drop, so a dispatch that errors or panics cannot leave an
//! actor elevated.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::debug;

use crate::domain::PrivilegeSpec;
use crate::ports::{CaptureHandle, DispatchError, GrantId, HostError, OwnerScope};

/// Privileges held for the lifetime of the guard.
pub struct ScopedPrivileges<'a> {
    scope: &'a mut dyn OwnerScope,
    restore_elevation: bool,
    grant: Option<GrantId>,
}

impl<'a> ScopedPrivileges<'a> {
    /// Apply `spec`. Elevation is skipped when already elevated, and only an
    /// elevation made here is reverted.
    pub fn apply(scope: &'a mut dyn OwnerScope, spec: &PrivilegeSpec) -> Result<Self, HostError> {
        let mut guard = Self {
            scope,
            restore_elevation: false,
            grant: None,
        };

        if spec.elevate && !guard.scope.is_elevated() {
            guard.scope.set_elevated(true)?;
            guard.restore_elevation = true;
        }

        // On error the guard drops here and reverts the elevation above
        if !spec.grants.is_empty() {
            guard.grant = Some(guard.scope.attach_grants(&spec.grants)?);
        }

        Ok(guard)
    }

    /// Dispatch under the held privileges.
    pub fn dispatch(
        &mut self,
        command: &str,
        output: Option<CaptureHandle>,
    ) -> Result<bool, DispatchError> {
        self.scope.dispatch(command, output)
    }
}

impl Drop for ScopedPrivileges<'_> {
    fn drop(&mut self) {
        let context = self.scope.context().to_string();
        if let Some(grant) = self.grant.take() {
            if let Err(e) = self.scope.detach_grants(grant) {
                debug!(context = %context, error = %e, "Failed to detach grants");
            }
        }
        if self.restore_elevation {
            if let Err(e) = self.scope.set_elevated(false) {
                debug!(context = %context, error = %e, "Failed to revert elevation");
            }
        }
    }
}

/// Run `command` under `spec`, converting a panic into a dispatch error.
/// Privileges are reverted before this returns in every case.
pub fn dispatch_guarded(
    scope: &mut dyn OwnerScope,
    command: &str,
    spec: &PrivilegeSpec,
    output: Option<CaptureHandle>,
) -> Result<bool, DispatchError> {
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let mut guard = ScopedPrivileges::apply(scope, spec)
            .map_err(|e| DispatchError::Failed(e.to_string()))?;
        guard.dispatch(command, output)
    }));

    match outcome {
        Ok(result) => result,
        Err(panic) => Err(DispatchError::Failed(panic_message(panic.as_ref()))),
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}
