//! API-side authorization guard.
//!
//! Checked at the handler boundary, before anything reaches the queue, so the
//! queue services stay auth-agnostic.

use courier_auth::{AuthzError, CommandAuthorization, authorize};

use crate::context::PrincipalContext;

/// Check every permission `command` requires against the caller's roles.
pub fn authorize_command<C: CommandAuthorization>(
    principal: &PrincipalContext,
    command: &C,
) -> Result<(), AuthzError> {
    for perm in command.required_permissions() {
        authorize(principal.principal(), perm)?;
    }
    Ok(())
}
