use courier_auth::{CommandAuthorization, Permission};

use crate::app::errors;
use crate::context::PrincipalContext;

/// A console operation that needs exactly one permission.
struct Requires([Permission; 1]);

impl CommandAuthorization for Requires {
    fn required_permissions(&self) -> &[Permission] {
        &self.0
    }
}

/// Check a single permission; the error is a ready-to-return 403.
pub fn guard(
    principal: &PrincipalContext,
    required: Permission,
) -> Result<(), axum::response::Response> {
    crate::authz::authorize_command(principal, &Requires([required])).map_err(|e| {
        tracing::debug!(
            principal = %principal.principal_id(),
            error = %e,
            "console request denied"
        );
        errors::forbidden(e)
    })
}
