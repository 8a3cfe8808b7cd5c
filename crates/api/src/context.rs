//! Per-request caller identity, inserted by the bearer-token middleware.

use courier_auth::{Principal, PrincipalId, Role};

/// Authenticated console caller, with permissions resolved once per request.
#[derive(Debug, Clone)]
pub struct PrincipalContext(Principal);

impl PrincipalContext {
    pub fn new(principal_id: PrincipalId, roles: Vec<Role>) -> Self {
        Self(Principal::from_roles(principal_id, roles))
    }

    pub fn principal_id(&self) -> &PrincipalId {
        &self.0.principal_id
    }

    pub fn roles(&self) -> &[Role] {
        &self.0.roles
    }

    pub fn principal(&self) -> &Principal {
        &self.0
    }
}
