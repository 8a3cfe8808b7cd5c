use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::permissions::{Permission, jobs};

/// Role identifier used for RBAC.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Static role → permission policy.
///
/// `admin` gets the wildcard; `operator` runs jobs; `viewer` only reads.
/// Unknown roles grant nothing.
pub fn permissions_from_roles(roles: &[Role]) -> Vec<Permission> {
    if roles.iter().any(|r| r.as_str() == "admin") {
        return vec![jobs::ALL];
    }

    let mut perms = Vec::new();
    for role in roles {
        let granted = match role.as_str() {
            "operator" => vec![jobs::READ, jobs::WRITE],
            "viewer" => vec![jobs::READ],
            _ => Vec::new(),
        };
        for p in granted {
            if !perms.contains(&p) {
                perms.push(p);
            }
        }
    }
    perms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_maps_known_roles() {
        assert_eq!(permissions_from_roles(&[Role::new("admin")]), vec![jobs::ALL]);
        assert_eq!(
            permissions_from_roles(&[Role::new("viewer"), Role::new("operator")]),
            vec![jobs::READ, jobs::WRITE]
        );
        assert!(permissions_from_roles(&[Role::new("intern")]).is_empty());
    }
}
