use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier.
///
/// Permissions are opaque strings (e.g. "jobs.read"). The wildcard `"*"`
/// grants everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Permissions guarding the job console.
pub mod jobs {
    use super::Permission;

    pub const ALL: Permission = Permission::from_static("*");
    /// List/inspect jobs and submissions, export CSV.
    pub const READ: Permission = Permission::from_static("jobs.read");
    /// Create, cancel, retry and recompute.
    pub const WRITE: Permission = Permission::from_static("jobs.write");
    pub const DELETE: Permission = Permission::from_static("jobs.delete");
}
