//! `courier-auth`: authentication/authorization boundary.
//!
//! Decoupled from HTTP and storage: the API layer extracts credentials and
//! asks this crate whether they are good enough.

pub mod authorize;
pub mod claims;
pub mod jwt;
pub mod permissions;
pub mod principal;
pub mod roles;
pub mod worker_key;

pub use authorize::{AuthzError, CommandAuthorization, Principal, authorize};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtValidator, JwtValidator};
pub use permissions::{Permission, jobs};
pub use principal::PrincipalId;
pub use roles::{Role, permissions_from_roles};
pub use worker_key::WorkerKey;
