//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// These are deterministic, per-request failures. None of them is fatal to the
/// process; a caller can always retry the corresponding operation. "No work
/// available" is not represented here: claiming returns `Ok(None)` instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Unknown job or submission id.
    #[error("not found: {0}")]
    NotFound(String),

    /// A value failed validation (empty target list, malformed limit, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The submission state machine does not allow the requested move.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// The caller's lease expired or was superseded by another claim.
    #[error("stale lease: {0}")]
    StaleLease(String),

    /// The operation conflicts with in-flight work (e.g. delete with active leases).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidTransition(msg.into())
    }

    pub fn stale_lease(msg: impl Into<String>) -> Self {
        Self::StaleLease(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Stable machine-readable code, used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::NotFound(_) => "not_found",
            DomainError::InvalidInput(_) => "invalid_input",
            DomainError::InvalidTransition(_) => "invalid_transition",
            DomainError::StaleLease(_) => "stale_lease",
            DomainError::Conflict(_) => "conflict",
        }
    }
}
