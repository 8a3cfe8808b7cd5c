//! The submission state machine.
//!
//! | From            | Event             | To        |
//! |-----------------|-------------------|-----------|
//! | pending         | claim             | running   |
//! | running         | claim (expired)   | running   |
//! | running         | report success    | success   |
//! | running         | report failure    | failed    |
//! | failed          | retry             | pending   |
//! | pending/running | cancel            | cancelled |
//!
//! Guards that depend on time or lease ownership (is the lease expired, does
//! the caller hold it) live on [`crate::Submission`]; this table only answers
//! "is this move legal at all".

use courier_core::{DomainError, DomainResult};

use crate::status::{Outcome, SubmissionStatus};

/// Something that happens to a submission.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SubmissionEvent {
    /// A worker was granted a lease.
    Claim,
    /// The lease holder reported an outcome.
    Report(Outcome),
    /// A bulk retry re-queued a failed submission.
    Retry,
    /// The owning job was cancelled.
    Cancel,
}

impl SubmissionEvent {
    fn describe(&self) -> &'static str {
        match self {
            SubmissionEvent::Claim => "claim",
            SubmissionEvent::Report(Outcome::Success) => "report success",
            SubmissionEvent::Report(Outcome::Failed) => "report failure",
            SubmissionEvent::Retry => "retry",
            SubmissionEvent::Cancel => "cancel",
        }
    }
}

/// Resolve the next status for `event` applied in state `from`.
pub fn next_status(
    from: SubmissionStatus,
    event: SubmissionEvent,
) -> DomainResult<SubmissionStatus> {
    use SubmissionEvent as E;
    use SubmissionStatus as S;

    match (from, event) {
        (S::Pending | S::Running, E::Claim) => Ok(S::Running),
        (S::Running, E::Report(Outcome::Success)) => Ok(S::Success),
        (S::Running, E::Report(Outcome::Failed)) => Ok(S::Failed),
        (S::Failed, E::Retry) => Ok(S::Pending),
        (S::Pending | S::Running, E::Cancel) => Ok(S::Cancelled),
        (from, event) => Err(DomainError::invalid_transition(format!(
            "cannot {} a {} submission",
            event.describe(),
            from
        ))),
    }
}
