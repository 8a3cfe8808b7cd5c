//! Persistence contracts for jobs and submissions.
//!
//! Every method is one atomic unit against the backing store. In particular
//! `claim_next` must select and claim in a single indivisible step: two
//! concurrent callers never receive the same submission.

use chrono::{DateTime, Duration, Utc};

use courier_core::{DomainError, JobId, LeaseToken, SubmissionId};
use courier_jobs::{Job, Submission, TerminalReport};

use super::query::{Page, Pagination, SubmissionFilter};

/// Queue store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("storage error: {0}")]
    Storage(String),
}

impl QueueError {
    pub fn job_not_found(id: JobId) -> Self {
        DomainError::not_found(format!("job {id}")).into()
    }

    pub fn submission_not_found(id: SubmissionId) -> Self {
        DomainError::not_found(format!("submission {id}")).into()
    }

    /// The domain error behind this failure, if any.
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            QueueError::Domain(e) => Some(e),
            QueueError::Storage(_) => None,
        }
    }
}

/// Result of an authoritative counter recompute.
#[derive(Debug, Clone, PartialEq)]
pub struct Recomputed {
    pub job: Job,
    /// Whether the cached counters differed from the fresh tally.
    pub drifted: bool,
}

/// Submission-level persistence.
#[async_trait::async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn get_submission(&self, id: SubmissionId) -> Result<Submission, QueueError>;

    /// Submissions of one job, in insertion order.
    async fn list_by_job(
        &self,
        job_id: JobId,
        filter: SubmissionFilter,
        pagination: Pagination,
    ) -> Result<Page<Submission>, QueueError>;

    /// Atomically claim the oldest eligible submission.
    ///
    /// Eligible means `pending`, or `running` with `lease_until < now`.
    /// Returns `None` when nothing is eligible.
    async fn claim_next(
        &self,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Submission>, QueueError>;

    /// Append log lines for the current lease holder.
    async fn append_log(
        &self,
        id: SubmissionId,
        token: LeaseToken,
        lines: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<Submission, QueueError>;

    /// Extend the current holder's lease to `now + lease`.
    async fn extend_lease(
        &self,
        id: SubmissionId,
        token: LeaseToken,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Submission, QueueError>;

    /// Move a running submission to `success`/`failed` and adjust job counters.
    async fn set_terminal(
        &self,
        id: SubmissionId,
        report: TerminalReport,
        now: DateTime<Utc>,
    ) -> Result<Submission, QueueError>;
}

/// Job-level persistence.
#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a job together with its full submission set.
    async fn insert_job(&self, job: Job, submissions: Vec<Submission>) -> Result<(), QueueError>;

    async fn get_job(&self, id: JobId) -> Result<Job, QueueError>;

    /// Jobs, newest first.
    async fn list_jobs(&self, pagination: Pagination) -> Result<Page<Job>, QueueError>;

    /// Cancel the job and every pending/running submission. No-op when already cancelled.
    async fn cancel_job(&self, id: JobId, now: DateTime<Utc>) -> Result<Job, QueueError>;

    /// Remove the job and its submissions unless a lease is still active.
    async fn delete_job(&self, id: JobId, now: DateTime<Utc>) -> Result<(), QueueError>;

    /// Reset up to `limit` failed submissions (oldest first) to pending.
    async fn retry_failed(
        &self,
        id: JobId,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<u64, QueueError>;

    /// Rebuild the job's counters from its submissions.
    async fn recompute_counts(
        &self,
        id: JobId,
        now: DateTime<Utc>,
    ) -> Result<Recomputed, QueueError>;
}

/// A backend that stores both jobs and submissions.
pub trait QueueStore: SubmissionStore + JobStore {}

impl<T: SubmissionStore + JobStore> QueueStore for T {}
