//! Bounded re-queue of failures and authoritative counter repair.

use std::sync::Arc;

use tracing::instrument;

use courier_core::{Clock, DomainError, JobId};
use courier_jobs::Job;

use super::store::{JobStore, QueueError};

#[derive(Clone)]
pub struct RetryEngine {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
}

impl RetryEngine {
    pub fn new(store: Arc<dyn JobStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Move up to `limit` failed submissions (oldest first) back to `pending`.
    ///
    /// Returns how many were actually retried. A `limit` of zero still
    /// checks that the job exists.
    #[instrument(skip(self), fields(job_id = %job_id), err)]
    pub async fn retry_failed(&self, job_id: JobId, limit: i64) -> Result<u64, QueueError> {
        if limit < 0 {
            return Err(
                DomainError::invalid_input(format!("limit must be >= 0, got {limit}")).into(),
            );
        }
        let limit = u32::try_from(limit).unwrap_or(u32::MAX);

        let retried = self.store.retry_failed(job_id, limit, self.clock.now()).await?;
        tracing::info!(job_id = %job_id, limit, retried, "failed submissions re-queued");
        Ok(retried)
    }

    /// Rebuild the job's counters from its submissions, overwriting the cache.
    #[instrument(skip(self), fields(job_id = %job_id), err)]
    pub async fn recompute_counts(&self, job_id: JobId) -> Result<Job, QueueError> {
        let before = self.store.get_job(job_id).await?.counts;
        let result = self.store.recompute_counts(job_id, self.clock.now()).await?;

        if result.drifted {
            tracing::warn!(
                job_id = %job_id,
                cached = ?before,
                actual = ?result.job.counts,
                "job counters drifted; repaired"
            );
        } else {
            tracing::info!(job_id = %job_id, "job counters verified");
        }
        Ok(result.job)
    }
}

impl core::fmt::Debug for RetryEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RetryEngine").finish_non_exhaustive()
    }
}
