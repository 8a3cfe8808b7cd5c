//! Lease manager: the worker-facing claim path.

use std::sync::Arc;

use tracing::instrument;

use courier_core::{Clock, LeaseToken, SubmissionId};
use courier_jobs::Submission;

use crate::config::LeasePolicy;

use super::store::{QueueError, SubmissionStore};

/// Hands out leased claims on pending (or lease-expired) submissions.
#[derive(Clone)]
pub struct LeaseManager {
    store: Arc<dyn SubmissionStore>,
    clock: Arc<dyn Clock>,
    policy: LeasePolicy,
}

impl LeaseManager {
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        clock: Arc<dyn Clock>,
        policy: LeasePolicy,
    ) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> LeasePolicy {
        self.policy
    }

    /// Claim the oldest eligible submission for `lease_secs` (policy default when `None`).
    ///
    /// `Ok(None)` means there is nothing to do right now.
    #[instrument(skip(self), err)]
    pub async fn claim_next(
        &self,
        lease_secs: Option<u64>,
    ) -> Result<Option<Submission>, QueueError> {
        let lease = self.policy.resolve(lease_secs)?;
        let claimed = self.store.claim_next(lease, self.clock.now()).await?;

        match &claimed {
            Some(sub) if sub.attempt > 1 => tracing::info!(
                submission_id = %sub.id,
                job_id = %sub.job_id,
                attempt = sub.attempt,
                "submission reclaimed"
            ),
            Some(sub) => tracing::debug!(
                submission_id = %sub.id,
                job_id = %sub.job_id,
                "submission claimed"
            ),
            None => tracing::trace!("no claimable submission"),
        }
        Ok(claimed)
    }

    /// Heartbeat: push the holder's deadline out to now + `lease_secs`.
    #[instrument(skip(self, token), fields(submission_id = %id), err)]
    pub async fn extend(
        &self,
        id: SubmissionId,
        token: LeaseToken,
        lease_secs: Option<u64>,
    ) -> Result<Submission, QueueError> {
        let lease = self.policy.resolve(lease_secs)?;
        self.store.extend_lease(id, token, lease, self.clock.now()).await
    }
}

impl core::fmt::Debug for LeaseManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LeaseManager")
            .field("clock", &self.clock)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
