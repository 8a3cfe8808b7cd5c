//! Submission reads and worker progress/outcome reporting.

use std::sync::Arc;

use tracing::instrument;

use courier_core::{Clock, DomainError, JobId, LeaseToken, SubmissionId};
use courier_jobs::{Submission, SubmissionStatus, TerminalReport};

use super::query::{Page, Pagination, SubmissionFilter};
use super::store::{QueueError, SubmissionStore};

#[derive(Clone)]
pub struct SubmissionService {
    store: Arc<dyn SubmissionStore>,
    clock: Arc<dyn Clock>,
}

impl SubmissionService {
    pub fn new(store: Arc<dyn SubmissionStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Fetch a submission and check it belongs to `job_id`.
    pub async fn get_in_job(
        &self,
        job_id: JobId,
        id: SubmissionId,
    ) -> Result<Submission, QueueError> {
        let sub = self.store.get_submission(id).await?;
        if sub.job_id != job_id {
            return Err(QueueError::submission_not_found(id));
        }
        Ok(sub)
    }

    pub async fn list_by_job(
        &self,
        job_id: JobId,
        filter: SubmissionFilter,
        pagination: Pagination,
    ) -> Result<Page<Submission>, QueueError> {
        self.store.list_by_job(job_id, filter, pagination).await
    }

    /// Append progress lines while holding the lease.
    #[instrument(skip(self, token, lines), fields(submission_id = %id), err)]
    pub async fn append_log(
        &self,
        id: SubmissionId,
        token: LeaseToken,
        lines: Vec<String>,
    ) -> Result<Submission, QueueError> {
        if lines.is_empty() {
            return Err(DomainError::invalid_input("lines cannot be empty").into());
        }
        self.store.append_log(id, token, lines, self.clock.now()).await
    }

    /// Record the lease holder's outcome.
    #[instrument(skip(self, report), fields(submission_id = %id, outcome = %report.outcome), err)]
    pub async fn report(
        &self,
        id: SubmissionId,
        report: TerminalReport,
    ) -> Result<Submission, QueueError> {
        let sub = match self.store.set_terminal(id, report, self.clock.now()).await {
            Ok(sub) => sub,
            Err(err) => {
                if let Some(DomainError::StaleLease(reason)) = err.domain() {
                    tracing::warn!(submission_id = %id, reason = %reason, "stale report rejected");
                }
                return Err(err);
            }
        };
        match sub.status {
            SubmissionStatus::Failed => tracing::debug!(
                submission_id = %sub.id,
                job_id = %sub.job_id,
                attempt = sub.attempt,
                error = sub.last_error.as_deref().unwrap_or_default(),
                "submission failed"
            ),
            _ => tracing::debug!(
                submission_id = %sub.id,
                job_id = %sub.job_id,
                "submission succeeded"
            ),
        }
        Ok(sub)
    }
}

impl core::fmt::Debug for SubmissionService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SubmissionService").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use courier_core::ManualClock;
    use courier_jobs::{Job, NewJob, Outcome, submission::UNSPECIFIED_FAILURE};
    use serde_json::json;

    use super::*;
    use crate::queue::{InMemoryQueueStore, JobStore};

    async fn claimed() -> (SubmissionService, Arc<ManualClock>, Submission) {
        let store = InMemoryQueueStore::arc();
        let clock = Arc::new(ManualClock::default());
        let new = NewJob {
            name: "reports".into(),
            message_template: "m".into(),
            website_ids: vec!["a".into()],
        };
        let (job, subs) = Job::create(new, clock.now()).unwrap();
        store.insert_job(job, subs).await.unwrap();
        let sub = store
            .claim_next(Duration::seconds(60), clock.now())
            .await
            .unwrap()
            .unwrap();
        (SubmissionService::new(store, clock.clone()), clock, sub)
    }

    fn failed(token: LeaseToken, error: Option<&str>) -> TerminalReport {
        TerminalReport {
            lease_token: token,
            outcome: Outcome::Failed,
            error: error.map(str::to_string),
            logs: vec!["opened form".into()],
            evidence: Some(json!({"screenshot": "s3://bucket/a.png"}).as_object().unwrap().clone()),
        }
    }

    #[tokio::test]
    async fn failure_without_message_gets_placeholder() {
        let (service, _clock, sub) = claimed().await;
        let done = service.report(sub.id, failed(sub.lease_token.unwrap(), None)).await.unwrap();

        assert_eq!(done.status, SubmissionStatus::Failed);
        assert_eq!(done.last_error.as_deref(), Some(UNSPECIFIED_FAILURE));
        assert_eq!(done.evidence["screenshot"], "s3://bucket/a.png");
        assert!(done.lease_until.is_none());
    }

    #[tokio::test]
    async fn logs_accumulate_across_progress_and_report() {
        let (service, _clock, sub) = claimed().await;
        let token = sub.lease_token.unwrap();

        service.append_log(sub.id, token, vec!["step 1".into()]).await.unwrap();
        service.append_log(sub.id, token, vec!["step 2".into()]).await.unwrap();
        let done = service.report(sub.id, failed(token, Some("captcha"))).await.unwrap();

        assert_eq!(done.logs, vec!["step 1", "step 2", "opened form"]);
        assert_eq!(done.last_error.as_deref(), Some("captcha"));
    }

    #[tokio::test]
    async fn empty_log_batch_is_rejected() {
        let (service, _clock, sub) = claimed().await;
        let err = service
            .append_log(sub.id, sub.lease_token.unwrap(), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn report_after_expiry_is_stale() {
        let (service, clock, sub) = claimed().await;
        clock.advance(Duration::seconds(61));

        let err = service
            .report(sub.id, failed(sub.lease_token.unwrap(), None))
            .await
            .unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::StaleLease(_))));
    }

    #[tokio::test]
    async fn submission_from_another_job_is_not_found() {
        let (service, _clock, sub) = claimed().await;
        assert!(service.get_in_job(sub.job_id, sub.id).await.is_ok());
        let err = service.get_in_job(JobId::new(), sub.id).await.unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::NotFound(_))));
    }
}
