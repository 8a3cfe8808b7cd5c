//! Job-level operations: create, read, cancel, export and delete.

use std::sync::Arc;

use tracing::instrument;

use courier_core::{Clock, JobId};
use courier_jobs::{Job, NewJob};

use crate::config::ExportConfig;

use super::export::{CsvExport, CsvStream};
use super::query::{Page, Pagination};
use super::store::{JobStore, QueueError, QueueStore};

#[derive(Clone)]
pub struct JobController {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    export: CsvExport,
}

impl JobController {
    pub fn new<S>(store: Arc<S>, clock: Arc<dyn Clock>, export: ExportConfig) -> Self
    where
        S: QueueStore + 'static,
    {
        Self {
            export: CsvExport::new(store.clone(), export),
            store,
            clock,
        }
    }

    /// Create a `queued` job with one `pending` submission per target.
    #[instrument(skip(self, new), fields(targets = new.website_ids.len()), err)]
    pub async fn create(&self, new: NewJob) -> Result<Job, QueueError> {
        let (job, submissions) = Job::create(new, self.clock.now())?;
        self.store.insert_job(job.clone(), submissions).await?;
        tracing::info!(job_id = %job.id, total = job.counts.total, "job created");
        Ok(job)
    }

    pub async fn get(&self, id: JobId) -> Result<Job, QueueError> {
        self.store.get_job(id).await
    }

    /// Jobs, newest first.
    pub async fn list(&self, pagination: Pagination) -> Result<Page<Job>, QueueError> {
        self.store.list_jobs(pagination).await
    }

    /// Cancel the job and its open submissions. Cancelling twice is a no-op.
    #[instrument(skip(self), fields(job_id = %id), err)]
    pub async fn cancel(&self, id: JobId) -> Result<Job, QueueError> {
        let job = self.store.cancel_job(id, self.clock.now()).await?;
        tracing::info!(job_id = %id, "job cancelled");
        Ok(job)
    }

    /// Delete the job and its submissions; `Conflict` while any lease is live.
    #[instrument(skip(self), fields(job_id = %id), err)]
    pub async fn delete(&self, id: JobId) -> Result<(), QueueError> {
        self.store.delete_job(id, self.clock.now()).await?;
        tracing::info!(job_id = %id, "job deleted");
        Ok(())
    }

    pub async fn export_csv(&self, id: JobId) -> Result<CsvStream, QueueError> {
        self.export.stream(id).await
    }
}

impl core::fmt::Debug for JobController {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JobController")
            .field("clock", &self.clock)
            .field("export", &self.export)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use courier_core::{DomainError, ManualClock};
    use courier_jobs::{JobCounts, JobStatus, SubmissionStatus};

    use super::*;
    use crate::queue::{InMemoryQueueStore, SubmissionFilter, SubmissionStore};

    fn controller() -> (Arc<InMemoryQueueStore>, Arc<ManualClock>, JobController) {
        let store = InMemoryQueueStore::arc();
        let clock = Arc::new(ManualClock::default());
        let controller = JobController::new(store.clone(), clock.clone(), ExportConfig::default());
        (store, clock, controller)
    }

    fn new_job(targets: &[&str]) -> NewJob {
        NewJob {
            name: "Spring outreach".into(),
            message_template: "Hello {{name}}".into(),
            website_ids: targets.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn create_seeds_pending_submissions() {
        let (store, _clock, controller) = controller();
        let job = controller.create(new_job(&["a", "b", "c"])).await.unwrap();

        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.counts, JobCounts::all_pending(3));

        let subs = store
            .list_by_job(job.id, SubmissionFilter::default(), Pagination::default())
            .await
            .unwrap();
        assert_eq!(
            subs.items.iter().map(|s| s.website_id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
        assert!(subs.items.iter().all(|s| s.status == SubmissionStatus::Pending && s.attempt == 0));
    }

    #[tokio::test]
    async fn empty_targets_create_nothing() {
        let (_store, _clock, controller) = controller();
        let err = controller.create(new_job(&[])).await.unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::InvalidInput(_))));
        assert_eq!(controller.list(Pagination::default()).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let (_store, clock, controller) = controller();
        let older = controller.create(new_job(&["a"])).await.unwrap();
        clock.advance(Duration::seconds(1));
        let newer = controller.create(new_job(&["b"])).await.unwrap();

        let page = controller.list(Pagination::new(Some(1), None)).await.unwrap();
        assert_eq!(page.items[0].id, newer.id);
        assert_eq!(page.total, 2);
        assert!(page.has_more);

        let rest = controller.list(Pagination::new(Some(1), Some(1))).await.unwrap();
        assert_eq!(rest.items[0].id, older.id);
    }

    #[tokio::test]
    async fn delete_waits_for_live_leases() {
        let (store, clock, controller) = controller();
        let job = controller.create(new_job(&["a"])).await.unwrap();
        store.claim_next(Duration::seconds(10), clock.now()).await.unwrap();

        let err = controller.delete(job.id).await.unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::Conflict(_))));

        clock.advance(Duration::seconds(11));
        controller.delete(job.id).await.unwrap();
        let err = controller.get(job.id).await.unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::NotFound(_))));
    }

    #[tokio::test]
    async fn cancel_then_delete() {
        let (store, clock, controller) = controller();
        let job = controller.create(new_job(&["a", "b"])).await.unwrap();
        store.claim_next(Duration::seconds(600), clock.now()).await.unwrap();

        let cancelled = controller.cancel(job.id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert_eq!(cancelled.counts.outstanding(), 0);
        controller.delete(job.id).await.unwrap();
    }
}
