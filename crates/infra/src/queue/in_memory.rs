//! In-memory queue store for tests/dev.
//!
//! A single `RwLock` serializes every mutation, so select-and-claim in
//! `claim_next` is trivially atomic.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use courier_core::{DomainError, JobId, LeaseToken, SubmissionId};
use courier_jobs::{Job, JobCounts, Submission, SubmissionStatus, TerminalReport};

use super::query::{Page, Pagination, SubmissionFilter};
use super::store::{JobStore, QueueError, Recomputed, SubmissionStore};

#[derive(Debug, Default)]
struct State {
    jobs: HashMap<JobId, Job>,
    submissions: HashMap<SubmissionId, Submission>,
    /// Submission ids per job, in insertion order.
    by_job: HashMap<JobId, Vec<SubmissionId>>,
}

impl State {
    fn job_mut(&mut self, id: JobId) -> Result<&mut Job, QueueError> {
        self.jobs.get_mut(&id).ok_or_else(|| QueueError::job_not_found(id))
    }

    fn job_submissions(&self, id: JobId) -> impl Iterator<Item = &Submission> {
        self.by_job
            .get(&id)
            .into_iter()
            .flatten()
            .filter_map(|sid| self.submissions.get(sid))
    }

    /// Run `f` against one submission, then fold its status change into the job counters.
    fn mutate_submission<T>(
        &mut self,
        id: SubmissionId,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut Submission) -> Result<T, DomainError>,
    ) -> Result<(T, Submission), QueueError> {
        let sub = self
            .submissions
            .get_mut(&id)
            .ok_or_else(|| QueueError::submission_not_found(id))?;
        let before = sub.status;
        let out = f(sub)?;
        let after = sub.status;
        let snapshot = sub.clone();

        if before != after {
            if let Some(job) = self.jobs.get_mut(&snapshot.job_id) {
                job.counts.apply(before, after);
                job.updated_at = now;
                job.settle(now);
            }
        }
        Ok((out, snapshot))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryQueueStore {
    state: RwLock<State>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Overwrite a job's cached counters without touching submissions.
    ///
    /// Simulates drift from a crash between a submission write and its counter delta.
    #[doc(hidden)]
    pub async fn corrupt_counts(&self, id: JobId, counts: JobCounts) -> Result<(), QueueError> {
        let mut state = self.state.write().await;
        state.job_mut(id)?.counts = counts;
        Ok(())
    }
}

#[async_trait::async_trait]
impl SubmissionStore for InMemoryQueueStore {
    async fn get_submission(&self, id: SubmissionId) -> Result<Submission, QueueError> {
        let state = self.state.read().await;
        state
            .submissions
            .get(&id)
            .cloned()
            .ok_or_else(|| QueueError::submission_not_found(id))
    }

    async fn list_by_job(
        &self,
        job_id: JobId,
        filter: SubmissionFilter,
        pagination: Pagination,
    ) -> Result<Page<Submission>, QueueError> {
        let state = self.state.read().await;
        if !state.jobs.contains_key(&job_id) {
            return Err(QueueError::job_not_found(job_id));
        }
        let matching: Vec<Submission> = state
            .job_submissions(job_id)
            .filter(|s| filter.matches(s.status))
            .cloned()
            .collect();
        Ok(pagination.apply(matching))
    }

    async fn claim_next(
        &self,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Submission>, QueueError> {
        let mut state = self.state.write().await;

        // Oldest eligible submission (FIFO by creation, then position within the job).
        let next = state
            .submissions
            .values()
            .filter(|s| s.is_claimable(now))
            .min_by_key(|s| (s.created_at, s.job_id, s.position))
            .map(|s| s.id);

        let Some(id) = next else {
            return Ok(None);
        };

        let (_, claimed) = state.mutate_submission(id, now, |s| s.claim(lease, now))?;
        Ok(Some(claimed))
    }

    async fn append_log(
        &self,
        id: SubmissionId,
        token: LeaseToken,
        lines: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<Submission, QueueError> {
        let mut state = self.state.write().await;
        let (_, sub) = state.mutate_submission(id, now, |s| s.append_logs(token, lines, now))?;
        Ok(sub)
    }

    async fn extend_lease(
        &self,
        id: SubmissionId,
        token: LeaseToken,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Submission, QueueError> {
        let mut state = self.state.write().await;
        let (_, sub) = state.mutate_submission(id, now, |s| s.extend_lease(token, lease, now))?;
        Ok(sub)
    }

    async fn set_terminal(
        &self,
        id: SubmissionId,
        report: TerminalReport,
        now: DateTime<Utc>,
    ) -> Result<Submission, QueueError> {
        let mut state = self.state.write().await;
        let (_, sub) = state.mutate_submission(id, now, |s| s.report(report, now))?;
        Ok(sub)
    }
}

#[async_trait::async_trait]
impl JobStore for InMemoryQueueStore {
    async fn insert_job(&self, job: Job, submissions: Vec<Submission>) -> Result<(), QueueError> {
        let mut state = self.state.write().await;
        if state.jobs.contains_key(&job.id) {
            return Err(DomainError::conflict(format!("job {} already exists", job.id)).into());
        }

        let ids: Vec<SubmissionId> = submissions.iter().map(|s| s.id).collect();
        for sub in submissions {
            state.submissions.insert(sub.id, sub);
        }
        state.by_job.insert(job.id, ids);
        state.jobs.insert(job.id, job);
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> Result<Job, QueueError> {
        let state = self.state.read().await;
        state
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| QueueError::job_not_found(id))
    }

    async fn list_jobs(&self, pagination: Pagination) -> Result<Page<Job>, QueueError> {
        let state = self.state.read().await;
        let mut jobs: Vec<Job> = state.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(pagination.apply(jobs))
    }

    async fn cancel_job(&self, id: JobId, now: DateTime<Utc>) -> Result<Job, QueueError> {
        let mut state = self.state.write().await;
        if !state.job_mut(id)?.cancel(now) {
            return Ok(state.job_mut(id)?.clone());
        }

        let ids = state.by_job.get(&id).cloned().unwrap_or_default();
        for sid in ids {
            if let Some(sub) = state.submissions.get_mut(&sid) {
                sub.cancel(now);
            }
        }
        Ok(state.job_mut(id)?.clone())
    }

    async fn delete_job(&self, id: JobId, now: DateTime<Utc>) -> Result<(), QueueError> {
        let mut state = self.state.write().await;
        if !state.jobs.contains_key(&id) {
            return Err(QueueError::job_not_found(id));
        }

        let leased = state
            .job_submissions(id)
            .filter(|s| s.has_active_lease(now))
            .count();
        if leased > 0 {
            return Err(DomainError::conflict(format!(
                "job {id} has {leased} submission(s) under an active lease"
            ))
            .into());
        }

        for sid in state.by_job.remove(&id).unwrap_or_default() {
            state.submissions.remove(&sid);
        }
        state.jobs.remove(&id);
        Ok(())
    }

    async fn retry_failed(
        &self,
        id: JobId,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<u64, QueueError> {
        let mut state = self.state.write().await;
        state.job_mut(id)?.ensure_retryable()?;

        let failed: Vec<SubmissionId> = state
            .job_submissions(id)
            .filter(|s| s.status == SubmissionStatus::Failed)
            .take(limit as usize)
            .map(|s| s.id)
            .collect();

        let mut retried = 0u64;
        for sid in failed {
            if let Some(sub) = state.submissions.get_mut(&sid) {
                sub.retry(now)?;
                retried += 1;
            }
        }

        if retried > 0 {
            let job = state.job_mut(id)?;
            job.counts
                .apply_n(SubmissionStatus::Failed, SubmissionStatus::Pending, retried);
            job.updated_at = now;
            job.settle(now);
        }
        Ok(retried)
    }

    async fn recompute_counts(
        &self,
        id: JobId,
        now: DateTime<Utc>,
    ) -> Result<Recomputed, QueueError> {
        let mut state = self.state.write().await;
        if !state.jobs.contains_key(&id) {
            return Err(QueueError::job_not_found(id));
        }
        let truth = JobCounts::tally(state.job_submissions(id).map(|s| s.status));
        let job = state.job_mut(id)?;
        let drifted = job.replace_counts(truth, now);
        Ok(Recomputed {
            job: job.clone(),
            drifted,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use courier_jobs::{JobStatus, NewJob, Outcome};

    use super::*;

    async fn seeded(store: &InMemoryQueueStore, targets: usize, now: DateTime<Utc>) -> Job {
        let new = NewJob {
            name: "outreach".to_string(),
            message_template: "hi".to_string(),
            website_ids: (0..targets).map(|i| format!("site-{i}")).collect(),
        };
        let (job, subs) = Job::create(new, now).unwrap();
        store.insert_job(job.clone(), subs).await.unwrap();
        job
    }

    fn report(sub: &Submission, outcome: Outcome) -> TerminalReport {
        TerminalReport {
            lease_token: sub.lease_token.unwrap(),
            outcome,
            error: Some("boom".to_string()),
            logs: vec![],
            evidence: None,
        }
    }

    #[tokio::test]
    async fn claims_in_fifo_order_then_empty() {
        let store = InMemoryQueueStore::new();
        let now = Utc::now();
        let older = seeded(&store, 2, now).await;
        let newer = seeded(&store, 1, now + Duration::seconds(1)).await;
        let lease = Duration::seconds(60);

        let a = store.claim_next(lease, now).await.unwrap().unwrap();
        let b = store.claim_next(lease, now).await.unwrap().unwrap();
        let c = store.claim_next(lease, now).await.unwrap().unwrap();

        assert_eq!((a.job_id, a.position), (older.id, 0));
        assert_eq!((b.job_id, b.position), (older.id, 1));
        assert_eq!(c.job_id, newer.id);
        assert!(store.claim_next(lease, now).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_claims_never_duplicate() {
        let store = InMemoryQueueStore::arc();
        let now = Utc::now();
        let n = 64;
        seeded(&store, n, now).await;

        let mut handles = Vec::new();
        for _ in 0..n {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.claim_next(Duration::seconds(60), now).await.unwrap()
            }));
        }

        let mut ids = HashSet::new();
        for h in handles {
            let claimed = h.await.unwrap().expect("one submission per caller");
            assert!(ids.insert(claimed.id), "submission {} claimed twice", claimed.id);
        }
        assert_eq!(ids.len(), n);
        assert!(store.claim_next(Duration::seconds(60), now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn terminal_reports_update_counters_and_complete_job() {
        let store = InMemoryQueueStore::new();
        let now = Utc::now();
        let job = seeded(&store, 2, now).await;
        let lease = Duration::seconds(60);

        let a = store.claim_next(lease, now).await.unwrap().unwrap();
        let b = store.claim_next(lease, now).await.unwrap().unwrap();
        assert_eq!(store.get_job(job.id).await.unwrap().status, JobStatus::Running);

        store.set_terminal(a.id, report(&a, Outcome::Success), now).await.unwrap();
        store.set_terminal(b.id, report(&b, Outcome::Failed), now).await.unwrap();

        let job = store.get_job(job.id).await.unwrap();
        assert_eq!(job.counts.success, 1);
        assert_eq!(job.counts.failed, 1);
        assert_eq!(job.counts.outstanding(), 0);
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn retry_failed_is_bounded_by_limit() {
        let store = InMemoryQueueStore::new();
        let now = Utc::now();
        let job = seeded(&store, 10, now).await;
        let lease = Duration::seconds(60);

        while let Some(sub) = store.claim_next(lease, now).await.unwrap() {
            store.set_terminal(sub.id, report(&sub, Outcome::Failed), now).await.unwrap();
        }

        let retried = store.retry_failed(job.id, 3, now).await.unwrap();
        assert_eq!(retried, 3);

        let pending = store
            .list_by_job(
                job.id,
                SubmissionFilter::with_status(SubmissionStatus::Pending),
                Pagination::default(),
            )
            .await
            .unwrap();
        let failed = store
            .list_by_job(
                job.id,
                SubmissionFilter::with_status(SubmissionStatus::Failed),
                Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(pending.total, 3);
        assert_eq!(failed.total, 7);
        // Oldest first.
        assert_eq!(
            pending.items.iter().map(|s| s.position).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(pending.items.iter().all(|s| s.last_error.is_none()));

        let job = store.get_job(job.id).await.unwrap();
        assert_eq!(job.counts.pending, 3);
        assert_eq!(job.counts.failed, 7);
        // Seven submissions are finished, so the job has started.
        assert_eq!(job.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn retrying_every_failure_returns_job_to_queued() {
        let store = InMemoryQueueStore::new();
        let now = Utc::now();
        let job = seeded(&store, 4, now).await;
        let lease = Duration::seconds(60);

        while let Some(sub) = store.claim_next(lease, now).await.unwrap() {
            store.set_terminal(sub.id, report(&sub, Outcome::Failed), now).await.unwrap();
        }
        assert_eq!(store.get_job(job.id).await.unwrap().status, JobStatus::Completed);

        assert_eq!(store.retry_failed(job.id, 10, now).await.unwrap(), 4);

        let job = store.get_job(job.id).await.unwrap();
        assert_eq!(job.counts, JobCounts::all_pending(4));
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn retry_with_zero_limit_is_noop() {
        let store = InMemoryQueueStore::new();
        let now = Utc::now();
        let job = seeded(&store, 1, now).await;
        assert_eq!(store.retry_failed(job.id, 0, now).await.unwrap(), 0);
        assert_eq!(store.retry_failed(job.id, 5, now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cancel_cascades_to_open_submissions_only() {
        let store = InMemoryQueueStore::new();
        let now = Utc::now();
        let job = seeded(&store, 10, now).await;
        let lease = Duration::seconds(60);

        // 3 success, 2 running, 5 pending.
        let mut running = Vec::new();
        for i in 0..5 {
            let sub = store.claim_next(lease, now).await.unwrap().unwrap();
            if i < 3 {
                store.set_terminal(sub.id, report(&sub, Outcome::Success), now).await.unwrap();
            } else {
                running.push(sub);
            }
        }

        let cancelled = store.cancel_job(job.id, now).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);

        let all = store
            .list_by_job(job.id, SubmissionFilter::default(), Pagination::default())
            .await
            .unwrap();
        let count = |status| all.items.iter().filter(|s| s.status == status).count();
        assert_eq!(count(SubmissionStatus::Cancelled), 7);
        assert_eq!(count(SubmissionStatus::Success), 3);

        let late = &running[0];
        let err = store
            .set_terminal(late.id, report(late, Outcome::Success), now)
            .await
            .unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::InvalidTransition(_))));

        // Idempotent, and nothing is claimable any more.
        let again = store.cancel_job(job.id, now).await.unwrap();
        assert_eq!(again.status, JobStatus::Cancelled);
        assert!(store.claim_next(lease, now).await.unwrap().is_none());
        assert!(store.retry_failed(job.id, 1, now).await.is_err());
    }

    #[tokio::test]
    async fn delete_conflicts_while_lease_is_active() {
        let store = InMemoryQueueStore::new();
        let now = Utc::now();
        let job = seeded(&store, 1, now).await;
        let sub = store.claim_next(Duration::seconds(5), now).await.unwrap().unwrap();

        let err = store.delete_job(job.id, now).await.unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::Conflict(_))));

        // Once the lease has lapsed the job can go.
        store.delete_job(job.id, now + Duration::seconds(10)).await.unwrap();
        assert!(store.get_job(job.id).await.is_err());
        assert!(store.get_submission(sub.id).await.is_err());
    }

    #[tokio::test]
    async fn recompute_repairs_drift() {
        let store = InMemoryQueueStore::new();
        let now = Utc::now();
        let job = seeded(&store, 4, now).await;
        store.claim_next(Duration::seconds(60), now).await.unwrap();

        store
            .corrupt_counts(job.id, JobCounts { total: 9, pending: 9, ..Default::default() })
            .await
            .unwrap();

        let fixed = store.recompute_counts(job.id, now).await.unwrap();
        assert!(fixed.drifted);
        assert_eq!(
            fixed.job.counts,
            JobCounts { total: 4, pending: 3, running: 1, success: 0, failed: 0 }
        );

        let again = store.recompute_counts(job.id, now).await.unwrap();
        assert!(!again.drifted);
    }

    #[tokio::test]
    async fn list_by_unknown_job_is_not_found() {
        let store = InMemoryQueueStore::new();
        let err = store
            .list_by_job(JobId::new(), SubmissionFilter::default(), Pagination::default())
            .await
            .unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::NotFound(_))));
    }
}
