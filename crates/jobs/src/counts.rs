//! Denormalized per-job status counters.

use serde::{Deserialize, Serialize};

use crate::status::{JobStatus, SubmissionStatus};

/// Cached tally of a job's submissions by status.
///
/// `cancelled` submissions only contribute to `total`. The hot path applies
/// deltas with [`JobCounts::apply`]; [`JobCounts::tally`] is the authoritative
/// rebuild from ground truth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub total: u64,
    pub pending: u64,
    pub running: u64,
    pub success: u64,
    pub failed: u64,
}

impl JobCounts {
    /// Counters for a freshly created job: everything pending.
    pub fn all_pending(total: u64) -> Self {
        Self {
            total,
            pending: total,
            ..Default::default()
        }
    }

    /// Rebuild counters from a full set of submission statuses.
    pub fn tally<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = SubmissionStatus>,
    {
        let mut counts = Self::default();
        for status in statuses {
            counts.add(status, 1);
        }
        counts
    }

    /// Count `n` more submissions in `status`.
    pub fn add(&mut self, status: SubmissionStatus, n: u64) {
        self.total += n;
        if let Some(bucket) = self.bucket_mut(status) {
            *bucket += n;
        }
    }

    /// Apply a single status change as a counter delta.
    ///
    /// Saturating: a drifted cache never underflows, it waits for a recompute.
    pub fn apply(&mut self, from: SubmissionStatus, to: SubmissionStatus) {
        if from == to {
            return;
        }
        if let Some(bucket) = self.bucket_mut(from) {
            *bucket = bucket.saturating_sub(1);
        }
        if let Some(bucket) = self.bucket_mut(to) {
            *bucket += 1;
        }
    }

    /// Apply the same status change `n` times.
    pub fn apply_n(&mut self, from: SubmissionStatus, to: SubmissionStatus, n: u64) {
        if from == to || n == 0 {
            return;
        }
        if let Some(bucket) = self.bucket_mut(from) {
            *bucket = bucket.saturating_sub(n);
        }
        if let Some(bucket) = self.bucket_mut(to) {
            *bucket += n;
        }
    }

    /// Submissions that still need a worker (pending or leased).
    pub fn outstanding(&self) -> u64 {
        self.pending + self.running
    }

    /// Derive the job status implied by these counters.
    ///
    /// `cancelled` is sticky and never derived away.
    pub fn derive_status(&self, current: JobStatus) -> JobStatus {
        if current == JobStatus::Cancelled {
            return JobStatus::Cancelled;
        }
        if self.outstanding() == 0 {
            JobStatus::Completed
        } else if self.running + self.success + self.failed == 0 {
            JobStatus::Queued
        } else {
            JobStatus::Running
        }
    }

    fn bucket_mut(&mut self, status: SubmissionStatus) -> Option<&mut u64> {
        match status {
            SubmissionStatus::Pending => Some(&mut self.pending),
            SubmissionStatus::Running => Some(&mut self.running),
            SubmissionStatus::Success => Some(&mut self.success),
            SubmissionStatus::Failed => Some(&mut self.failed),
            SubmissionStatus::Cancelled => None,
        }
    }
}
