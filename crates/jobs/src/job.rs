//! The job aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use courier_core::{DomainError, DomainResult, JobId};

use crate::counts::JobCounts;
use crate::status::JobStatus;
use crate::submission::Submission;

/// Request to create a job: one submission per target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJob {
    pub name: String,
    pub message_template: String,
    pub website_ids: Vec<String>,
}

impl NewJob {
    pub fn validate(&self) -> DomainResult<()> {
        if self.website_ids.is_empty() {
            return Err(DomainError::invalid_input("websiteIds cannot be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(DomainError::invalid_input("name cannot be empty"));
        }
        if let Some(pos) = self.website_ids.iter().position(|t| t.trim().is_empty()) {
            return Err(DomainError::invalid_input(format!(
                "websiteIds[{pos}] cannot be blank"
            )));
        }
        Ok(())
    }
}

/// A named batch of submissions with cached status counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub message_template: String,
    pub status: JobStatus,
    pub counts: JobCounts,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Build a `queued` job and its `pending` submissions.
    ///
    /// The submission set is fixed here; nothing adds submissions later.
    pub fn create(new: NewJob, now: DateTime<Utc>) -> DomainResult<(Job, Vec<Submission>)> {
        new.validate()?;

        let id = JobId::new();
        let submissions: Vec<Submission> = new
            .website_ids
            .into_iter()
            .enumerate()
            .map(|(position, website_id)| Submission::new(id, website_id, position as u32, now))
            .collect();

        let job = Job {
            id,
            name: new.name.trim().to_string(),
            message_template: new.message_template,
            status: JobStatus::Queued,
            counts: JobCounts::all_pending(submissions.len() as u64),
            created_at: now,
            updated_at: now,
        };

        Ok((job, submissions))
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == JobStatus::Cancelled
    }

    /// Re-derive `status` from the counters.
    pub fn settle(&mut self, now: DateTime<Utc>) {
        let next = self.counts.derive_status(self.status);
        if next != self.status {
            self.status = next;
            self.updated_at = now;
        }
    }

    /// Overwrite the counters with an authoritative tally.
    ///
    /// Returns `true` when the cached counters had drifted.
    pub fn replace_counts(&mut self, counts: JobCounts, now: DateTime<Utc>) -> bool {
        let drifted = self.counts != counts;
        self.counts = counts;
        self.updated_at = now;
        self.settle(now);
        drifted
    }

    /// Mark the job cancelled. Returns `false` if it already was.
    ///
    /// The caller cascades to submissions; pending/running buckets are emptied
    /// here because those submissions become `cancelled`.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_cancelled() {
            return false;
        }
        self.status = JobStatus::Cancelled;
        self.counts.pending = 0;
        self.counts.running = 0;
        self.updated_at = now;
        true
    }

    /// Guard for bulk retries.
    pub fn ensure_retryable(&self) -> DomainResult<()> {
        if self.is_cancelled() {
            return Err(DomainError::invalid_transition(format!(
                "job {} is cancelled; its submissions cannot be retried",
                self.id
            )));
        }
        Ok(())
    }
}
