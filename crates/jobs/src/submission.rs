//! A single unit of work: one target within one job.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use courier_core::{DomainError, DomainResult, JobId, LeaseToken, SubmissionId};

use crate::status::{Outcome, SubmissionStatus};
use crate::transition::{SubmissionEvent, next_status};

/// Opaque key/value blob attached by workers (artifact paths, screenshots, ...).
pub type Evidence = serde_json::Map<String, serde_json::Value>;

/// `lastError` recorded when a failure report carries no message.
pub const UNSPECIFIED_FAILURE: &str = "failed without error message";

/// Outcome report from the current lease holder.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalReport {
    pub lease_token: LeaseToken,
    pub outcome: Outcome,
    pub error: Option<String>,
    pub logs: Vec<String>,
    pub evidence: Option<Evidence>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: SubmissionId,
    pub job_id: JobId,
    pub website_id: String,
    /// Index of the target in the job's creation request.
    pub position: u32,
    pub status: SubmissionStatus,
    /// Number of claims so far; `0` until first picked up.
    pub attempt: u32,
    pub lease_until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_token: Option<LeaseToken>,
    pub last_error: Option<String>,
    pub logs: Vec<String>,
    pub evidence: Evidence,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Submission {
    pub fn new(job_id: JobId, website_id: String, position: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: SubmissionId::new(),
            job_id,
            website_id,
            position,
            status: SubmissionStatus::Pending,
            attempt: 0,
            lease_until: None,
            lease_token: None,
            last_error: None,
            logs: Vec::new(),
            evidence: Evidence::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Pending, or running under a lease that has run out.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            SubmissionStatus::Pending => true,
            SubmissionStatus::Running => self.lease_until.is_none_or(|until| until < now),
            _ => false,
        }
    }

    /// Running under a lease that has not expired yet.
    pub fn has_active_lease(&self, now: DateTime<Utc>) -> bool {
        self.status == SubmissionStatus::Running
            && self.lease_until.is_some_and(|until| until > now)
    }

    /// Grant a fresh lease. Returns the status the submission had before.
    pub fn claim(&mut self, lease: Duration, now: DateTime<Utc>) -> DomainResult<SubmissionStatus> {
        if !self.is_claimable(now) {
            return Err(DomainError::invalid_transition(format!(
                "submission {} is {} and not claimable",
                self.id, self.status
            )));
        }
        let previous = self.status;
        self.status = next_status(previous, SubmissionEvent::Claim)?;
        self.lease_until = Some(now + lease);
        self.lease_token = Some(LeaseToken::new());
        self.attempt += 1;
        self.updated_at = now;
        Ok(previous)
    }

    /// Check that `token` is the live lease on this submission.
    pub fn verify_lease(&self, token: LeaseToken, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != SubmissionStatus::Running {
            return Err(DomainError::invalid_transition(format!(
                "submission {} is {}, not running",
                self.id, self.status
            )));
        }
        if self.lease_token != Some(token) {
            return Err(DomainError::stale_lease(format!(
                "lease on submission {} was superseded (attempt {})",
                self.id, self.attempt
            )));
        }
        match self.lease_until {
            Some(until) if until > now => Ok(()),
            _ => Err(DomainError::stale_lease(format!(
                "lease on submission {} expired",
                self.id
            ))),
        }
    }

    /// Apply a worker's outcome. Returns the status before the report.
    pub fn report(
        &mut self,
        report: TerminalReport,
        now: DateTime<Utc>,
    ) -> DomainResult<SubmissionStatus> {
        self.verify_lease(report.lease_token, now)?;
        let previous = self.status;
        self.status = next_status(previous, SubmissionEvent::Report(report.outcome))?;

        self.last_error = match report.outcome {
            Outcome::Success => None,
            Outcome::Failed => Some(
                report
                    .error
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| UNSPECIFIED_FAILURE.to_string()),
            ),
        };
        self.logs.extend(report.logs);
        if let Some(evidence) = report.evidence {
            self.evidence.extend(evidence);
        }
        self.clear_lease();
        self.updated_at = now;
        Ok(previous)
    }

    /// Append progress lines on behalf of the lease holder.
    pub fn append_logs(
        &mut self,
        token: LeaseToken,
        lines: Vec<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.verify_lease(token, now)?;
        self.logs.extend(lines);
        self.updated_at = now;
        Ok(())
    }

    /// Push the lease deadline out to `now + lease`.
    pub fn extend_lease(
        &mut self,
        token: LeaseToken,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.verify_lease(token, now)?;
        self.lease_until = Some(now + lease);
        self.updated_at = now;
        Ok(())
    }

    /// Re-queue a failed submission. Logs are kept.
    pub fn retry(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.status = next_status(self.status, SubmissionEvent::Retry)?;
        self.last_error = None;
        self.clear_lease();
        self.updated_at = now;
        Ok(())
    }

    /// Cancel if still pending or running. Returns the previous status when changed.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Option<SubmissionStatus> {
        let previous = self.status;
        let next = next_status(previous, SubmissionEvent::Cancel).ok()?;
        self.status = next;
        self.clear_lease();
        self.updated_at = now;
        Some(previous)
    }

    fn clear_lease(&mut self) {
        self.lease_until = None;
        self.lease_token = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(now: DateTime<Utc>) -> Submission {
        Submission::new(JobId::new(), "site-1".to_string(), 0, now)
    }

    fn report(token: LeaseToken, outcome: Outcome) -> TerminalReport {
        TerminalReport {
            lease_token: token,
            outcome,
            error: None,
            logs: vec!["done".to_string()],
            evidence: None,
        }
    }

    #[test]
    fn claim_sets_lease_and_bumps_attempt() {
        let now = Utc::now();
        let mut sub = pending(now);

        let prev = sub.claim(Duration::seconds(30), now).unwrap();
        assert_eq!(prev, SubmissionStatus::Pending);
        assert_eq!(sub.status, SubmissionStatus::Running);
        assert_eq!(sub.attempt, 1);
        assert_eq!(sub.lease_until, Some(now + Duration::seconds(30)));
        assert!(sub.lease_token.is_some());
    }

    #[test]
    fn active_lease_blocks_reclaim_until_expiry() {
        let now = Utc::now();
        let mut sub = pending(now);
        sub.claim(Duration::seconds(1), now).unwrap();

        assert!(!sub.is_claimable(now));
        assert!(sub.claim(Duration::seconds(1), now).is_err());

        let later = now + Duration::seconds(2);
        assert!(sub.is_claimable(later));
        let prev = sub.claim(Duration::seconds(1), later).unwrap();
        assert_eq!(prev, SubmissionStatus::Running);
        assert_eq!(sub.attempt, 2);
    }

    #[test]
    fn superseded_token_is_stale() {
        let now = Utc::now();
        let mut sub = pending(now);
        sub.claim(Duration::seconds(1), now).unwrap();
        let first = sub.lease_token.unwrap();

        let later = now + Duration::seconds(2);
        sub.claim(Duration::seconds(10), later).unwrap();

        let err = sub.report(report(first, Outcome::Success), later).unwrap_err();
        assert!(matches!(err, DomainError::StaleLease(_)));
        assert_eq!(sub.status, SubmissionStatus::Running);
    }

    #[test]
    fn expired_token_is_stale_even_before_reclaim() {
        let now = Utc::now();
        let mut sub = pending(now);
        sub.claim(Duration::seconds(1), now).unwrap();
        let token = sub.lease_token.unwrap();

        let err = sub
            .report(report(token, Outcome::Success), now + Duration::seconds(5))
            .unwrap_err();
        assert!(matches!(err, DomainError::StaleLease(_)));
    }

    #[test]
    fn failure_report_records_error_and_clears_lease() {
        let now = Utc::now();
        let mut sub = pending(now);
        sub.claim(Duration::seconds(30), now).unwrap();
        let token = sub.lease_token.unwrap();

        let mut evidence = Evidence::new();
        evidence.insert("screenshot".into(), serde_json::json!("s3://bucket/1.png"));

        sub.report(
            TerminalReport {
                lease_token: token,
                outcome: Outcome::Failed,
                error: Some("form not found".to_string()),
                logs: vec!["opened page".to_string()],
                evidence: Some(evidence),
            },
            now,
        )
        .unwrap();

        assert_eq!(sub.status, SubmissionStatus::Failed);
        assert_eq!(sub.last_error.as_deref(), Some("form not found"));
        assert_eq!(sub.lease_until, None);
        assert_eq!(sub.lease_token, None);
        assert_eq!(sub.logs, vec!["opened page".to_string()]);
        assert_eq!(sub.evidence["screenshot"], "s3://bucket/1.png");
    }

    #[test]
    fn failure_without_message_gets_placeholder() {
        let now = Utc::now();
        let mut sub = pending(now);
        sub.claim(Duration::seconds(30), now).unwrap();
        let token = sub.lease_token.unwrap();
        sub.report(report(token, Outcome::Failed), now).unwrap();
        assert_eq!(sub.last_error.as_deref(), Some(UNSPECIFIED_FAILURE));
    }

    #[test]
    fn retry_keeps_logs_and_attempt() {
        let now = Utc::now();
        let mut sub = pending(now);
        sub.claim(Duration::seconds(30), now).unwrap();
        let token = sub.lease_token.unwrap();
        sub.report(report(token, Outcome::Failed), now).unwrap();

        sub.retry(now).unwrap();
        assert_eq!(sub.status, SubmissionStatus::Pending);
        assert_eq!(sub.last_error, None);
        assert_eq!(sub.attempt, 1);
        assert_eq!(sub.logs, vec!["done".to_string()]);
    }

    #[test]
    fn evidence_accumulates_across_attempts() {
        let now = Utc::now();
        let mut sub = pending(now);
        let with_evidence = |token, outcome, pairs: &[(&str, &str)]| TerminalReport {
            evidence: Some(
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), serde_json::json!(v)))
                    .collect(),
            ),
            ..report(token, outcome)
        };

        sub.claim(Duration::seconds(30), now).unwrap();
        let first = sub.lease_token.unwrap();
        sub.report(
            with_evidence(first, Outcome::Failed, &[("screenshot", "1.png"), ("http", "500")]),
            now,
        )
        .unwrap();

        sub.retry(now).unwrap();
        sub.claim(Duration::seconds(30), now).unwrap();
        let second = sub.lease_token.unwrap();
        sub.report(
            with_evidence(second, Outcome::Success, &[("http", "200"), ("receipt", "r-42")]),
            now,
        )
        .unwrap();

        assert_eq!(sub.status, SubmissionStatus::Success);
        assert_eq!(sub.attempt, 2);
        assert_eq!(sub.evidence.len(), 3);
        assert_eq!(sub.evidence["screenshot"], "1.png");
        assert_eq!(sub.evidence["http"], "200");
        assert_eq!(sub.evidence["receipt"], "r-42");
        assert_eq!(sub.logs, vec!["done".to_string(), "done".to_string()]);
    }

    #[test]
    fn cancelled_submission_rejects_late_report() {
        let now = Utc::now();
        let mut sub = pending(now);
        sub.claim(Duration::seconds(30), now).unwrap();
        let token = sub.lease_token.unwrap();

        assert_eq!(sub.cancel(now), Some(SubmissionStatus::Running));
        let err = sub.report(report(token, Outcome::Success), now).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
        assert_eq!(sub.status, SubmissionStatus::Cancelled);
    }

    #[test]
    fn cancel_leaves_finished_submissions_alone() {
        let now = Utc::now();
        let mut sub = pending(now);
        sub.claim(Duration::seconds(30), now).unwrap();
        let token = sub.lease_token.unwrap();
        sub.report(report(token, Outcome::Success), now).unwrap();

        assert_eq!(sub.cancel(now), None);
        assert_eq!(sub.status, SubmissionStatus::Success);
    }

    #[test]
    fn extend_lease_requires_live_token() {
        let now = Utc::now();
        let mut sub = pending(now);
        sub.claim(Duration::seconds(5), now).unwrap();
        let token = sub.lease_token.unwrap();

        sub.extend_lease(token, Duration::seconds(60), now + Duration::seconds(4)).unwrap();
        assert_eq!(sub.lease_until, Some(now + Duration::seconds(64)));

        let err = sub
            .extend_lease(LeaseToken::new(), Duration::seconds(60), now)
            .unwrap_err();
        assert!(matches!(err, DomainError::StaleLease(_)));
    }
}
