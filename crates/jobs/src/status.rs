//! Closed status vocabularies for jobs and submissions.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use courier_core::DomainError;

/// Lifecycle status of a job.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created; no submission has been picked up yet.
    Queued,
    /// At least one submission is in flight or finished, and work remains.
    Running,
    /// No pending or running submissions remain.
    Completed,
    /// Cancelled by an operator. Terminal.
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(DomainError::invalid_input(format!("unknown job status '{other}'"))),
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a submission.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl SubmissionStatus {
    pub const ALL: [SubmissionStatus; 5] = [
        SubmissionStatus::Pending,
        SubmissionStatus::Running,
        SubmissionStatus::Success,
        SubmissionStatus::Failed,
        SubmissionStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Running => "running",
            SubmissionStatus::Success => "success",
            SubmissionStatus::Failed => "failed",
            SubmissionStatus::Cancelled => "cancelled",
        }
    }

    /// `success`, `failed` and `cancelled` end a processing round.
    ///
    /// `failed` can still be re-queued by an explicit retry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubmissionStatus::Success | SubmissionStatus::Failed | SubmissionStatus::Cancelled
        )
    }
}

impl FromStr for SubmissionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SubmissionStatus::Pending),
            "running" => Ok(SubmissionStatus::Running),
            "success" => Ok(SubmissionStatus::Success),
            "failed" => Ok(SubmissionStatus::Failed),
            "cancelled" => Ok(SubmissionStatus::Cancelled),
            other => Err(DomainError::invalid_input(format!(
                "unknown submission status '{other}'"
            ))),
        }
    }
}

impl core::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome a worker reports for a leased submission.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failed => "failed",
        }
    }
}

impl FromStr for Outcome {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Outcome::Success),
            "failed" => Ok(Outcome::Failed),
            other => Err(DomainError::invalid_input(format!(
                "reported status must be 'success' or 'failed', got '{other}'"
            ))),
        }
    }
}

impl core::fmt::Display for Outcome {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_parse_their_own_names() {
        for status in SubmissionStatus::ALL {
            assert_eq!(status.as_str().parse::<SubmissionStatus>().unwrap(), status);
        }
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
    }

    #[test]
    fn outcome_rejects_non_terminal_statuses() {
        assert!(matches!(
            "running".parse::<Outcome>(),
            Err(DomainError::InvalidInput(_))
        ));
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&SubmissionStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
    }
}
