use serde::{Deserialize, Serialize};

use courier_core::LeaseToken;
use courier_infra::queue::{Page, Pagination};
use courier_jobs::{Evidence, NewJob, Submission};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub name: String,
    #[serde(default)]
    pub message_template: String,
    #[serde(default)]
    pub website_ids: Vec<String>,
}

impl From<CreateJobRequest> for NewJob {
    fn from(req: CreateJobRequest) -> Self {
        NewJob {
            name: req.name,
            message_template: req.message_template,
            website_ids: req.website_ids,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RetryFailedRequest {
    pub limit: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl ListQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination::new(self.limit, self.offset)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SubmissionListQuery {
    pub status: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClaimQuery {
    /// Lease length in seconds.
    pub lease: Option<u64>,
}

/// Worker outcome report (`PATCH /submissions/:id`).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    pub status: String,
    pub lease_token: LeaseToken,
    #[serde(default)]
    pub logs: Vec<String>,
    pub evidence: Option<Evidence>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendLogsRequest {
    pub lease_token: LeaseToken,
    pub lines: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendLeaseRequest {
    pub lease_token: LeaseToken,
    /// Seconds from now; the configured default when omitted.
    pub lease: Option<u64>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
    pub has_more: bool,
}

impl<T> PageResponse<T> {
    pub fn from_page<U>(page: Page<U>, f: impl FnMut(U) -> T) -> Self {
        Self {
            items: page.items.into_iter().map(f).collect(),
            total: page.total,
            limit: page.pagination.limit,
            offset: page.pagination.offset,
            has_more: page.has_more,
        }
    }
}

impl<T> From<Page<T>> for PageResponse<T> {
    fn from(page: Page<T>) -> Self {
        Self::from_page(page, |item| item)
    }
}

#[derive(Debug, Serialize)]
pub struct RetryFailedResponse {
    pub retried: u64,
}

/// Submission as shown to console users: the lease token is a worker credential.
pub fn console_submission(mut sub: Submission) -> Submission {
    sub.lease_token = None;
    sub
}
