//! Worker-facing endpoints: claim, progress, heartbeat, report.

use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Extension, Path, Query,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::IntoResponse,
};

use courier_core::SubmissionId;
use courier_jobs::{Outcome, TerminalReport};

use crate::app::dto;
use crate::app::errors;
use crate::app::services::AppServices;

fn parse_submission_id(raw: &str) -> Result<SubmissionId, axum::response::Response> {
    raw.parse().map_err(errors::domain_error_to_response)
}

/// GET /submissions/next?lease=SECONDS
///
/// 200 with the leased submission (including its `leaseToken`), or 204 when
/// nothing is claimable.
pub async fn claim_next(
    Extension(services): Extension<Arc<AppServices>>,
    query: Result<Query<dto::ClaimQuery>, QueryRejection>,
) -> axum::response::Response {
    let Query(query) = match query {
        Ok(q) => q,
        Err(e) => return errors::query_rejection(e),
    };

    match services.leases.claim_next(query.lease).await {
        Ok(Some(sub)) => Json(sub).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}

/// PATCH /submissions/:id
pub async fn report(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<dto::ReportRequest>, JsonRejection>,
) -> axum::response::Response {
    let id = match parse_submission_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return errors::json_rejection(e),
    };
    let outcome: Outcome = match body.status.parse() {
        Ok(o) => o,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let report = TerminalReport {
        lease_token: body.lease_token,
        outcome,
        error: body.error,
        logs: body.logs,
        evidence: body.evidence,
    };

    match services.submissions.report(id, report).await {
        Ok(sub) => Json(sub).into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}

/// POST /submissions/:id/logs
pub async fn append_logs(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<dto::AppendLogsRequest>, JsonRejection>,
) -> axum::response::Response {
    let id = match parse_submission_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return errors::json_rejection(e),
    };

    match services.submissions.append_log(id, body.lease_token, body.lines).await {
        Ok(sub) => Json(sub).into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}

/// POST /submissions/:id/lease
pub async fn extend_lease(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<dto::ExtendLeaseRequest>, JsonRejection>,
) -> axum::response::Response {
    let id = match parse_submission_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return errors::json_rejection(e),
    };

    match services.leases.extend(id, body.lease_token, body.lease).await {
        Ok(sub) => Json(sub).into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}
