use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{
        Extension, Path, Query,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};

use courier_auth::jobs;
use courier_core::{JobId, SubmissionId};
use courier_infra::queue::SubmissionFilter;
use courier_jobs::SubmissionStatus;

use crate::app::dto::{self, PageResponse};
use crate::app::errors;
use crate::app::routes::common::guard;
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_jobs).post(create_job))
        .route("/:id", get(get_job).delete(delete_job))
        .route("/:id/submissions", get(list_submissions))
        .route("/:id/submissions/:submission_id", get(get_submission))
        .route("/:id/retry-failed", post(retry_failed))
        .route("/:id/cancel", post(cancel_job))
        .route("/:id/recompute-counts", post(recompute_counts))
        .route("/:id/export.csv", get(export_csv))
}

fn parse_job_id(raw: &str) -> Result<JobId, axum::response::Response> {
    raw.parse().map_err(errors::domain_error_to_response)
}

pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    query: Result<Query<dto::ListQuery>, QueryRejection>,
) -> axum::response::Response {
    if let Err(resp) = guard(&principal, jobs::READ) {
        return resp;
    }
    let Query(query) = match query {
        Ok(q) => q,
        Err(e) => return errors::query_rejection(e),
    };

    match services.jobs.list(query.pagination()).await {
        Ok(page) => Json(PageResponse::from(page)).into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}

pub async fn create_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<dto::CreateJobRequest>, JsonRejection>,
) -> axum::response::Response {
    if let Err(resp) = guard(&principal, jobs::WRITE) {
        return resp;
    }
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return errors::json_rejection(e),
    };

    match services.jobs.create(body.into()).await {
        Ok(job) => (StatusCode::CREATED, Json(job)).into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = guard(&principal, jobs::READ) {
        return resp;
    }
    let id = match parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.jobs.get(id).await {
        Ok(job) => Json(job).into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}

pub async fn list_submissions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    query: Result<Query<dto::SubmissionListQuery>, QueryRejection>,
) -> axum::response::Response {
    if let Err(resp) = guard(&principal, jobs::READ) {
        return resp;
    }
    let id = match parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Query(query) = match query {
        Ok(q) => q,
        Err(e) => return errors::query_rejection(e),
    };

    let filter = match query.status.as_deref().map(str::parse::<SubmissionStatus>).transpose() {
        Ok(status) => SubmissionFilter { status },
        Err(e) => return errors::domain_error_to_response(e),
    };
    let pagination = dto::ListQuery {
        limit: query.limit,
        offset: query.offset,
    }
    .pagination();

    match services.submissions.list_by_job(id, filter, pagination).await {
        Ok(page) => Json(PageResponse::from_page(page, dto::console_submission)).into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}

pub async fn get_submission(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path((id, submission_id)): Path<(String, String)>,
) -> axum::response::Response {
    if let Err(resp) = guard(&principal, jobs::READ) {
        return resp;
    }
    let id = match parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let submission_id: SubmissionId = match submission_id.parse() {
        Ok(v) => v,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.submissions.get_in_job(id, submission_id).await {
        Ok(sub) => Json(dto::console_submission(sub)).into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}

pub async fn retry_failed(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Result<Json<dto::RetryFailedRequest>, JsonRejection>,
) -> axum::response::Response {
    if let Err(resp) = guard(&principal, jobs::WRITE) {
        return resp;
    }
    let id = match parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return errors::json_rejection(e),
    };

    match services.retry.retry_failed(id, body.limit).await {
        Ok(retried) => Json(dto::RetryFailedResponse { retried }).into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}

pub async fn cancel_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = guard(&principal, jobs::WRITE) {
        return resp;
    }
    let id = match parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.jobs.cancel(id).await {
        Ok(job) => Json(job).into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}

pub async fn recompute_counts(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = guard(&principal, jobs::WRITE) {
        return resp;
    }
    let id = match parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.retry.recompute_counts(id).await {
        Ok(job) => Json(job).into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}

pub async fn export_csv(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = guard(&principal, jobs::READ) {
        return resp;
    }
    let id = match parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let stream = match services.jobs.export_csv(id).await {
        Ok(s) => s,
        Err(e) => return errors::queue_error_to_response(e),
    };

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"job-{id}.csv\""),
            ),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

pub async fn delete_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = guard(&principal, jobs::DELETE) {
        return resp;
    }
    let id = match parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.jobs.delete(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}
