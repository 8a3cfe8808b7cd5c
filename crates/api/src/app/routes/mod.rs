use axum::{
    Router,
    routing::{get, patch, post},
};

pub mod common;
pub mod jobs;
pub mod submissions;
pub mod system;

/// Console endpoints (bearer token).
pub fn console_router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/jobs", jobs::router())
}

/// Worker endpoints (API key).
pub fn worker_router() -> Router {
    Router::new()
        .route("/submissions/next", get(submissions::claim_next))
        .route("/submissions/:id", patch(submissions::report))
        .route("/submissions/:id/logs", post(submissions::append_logs))
        .route("/submissions/:id/lease", post(submissions::extend_lease))
}
