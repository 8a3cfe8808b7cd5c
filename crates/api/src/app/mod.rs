//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: queue backend selection and service construction
//! - `routes/`: HTTP routes + handlers (console, worker, system)
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use courier_auth::{Hs256JwtValidator, WorkerKey};

use crate::config::AppConfig;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::{AppServices, StartupError};

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub async fn build_app(config: &AppConfig) -> Result<Router, StartupError> {
    let services = services::build_services(config).await?;
    Ok(router(services, config))
}

/// Assemble routes around already constructed services.
pub fn router(services: AppServices, config: &AppConfig) -> Router {
    let services = Arc::new(services);

    let auth_state = middleware::AuthState {
        jwt: Arc::new(Hs256JwtValidator::new(config.jwt_secret.as_bytes())),
    };
    let worker_state = middleware::WorkerAuthState {
        key: WorkerKey::new(config.worker_api_key.clone()),
    };

    // Console routes: bearer token.
    let console = routes::console_router().layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::auth_middleware,
    ));

    // Worker routes: shared API key.
    let worker = routes::worker_router().layer(axum::middleware::from_fn_with_state(
        worker_state,
        middleware::worker_auth_middleware,
    ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(console)
        .merge(worker)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(Extension(services)),
        )
}
