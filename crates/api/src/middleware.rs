use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use courier_auth::{JwtValidator, WorkerKey};

use crate::app::errors::json_error;
use crate::context::PrincipalContext;

/// Header workers authenticate with.
pub const WORKER_KEY_HEADER: &str = "x-api-key";

#[derive(Clone)]
pub struct AuthState {
    pub jwt: Arc<dyn JwtValidator>,
}

#[derive(Clone, Debug)]
pub struct WorkerAuthState {
    pub key: WorkerKey,
}

/// Bearer-token authentication for the interactive console.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let token = extract_bearer(req.headers()).ok_or_else(|| {
        json_error(StatusCode::UNAUTHORIZED, "unauthorized", "missing bearer token")
    })?;

    let claims = state.jwt.validate(token, Utc::now()).map_err(|e| {
        tracing::debug!(error = %e, "bearer token rejected");
        json_error(StatusCode::UNAUTHORIZED, "unauthorized", e.to_string())
    })?;

    req.extensions_mut()
        .insert(PrincipalContext::new(claims.sub, claims.roles));

    Ok(next.run(req).await)
}

/// Shared API key authentication for worker routes.
pub async fn worker_auth_middleware(
    State(state): State<WorkerAuthState>,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let presented = req
        .headers()
        .get(WORKER_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or_default();

    if !state.key.verify(presented) {
        return Err(json_error(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "missing or invalid worker api key",
        ));
    }

    Ok(next.run(req).await)
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?;
    let header = header.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token)
}
