use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use log::info;
use tower_http::cors::CorsLayer;

use crate::handlers::{self, AppState};

async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<impl IntoResponse, StatusCode> {
    let Some(api_key) = state.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };

    let auth_header = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth_header.strip_prefix("Bearer ").unwrap_or(auth_header);

    if token == api_key {
        Ok(next.run(req).await)
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

async fn log_middleware(req: Request, next: Next) -> impl IntoResponse {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let resp = next.run(req).await;

    info!(
        "{} {} {} {:?}",
        method,
        path,
        resp.status().as_u16(),
        started.elapsed()
    );
    resp
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/message", post(handlers::send_message))
        .route("/health", get(handlers::health))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(middleware::from_fn(log_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
