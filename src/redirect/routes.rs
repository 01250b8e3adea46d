use axum::{middleware, routing::get, Router};
use std::sync::Arc;

use super::handlers::{health_check, redirect_url, redirect_url_with_password, RedirectState};
use super::middleware::record_request_start;

pub fn create_redirect_router(state: Arc<RedirectState>) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/{code}", get(redirect_url).post(redirect_url_with_password))
        .layer(middleware::from_fn(record_request_start))
        .with_state(state)
}
