use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::analytics::{get_link_analytics, get_link_realtime, health_check, ApiState};

pub fn create_api_router(state: Arc<ApiState>) -> Router {
    let link_routes = Router::new()
        .route("/links/{code}/analytics", get(get_link_analytics))
        .route("/links/{code}/realtime", get(get_link_realtime))
        .with_state(state);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", link_routes)
        .layer(TraceLayer::new_for_http())
}
