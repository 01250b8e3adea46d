//! Analytics API handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::analytics::query::{DEFAULT_RANGE_DAYS, MAX_RANGE_DAYS};
use crate::analytics::{AnalyticsRange, AnalyticsService};
use crate::directory::{DirectoryError, LinkDirectory};
use crate::models::Link;

pub struct ApiState {
    pub directory: Arc<LinkDirectory>,
    pub analytics: Arc<AnalyticsService>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalyticsQueryParams {
    /// Trailing window ending today (default: 15, max: 365)
    pub days: Option<u32>,

    /// Explicit inclusive range; both bounds are required together
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl AnalyticsQueryParams {
    fn range(&self, today: NaiveDate) -> Result<AnalyticsRange, String> {
        match (self.start, self.end, self.days) {
            (Some(_), Some(_), Some(_)) => Err("use either 'days' or 'start'/'end', not both".to_string()),
            (Some(start), Some(end), None) => AnalyticsRange::new(start, end).map_err(|e| e.to_string()),
            (Some(_), None, _) | (None, Some(_), _) => {
                Err("'start' and 'end' must be given together".to_string())
            }
            (None, None, days) => {
                let days = days.unwrap_or(DEFAULT_RANGE_DAYS);
                if !(1..=MAX_RANGE_DAYS).contains(&days) {
                    return Err(format!("'days' must be between 1 and {MAX_RANGE_DAYS}"));
                }
                Ok(AnalyticsRange::last_days(days, today))
            }
        }
    }
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (status, Json(ErrorResponse { error: error.into() })).into_response()
}

async fn find_link(state: &ApiState, short_code: &str) -> Result<Link, Response> {
    match state.directory.resolve_fresh(short_code).await {
        Ok(link) => Ok(link),
        Err(DirectoryError::NotFound) => Err(error_response(StatusCode::NOT_FOUND, "Link not found")),
        Err(e) => {
            tracing::error!(short_code = %short_code, "Failed to load link: {}", e);
            Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load link"))
        }
    }
}

/// Summary, chart and breakdowns for one link
pub async fn get_link_analytics(
    State(state): State<Arc<ApiState>>,
    Path(short_code): Path<String>,
    Query(params): Query<AnalyticsQueryParams>,
) -> Response {
    let range = match params.range(Utc::now().date_naive()) {
        Ok(range) => range,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, message),
    };

    let link = match find_link(&state, &short_code).await {
        Ok(link) => link,
        Err(response) => return response,
    };

    match state.analytics.get_analytics(&link, range).await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => {
            tracing::error!(short_code = %short_code, "Failed to get analytics: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to retrieve analytics")
        }
    }
}

/// Last hour / last day activity read from raw clicks
pub async fn get_link_realtime(
    State(state): State<Arc<ApiState>>,
    Path(short_code): Path<String>,
) -> Response {
    let link = match find_link(&state, &short_code).await {
        Ok(link) => link,
        Err(response) => return response,
    };

    match state.analytics.get_real_time_stats(&link).await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => {
            tracing::error!(short_code = %short_code, "Failed to get real-time stats: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to retrieve real-time stats")
        }
    }
}

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "OK" }))
}
