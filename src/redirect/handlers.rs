use axum::{
    extract::{ConnectInfo, Path, RawQuery, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Extension, Form, Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use super::middleware::RequestStart;
use crate::analytics::extract_client_ip;
use crate::config::AnalyticsConfig;
use crate::directory::{DirectoryError, LinkDirectory};
use crate::tracking::{ClickTracker, RequestContext, TrackingError};

const PASSWORD_PARAM: &str = "password";

pub struct RedirectState {
    pub directory: Arc<LinkDirectory>,
    pub tracker: Arc<ClickTracker>,
    pub analytics_config: AnalyticsConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct PasswordForm {
    #[serde(default)]
    pub password: Option<String>,
}

/// Redirect to the original URL, recording the click
pub async fn redirect_url(
    State(state): State<Arc<RedirectState>>,
    Path(code): Path<String>,
    Extension(request_start): Extension<RequestStart>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
) -> Response {
    let mut query = parse_query(raw_query.as_deref());
    let password = query.remove(PASSWORD_PARAM);
    serve_redirect(&state, &code, request_start, addr, &headers, query, password).await
}

/// Password submission for protected links
pub async fn redirect_url_with_password(
    State(state): State<Arc<RedirectState>>,
    Path(code): Path<String>,
    Extension(request_start): Extension<RequestStart>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
    Form(form): Form<PasswordForm>,
) -> Response {
    let mut query = parse_query(raw_query.as_deref());
    let from_query = query.remove(PASSWORD_PARAM);
    let password = form.password.or(from_query);
    serve_redirect(&state, &code, request_start, addr, &headers, query, password).await
}

async fn serve_redirect(
    state: &RedirectState,
    code: &str,
    request_start: RequestStart,
    addr: SocketAddr,
    headers: &HeaderMap,
    query: BTreeMap<String, String>,
    password: Option<String>,
) -> Response {
    let handler_start = RequestStart(Instant::now());

    let link = match state.directory.resolve(code).await {
        Ok(link) => link,
        Err(DirectoryError::NotFound) => {
            return (StatusCode::NOT_FOUND, "Link not found").into_response();
        }
        Err(e) => {
            tracing::error!(short_code = %code, error = %e, "Failed to resolve link");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response();
        }
    };

    if !state.directory.can_be_accessed(&link) {
        return (StatusCode::GONE, "This link is no longer available").into_response();
    }

    if state.directory.is_password_protected(&link) {
        match password.as_deref() {
            None | Some("") => {
                return (StatusCode::UNAUTHORIZED, "Password required").into_response();
            }
            Some(candidate) if !state.directory.check_password(&link, candidate) => {
                tracing::info!(short_code = %code, "Rejected invalid link password");
                return (StatusCode::UNAUTHORIZED, "Invalid password").into_response();
            }
            Some(_) => {}
        }
    }

    let Ok(location) = HeaderValue::try_from(link.original_url.as_str()) else {
        tracing::error!(short_code = %code, "Stored URL is not a valid Location header");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response();
    };

    let context = RequestContext {
        ip_address: extract_client_ip(headers, addr.ip(), &state.analytics_config).to_string(),
        user_agent: header_string(headers, header::USER_AGENT),
        referrer: header_string(headers, header::REFERER),
        query,
    };

    // Tracking never blocks the redirect
    match state.tracker.track_click(&link, context).await {
        Ok(_) => {}
        Err(TrackingError::NotAccessible(_)) => {
            // Changed since it was cached, possibly by another process
            state.directory.invalidate(code).await;
            return (StatusCode::GONE, "This link is no longer available").into_response();
        }
        Err(e) => {
            tracing::warn!(short_code = %code, error = %e, "Failed to track click");
        }
    }

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::LOCATION, location);
    response_headers.insert(
        "x-linktrail-timing-total-ms",
        HeaderValue::from(request_start.elapsed_ms()),
    );
    response_headers.insert(
        "x-linktrail-timing-handler-ms",
        HeaderValue::from(handler_start.elapsed_ms()),
    );

    (StatusCode::FOUND, response_headers).into_response()
}

/// Decode a raw query string; malformed pairs are decoded leniently
fn parse_query(raw_query: Option<&str>) -> BTreeMap<String, String> {
    raw_query
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

fn header_string(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    #[derive(Serialize)]
    struct HealthResponse {
        status: String,
    }

    Json(HealthResponse {
        status: "OK".to_string(),
    })
}
