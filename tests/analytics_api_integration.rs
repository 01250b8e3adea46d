//! Analytics API integration tests

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{Duration, Utc};
use common::{create_link, create_services, create_test_storage, CHROME_WINDOWS, SAFARI_IPHONE};
use linktrail::analytics::AnalyticsRange;
use linktrail::api::create_api_router;
use linktrail::models::NewClick;
use linktrail::storage::Storage;
use linktrail::tracking::RequestContext;
use serde_json::Value;
use std::collections::BTreeMap;
use tower::ServiceExt;

async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

fn context(ip: &str, user_agent: &str) -> RequestContext {
    RequestContext {
        ip_address: ip.to_string(),
        user_agent: Some(user_agent.to_string()),
        referrer: None,
        query: BTreeMap::new(),
    }
}

#[tokio::test]
async fn test_analytics_summary() {
    let storage = create_test_storage().await;
    let services = create_services(storage.clone(), 2);
    let link = create_link(&storage, "stats1").await;

    for (ip, ua) in [
        ("1.2.3.4", CHROME_WINDOWS),
        ("1.2.3.4", CHROME_WINDOWS),
        ("5.6.7.8", SAFARI_IPHONE),
    ] {
        services.tracker.track_click(&link, context(ip, ua)).await.unwrap();
    }
    services.queue.flush().await.unwrap();

    let app = create_api_router(services.api_state());
    let (status, json) = get_json(app, "/api/links/stats1/analytics?days=7").await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(json["short_code"], "stats1");
    assert_eq!(json["total_clicks"], 3);
    assert_eq!(json["unique_clicks"], 2);
    assert_eq!(json["clicks_7_days"], 3);
    assert_eq!(json["clicks_30_days"], 3);
    assert_eq!(json["clicks_in_range"], 3);
    assert_eq!(json["unique_in_range"], 2);

    // Dense series, oldest first, today last
    let chart = json["chart"].as_array().unwrap();
    assert_eq!(chart.len(), 7);
    assert_eq!(chart[6]["clicks"], 3);
    assert!(chart[..6].iter().all(|point| point["clicks"] == 0));
    let today = Utc::now().date_naive();
    assert_eq!(chart[6]["date"], today.format("%Y-%m-%d").to_string());
    assert_eq!(chart[6]["label"], today.format("%b %-d").to_string());

    assert_eq!(json["countries"][0]["name"], "US");
    assert_eq!(json["countries"][0]["clicks"], 2);
    assert_eq!(json["countries"][0]["percentage"], 66.7);
    assert_eq!(json["devices"].as_array().unwrap().len(), 2);
    assert_eq!(json["referrers"][0]["name"], "direct");
    assert_eq!(json["recent_clicks"].as_array().unwrap().len(), 3);
    let hourly: i64 = json["hourly_pattern"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_i64().unwrap())
        .sum();
    assert_eq!(hourly, 3);
}

#[tokio::test]
async fn test_pending_clicks_are_included() {
    let storage = create_test_storage().await;
    let services = create_services(storage.clone(), 1);
    let link = create_link(&storage, "pending").await;

    // Recorded but never enqueued for enrichment
    storage
        .insert_click(&NewClick {
            link_id: link.id,
            ip_address: "1.2.3.4".to_string(),
            user_agent: None,
            referrer: None,
            clicked_at: Utc::now().timestamp(),
        })
        .await
        .unwrap();

    let today = Utc::now().date_naive();
    let summary = services
        .analytics
        .get_analytics(&link, AnalyticsRange::last_days(7, today))
        .await
        .unwrap();

    assert_eq!(summary.clicks_7_days, 1);
    assert_eq!(summary.clicks_in_range, 1);
    assert_eq!(summary.unique_in_range, 0);
    assert_eq!(summary.chart.last().unwrap().clicks, 1);
    assert!(summary.countries.is_empty());
    assert!(!summary.recent_clicks[0].enriched);
}

#[tokio::test]
async fn test_explicit_range_excludes_other_days() {
    let storage = create_test_storage().await;
    let services = create_services(storage.clone(), 1);
    let link = create_link(&storage, "ranged").await;

    services
        .tracker
        .track_click(&link, context("1.2.3.4", CHROME_WINDOWS))
        .await
        .unwrap();
    services.queue.flush().await.unwrap();

    let today = Utc::now().date_naive();
    let start = today - Duration::days(10);
    let end = today - Duration::days(5);
    let app = create_api_router(services.api_state());
    let (status, json) = get_json(
        app,
        &format!("/api/links/ranged/analytics?start={start}&end={end}"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["chart"].as_array().unwrap().len(), 6);
    assert_eq!(json["clicks_in_range"], 0);
    assert_eq!(json["clicks_7_days"], 1);
    assert_eq!(json["total_clicks"], 1);
}

#[tokio::test]
async fn test_realtime_stats() {
    let storage = create_test_storage().await;
    let services = create_services(storage.clone(), 1);
    let link = create_link(&storage, "live").await;

    let now = Utc::now().timestamp();
    for (ip, ago) in [("1.2.3.4", 7_200), ("1.2.3.4", 60), ("5.6.7.8", 30), ("9.9.9.9", 90_000)] {
        storage
            .insert_click(&NewClick {
                link_id: link.id,
                ip_address: ip.to_string(),
                user_agent: None,
                referrer: None,
                clicked_at: now - ago,
            })
            .await
            .unwrap();
    }

    let stats = services
        .analytics
        .get_real_time_stats_at(&link, now)
        .await
        .unwrap();
    assert_eq!(stats.clicks_last_1h, 2);
    assert_eq!(stats.clicks_last_24h, 3);
    assert_eq!(stats.unique_visitors_24h, 2);
    assert_eq!(stats.latest_clicks.len(), 4);
    assert_eq!(stats.latest_clicks[0].seconds_ago, 30);

    let app = create_api_router(services.api_state());
    let (status, json) = get_json(app, "/api/links/live/realtime").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["clicks_last_24h"], 3);
}

#[tokio::test]
async fn test_errors() {
    let storage = create_test_storage().await;
    let services = create_services(storage.clone(), 1);
    create_link(&storage, "exists").await;

    let (status, json) = get_json(
        create_api_router(services.api_state()),
        "/api/links/missing/analytics",
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "Link not found");

    let (status, _) = get_json(
        create_api_router(services.api_state()),
        "/api/links/exists/analytics?days=400",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get_json(
        create_api_router(services.api_state()),
        "/api/links/exists/analytics?start=2024-05-10&end=2024-05-01",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = get_json(create_api_router(services.api_state()), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "OK");
}
