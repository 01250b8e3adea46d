//! Data models for analytics

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::HOURS_PER_DAY;

/// Geographic location information derived from IP address
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    /// ISO country code (e.g., "US", "GB")
    pub country: Option<String>,

    /// Region/state/province
    pub region: Option<String>,

    /// City name
    pub city: Option<String>,

    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Parsed user agent, as reported by a [`UserAgentParser`](crate::analytics::UserAgentParser)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedAgent {
    /// Device vendor, when the parser recognises one
    pub device: Option<String>,
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub platform: Option<String>,
    pub platform_version: Option<String>,
    pub is_mobile: bool,
    pub is_tablet: bool,
    pub is_desktop: bool,
    pub is_bot: bool,
}

/// One entry of a categorical breakdown (countries, browsers, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownEntry {
    pub name: String,
    pub clicks: i64,
    /// Share of the category total, rounded to one decimal
    pub percentage: f64,
}

/// A day in the chart series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub date: NaiveDate,
    /// Short label such as "Oct 5"
    pub label: String,
    pub clicks: i64,
    pub unique_clicks: i64,
}

/// Raw click as shown in the live feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentClick {
    pub id: i64,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub browser: Option<String>,
    pub platform: Option<String>,
    pub country: Option<String>,
    pub device_type: Option<String>,
    pub referrer: Option<String>,
    pub clicked_at: i64,
    /// False while the enrichment worker has not processed the click
    pub enriched: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    pub short_code: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Lifetime counters from the link row
    pub total_clicks: i64,
    pub unique_clicks: i64,
    pub clicks_7_days: i64,
    pub clicks_30_days: i64,
    pub clicks_in_range: i64,
    pub unique_in_range: i64,
    pub chart: Vec<ChartPoint>,
    pub countries: Vec<BreakdownEntry>,
    pub devices: Vec<BreakdownEntry>,
    pub browsers: Vec<BreakdownEntry>,
    pub platforms: Vec<BreakdownEntry>,
    pub referrers: Vec<BreakdownEntry>,
    pub hourly_pattern: [i64; HOURS_PER_DAY],
    pub recent_clicks: Vec<RecentClick>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestClick {
    pub country: Option<String>,
    pub device: Option<String>,
    pub browser: Option<String>,
    pub clicked_at: i64,
    pub seconds_ago: i64,
}

/// Sliding-window stats computed from raw clicks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealTimeStats {
    pub clicks_last_1h: i64,
    pub clicks_last_24h: i64,
    pub unique_visitors_24h: i64,
    pub latest_clicks: Vec<LatestClick>,
}
