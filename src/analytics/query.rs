//! Read side of click analytics
//!
//! Range figures come from the daily rollups. Clicks that are recorded but
//! not yet enriched are merged in from the raw table, so totals never lag
//! behind the enrichment queue. Real-time figures always read raw clicks.

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::analytics::aggregate_store::{day_bounds, AggregateStore};
use crate::analytics::models::{
    AnalyticsSummary, BreakdownEntry, ChartPoint, LatestClick, RealTimeStats, RecentClick,
};
use crate::models::{Click, ClickAnalytics, Dimension, Link, HOURS_PER_DAY};
use crate::storage::Storage;

pub const DEFAULT_RANGE_DAYS: u32 = 15;
pub const MAX_RANGE_DAYS: u32 = 365;
const TOP_ENTRIES: usize = 10;
const RECENT_CLICKS: i64 = 10;
const LATEST_CLICKS: i64 = 5;

/// Inclusive range of UTC dates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalyticsRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl AnalyticsRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            bail!("range start {start} is after end {end}");
        }
        let range = Self { start, end };
        if range.days() > i64::from(MAX_RANGE_DAYS) {
            bail!("range spans more than {MAX_RANGE_DAYS} days");
        }
        Ok(range)
    }

    /// The `days` most recent dates ending with `today`
    pub fn last_days(days: u32, today: NaiveDate) -> Self {
        let days = days.clamp(1, MAX_RANGE_DAYS);
        Self {
            start: today - Duration::days(i64::from(days) - 1),
            end: today,
        }
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// `[from, until)` unix-second bounds
    pub fn bounds(&self) -> (i64, i64) {
        (day_bounds(self.start).0, day_bounds(self.end).1)
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> {
        let start = self.start;
        (0..self.days()).map(move |offset| start + Duration::days(offset))
    }
}

pub struct AnalyticsService {
    storage: Arc<dyn Storage>,
    aggregates: AggregateStore,
}

impl AnalyticsService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            aggregates: AggregateStore::new(Arc::clone(&storage)),
            storage,
        }
    }

    pub async fn get_analytics(&self, link: &Link, range: AnalyticsRange) -> Result<AnalyticsSummary> {
        self.get_analytics_at(link, range, Utc::now().timestamp()).await
    }

    pub async fn get_analytics_at(
        &self,
        link: &Link,
        range: AnalyticsRange,
        now: i64,
    ) -> Result<AnalyticsSummary> {
        let today = date_of(now);

        let days = self.aggregates.load(link.id, range.start, range.end).await?;
        let (from, until) = range.bounds();
        let pending = pending_by_date(self.storage.pending_click_times(link.id, from, until).await?);

        let clicks_7_days = self.window_clicks(link.id, AnalyticsRange::last_days(7, today)).await?;
        let clicks_30_days = self.window_clicks(link.id, AnalyticsRange::last_days(30, today)).await?;

        let chart = build_chart(range, &days, &pending);
        let clicks_in_range = chart.iter().map(|point| point.clicks).sum();
        let unique_in_range = chart.iter().map(|point| point.unique_clicks).sum();

        let mut hourly_pattern = [0i64; HOURS_PER_DAY];
        for day in &days {
            for (slot, clicks) in hourly_pattern.iter_mut().zip(day.hourly_distribution.iter()) {
                *slot += clicks;
            }
        }

        let recent_clicks = self
            .storage
            .recent_clicks(link.id, RECENT_CLICKS)
            .await?
            .iter()
            .map(recent_click)
            .collect();

        Ok(AnalyticsSummary {
            short_code: link.short_code.clone(),
            start: range.start,
            end: range.end,
            total_clicks: link.clicks_count,
            unique_clicks: link.unique_clicks_count,
            clicks_7_days,
            clicks_30_days,
            clicks_in_range,
            unique_in_range,
            chart,
            countries: breakdown(&days, Dimension::Country, Some(TOP_ENTRIES)),
            devices: breakdown(&days, Dimension::Device, None),
            browsers: breakdown(&days, Dimension::Browser, Some(TOP_ENTRIES)),
            platforms: breakdown(&days, Dimension::Platform, None),
            referrers: breakdown(&days, Dimension::Referrer, Some(TOP_ENTRIES)),
            hourly_pattern,
            recent_clicks,
        })
    }

    pub async fn get_real_time_stats(&self, link: &Link) -> Result<RealTimeStats> {
        self.get_real_time_stats_at(link, Utc::now().timestamp()).await
    }

    pub async fn get_real_time_stats_at(&self, link: &Link, now: i64) -> Result<RealTimeStats> {
        let last_hour = now - 3_600;
        let last_day = now - 86_400;

        let clicks_last_1h = self.storage.count_clicks_since(link.id, last_hour).await?;
        let clicks_last_24h = self.storage.count_clicks_since(link.id, last_day).await?;
        let unique_visitors_24h = self.storage.count_distinct_ips_since(link.id, last_day).await?;

        let latest_clicks = self
            .storage
            .recent_clicks(link.id, LATEST_CLICKS)
            .await?
            .into_iter()
            .map(|click| LatestClick {
                seconds_ago: (now - click.clicked_at).max(0),
                clicked_at: click.clicked_at,
                country: click.country,
                device: click.device_type,
                browser: click.browser,
            })
            .collect();

        Ok(RealTimeStats {
            clicks_last_1h,
            clicks_last_24h,
            unique_visitors_24h,
            latest_clicks,
        })
    }

    /// Rolled-up plus pending clicks in a window
    async fn window_clicks(&self, link_id: i64, window: AnalyticsRange) -> Result<i64> {
        let days = self.aggregates.load(link_id, window.start, window.end).await?;
        let (from, until) = window.bounds();
        let pending = self.storage.pending_click_times(link_id, from, until).await?;

        Ok(days.iter().map(|day| day.total_clicks).sum::<i64>() + pending.len() as i64)
    }
}

fn date_of(timestamp: i64) -> NaiveDate {
    DateTime::from_timestamp(timestamp, 0)
        .unwrap_or_default()
        .date_naive()
}

fn pending_by_date(times: Vec<i64>) -> BTreeMap<NaiveDate, i64> {
    let mut by_date = BTreeMap::new();
    for time in times {
        *by_date.entry(date_of(time)).or_insert(0) += 1;
    }
    by_date
}

/// One point per date in the range, zero-filled
///
/// Pending clicks count towards `clicks` only; their uniqueness is decided
/// once they are enriched.
fn build_chart(
    range: AnalyticsRange,
    days: &[ClickAnalytics],
    pending: &BTreeMap<NaiveDate, i64>,
) -> Vec<ChartPoint> {
    let by_date: BTreeMap<NaiveDate, &ClickAnalytics> = days.iter().map(|day| (day.date, day)).collect();

    range
        .dates()
        .map(|date| {
            let (clicks, unique_clicks) = by_date
                .get(&date)
                .map(|day| (day.total_clicks, day.unique_clicks))
                .unwrap_or((0, 0));
            ChartPoint {
                date,
                label: date.format("%b %-d").to_string(),
                clicks: clicks + pending.get(&date).copied().unwrap_or(0),
                unique_clicks,
            }
        })
        .collect()
}

/// Sum a dimension over all days, sorted by clicks desc then name
fn breakdown(days: &[ClickAnalytics], dimension: Dimension, limit: Option<usize>) -> Vec<BreakdownEntry> {
    let mut totals: BTreeMap<&str, i64> = BTreeMap::new();
    for map in days.iter().filter_map(|day| day.map(dimension)) {
        for (name, clicks) in map {
            *totals.entry(name.as_str()).or_insert(0) += clicks;
        }
    }

    let grand_total: i64 = totals.values().sum();

    let mut entries: Vec<(&str, i64)> = totals.into_iter().collect();
    // BTreeMap order keeps ties alphabetical under a stable sort
    entries.sort_by(|a, b| b.1.cmp(&a.1));
    if let Some(limit) = limit {
        entries.truncate(limit);
    }

    entries
        .into_iter()
        .map(|(name, clicks)| BreakdownEntry {
            name: name.to_string(),
            clicks,
            percentage: percentage(clicks, grand_total),
        })
        .collect()
}

fn percentage(part: i64, total: i64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 * 1000.0 / total as f64).round() / 10.0
}

fn recent_click(click: &Click) -> RecentClick {
    RecentClick {
        id: click.id,
        ip_address: click.ip_address.clone(),
        user_agent: click.user_agent.clone(),
        browser: click.browser.clone(),
        platform: click.platform.clone(),
        country: click.country.clone(),
        device_type: click.device_type.clone(),
        referrer: click.referrer.clone(),
        clicked_at: click.clicked_at,
        enriched: click.is_enriched(),
    }
}
