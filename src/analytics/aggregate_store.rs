//! Per-link daily rollups
//!
//! Every mutation maps onto one atomic SQL statement in the storage backend,
//! so concurrent enrichment workers can increment the same `(link_id, date)`
//! row without losing updates. The worker path commits a whole click at once
//! through `Storage::record_enriched_click`; the operations here serve
//! rebuilds and direct use.

use anyhow::Result;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, info};

use crate::analytics::referrer::DIRECT;
use crate::analytics::user_agent::DeviceType;
use crate::models::{Click, ClickAnalytics, ClickEnrichment, DailyKey, Dimension};
use crate::storage::Storage;

const SECONDS_PER_DAY: i64 = 86_400;

/// `[start, end)` unix-second bounds of a UTC calendar day
pub fn day_bounds(date: NaiveDate) -> (i64, i64) {
    let start = date
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default();
    (start, start + SECONDS_PER_DAY)
}

/// Categorical values of one click, as counted in the rollup
#[derive(Debug, Clone, PartialEq)]
pub struct ClickFacets<'a> {
    pub country: Option<&'a str>,
    pub device: &'a str,
    pub browser: Option<&'a str>,
    pub platform: Option<&'a str>,
    pub referrer: &'a str,
    pub hour: u32,
}

impl<'a> ClickFacets<'a> {
    /// Facets of a click whose enrichment has just been computed
    pub fn from_enrichment(click: &Click, enrichment: &'a ClickEnrichment) -> Self {
        Self {
            country: enrichment.country.as_deref(),
            device: &enrichment.device_type,
            browser: enrichment.browser.as_deref(),
            platform: enrichment.platform.as_deref(),
            referrer: &enrichment.referrer_source,
            hour: click.hour(),
        }
    }

    /// Facets of a stored, already enriched click
    pub fn from_click(click: &'a Click) -> Self {
        Self {
            country: click.country.as_deref(),
            device: click
                .device_type
                .as_deref()
                .unwrap_or(DeviceType::Unknown.as_str()),
            browser: click.browser.as_deref(),
            platform: click.platform.as_deref(),
            referrer: click.referrer_source.as_deref().unwrap_or(DIRECT),
            hour: click.hour(),
        }
    }

    /// Counter buckets this click increments; absent values are skipped
    pub fn buckets(&self) -> Vec<(Dimension, String)> {
        let mut buckets = Vec::with_capacity(6);
        if let Some(country) = self.country {
            buckets.push((Dimension::Country, country.to_string()));
        }
        buckets.push((Dimension::Device, self.device.to_string()));
        if let Some(browser) = self.browser {
            buckets.push((Dimension::Browser, browser.to_string()));
        }
        if let Some(platform) = self.platform {
            buckets.push((Dimension::Platform, platform.to_string()));
        }
        buckets.push((Dimension::Referrer, self.referrer.to_string()));
        buckets.push((Dimension::Hour, self.hour.to_string()));
        buckets
    }
}

pub struct AggregateStore {
    storage: Arc<dyn Storage>,
}

impl AggregateStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Make sure the daily row exists and return its key
    pub async fn get_or_create(&self, link_id: i64, date: NaiveDate, now: i64) -> Result<DailyKey> {
        let key = DailyKey::new(link_id, date);
        self.storage.ensure_daily(&key, now).await?;
        Ok(key)
    }

    pub async fn increment_totals(&self, key: &DailyKey, unique: bool, now: i64) -> Result<()> {
        self.storage.increment_daily_totals(key, unique, now).await
    }

    pub async fn increment_category(&self, key: &DailyKey, dimension: Dimension, bucket: &str) -> Result<()> {
        self.storage.increment_daily_counter(key, dimension, bucket).await
    }

    pub async fn increment_hour(&self, key: &DailyKey, hour: u32) -> Result<()> {
        self.storage
            .increment_daily_counter(key, Dimension::Hour, &hour.to_string())
            .await
    }

    /// Daily rows for `start..=end`; days without traffic are absent
    pub async fn load(&self, link_id: i64, start: NaiveDate, end: NaiveDate) -> Result<Vec<ClickAnalytics>> {
        self.storage.daily_analytics(link_id, start, end).await
    }

    /// Count one processed click into its day
    pub async fn record_click(
        &self,
        link_id: i64,
        date: NaiveDate,
        facets: &ClickFacets<'_>,
        unique: bool,
        now: i64,
    ) -> Result<()> {
        let key = self.get_or_create(link_id, date, now).await?;
        self.increment_totals(&key, unique, now).await?;

        for (dimension, bucket) in facets.buckets() {
            self.increment_category(&key, dimension, &bucket).await?;
        }

        debug!(link_id, date = %date, unique, "Recorded click into daily aggregate");
        Ok(())
    }

    /// Recompute one day from the enriched raw clicks
    ///
    /// Clicks that were never enriched are not counted. Daily uniqueness is
    /// replayed with the same earlier-click rule the worker applies.
    pub async fn rebuild(&self, link_id: i64, date: NaiveDate, now: i64) -> Result<ClickAnalytics> {
        let key = DailyKey::new(link_id, date);
        let (from, until) = day_bounds(date);

        self.storage.delete_daily(&key).await?;

        let clicks = self
            .storage
            .enriched_clicks_between(link_id, from, until)
            .await?;

        for click in &clicks {
            let seen_today = self
                .storage
                .has_earlier_click(link_id, &click.ip_address, click.id, from, until)
                .await?;
            self.record_click(link_id, date, &ClickFacets::from_click(click), !seen_today, now)
                .await?;
        }

        info!(link_id, date = %date, clicks = clicks.len(), "Rebuilt daily aggregate");

        let rebuilt = self.load(link_id, date, date).await?;
        Ok(rebuilt
            .into_iter()
            .next()
            .unwrap_or_else(|| ClickAnalytics::empty(link_id, date)))
    }
}
