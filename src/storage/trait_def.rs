use crate::models::{
    Click, ClickAnalytics, ClickEnrichment, ClickRollup, DailyKey, Dimension, Link, LinkRecord, NewClick,
    Uniqueness,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("short code already exists")]
    Conflict,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Column list shared by every `SELECT` on `links`
pub(crate) const LINK_COLUMNS: &str = "id, short_code, original_url, owner_id, is_active, expires_at, \
     password_hash, clicks_count, unique_clicks_count, last_clicked_at, created_at, deleted_at";

/// Column list shared by every `SELECT` on `clicks`
pub(crate) const CLICK_COLUMNS: &str = "id, link_id, ip_address, user_agent, referrer, clicked_at, \
     country, city, region, latitude, longitude, device_type, device_name, browser, browser_version, \
     platform, platform_version, is_mobile, is_tablet, is_desktop, is_bot, referrer_source, \
     utm_parameters, enriched_at";

#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables and indexes)
    async fn init(&self) -> Result<()>;

    // ---- links ----

    /// Insert a link; fails with `Conflict` when the short code is taken
    async fn create_link(&self, link: &LinkRecord, created_at: i64) -> StorageResult<Link>;

    /// True if any link, including soft-deleted ones, holds this code
    async fn short_code_exists(&self, short_code: &str) -> Result<bool>;

    /// Lookup by short code, skipping soft-deleted links
    async fn get_link_by_code(&self, short_code: &str) -> Result<Option<Link>>;

    async fn get_link(&self, id: i64) -> Result<Option<Link>>;

    async fn set_link_active(&self, short_code: &str, is_active: bool) -> Result<bool>;

    /// Tombstone a link; returns false if it was missing or already deleted
    async fn soft_delete_link(&self, short_code: &str, deleted_at: i64) -> Result<bool>;

    /// Atomic counter bump for one processed click
    async fn increment_link_counters(&self, link_id: i64, unique: bool, clicked_at: i64) -> Result<()>;

    // ---- raw clicks ----

    async fn insert_click(&self, click: &NewClick) -> Result<Click>;

    /// Insert a click only while its link is live at `click.clicked_at`
    /// (active, not deleted, not expired), checked in the same statement.
    /// Returns `None` when the link is no longer accessible.
    async fn insert_click_if_accessible(&self, click: &NewClick) -> Result<Option<Click>>;

    async fn get_click(&self, id: i64) -> Result<Option<Click>>;

    /// Write enrichment fields. Only succeeds for a click that has not been
    /// enriched yet, so a redelivered unit returns `false`.
    async fn apply_enrichment(
        &self,
        click_id: i64,
        enrichment: &ClickEnrichment,
        enriched_at: i64,
    ) -> Result<bool>;

    /// Enrichment write, both uniqueness checks, link counters and the daily
    /// rollup for one click, in a single transaction. Returns `None` without
    /// changing anything when the click was already enriched. On error nothing
    /// is committed and the click stays pending.
    async fn record_enriched_click(
        &self,
        click: &Click,
        enrichment: &ClickEnrichment,
        rollup: &ClickRollup,
        now: i64,
    ) -> Result<Option<Uniqueness>>;

    /// Whether a click recorded before `click_id` exists for the same link and
    /// IP with `clicked_at` in `[from, until)`
    async fn has_earlier_click(
        &self,
        link_id: i64,
        ip_address: &str,
        click_id: i64,
        from: i64,
        until: i64,
    ) -> Result<bool>;

    /// Clicks with `clicked_at >= since`
    async fn count_clicks_since(&self, link_id: i64, since: i64) -> Result<i64>;

    /// Distinct IP addresses with `clicked_at >= since`
    async fn count_distinct_ips_since(&self, link_id: i64, since: i64) -> Result<i64>;

    /// Most recent clicks first
    async fn recent_clicks(&self, link_id: i64, limit: i64) -> Result<Vec<Click>>;

    /// `clicked_at` of clicks in `[from, until)` still waiting for enrichment
    async fn pending_click_times(&self, link_id: i64, from: i64, until: i64) -> Result<Vec<i64>>;

    /// Enriched clicks in `[from, until)`, oldest first
    async fn enriched_clicks_between(&self, link_id: i64, from: i64, until: i64) -> Result<Vec<Click>>;

    // ---- daily aggregates ----

    /// Insert a zeroed `(link_id, date)` row if none exists
    async fn ensure_daily(&self, key: &DailyKey, now: i64) -> Result<()>;

    async fn increment_daily_totals(&self, key: &DailyKey, unique: bool, now: i64) -> Result<()>;

    async fn increment_daily_counter(&self, key: &DailyKey, dimension: Dimension, bucket: &str) -> Result<()>;

    /// Daily rows for `start..=end`, in date order
    async fn daily_analytics(&self, link_id: i64, start: NaiveDate, end: NaiveDate) -> Result<Vec<ClickAnalytics>>;

    /// Remove one day's aggregate row and its counters
    async fn delete_daily(&self, key: &DailyKey) -> Result<()>;
}
