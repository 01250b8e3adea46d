//! Daily rollup model
//!
//! A `ClickAnalytics` value is assembled from one `click_analytics` row plus
//! its `click_analytics_counters` rows. Maps are keyed by the categorical
//! value (country code, browser name, ...) and hold running counts.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const HOURS_PER_DAY: usize = 24;

/// Categorical dimension tracked per `(link_id, date)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Country,
    Device,
    Browser,
    Platform,
    Referrer,
    Hour,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Country => "country",
            Dimension::Device => "device",
            Dimension::Browser => "browser",
            Dimension::Platform => "platform",
            Dimension::Referrer => "referrer",
            Dimension::Hour => "hour",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "country" => Ok(Dimension::Country),
            "device" => Ok(Dimension::Device),
            "browser" => Ok(Dimension::Browser),
            "platform" => Ok(Dimension::Platform),
            "referrer" => Ok(Dimension::Referrer),
            "hour" => Ok(Dimension::Hour),
            other => Err(anyhow::anyhow!("unknown analytics dimension '{other}'")),
        }
    }
}

/// Identifies one daily aggregate row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DailyKey {
    pub link_id: i64,
    pub date: NaiveDate,
}

impl DailyKey {
    pub fn new(link_id: i64, date: NaiveDate) -> Self {
        Self { link_id, date }
    }

    /// Storage representation of the date column
    pub fn date_str(&self) -> String {
        format_date(self.date)
    }
}

/// Everything one enriched click adds to its link counters and daily row.
/// The storage backend commits it together with the enrichment write.
#[derive(Debug, Clone, PartialEq)]
pub struct ClickRollup {
    pub key: DailyKey,
    /// Start of the sliding window: an earlier click from the same IP at or
    /// after this instant makes the click a repeat for link counters
    pub window_start: i64,
    /// `[start, end)` of the click's UTC day
    pub day_bounds: (i64, i64),
    /// Categorical buckets to increment, hour included
    pub buckets: Vec<(Dimension, String)>,
}

/// Uniqueness decided while committing one click
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Uniqueness {
    /// No earlier click from this IP inside the sliding window
    pub sliding: bool,
    /// No earlier click from this IP on the same calendar day
    pub daily: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickAnalytics {
    pub link_id: i64,
    pub date: NaiveDate,
    pub total_clicks: i64,
    pub unique_clicks: i64,
    pub countries: BTreeMap<String, i64>,
    pub devices: BTreeMap<String, i64>,
    pub browsers: BTreeMap<String, i64>,
    pub platforms: BTreeMap<String, i64>,
    pub referrers: BTreeMap<String, i64>,
    pub hourly_distribution: [i64; HOURS_PER_DAY],
}

impl ClickAnalytics {
    /// Zeroed row, as created by get-or-create
    pub fn empty(link_id: i64, date: NaiveDate) -> Self {
        Self {
            link_id,
            date,
            total_clicks: 0,
            unique_clicks: 0,
            countries: BTreeMap::new(),
            devices: BTreeMap::new(),
            browsers: BTreeMap::new(),
            platforms: BTreeMap::new(),
            referrers: BTreeMap::new(),
            hourly_distribution: [0; HOURS_PER_DAY],
        }
    }

    pub fn key(&self) -> DailyKey {
        DailyKey::new(self.link_id, self.date)
    }

    /// Fold one stored counter row into the assembled value.
    /// Hour buckets outside 0..24 are ignored.
    pub fn apply_counter(&mut self, dimension: Dimension, bucket: &str, clicks: i64) {
        let map = match dimension {
            Dimension::Country => &mut self.countries,
            Dimension::Device => &mut self.devices,
            Dimension::Browser => &mut self.browsers,
            Dimension::Platform => &mut self.platforms,
            Dimension::Referrer => &mut self.referrers,
            Dimension::Hour => {
                if let Ok(hour) = bucket.parse::<usize>() {
                    if hour < HOURS_PER_DAY {
                        self.hourly_distribution[hour] += clicks;
                    }
                }
                return;
            }
        };

        *map.entry(bucket.to_string()).or_insert(0) += clicks;
    }

    pub fn map(&self, dimension: Dimension) -> Option<&BTreeMap<String, i64>> {
        match dimension {
            Dimension::Country => Some(&self.countries),
            Dimension::Device => Some(&self.devices),
            Dimension::Browser => Some(&self.browsers),
            Dimension::Platform => Some(&self.platforms),
            Dimension::Referrer => Some(&self.referrers),
            Dimension::Hour => None,
        }
    }
}

/// Raw `click_analytics` row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DailyTotalsRow {
    pub link_id: i64,
    pub date: String,
    pub total_clicks: i64,
    pub unique_clicks: i64,
}

/// Raw `click_analytics_counters` row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DailyCounterRow {
    pub date: String,
    pub dimension: String,
    pub bucket: String,
    pub clicks: i64,
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn parse_date(s: &str) -> anyhow::Result<NaiveDate> {
    Ok(NaiveDate::parse_from_str(s, "%Y-%m-%d")?)
}

/// Assemble daily values from totals rows and counter rows for the same link.
/// Counter rows without a matching totals row are dropped.
pub fn assemble_daily(
    totals: Vec<DailyTotalsRow>,
    counters: Vec<DailyCounterRow>,
) -> anyhow::Result<Vec<ClickAnalytics>> {
    let mut by_date: BTreeMap<NaiveDate, ClickAnalytics> = BTreeMap::new();

    for row in totals {
        let date = parse_date(&row.date)?;
        let mut analytics = ClickAnalytics::empty(row.link_id, date);
        analytics.total_clicks = row.total_clicks;
        analytics.unique_clicks = row.unique_clicks;
        by_date.insert(date, analytics);
    }

    for row in counters {
        let date = parse_date(&row.date)?;
        let dimension: Dimension = row.dimension.parse()?;
        if let Some(analytics) = by_date.get_mut(&date) {
            analytics.apply_counter(dimension, &row.bucket, row.clicks);
        }
    }

    Ok(by_date.into_values().collect())
}
