use chrono::{DateTime, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use std::collections::BTreeMap;

/// Raw click event. Enrichment columns stay `None` until the worker finishes,
/// so readers must tolerate partially filled rows.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Click {
    pub id: i64,
    pub link_id: i64,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub clicked_at: i64,

    pub country: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub device_type: Option<String>,
    pub device_name: Option<String>,
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub platform: Option<String>,
    pub platform_version: Option<String>,
    pub is_mobile: Option<bool>,
    pub is_tablet: Option<bool>,
    pub is_desktop: Option<bool>,
    pub is_bot: Option<bool>,
    pub referrer_source: Option<String>,
    pub utm_parameters: Option<Json<BTreeMap<String, String>>>,
    pub enriched_at: Option<i64>,
}

impl Click {
    pub fn clicked_at_utc(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.clicked_at, 0).unwrap_or_default()
    }

    /// UTC calendar date the click belongs to
    pub fn date(&self) -> NaiveDate {
        self.clicked_at_utc().date_naive()
    }

    pub fn hour(&self) -> u32 {
        self.clicked_at_utc().hour()
    }

    pub fn is_enriched(&self) -> bool {
        self.enriched_at.is_some()
    }
}

/// Fast-path fields captured on the redirect request
#[derive(Debug, Clone)]
pub struct NewClick {
    pub link_id: i64,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub clicked_at: i64,
}

/// Everything the enrichment worker writes back onto a click row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClickEnrichment {
    pub country: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub device_type: String,
    pub device_name: Option<String>,
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub platform: Option<String>,
    pub platform_version: Option<String>,
    pub is_mobile: bool,
    pub is_tablet: bool,
    pub is_desktop: bool,
    pub is_bot: bool,
    pub referrer_source: String,
    pub utm_parameters: Option<BTreeMap<String, String>>,
}
