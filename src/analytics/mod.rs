//! Click analytics
//!
//! Enrichment building blocks (GeoIP, user agent, referrer, UTM), the daily
//! aggregate store and the query service that reads it back.

pub mod aggregate_store;
pub mod geoip;
pub mod ip_extractor;
pub mod models;
pub mod query;
pub mod referrer;
pub mod user_agent;
pub mod utm;

pub use aggregate_store::{AggregateStore, ClickFacets};
pub use geoip::{GeoError, GeoIpService, GeoLookup};
pub use ip_extractor::extract_client_ip;
pub use models::{AnalyticsSummary, GeoLocation, ParsedAgent, RealTimeStats};
pub use query::{AnalyticsRange, AnalyticsService};
pub use referrer::classify_referrer;
pub use user_agent::{classify_device, DeviceType, UserAgentParser, WootheeParser};
pub use utm::extract_utm;
