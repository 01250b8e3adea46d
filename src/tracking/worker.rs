//! Enrichment worker
//!
//! Turns a raw click into an enriched one, then feeds link counters and the
//! daily aggregate. Lookup failures degrade to empty fields. The enrichment
//! write and every counter it implies commit in one transaction, so a storage
//! failure leaves the click pending and a redelivery counts it exactly once.
//! Failed units are logged; nothing is retried.

use anyhow::Result;
use chrono::Utc;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::analytics::aggregate_store::{day_bounds, ClickFacets};
use crate::analytics::models::{GeoLocation, ParsedAgent};
use crate::analytics::{classify_device, classify_referrer, extract_utm, GeoError, GeoLookup, UserAgentParser};
use crate::models::{Click, ClickEnrichment, ClickRollup, DailyKey};
use crate::storage::Storage;
use crate::tracking::queue::EnrichmentJob;

const UNIQUE_WINDOW_SECS: i64 = 86_400;

/// Result of processing one unit
#[derive(Debug, Clone, PartialEq)]
pub enum EnrichmentOutcome {
    Enriched {
        /// No earlier click from this IP in the trailing 24 hours
        unique_24h: bool,
        /// First click from this IP on the click's UTC date
        unique_today: bool,
    },
    /// The click was already enriched by an earlier delivery
    Duplicate,
}

pub struct EnrichmentWorker {
    storage: Arc<dyn Storage>,
    geo: Arc<dyn GeoLookup>,
    agents: Arc<dyn UserAgentParser>,
}

impl EnrichmentWorker {
    pub fn new(
        storage: Arc<dyn Storage>,
        geo: Arc<dyn GeoLookup>,
        agents: Arc<dyn UserAgentParser>,
    ) -> Self {
        Self {
            storage,
            geo,
            agents,
        }
    }

    /// Queue entry point; errors stop at this boundary
    pub async fn handle(&self, job: EnrichmentJob) {
        let click_id = job.click.id;
        match self.process(&job).await {
            Ok(EnrichmentOutcome::Duplicate) => {
                debug!(click_id, "Skipping already enriched click");
            }
            Ok(EnrichmentOutcome::Enriched { unique_24h, unique_today }) => {
                debug!(click_id, unique_24h, unique_today, "Enriched click");
            }
            Err(e) => {
                error!(click_id, "Failed to process click analytics: {:#}", e);
            }
        }
    }

    pub async fn process(&self, job: &EnrichmentJob) -> Result<EnrichmentOutcome> {
        self.process_at(job, Utc::now().timestamp()).await
    }

    pub async fn process_at(&self, job: &EnrichmentJob, now: i64) -> Result<EnrichmentOutcome> {
        let click = &job.click;
        let enrichment = self.enrich(job);
        let rollup = rollup_for(click, &enrichment, now);

        let recorded = self
            .storage
            .record_enriched_click(click, &enrichment, &rollup, now)
            .await?;

        Ok(match recorded {
            Some(uniqueness) => EnrichmentOutcome::Enriched {
                unique_24h: uniqueness.sliding,
                unique_today: uniqueness.daily,
            },
            None => EnrichmentOutcome::Duplicate,
        })
    }

    /// Compute every enrichment field; never fails
    fn enrich(&self, job: &EnrichmentJob) -> ClickEnrichment {
        let click = &job.click;
        let geo = self.locate(&click.ip_address, click.id);
        let agent = click
            .user_agent
            .as_deref()
            .map(|ua| self.agents.parse(ua))
            .unwrap_or_default();

        enrichment_from(geo, agent, click.referrer.as_deref(), job)
    }

    fn locate(&self, ip_address: &str, click_id: i64) -> GeoLocation {
        let ip = match ip_address.parse::<IpAddr>() {
            Ok(ip) => ip,
            Err(_) => {
                warn!(click_id, ip_address, "Click has an unparseable IP address");
                return GeoLocation::default();
            }
        };

        match self.geo.lookup(ip) {
            Ok(location) => location,
            Err(GeoError::Unavailable) | Err(GeoError::NotFound(_)) => GeoLocation::default(),
            Err(e) => {
                warn!(click_id, "GeoIP lookup failed: {}", e);
                GeoLocation::default()
            }
        }
    }
}

/// Counters and buckets the click feeds once its enrichment commits
fn rollup_for(click: &Click, enrichment: &ClickEnrichment, now: i64) -> ClickRollup {
    let date = click.date();
    ClickRollup {
        key: DailyKey::new(click.link_id, date),
        window_start: now - UNIQUE_WINDOW_SECS,
        day_bounds: day_bounds(date),
        buckets: ClickFacets::from_enrichment(click, enrichment).buckets(),
    }
}

fn enrichment_from(
    geo: GeoLocation,
    agent: ParsedAgent,
    referrer: Option<&str>,
    job: &EnrichmentJob,
) -> ClickEnrichment {
    ClickEnrichment {
        country: geo.country,
        city: geo.city,
        region: geo.region,
        latitude: geo.latitude,
        longitude: geo.longitude,
        device_type: classify_device(&agent).as_str().to_string(),
        device_name: agent.device,
        browser: agent.browser,
        browser_version: agent.browser_version,
        platform: agent.platform,
        platform_version: agent.platform_version,
        is_mobile: agent.is_mobile,
        is_tablet: agent.is_tablet,
        is_desktop: agent.is_desktop,
        is_bot: agent.is_bot,
        referrer_source: classify_referrer(referrer),
        utm_parameters: extract_utm(&job.context.query),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::WootheeParser;
    use crate::models::{LinkRecord, NewClick};
    use crate::storage::SqliteStorage;
    use crate::tracking::recorder::RequestContext;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    struct FixedGeo;

    impl GeoLookup for FixedGeo {
        fn lookup(&self, ip: IpAddr) -> Result<GeoLocation, GeoError> {
            if ip.is_loopback() {
                return Err(GeoError::Lookup("corrupt record".to_string()));
            }
            Ok(GeoLocation {
                country: Some("NL".to_string()),
                city: Some("Amsterdam".to_string()),
                ..Default::default()
            })
        }
    }

    const FIREFOX_LINUX: &str =
        "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0";

    async fn setup() -> (Arc<dyn Storage>, EnrichmentWorker, i64) {
        let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        storage.init().await.unwrap();
        let storage: Arc<dyn Storage> = Arc::new(storage);
        let link = storage
            .create_link(
                &LinkRecord {
                    short_code: "wrk1".to_string(),
                    original_url: "https://example.com".to_string(),
                    owner_id: None,
                    expires_at: None,
                    password_hash: None,
                },
                0,
            )
            .await
            .unwrap();
        let worker = EnrichmentWorker::new(
            Arc::clone(&storage),
            Arc::new(FixedGeo),
            Arc::new(WootheeParser::new()),
        );
        (storage, worker, link.id)
    }

    async fn job(storage: &Arc<dyn Storage>, link_id: i64, ip: &str, clicked_at: i64) -> EnrichmentJob {
        let click = storage
            .insert_click(&NewClick {
                link_id,
                ip_address: ip.to_string(),
                user_agent: Some(FIREFOX_LINUX.to_string()),
                referrer: Some("https://www.google.com/search?q=x".to_string()),
                clicked_at,
            })
            .await
            .unwrap();
        let mut query = BTreeMap::new();
        query.insert("utm_source".to_string(), "mail".to_string());
        EnrichmentJob {
            click,
            context: RequestContext {
                ip_address: ip.to_string(),
                user_agent: Some(FIREFOX_LINUX.to_string()),
                referrer: None,
                query,
            },
        }
    }

    fn ts(day: u32, hour: u32) -> i64 {
        NaiveDate::from_ymd_opt(2024, 6, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp()
    }

    #[tokio::test]
    async fn test_enrichment_written_onto_click() {
        let (storage, worker, link_id) = setup().await;
        let job = job(&storage, link_id, "203.0.113.5", ts(3, 9)).await;

        let outcome = worker.process_at(&job, ts(3, 9) + 5).await.unwrap();
        assert_eq!(
            outcome,
            EnrichmentOutcome::Enriched {
                unique_24h: true,
                unique_today: true
            }
        );

        let click = storage.get_click(job.click.id).await.unwrap().unwrap();
        assert_eq!(click.country.as_deref(), Some("NL"));
        assert_eq!(click.browser.as_deref(), Some("Firefox"));
        assert_eq!(click.device_type.as_deref(), Some("desktop"));
        assert_eq!(click.referrer_source.as_deref(), Some("Search: Google"));
        // Raw header kept as received
        assert_eq!(
            click.referrer.as_deref(),
            Some("https://www.google.com/search?q=x")
        );
        let utm = click.utm_parameters.unwrap().0;
        assert_eq!(utm.get("utm_source").map(String::as_str), Some("mail"));
        assert_eq!(click.enriched_at, Some(ts(3, 9) + 5));
    }

    #[tokio::test]
    async fn test_duplicate_delivery_counts_once() {
        let (storage, worker, link_id) = setup().await;
        let job = job(&storage, link_id, "203.0.113.5", ts(3, 9)).await;

        worker.process_at(&job, ts(3, 9)).await.unwrap();
        let second = worker.process_at(&job, ts(3, 9) + 1).await.unwrap();
        assert_eq!(second, EnrichmentOutcome::Duplicate);

        let link = storage.get_link(link_id).await.unwrap().unwrap();
        assert_eq!(link.clicks_count, 1);
        let day = ts(3, 0);
        let date = chrono::DateTime::from_timestamp(day, 0).unwrap().date_naive();
        let days = storage.daily_analytics(link_id, date, date).await.unwrap();
        assert_eq!(days[0].total_clicks, 1);
    }

    #[tokio::test]
    async fn test_sliding_window_and_calendar_day_differ() {
        let (storage, worker, link_id) = setup().await;

        // 23:00 on the 3rd, then 01:00 on the 4th from the same IP
        let late = job(&storage, link_id, "198.51.100.20", ts(3, 23)).await;
        let early = job(&storage, link_id, "198.51.100.20", ts(4, 1)).await;

        worker.process_at(&late, ts(3, 23)).await.unwrap();
        let outcome = worker.process_at(&early, ts(4, 1)).await.unwrap();

        // Same visitor within 24h, but first visit of the new calendar day
        assert_eq!(
            outcome,
            EnrichmentOutcome::Enriched {
                unique_24h: false,
                unique_today: true
            }
        );

        let link = storage.get_link(link_id).await.unwrap().unwrap();
        assert_eq!(link.clicks_count, 2);
        assert_eq!(link.unique_clicks_count, 1);
    }

    #[tokio::test]
    async fn test_window_expires_after_a_day() {
        let (storage, worker, link_id) = setup().await;

        let first = job(&storage, link_id, "198.51.100.21", ts(3, 8)).await;
        let later = job(&storage, link_id, "198.51.100.21", ts(4, 9)).await;

        worker.process_at(&first, ts(3, 8)).await.unwrap();
        let outcome = worker.process_at(&later, ts(4, 9)).await.unwrap();
        assert_eq!(
            outcome,
            EnrichmentOutcome::Enriched {
                unique_24h: true,
                unique_today: true
            }
        );
    }

    #[tokio::test]
    async fn test_geo_failure_leaves_fields_empty() {
        let (storage, worker, link_id) = setup().await;
        let job = job(&storage, link_id, "127.0.0.1", ts(3, 9)).await;

        worker.process_at(&job, ts(3, 9)).await.unwrap();

        let click = storage.get_click(job.click.id).await.unwrap().unwrap();
        assert!(click.is_enriched());
        assert_eq!(click.country, None);
        assert_eq!(click.browser.as_deref(), Some("Firefox"));
    }
}
