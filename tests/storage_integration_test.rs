//! Integration tests for the storage backends
//!
//! Each scenario is written once against `Arc<dyn Storage>` and run on SQLite
//! and, when `DATABASE_URL` points at a PostgreSQL server, on PostgreSQL too.
//!
//! Tests can be filtered by database backend using the DATABASE_BACKEND environment variable:
//! - `DATABASE_BACKEND=sqlite cargo test` - Run only SQLite tests
//! - `DATABASE_BACKEND=postgres cargo test` - Run only PostgreSQL tests
//! - By default, both backends are tested

use chrono::NaiveDate;
use linktrail::models::{
    ClickEnrichment, ClickRollup, DailyKey, Dimension, LinkRecord, NewClick, Uniqueness,
};
use linktrail::storage::{PostgresStorage, SqliteStorage, Storage, StorageError};
use std::sync::Arc;

/// Get the database backend to test from environment variable
fn should_test_backend(backend: &str) -> bool {
    match std::env::var("DATABASE_BACKEND") {
        Ok(val) => val.to_lowercase() == backend.to_lowercase(),
        Err(_) => true, // Test all backends if not specified
    }
}

/// Helper to create SQLite test storage
async fn create_sqlite_storage() -> Arc<dyn Storage> {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

/// Helper to create PostgreSQL test storage
async fn create_postgres_storage() -> Option<Arc<dyn Storage>> {
    let db_url = std::env::var("DATABASE_URL").ok()?;
    if !db_url.starts_with("postgres") {
        return None;
    }
    let storage = PostgresStorage::new(&db_url, 5).await.ok()?;
    storage.init().await.ok()?;
    Some(Arc::new(storage))
}

async fn backends() -> Vec<Arc<dyn Storage>> {
    let mut backends = Vec::new();
    if should_test_backend("sqlite") {
        backends.push(create_sqlite_storage().await);
    }
    if should_test_backend("postgres") {
        if let Some(storage) = create_postgres_storage().await {
            backends.push(storage);
        }
    }
    backends
}

/// Short codes stay unique across runs against a persistent PostgreSQL database
fn unique_code(prefix: &str) -> String {
    format!("{prefix}{}", rand::random_range(0..u32::MAX))
}

fn record(code: &str) -> LinkRecord {
    LinkRecord {
        short_code: code.to_string(),
        original_url: "https://example.com".to_string(),
        owner_id: None,
        expires_at: None,
        password_hash: None,
    }
}

fn click(link_id: i64, ip: &str, clicked_at: i64) -> NewClick {
    NewClick {
        link_id,
        ip_address: ip.to_string(),
        user_agent: None,
        referrer: None,
        clicked_at,
    }
}

#[tokio::test]
async fn test_concurrent_link_creation_conflicts() {
    for storage in backends().await {
        let code = unique_code("same");
        let mut handles = vec![];

        for _ in 0..10 {
            let storage = Arc::clone(&storage);
            let code = code.clone();
            handles.push(tokio::spawn(async move {
                storage.create_link(&record(&code), 0).await
            }));
        }

        // Exactly one should succeed, others should get Conflict error
        let mut success_count = 0;
        let mut conflict_count = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => success_count += 1,
                Err(StorageError::Conflict) => conflict_count += 1,
                Err(e) => panic!("Unexpected error: {:?}", e),
            }
        }

        assert_eq!(success_count, 1, "Exactly one creation should succeed");
        assert_eq!(conflict_count, 9, "All others should get conflict");
    }
}

#[tokio::test]
async fn test_soft_delete_hides_link_but_keeps_code() {
    for storage in backends().await {
        let code = unique_code("del");
        let link = storage.create_link(&record(&code), 0).await.unwrap();

        assert!(storage.soft_delete_link(&code, 100).await.unwrap());
        assert!(!storage.soft_delete_link(&code, 200).await.unwrap());

        assert!(storage.get_link_by_code(&code).await.unwrap().is_none());
        assert!(storage.short_code_exists(&code).await.unwrap());
        let stored = storage.get_link(link.id).await.unwrap().unwrap();
        assert_eq!(stored.deleted_at, Some(100));
    }
}

#[tokio::test]
async fn test_conditional_click_insert_checks_the_stored_link() {
    for storage in backends().await {
        let code = unique_code("live");
        let mut expiring = record(&unique_code("exp"));
        expiring.expires_at = Some(5_000);
        let link = storage.create_link(&record(&code), 0).await.unwrap();
        let expiring = storage.create_link(&expiring, 0).await.unwrap();

        let inserted = storage
            .insert_click_if_accessible(&click(link.id, "1.2.3.4", 1_000))
            .await
            .unwrap();
        assert!(inserted.is_some_and(|c| !c.is_enriched()));

        assert!(storage
            .insert_click_if_accessible(&click(expiring.id, "1.2.3.4", 4_999))
            .await
            .unwrap()
            .is_some());
        assert!(storage
            .insert_click_if_accessible(&click(expiring.id, "1.2.3.4", 5_000))
            .await
            .unwrap()
            .is_none());

        storage.set_link_active(&code, false).await.unwrap();
        assert!(storage
            .insert_click_if_accessible(&click(link.id, "1.2.3.4", 2_000))
            .await
            .unwrap()
            .is_none());

        storage.set_link_active(&code, true).await.unwrap();
        storage.soft_delete_link(&code, 3_000).await.unwrap();
        assert!(storage
            .insert_click_if_accessible(&click(link.id, "1.2.3.4", 4_000))
            .await
            .unwrap()
            .is_none());

        assert_eq!(storage.recent_clicks(link.id, 10).await.unwrap().len(), 1);
    }
}

#[tokio::test]
async fn test_enrichment_is_applied_once() {
    for storage in backends().await {
        let link = storage.create_link(&record(&unique_code("enr")), 0).await.unwrap();
        let raw = storage.insert_click(&click(link.id, "1.2.3.4", 1_000)).await.unwrap();
        assert!(!raw.is_enriched());

        let mut utm = std::collections::BTreeMap::new();
        utm.insert("utm_source".to_string(), "mail".to_string());
        let enrichment = ClickEnrichment {
            country: Some("US".to_string()),
            latitude: Some(37.75),
            device_type: "mobile".to_string(),
            is_mobile: true,
            referrer_source: "direct".to_string(),
            utm_parameters: Some(utm),
            ..Default::default()
        };

        assert!(storage.apply_enrichment(raw.id, &enrichment, 1_005).await.unwrap());
        assert!(!storage.apply_enrichment(raw.id, &enrichment, 1_010).await.unwrap());

        let stored = storage.get_click(raw.id).await.unwrap().unwrap();
        assert_eq!(stored.enriched_at, Some(1_005));
        assert_eq!(stored.country.as_deref(), Some("US"));
        assert_eq!(stored.latitude, Some(37.75));
        assert_eq!(stored.is_mobile, Some(true));
        assert_eq!(stored.is_bot, Some(false));
        assert_eq!(stored.utm_parameters.unwrap().0["utm_source"], "mail");
    }
}

#[tokio::test]
async fn test_record_enriched_click_commits_everything_once() {
    for storage in backends().await {
        let link = storage.create_link(&record(&unique_code("rec")), 0).await.unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let day_start = date.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp();
        let first = storage
            .insert_click(&click(link.id, "1.2.3.4", day_start + 3_600))
            .await
            .unwrap();
        let second = storage
            .insert_click(&click(link.id, "1.2.3.4", day_start + 7_200))
            .await
            .unwrap();

        let enrichment = ClickEnrichment {
            country: Some("US".to_string()),
            device_type: "desktop".to_string(),
            referrer_source: "direct".to_string(),
            ..Default::default()
        };
        let rollup = |hour: u32, window_start: i64| ClickRollup {
            key: DailyKey::new(link.id, date),
            window_start,
            day_bounds: (day_start, day_start + 86_400),
            buckets: vec![
                (Dimension::Country, "US".to_string()),
                (Dimension::Device, "desktop".to_string()),
                (Dimension::Hour, hour.to_string()),
            ],
        };

        let now = day_start + 8_000;
        assert_eq!(
            storage
                .record_enriched_click(&first, &enrichment, &rollup(1, now - 86_400), now)
                .await
                .unwrap(),
            Some(Uniqueness { sliding: true, daily: true })
        );
        assert_eq!(
            storage
                .record_enriched_click(&second, &enrichment, &rollup(2, now - 86_400), now)
                .await
                .unwrap(),
            Some(Uniqueness { sliding: false, daily: false })
        );
        // Redelivery changes nothing
        assert_eq!(
            storage
                .record_enriched_click(&second, &enrichment, &rollup(2, now - 86_400), now + 1)
                .await
                .unwrap(),
            None
        );

        let stored = storage.get_link(link.id).await.unwrap().unwrap();
        assert_eq!(stored.clicks_count, 2);
        assert_eq!(stored.unique_clicks_count, 1);
        assert_eq!(stored.last_clicked_at, Some(now));

        let days = storage.daily_analytics(link.id, date, date).await.unwrap();
        assert_eq!(days[0].total_clicks, 2);
        assert_eq!(days[0].unique_clicks, 1);
        assert_eq!(days[0].countries.get("US"), Some(&2));
        assert_eq!(days[0].hourly_distribution[1], 1);
        assert_eq!(days[0].hourly_distribution[2], 1);

        let stored = storage.get_click(second.id).await.unwrap().unwrap();
        assert_eq!(stored.enriched_at, Some(now));
    }
}

#[tokio::test]
async fn test_earlier_click_lookup() {
    for storage in backends().await {
        let link = storage.create_link(&record(&unique_code("early")), 0).await.unwrap();
        let first = storage.insert_click(&click(link.id, "1.2.3.4", 1_000)).await.unwrap();
        let second = storage.insert_click(&click(link.id, "1.2.3.4", 2_000)).await.unwrap();
        let other = storage.insert_click(&click(link.id, "5.6.7.8", 2_000)).await.unwrap();

        assert!(!storage
            .has_earlier_click(link.id, "1.2.3.4", first.id, 0, i64::MAX)
            .await
            .unwrap());
        assert!(storage
            .has_earlier_click(link.id, "1.2.3.4", second.id, 0, i64::MAX)
            .await
            .unwrap());
        // Outside the window
        assert!(!storage
            .has_earlier_click(link.id, "1.2.3.4", second.id, 1_500, i64::MAX)
            .await
            .unwrap());
        assert!(!storage
            .has_earlier_click(link.id, "5.6.7.8", other.id, 0, i64::MAX)
            .await
            .unwrap());

        assert_eq!(storage.count_clicks_since(link.id, 1_500).await.unwrap(), 2);
        assert_eq!(storage.count_distinct_ips_since(link.id, 0).await.unwrap(), 2);
        assert_eq!(
            storage.pending_click_times(link.id, 0, 1_500).await.unwrap(),
            vec![1_000]
        );
    }
}

#[tokio::test]
async fn test_concurrent_counter_increments() {
    for storage in backends().await {
        let link = storage.create_link(&record(&unique_code("cnt")), 0).await.unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let key = DailyKey::new(link.id, date);
        let link_id = link.id;

        let mut handles = vec![];
        for i in 0..25 {
            let storage = Arc::clone(&storage);
            handles.push(tokio::spawn(async move {
                storage.ensure_daily(&key, i).await.unwrap();
                storage.increment_daily_totals(&key, i % 5 == 0, i).await.unwrap();
                storage
                    .increment_daily_counter(&key, Dimension::Country, "US")
                    .await
                    .unwrap();
                storage.increment_link_counters(link_id, i % 5 == 0, i).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let days = storage.daily_analytics(link.id, date, date).await.unwrap();
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].total_clicks, 25);
        assert_eq!(days[0].unique_clicks, 5);
        assert_eq!(days[0].countries.get("US"), Some(&25));

        let stored = storage.get_link(link.id).await.unwrap().unwrap();
        assert_eq!(stored.clicks_count, 25);
        assert_eq!(stored.unique_clicks_count, 5);

        storage.delete_daily(&key).await.unwrap();
        assert!(storage.daily_analytics(link.id, date, date).await.unwrap().is_empty());
    }
}
