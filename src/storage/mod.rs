pub mod postgres;
pub mod sqlite;
pub mod trait_def;

pub use postgres::PostgresStorage;
pub use sqlite::SqliteStorage;
pub use trait_def::{Storage, StorageError, StorageResult};

use std::sync::Arc;
use tracing::info;

use crate::config::{DatabaseBackend, DatabaseConfig};
use crate::models::{Click, NewClick};

/// Open the configured backend and create its schema
pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<Arc<dyn Storage>> {
    let storage: Arc<dyn Storage> = match config.backend {
        DatabaseBackend::Sqlite => {
            info!("Using SQLite storage: {}", config.url);
            Arc::new(SqliteStorage::new(&config.url, config.max_connections).await?)
        }
        DatabaseBackend::Postgres => {
            info!("Using PostgreSQL storage");
            Arc::new(PostgresStorage::new(&config.url, config.max_connections).await?)
        }
    };

    storage.init().await?;
    Ok(storage)
}

/// A freshly inserted click: fast-path fields only, enrichment still pending
fn raw_click(id: i64, click: &NewClick) -> Click {
    Click {
        id,
        link_id: click.link_id,
        ip_address: click.ip_address.clone(),
        user_agent: click.user_agent.clone(),
        referrer: click.referrer.clone(),
        clicked_at: click.clicked_at,
        country: None,
        city: None,
        region: None,
        latitude: None,
        longitude: None,
        device_type: None,
        device_name: None,
        browser: None,
        browser_version: None,
        platform: None,
        platform_version: None,
        is_mobile: None,
        is_tablet: None,
        is_desktop: None,
        is_bot: None,
        referrer_source: None,
        utm_parameters: None,
        enriched_at: None,
    }
}
