use anyhow::Result;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use linktrail::analytics::{GeoIpService, GeoLookup, WootheeParser};
use linktrail::api::create_api_router;
use linktrail::config::Config;
use linktrail::redirect::create_redirect_router;
use linktrail::services::Services;
use linktrail::storage;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration");

    info!("Initializing database...");
    let storage = storage::connect(&config.database).await?;
    info!("Database initialized successfully");

    let geoip = GeoIpService::new(config.analytics.geoip_db_path.as_deref())?;
    if geoip.is_enabled() {
        info!("GeoIP lookups enabled");
    } else {
        warn!("GEOIP_CITY_DB_PATH not set, clicks will be stored without location");
    }
    let geo: Arc<dyn GeoLookup> = Arc::new(geoip);

    let services = Services::new(
        storage,
        geo,
        Arc::new(WootheeParser::new()),
        &config.queue,
        &config.cache,
    );

    // Create routers
    let api_router = create_api_router(services.api_state());
    let redirect_router =
        create_redirect_router(services.redirect_state(config.analytics.clone()));

    // Start API server
    let api_addr = format!("{}:{}", config.api_server.host, config.api_server.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr).await?;
    info!("API server listening on http://{}", api_addr);

    // Start redirect server
    let redirect_addr = format!(
        "{}:{}",
        config.redirect_server.host, config.redirect_server.port
    );
    let redirect_listener = tokio::net::TcpListener::bind(&redirect_addr).await?;
    info!("Redirect server listening on http://{}", redirect_addr);

    // Run both servers until Ctrl+C
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
        }
        let _ = shutdown_tx.send(true);
    });

    let mut api_shutdown = shutdown_rx.clone();
    let mut redirect_shutdown = shutdown_rx;
    tokio::try_join!(
        axum::serve(api_listener, api_router).with_graceful_shutdown(async move {
            let _ = api_shutdown.wait_for(|stop| *stop).await;
        })
        .into_future(),
        axum::serve(
            redirect_listener,
            redirect_router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = redirect_shutdown.wait_for(|stop| *stop).await;
        })
        .into_future(),
    )?;

    info!("Draining enrichment queue...");
    if let Err(e) = services.queue.shutdown().await {
        warn!("Enrichment queue did not shut down cleanly: {}", e);
    }

    Ok(())
}
