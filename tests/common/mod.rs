//! Shared helpers for integration tests
#![allow(dead_code)]

use axum::http::Request;
use axum::Router;
use linktrail::analytics::models::GeoLocation;
use linktrail::analytics::{GeoError, GeoLookup, WootheeParser};
use linktrail::config::{AnalyticsConfig, CacheConfig, QueueConfig};
use linktrail::models::{Link, LinkRecord};
use linktrail::redirect::create_redirect_router;
use linktrail::redirect::middleware::RequestStart;
use linktrail::services::Services;
use linktrail::storage::{SqliteStorage, Storage};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tower::Layer;

pub const CHROME_WINDOWS: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
pub const SAFARI_IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";

/// Single connection so every query sees the same in-memory database
pub async fn create_test_storage() -> Arc<dyn Storage> {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

/// File-backed database shared by `connections` pooled connections. Returns
/// the URL too, so a test can open its own pool on the same file.
pub async fn create_file_storage(dir: &TempDir, connections: u32) -> (Arc<dyn Storage>, String) {
    let url = format!("sqlite://{}", dir.path().join("linktrail.db").display());
    let storage = SqliteStorage::new(&url, connections).await.unwrap();
    storage.init().await.unwrap();
    (Arc::new(storage), url)
}

/// 1.2.3.4 is in the US, 5.6.7.8 in Germany, everything else is unknown
pub struct StaticGeo;

impl GeoLookup for StaticGeo {
    fn lookup(&self, ip: IpAddr) -> Result<GeoLocation, GeoError> {
        let country = match ip.to_string().as_str() {
            "1.2.3.4" => "US",
            "5.6.7.8" => "DE",
            _ => return Err(GeoError::NotFound(ip)),
        };
        Ok(GeoLocation {
            country: Some(country.to_string()),
            ..Default::default()
        })
    }
}

pub fn create_services(storage: Arc<dyn Storage>, workers: usize) -> Services {
    Services::new(
        storage,
        Arc::new(StaticGeo),
        Arc::new(WootheeParser::new()),
        &QueueConfig {
            capacity: 10_000,
            workers,
        },
        &CacheConfig::default(),
    )
}

pub async fn create_link(storage: &Arc<dyn Storage>, code: &str) -> Link {
    create_link_with(storage, code, None, None).await
}

pub async fn create_link_with(
    storage: &Arc<dyn Storage>,
    code: &str,
    expires_at: Option<i64>,
    password_hash: Option<String>,
) -> Link {
    storage
        .create_link(
            &LinkRecord {
                short_code: code.to_string(),
                original_url: format!("https://example.com/{code}"),
                owner_id: None,
                expires_at,
                password_hash,
            },
            chrono::Utc::now().timestamp(),
        )
        .await
        .unwrap()
}

/// Redirect router whose requests appear to come from `client_ip`
pub fn redirect_app(services: &Services, client_ip: [u8; 4]) -> Router {
    create_redirect_router(services.redirect_state(AnalyticsConfig::default())).layer(
        TestConnectInfoLayer {
            addr: SocketAddr::from((client_ip, 40000)),
        },
    )
}

/// Helper layer to inject ConnectInfo for tests
#[derive(Clone)]
pub struct TestConnectInfoLayer {
    pub addr: SocketAddr,
}

impl<S> Layer<S> for TestConnectInfoLayer {
    type Service = TestConnectInfoMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TestConnectInfoMiddleware {
            inner,
            addr: self.addr,
        }
    }
}

#[derive(Clone)]
pub struct TestConnectInfoMiddleware<S> {
    inner: S,
    addr: SocketAddr,
}

impl<S, B> tower::Service<Request<B>> for TestConnectInfoMiddleware<S>
where
    S: tower::Service<Request<B>> + Clone,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        req.extensions_mut()
            .insert(axum::extract::connect_info::ConnectInfo(self.addr));
        req.extensions_mut().insert(RequestStart(Instant::now()));

        self.inner.call(req)
    }
}
