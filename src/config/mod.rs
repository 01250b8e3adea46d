use anyhow::Context;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api_server: ServerConfig,
    pub redirect_server: ServerConfig,
    pub analytics: AnalyticsConfig,
    pub queue: QueueConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// How the client IP is derived from a redirect request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustedProxyMode {
    /// Use the socket peer address only
    None,
    /// Honour `Forwarded` / `X-Forwarded-For`
    Standard,
    /// Honour `CF-Connecting-IP`
    Cloudflare,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// MaxMind GeoLite2/GeoIP2 City database; geo fields stay empty without it
    pub geoip_db_path: Option<String>,
    pub trusted_proxy_mode: TrustedProxyMode,
    /// Proxies allowed to append to `X-Forwarded-For`
    pub trusted_proxies: Vec<IpNet>,
    /// Fixed number of proxy hops to skip from the right of `X-Forwarded-For`
    pub num_trusted_proxies: Option<usize>,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            geoip_db_path: None,
            trusted_proxy_mode: TrustedProxyMode::None,
            trusted_proxies: Vec::new(),
            num_trusted_proxies: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Pending enrichment units buffered before new ones are dropped
    pub capacity: usize,
    /// Enrichment units processed concurrently
    pub workers: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: QueueConfig::DEFAULT_CAPACITY,
            workers: QueueConfig::DEFAULT_WORKERS,
        }
    }
}

impl QueueConfig {
    const DEFAULT_CAPACITY: usize = 10_000;
    const DEFAULT_WORKERS: usize = 4;
}

/// Link lookup cache. Changes made outside this process (the admin CLI, a
/// second server) reach cached redirects after at most `ttl_secs`; click
/// recording re-checks access against storage, so a deactivated or deleted
/// link answers 410 and records nothing in the meantime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub max_entries: u64,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl_secs: 60,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend_str =
            std::env::var("DATABASE_BACKEND").unwrap_or_else(|_| "sqlite".to_string());

        let backend = match backend_str.to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            _ => DatabaseBackend::Sqlite,
        };

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./linktrail.db".to_string());

        let max_connections = parse_env("DATABASE_MAX_CONNECTIONS", 10u32)?;

        let api_host = std::env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let api_port = parse_env("API_PORT", 8080u16)?;

        let redirect_host =
            std::env::var("REDIRECT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let redirect_port = parse_env("REDIRECT_PORT", 3000u16)?;

        let trusted_proxy_mode = match std::env::var("TRUSTED_PROXY_MODE")
            .unwrap_or_else(|_| "none".to_string())
            .to_lowercase()
            .as_str()
        {
            "none" => TrustedProxyMode::None,
            "standard" => TrustedProxyMode::Standard,
            "cloudflare" => TrustedProxyMode::Cloudflare,
            other => {
                tracing::warn!(
                    "Unknown TRUSTED_PROXY_MODE '{other}', falling back to 'none'. Supported values: none, standard, cloudflare"
                );
                TrustedProxyMode::None
            }
        };

        let trusted_proxies = match std::env::var("TRUSTED_PROXIES") {
            Ok(list) => parse_cidr_list(&list)?,
            Err(_) => Vec::new(),
        };

        let num_trusted_proxies = std::env::var("NUM_TRUSTED_PROXIES")
            .ok()
            .map(|v| v.parse::<usize>())
            .transpose()
            .context("NUM_TRUSTED_PROXIES must be a non-negative integer")?;

        let queue = QueueConfig {
            capacity: parse_env("ENRICHMENT_QUEUE_CAPACITY", QueueConfig::DEFAULT_CAPACITY)?,
            workers: parse_env("ENRICHMENT_WORKERS", QueueConfig::DEFAULT_WORKERS)?.max(1),
        };

        let cache_defaults = CacheConfig::default();
        let cache = CacheConfig {
            max_entries: parse_env("LINK_CACHE_MAX_ENTRIES", cache_defaults.max_entries)?,
            ttl_secs: parse_env("LINK_CACHE_TTL_SECS", cache_defaults.ttl_secs)?,
        };

        Ok(Config {
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections,
            },
            api_server: ServerConfig {
                host: api_host,
                port: api_port,
            },
            redirect_server: ServerConfig {
                host: redirect_host,
                port: redirect_port,
            },
            analytics: AnalyticsConfig {
                geoip_db_path: std::env::var("GEOIP_CITY_DB_PATH").ok(),
                trusted_proxy_mode,
                trusted_proxies,
                num_trusted_proxies,
            },
            queue,
            cache,
        })
    }
}

fn parse_env<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("{name} has an invalid value '{value}'")),
        Err(_) => Ok(default),
    }
}

/// Parse a comma-separated list of CIDR ranges; bare addresses become host routes
pub fn parse_cidr_list(list: &str) -> anyhow::Result<Vec<IpNet>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            if let Ok(net) = s.parse::<IpNet>() {
                return Ok(net);
            }
            let ip = s
                .parse::<std::net::IpAddr>()
                .with_context(|| format!("invalid entry '{s}' in TRUSTED_PROXIES"))?;
            let prefix = if ip.is_ipv4() { 32 } else { 128 };
            IpNet::new(ip, prefix).with_context(|| format!("invalid entry '{s}' in TRUSTED_PROXIES"))
        })
        .collect()
}
