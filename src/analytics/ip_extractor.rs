//! Client IP extraction from HTTP headers with trust validation
//!
//! This module implements client IP extraction that:
//! - Walks `Forwarded` / `X-Forwarded-For` chains from the right, skipping trusted proxies
//! - Supports the Cloudflare `CF-Connecting-IP` header
//! - Falls back to the socket remote address when headers are absent or untrusted

use axum::http::HeaderMap;
use std::net::IpAddr;
use tracing::warn;

use crate::config::{AnalyticsConfig, TrustedProxyMode};

/// Extract the client IP address from HTTP headers
///
/// # Arguments
/// * `headers` - HTTP request headers
/// * `socket_addr` - The socket remote address (fallback)
/// * `config` - Analytics configuration with trust settings
///
/// # Returns
/// The client IP address, extracted according to the trust configuration
pub fn extract_client_ip(
    headers: &HeaderMap,
    socket_addr: IpAddr,
    config: &AnalyticsConfig,
) -> IpAddr {
    match config.trusted_proxy_mode {
        TrustedProxyMode::Cloudflare => extract_cloudflare_ip(headers).unwrap_or_else(|| {
            warn!("CF-Connecting-IP header missing in Cloudflare mode, using socket address");
            socket_addr
        }),
        TrustedProxyMode::Standard => {
            // Headers are only honoured when the peer itself is a trusted proxy
            if !config.trusted_proxies.is_empty() && !is_trusted(socket_addr, config) {
                return socket_addr;
            }
            extract_standard_ip(headers, config).unwrap_or(socket_addr)
        }
        TrustedProxyMode::None => socket_addr,
    }
}

fn extract_cloudflare_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("cf-connecting-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
}

/// Prefer RFC 7239 `Forwarded`, then `X-Forwarded-For`
fn extract_standard_ip(headers: &HeaderMap, config: &AnalyticsConfig) -> Option<IpAddr> {
    if let Some(chain) = forwarded_chain(headers) {
        if let Some(ip) = select_from_chain(&chain, config) {
            return Some(ip);
        }
    }

    let chain = x_forwarded_for_chain(headers)?;
    select_from_chain(&chain, config)
}

/// `for=` values of every `Forwarded` element, left to right
fn forwarded_chain(headers: &HeaderMap) -> Option<Vec<IpAddr>> {
    let forwarded = headers.get("forwarded")?.to_str().ok()?;

    let chain: Vec<IpAddr> = forwarded
        .split(',')
        .filter_map(|element| {
            element.split(';').find_map(|param| {
                let (key, value) = param.trim().split_once('=')?;
                if !key.eq_ignore_ascii_case("for") {
                    return None;
                }
                parse_forwarded_node(value)
            })
        })
        .collect();

    (!chain.is_empty()).then_some(chain)
}

/// Parse a node such as `192.0.2.60`, `"192.0.2.60:4711"` or `"[2001:db8::1]:4711"`
fn parse_forwarded_node(value: &str) -> Option<IpAddr> {
    let value = value.trim().trim_matches('"');

    if let Some(rest) = value.strip_prefix('[') {
        let (ip, _) = rest.split_once(']')?;
        return ip.parse().ok();
    }

    if let Ok(ip) = value.parse::<IpAddr>() {
        return Some(ip);
    }

    // IPv4 with port
    let (ip, _port) = value.rsplit_once(':')?;
    ip.parse().ok()
}

fn x_forwarded_for_chain(headers: &HeaderMap) -> Option<Vec<IpAddr>> {
    let xff = headers.get("x-forwarded-for")?.to_str().ok()?;

    let chain: Vec<IpAddr> = xff
        .split(',')
        .filter_map(|s| s.trim().parse::<IpAddr>().ok())
        .collect();

    (!chain.is_empty()).then_some(chain)
}

/// Pick the client from a proxy chain
///
/// With `num_trusted_proxies` the fixed number of hops is skipped from the
/// right. Otherwise the rightmost address outside `trusted_proxies` wins.
fn select_from_chain(chain: &[IpAddr], config: &AnalyticsConfig) -> Option<IpAddr> {
    if let Some(num_trusted) = config.num_trusted_proxies {
        if chain.len() > num_trusted {
            return Some(chain[chain.len() - num_trusted - 1]);
        }
        // Not enough hops in the chain, return the leftmost (least trusted)
        return chain.first().copied();
    }

    chain
        .iter()
        .rev()
        .find(|ip| !is_trusted(**ip, config))
        .or_else(|| chain.first())
        .copied()
}

fn is_trusted(ip: IpAddr, config: &AnalyticsConfig) -> bool {
    config.trusted_proxies.iter().any(|net| net.contains(&ip))
}
