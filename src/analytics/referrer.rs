//! Referrer classification into a traffic source label

use url::Url;

pub const DIRECT: &str = "direct";
pub const UNKNOWN: &str = "unknown";

/// Checked before [`SEARCH_ENGINES`]; first substring match on the host wins
const SOCIAL_NETWORKS: &[(&str, &str)] = &[
    ("facebook.com", "Facebook"),
    ("twitter.com", "Twitter"),
    ("linkedin.com", "LinkedIn"),
    ("instagram.com", "Instagram"),
    ("tiktok.com", "TikTok"),
    ("youtube.com", "YouTube"),
];

const SEARCH_ENGINES: &[(&str, &str)] = &[
    ("google.com", "Google"),
    ("bing.com", "Bing"),
    ("yahoo.com", "Yahoo"),
    ("duckduckgo.com", "DuckDuckGo"),
];

/// Map a raw `Referer` header to a source label
///
/// Missing or blank referrers are `"direct"`, known networks become
/// `"Social: <Name>"` or `"Search: <Name>"`, anything else is reported by its
/// host. A referrer without a parseable host is `"unknown"`.
pub fn classify_referrer(referrer: Option<&str>) -> String {
    let referrer = match referrer.map(str::trim) {
        Some(r) if !r.is_empty() => r,
        _ => return DIRECT.to_string(),
    };

    let Some(host) = referrer_host(referrer) else {
        return UNKNOWN.to_string();
    };

    if let Some((_, name)) = SOCIAL_NETWORKS.iter().find(|(domain, _)| host.contains(domain)) {
        return format!("Social: {name}");
    }

    if let Some((_, name)) = SEARCH_ENGINES.iter().find(|(domain, _)| host.contains(domain)) {
        return format!("Search: {name}");
    }

    host
}

fn referrer_host(referrer: &str) -> Option<String> {
    let url = Url::parse(referrer).ok()?;
    let host = url.host_str()?;
    if host.is_empty() {
        return None;
    }
    Some(host.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_referrer_is_direct() {
        assert_eq!(classify_referrer(None), "direct");
        assert_eq!(classify_referrer(Some("")), "direct");
        assert_eq!(classify_referrer(Some("   ")), "direct");
    }

    #[test]
    fn test_social_and_search() {
        assert_eq!(
            classify_referrer(Some("https://www.facebook.com/some/post")),
            "Social: Facebook"
        );
        assert_eq!(
            classify_referrer(Some("https://m.youtube.com/watch?v=1")),
            "Social: YouTube"
        );
        assert_eq!(
            classify_referrer(Some("https://www.google.com/search?q=rust")),
            "Search: Google"
        );
        assert_eq!(
            classify_referrer(Some("https://DuckDuckGo.com/?q=x")),
            "Search: DuckDuckGo"
        );
    }

    #[test]
    fn test_other_hosts_are_reported_bare() {
        assert_eq!(
            classify_referrer(Some("https://news.ycombinator.com/item?id=1")),
            "news.ycombinator.com"
        );
    }

    #[test]
    fn test_unparseable_referrer_is_unknown() {
        assert_eq!(classify_referrer(Some("not a url")), "unknown");
        assert_eq!(classify_referrer(Some("mailto:someone@example.com")), "unknown");
    }
}
