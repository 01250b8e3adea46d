//! UTM campaign parameter extraction

use std::collections::BTreeMap;

const UTM_PREFIX: &str = "utm_";

/// Collect every `utm_`-prefixed query parameter; `None` when there are none
pub fn extract_utm(query: &BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    let utm: BTreeMap<String, String> = query
        .iter()
        .filter(|(key, _)| key.starts_with(UTM_PREFIX))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    (!utm.is_empty()).then_some(utm)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_keeps_only_utm_keys() {
        let utm = extract_utm(&query(&[
            ("utm_source", "newsletter"),
            ("utm_campaign", "launch"),
            ("utm_custom", "x"),
            ("ref", "home"),
            ("password", "secret"),
        ]))
        .unwrap();

        assert_eq!(utm.len(), 3);
        assert_eq!(utm["utm_source"], "newsletter");
        assert_eq!(utm["utm_custom"], "x");
        assert!(!utm.contains_key("password"));
    }

    #[test]
    fn test_no_utm_keys_is_none() {
        assert_eq!(extract_utm(&query(&[("ref", "home")])), None);
        assert_eq!(extract_utm(&BTreeMap::new()), None);
    }
}
