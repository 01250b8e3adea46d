//! User agent parsing and device classification
//!
//! Parsing is delegated to woothee; classification into a single device type
//! is done here from the parser's flags.

use serde::{Deserialize, Serialize};
use woothee::parser::Parser;

use crate::analytics::models::ParsedAgent;

const UNKNOWN: &str = "UNKNOWN";

/// UA string -> structured agent, consumed by the enrichment worker
pub trait UserAgentParser: Send + Sync {
    fn parse(&self, user_agent: &str) -> ParsedAgent;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
    Bot,
    Unknown,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
            DeviceType::Desktop => "desktop",
            DeviceType::Bot => "bot",
            DeviceType::Unknown => "unknown",
        }
    }
}

/// Checks mobile, tablet, desktop, bot in that order; the first flag set wins.
pub fn classify_device(agent: &ParsedAgent) -> DeviceType {
    if agent.is_mobile {
        DeviceType::Mobile
    } else if agent.is_tablet {
        DeviceType::Tablet
    } else if agent.is_desktop {
        DeviceType::Desktop
    } else if agent.is_bot {
        DeviceType::Bot
    } else {
        DeviceType::Unknown
    }
}

/// woothee-backed parser
#[derive(Debug, Clone, Copy, Default)]
pub struct WootheeParser;

impl WootheeParser {
    pub fn new() -> Self {
        Self
    }
}

fn known(value: &str) -> Option<String> {
    if value.is_empty() || value == UNKNOWN {
        None
    } else {
        Some(value.to_string())
    }
}

impl UserAgentParser for WootheeParser {
    fn parse(&self, user_agent: &str) -> ParsedAgent {
        let parser = Parser::new();
        let Some(result) = parser.parse(user_agent) else {
            return ParsedAgent::default();
        };

        let handheld = matches!(result.category, "smartphone" | "mobilephone");
        // woothee reports tablets as smartphones
        let is_tablet = handheld
            && (result.os == "iPad" || (result.os == "Android" && !user_agent.contains("Mobile")));

        ParsedAgent {
            device: known(result.vendor),
            browser: known(result.name),
            browser_version: known(result.version),
            platform: known(result.os),
            platform_version: known(&result.os_version),
            // Tablets are not flagged mobile; mobile outranks tablet in
            // classify_device, so the tablet category would be unreachable
            is_mobile: handheld && !is_tablet,
            is_tablet,
            is_desktop: result.category == "pc",
            is_bot: result.category == "crawler",
        }
    }
}
