pub mod click;
pub mod click_analytics;
pub mod link;

pub use click::{Click, ClickEnrichment, NewClick};
pub use click_analytics::{ClickAnalytics, ClickRollup, DailyKey, Dimension, Uniqueness, HOURS_PER_DAY};
pub use link::{Link, LinkRecord, NewLink};
