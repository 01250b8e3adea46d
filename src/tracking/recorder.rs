//! Fast-path click recording
//!
//! Runs inside the redirect request: one insert with the fields available
//! from the request, then a non-blocking hand-off to the enrichment queue.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{Click, Link, NewClick};
use crate::storage::Storage;
use crate::tracking::queue::{EnqueueError, EnrichmentJob, EnrichmentQueue};

/// What the redirect handler knows about the visitor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestContext {
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    /// Decoded query string, kept for UTM extraction
    pub query: BTreeMap<String, String>,
}

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("link '{0}' is inactive, expired or deleted")]
    NotAccessible(String),
    #[error("failed to record click: {0}")]
    Storage(#[from] anyhow::Error),
}

pub struct ClickTracker {
    storage: Arc<dyn Storage>,
    queue: EnrichmentQueue,
}

impl ClickTracker {
    pub fn new(storage: Arc<dyn Storage>, queue: EnrichmentQueue) -> Self {
        Self { storage, queue }
    }

    pub async fn track_click(&self, link: &Link, context: RequestContext) -> Result<Click, TrackingError> {
        self.track_click_at(link, context, Utc::now().timestamp()).await
    }

    /// Persist the raw click and schedule its enrichment
    ///
    /// Nothing is written for a link that cannot be accessed at `now`, judged
    /// both on `link` and on the stored row. A full or closed queue only costs
    /// the click its enrichment.
    pub async fn track_click_at(
        &self,
        link: &Link,
        context: RequestContext,
        now: i64,
    ) -> Result<Click, TrackingError> {
        if !link.can_be_accessed_at(now) {
            return Err(TrackingError::NotAccessible(link.short_code.clone()));
        }

        // The caller's link may come from a cache; storage has the final say
        let click = self
            .storage
            .insert_click_if_accessible(&NewClick {
                link_id: link.id,
                ip_address: context.ip_address.clone(),
                user_agent: context.user_agent.clone(),
                referrer: context.referrer.clone(),
                clicked_at: now,
            })
            .await?
            .ok_or_else(|| TrackingError::NotAccessible(link.short_code.clone()))?;

        debug!(short_code = %link.short_code, click_id = click.id, "Recorded raw click");

        let job = EnrichmentJob {
            click: click.clone(),
            context,
        };
        match self.queue.enqueue(job) {
            Ok(()) => {}
            Err(EnqueueError::Full) => {
                warn!(click_id = click.id, "Enrichment queue full, click will stay unenriched");
            }
            Err(EnqueueError::Closed) => {
                warn!(click_id = click.id, "Enrichment queue closed, click will stay unenriched");
            }
        }

        Ok(click)
    }
}
