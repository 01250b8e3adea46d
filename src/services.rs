//! Wiring of the shared services used by both servers and the admin CLI

use std::sync::Arc;

use crate::analytics::{AggregateStore, AnalyticsService, GeoLookup, UserAgentParser};
use crate::api::ApiState;
use crate::config::{AnalyticsConfig, CacheConfig, QueueConfig};
use crate::directory::LinkDirectory;
use crate::redirect::RedirectState;
use crate::storage::Storage;
use crate::tracking::{ClickTracker, EnrichmentQueue, EnrichmentWorker};

pub struct Services {
    pub storage: Arc<dyn Storage>,
    pub directory: Arc<LinkDirectory>,
    pub queue: EnrichmentQueue,
    pub tracker: Arc<ClickTracker>,
    pub analytics: Arc<AnalyticsService>,
    pub aggregates: Arc<AggregateStore>,
}

impl Services {
    /// Build every service and start the enrichment queue. Must run inside a
    /// tokio runtime.
    pub fn new(
        storage: Arc<dyn Storage>,
        geo: Arc<dyn GeoLookup>,
        agents: Arc<dyn UserAgentParser>,
        queue_config: &QueueConfig,
        cache_config: &CacheConfig,
    ) -> Self {
        let worker = Arc::new(EnrichmentWorker::new(Arc::clone(&storage), geo, agents));
        let queue = EnrichmentQueue::start(worker, queue_config);

        Self {
            directory: Arc::new(LinkDirectory::new(Arc::clone(&storage), cache_config)),
            tracker: Arc::new(ClickTracker::new(Arc::clone(&storage), queue.clone())),
            analytics: Arc::new(AnalyticsService::new(Arc::clone(&storage))),
            aggregates: Arc::new(AggregateStore::new(Arc::clone(&storage))),
            queue,
            storage,
        }
    }

    pub fn redirect_state(&self, analytics_config: AnalyticsConfig) -> Arc<RedirectState> {
        Arc::new(RedirectState {
            directory: Arc::clone(&self.directory),
            tracker: Arc::clone(&self.tracker),
            analytics_config,
        })
    }

    pub fn api_state(&self) -> Arc<ApiState> {
        Arc::new(ApiState {
            directory: Arc::clone(&self.directory),
            analytics: Arc::clone(&self.analytics),
        })
    }
}
