//! Click tracking pipeline: fast-path recorder, enrichment queue and worker

pub mod queue;
pub mod recorder;
pub mod worker;

pub use queue::{EnqueueError, EnrichmentJob, EnrichmentQueue};
pub use recorder::{ClickTracker, RequestContext, TrackingError};
pub use worker::{EnrichmentOutcome, EnrichmentWorker};
