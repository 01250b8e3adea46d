//! Bounded enrichment queue with a pool of concurrent workers
//!
//! A single dispatcher task owns the receiver and spawns every unit into a
//! `JoinSet`, gated by a semaphore sized to the worker count. Producers never
//! wait: when the channel is full the unit is rejected.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::config::QueueConfig;
use crate::models::Click;
use crate::tracking::recorder::RequestContext;
use crate::tracking::worker::EnrichmentWorker;

/// One unit of enrichment work
#[derive(Debug, Clone)]
pub struct EnrichmentJob {
    pub click: Click,
    pub context: RequestContext,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("enrichment queue is full")]
    Full,
    #[error("enrichment queue is closed")]
    Closed,
}

enum QueueMessage {
    Process(Box<EnrichmentJob>),
    /// Reply once every unit received before this message has finished
    Flush(oneshot::Sender<()>),
    /// Like `Flush`, then stop the dispatcher
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable producer handle
#[derive(Clone)]
pub struct EnrichmentQueue {
    sender: mpsc::Sender<QueueMessage>,
}

impl EnrichmentQueue {
    /// Spawn the dispatcher on the current runtime
    pub fn start(worker: Arc<EnrichmentWorker>, config: &QueueConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        let workers = config.workers.max(1);

        let dispatcher = Dispatcher {
            receiver,
            worker,
            permits: Arc::new(Semaphore::new(workers)),
            in_flight: JoinSet::new(),
        };
        tokio::spawn(dispatcher.run());

        info!(capacity = config.capacity, workers, "Enrichment queue started");
        Self { sender }
    }

    pub fn enqueue(&self, job: EnrichmentJob) -> Result<(), EnqueueError> {
        self.sender
            .try_send(QueueMessage::Process(Box::new(job)))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
                mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
            })
    }

    /// Wait until everything enqueued so far has been processed
    pub async fn flush(&self) -> Result<(), EnqueueError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.sender
            .send(QueueMessage::Flush(done_tx))
            .await
            .map_err(|_| EnqueueError::Closed)?;
        done_rx.await.map_err(|_| EnqueueError::Closed)
    }

    /// Drain pending units and stop; later enqueues fail with `Closed`
    pub async fn shutdown(&self) -> Result<(), EnqueueError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.sender
            .send(QueueMessage::Shutdown(done_tx))
            .await
            .map_err(|_| EnqueueError::Closed)?;
        done_rx.await.map_err(|_| EnqueueError::Closed)
    }
}

struct Dispatcher {
    receiver: mpsc::Receiver<QueueMessage>,
    worker: Arc<EnrichmentWorker>,
    permits: Arc<Semaphore>,
    in_flight: JoinSet<()>,
}

impl Dispatcher {
    async fn run(mut self) {
        while let Some(message) = self.receiver.recv().await {
            match message {
                QueueMessage::Process(job) => {
                    let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
                        break;
                    };
                    let worker = Arc::clone(&self.worker);
                    self.in_flight.spawn(async move {
                        let _permit = permit;
                        worker.handle(*job).await;
                    });
                    self.reap_finished();
                }
                QueueMessage::Flush(done) => {
                    self.drain().await;
                    let _ = done.send(());
                }
                QueueMessage::Shutdown(done) => {
                    info!("Enrichment queue received shutdown signal, draining...");
                    self.receiver.close();
                    // Units already buffered behind the shutdown message still run
                    while let Some(message) = self.receiver.recv().await {
                        if let QueueMessage::Process(job) = message {
                            self.worker.handle(*job).await;
                        }
                    }
                    self.drain().await;
                    let _ = done.send(());
                    info!("Enrichment queue stopped");
                    return;
                }
            }
        }

        self.drain().await;
    }

    fn reap_finished(&mut self) {
        while let Some(result) = self.in_flight.try_join_next() {
            if let Err(e) = result {
                error!("Enrichment task panicked: {}", e);
            }
        }
    }

    async fn drain(&mut self) {
        while let Some(result) = self.in_flight.join_next().await {
            if let Err(e) = result {
                error!("Enrichment task panicked: {}", e);
            }
        }
    }
}
