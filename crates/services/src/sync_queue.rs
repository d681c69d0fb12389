//! Bounded job queue drained by a fixed pool of workers.
//!
//! Callers never wait on a box: `enqueue` either hands the job over or drops
//! it. Shutdown closes the queue and waits until the workers have drained
//! what was already accepted.

use std::sync::{Arc, Mutex, PoisonError};

use domains::{AdDelivery, BoxClient, BoxRoute, PushMode, RemoveAds, SyncError};
use prometheus_client::metrics::counter::Counter;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// One outbound call to a box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncJob {
    PushAds { route: BoxRoute, mode: PushMode, ads: Vec<AdDelivery> },
    RemoveAds { route: BoxRoute, body: RemoveAds },
    RemoveMonitor { route: BoxRoute, monitor_id: Uuid },
}

impl SyncJob {
    pub fn route(&self) -> &BoxRoute {
        match self {
            Self::PushAds { route, .. } | Self::RemoveAds { route, .. } | Self::RemoveMonitor { route, .. } => route,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::PushAds { mode: PushMode::Single, .. } => "assign",
            Self::PushAds { mode: PushMode::Bulk, .. } => "update",
            Self::RemoveAds { .. } => "remove_ads",
            Self::RemoveMonitor { .. } => "remove_monitor",
        }
    }
}

/// Job totals since start. Clones share the same counters, so a metrics
/// registry can hold them directly.
#[derive(Debug, Clone, Default)]
pub struct SyncCounters {
    pub enqueued: Counter,
    pub delivered: Counter,
    pub failed: Counter,
    pub dropped: Counter,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
}

pub struct SyncQueue {
    sender: Mutex<Option<mpsc::Sender<SyncJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: SyncCounters,
}

impl SyncQueue {
    /// Spawns `workers` tasks on the current tokio runtime.
    pub fn start(client: Arc<dyn BoxClient>, capacity: usize, workers: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let counters = SyncCounters::default();

        let handles = (0..workers.max(1))
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let client = Arc::clone(&client);
                let counters = counters.clone();
                tokio::spawn(async move {
                    loop {
                        let job = rx.lock().await.recv().await;
                        let Some(job) = job else { break };
                        match execute(client.as_ref(), &job).await {
                            Ok(()) => {
                                counters.delivered.inc();
                                debug!(worker, box_id = %job.route().box_id, job = job.name(), "box sync delivered");
                            }
                            Err(e) => {
                                counters.failed.inc();
                                error!(
                                    worker,
                                    box_id = %job.route().box_id,
                                    ip = %job.route().ip,
                                    url = e.url(),
                                    job = job.name(),
                                    error = %e,
                                    "box sync failed"
                                );
                            }
                        }
                    }
                    debug!(worker, "sync worker stopped");
                })
            })
            .collect();

        Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
            counters,
        }
    }

    /// Hands the job to the workers. Returns false when it was dropped.
    pub fn enqueue(&self, job: SyncJob) -> bool {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = guard.as_ref() else {
            self.counters.dropped.inc();
            warn!(box_id = %job.route().box_id, job = job.name(), "sync queue is shut down, job dropped");
            return false;
        };
        match sender.try_send(job) {
            Ok(()) => {
                self.counters.enqueued.inc();
                true
            }
            Err(TrySendError::Full(job)) | Err(TrySendError::Closed(job)) => {
                self.counters.dropped.inc();
                warn!(box_id = %job.route().box_id, job = job.name(), "sync queue full, job dropped");
                false
            }
        }
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.counters.enqueued.get(),
            delivered: self.counters.delivered.get(),
            failed: self.counters.failed.get(),
            dropped: self.counters.dropped.get(),
        }
    }

    pub fn counters(&self) -> &SyncCounters {
        &self.counters
    }

    /// Stops accepting jobs and waits for the workers to finish the backlog.
    pub async fn shutdown(&self) {
        drop(self.sender.lock().unwrap_or_else(PoisonError::into_inner).take());
        let handles = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "sync worker ended abnormally");
            }
        }
    }
}

async fn execute(client: &dyn BoxClient, job: &SyncJob) -> Result<(), SyncError> {
    match job {
        SyncJob::PushAds { route, mode, ads } => client.push_ads(route, *mode, ads.clone()).await,
        SyncJob::RemoveAds { route, body } => client.remove_ads(route, body.clone()).await,
        SyncJob::RemoveMonitor { route, monitor_id } => client.remove_monitor(route, *monitor_id).await,
    }
}
