//! # Services
//!
//! Application logic of the ad fleet. Depends only on the ports declared in
//! `domains`; adapters are handed in through [`Ports`].

pub mod ad_lifecycle;
pub mod assignment;
pub mod box_sync;
pub mod fleet;
pub mod slot_accountant;
pub mod sync_queue;

use std::sync::Arc;

use domains::{AdRepo, BoxClient, FleetRepo, LinkSigner, Notifier};

pub use ad_lifecycle::{AdLifecycle, DecisionOutcome, LifecyclePolicy, Transition};
pub use assignment::{AssignmentEngine, AssignmentPolicy, AssignmentReport, SkipReason, SkippedMonitor};
pub use box_sync::{BoxSyncGateway, GatewayCounters, GatewayStats, HealthSummary};
pub use fleet::{FleetService, RotationEntry};
pub use slot_accountant::{Ceiling, SlotAccountant, SlotDecision, SlotRequest};
pub use sync_queue::{QueueStats, SyncCounters, SyncJob, SyncQueue};

/// Tunables the services read from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceSettings {
    pub assignment: AssignmentPolicy,
    pub lifecycle: LifecyclePolicy,
    pub queue_capacity: usize,
    pub sync_workers: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            assignment: AssignmentPolicy::default(),
            lifecycle: LifecyclePolicy::default(),
            queue_capacity: 256,
            sync_workers: 4,
        }
    }
}

/// Adapter implementations of every port.
#[derive(Clone)]
pub struct Ports {
    pub fleet: Arc<dyn FleetRepo>,
    pub ads: Arc<dyn AdRepo>,
    pub notifier: Arc<dyn Notifier>,
    pub signer: Arc<dyn LinkSigner>,
    pub box_client: Arc<dyn BoxClient>,
}

/// The wired service graph. Must be built inside a Tokio runtime because the
/// sync workers are spawned immediately.
#[derive(Clone)]
pub struct FleetServices {
    pub lifecycle: Arc<AdLifecycle>,
    pub assignments: Arc<AssignmentEngine>,
    pub gateway: Arc<BoxSyncGateway>,
    pub fleet: Arc<FleetService>,
}

impl FleetServices {
    pub fn build(ports: Ports, settings: ServiceSettings) -> Self {
        let queue = SyncQueue::start(ports.box_client.clone(), settings.queue_capacity, settings.sync_workers);
        let gateway = Arc::new(BoxSyncGateway::new(
            ports.fleet.clone(),
            ports.signer,
            ports.notifier.clone(),
            ports.box_client,
            queue,
        ));
        let assignments = Arc::new(AssignmentEngine::new(
            ports.fleet.clone(),
            ports.ads.clone(),
            ports.notifier,
            gateway.clone(),
            settings.assignment,
        ));
        let lifecycle = Arc::new(AdLifecycle::new(
            ports.ads,
            ports.fleet.clone(),
            assignments.clone(),
            settings.lifecycle,
        ));
        let fleet = Arc::new(FleetService::new(ports.fleet, gateway.clone(), assignments.clone()));
        Self { lifecycle, assignments, gateway, fleet }
    }

    /// Stops accepting sync jobs and waits for queued ones to finish.
    pub async fn shutdown(&self) {
        self.gateway.shutdown().await;
    }
}
