//! Shared fixtures for the cross-crate scenarios: an in-memory fleet wired
//! to the real services and a box client that records what it was sent.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use domains::{
    Actor, Ad, AdDelivery, AdRepo, AdRequest, BoxAddress, BoxClient, BoxRoute, DomainError,
    LinkSigner, Monitor, PushMode, RelayBox, RemoveAds, Result, SubscriptionMonitor, SyncError,
    Validation,
};
use services::{FleetServices, Ports, ServiceSettings};
use storage_adapters::MemoryStore;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoxCall {
    Push { box_id: Uuid, mode: PushMode, ads: Vec<AdDelivery> },
    Remove { box_id: Uuid, body: RemoveAds },
    RemoveMonitor { box_id: Uuid, monitor_id: Uuid },
}

/// Box client that keeps every call. With `timing_out` set it records the
/// call and then fails like an unreachable device would.
#[derive(Default)]
pub struct RecordingBox {
    calls: Mutex<Vec<BoxCall>>,
    displayed: Mutex<Vec<String>>,
    timing_out: bool,
}

impl RecordingBox {
    pub fn timing_out() -> Self {
        Self { timing_out: true, ..Self::default() }
    }

    pub fn calls(&self) -> Vec<BoxCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn set_displayed(&self, files: &[&str]) {
        if let Ok(mut displayed) = self.displayed.lock() {
            *displayed = files.iter().map(|f| f.to_string()).collect();
        }
    }

    fn record(&self, route: &BoxRoute, call: BoxCall, path: &str) -> std::result::Result<(), SyncError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
        if self.timing_out {
            return Err(SyncError::Timeout { url: format!("http://{}:8081{path}", route.ip) });
        }
        Ok(())
    }
}

#[async_trait]
impl BoxClient for RecordingBox {
    async fn push_ads(&self, route: &BoxRoute, mode: PushMode, ads: Vec<AdDelivery>) -> std::result::Result<(), SyncError> {
        let path = if mode == PushMode::Single { "/ad" } else { "/update-ads" };
        self.record(route, BoxCall::Push { box_id: route.box_id, mode, ads }, path)
    }

    async fn remove_ads(&self, route: &BoxRoute, body: RemoveAds) -> std::result::Result<(), SyncError> {
        self.record(route, BoxCall::Remove { box_id: route.box_id, body }, "/remove-ads")
    }

    async fn remove_monitor(&self, route: &BoxRoute, monitor_id: Uuid) -> std::result::Result<(), SyncError> {
        self.record(route, BoxCall::RemoveMonitor { box_id: route.box_id, monitor_id }, "/remove-monitor")
    }

    async fn displayed_ads(&self, route: &BoxRoute, _monitor_id: Uuid) -> std::result::Result<Vec<String>, SyncError> {
        if self.timing_out {
            return Err(SyncError::Timeout { url: format!("http://{}:8081/get-ads", route.ip) });
        }
        Ok(self.displayed.lock().map(|d| d.clone()).unwrap_or_default())
    }
}

pub struct StaticSigner;

impl LinkSigner for StaticSigner {
    fn sign(&self, file_name: &str) -> Result<String> {
        if file_name.is_empty() {
            return Err(DomainError::Validation("empty file name".into()));
        }
        Ok(format!("https://files.test/{file_name}?signature=fixed"))
    }
}

/// A fleet backed by `MemoryStore`, the real services and a `RecordingBox`.
pub struct Fleet {
    pub store: Arc<MemoryStore>,
    pub boxes: Arc<RecordingBox>,
    pub services: FleetServices,
    pub admin: Actor,
}

impl Fleet {
    pub fn new() -> Self {
        Self::with_box(RecordingBox::default(), ServiceSettings::default())
    }

    pub fn with_box(boxes: RecordingBox, settings: ServiceSettings) -> Self {
        let store = Arc::new(MemoryStore::new());
        let boxes = Arc::new(boxes);
        let services = FleetServices::build(
            Ports {
                fleet: store.clone(),
                ads: store.clone(),
                notifier: store.clone(),
                signer: Arc::new(StaticSigner),
                box_client: boxes.clone(),
            },
            settings,
        );
        Self { store, boxes, services, admin: Actor::admin(Uuid::new_v4()) }
    }

    pub fn add_box(&self) -> Uuid {
        let address = BoxAddress { id: Uuid::new_v4(), ip: "10.20.0.5".into(), mac: "02:00:00:00:00:05".into() };
        let relay = RelayBox { id: Uuid::new_v4(), address_id: address.id, active: true };
        let id = relay.id;
        self.store.insert_box(relay, address);
        id
    }

    pub fn add_monitor(&self, max_blocks: u32, partner_id: Option<Uuid>, box_id: Option<Uuid>) -> Monitor {
        let monitor = Monitor {
            id: Uuid::new_v4(),
            address: format!("{max_blocks} Market St"),
            max_blocks,
            partner_id,
            box_id,
            active: true,
            version: 0,
        };
        self.store.insert_monitor(monitor.clone());
        monitor
    }

    pub fn subscribe(&self, client_id: Uuid, monitor_id: Uuid, slots_quantity: u32) -> SubscriptionMonitor {
        let subscription = SubscriptionMonitor { id: Uuid::new_v4(), client_id, monitor_id, slots_quantity, active: true };
        self.store.insert_subscription(subscription.clone());
        subscription
    }

    pub async fn approved_ad(&self, client_id: Uuid, file_name: &str) -> Ad {
        let mut ad = Ad::new(client_id, file_name, None);
        ad.validation = Validation::Approved;
        self.save(ad).await
    }

    pub async fn pending_ad(&self, client_id: Uuid, file_name: &str) -> Ad {
        self.save(Ad::new(client_id, file_name, None)).await
    }

    pub async fn open_request(&self, client_id: Uuid) -> AdRequest {
        let request = AdRequest { id: Uuid::new_v4(), client_id, description: "summer campaign".into(), active: true };
        self.store
            .save_ad_request(request.clone())
            .await
            .unwrap_or_else(|e| panic!("could not seed request: {e}"));
        request
    }

    /// Waits until every queued box call has been attempted.
    pub async fn drain(&self) {
        self.services.shutdown().await;
    }

    async fn save(&self, ad: Ad) -> Ad {
        self.store
            .save_ad(ad.clone())
            .await
            .unwrap_or_else(|e| panic!("could not seed ad: {e}"));
        ad
    }
}

impl Default for Fleet {
    fn default() -> Self {
        Self::new()
    }
}
