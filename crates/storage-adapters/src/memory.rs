//! # In-memory store
//!
//! Backs every persistence port with `DashMap` tables. A monitor and its
//! assignment rows live in the same entry, so the shard lock taken by
//! `get_mut` makes each compare-and-swap atomic. Subscription rows are only
//! written while their monitor's entry is held, and snapshots read them under
//! the same entry, so a version always matches the subscriptions it covers.

use async_trait::async_trait;
use dashmap::DashMap;
use domains::{
    Ad, AdRepo, AdRequest, AdSlot, AdminNotification, BoxAddress, BoxRoute, DomainError, FleetRepo,
    Monitor, MonitorAd, MonitorSnapshot, Notifier, RelayBox, Result, SubscriptionMonitor,
    SubscriptionSlot,
};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct MonitorEntry {
    monitor: Monitor,
    /// Kept sorted by `order_index`
    ads: Vec<MonitorAd>,
}

impl MonitorEntry {
    fn check_version(&self, expected: u64) -> Result<()> {
        if self.monitor.version != expected {
            return Err(DomainError::VersionConflict { monitor_id: self.monitor.id, expected });
        }
        Ok(())
    }

    fn bump(&mut self) -> u64 {
        self.monitor.version += 1;
        self.monitor.version
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    monitors: DashMap<Uuid, MonitorEntry>,
    boxes: DashMap<Uuid, RelayBox>,
    addresses: DashMap<Uuid, BoxAddress>,
    subscriptions: DashMap<Uuid, SubscriptionMonitor>,
    ads: DashMap<Uuid, Ad>,
    requests: DashMap<Uuid, AdRequest>,
    notifications: DashMap<Uuid, AdminNotification>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_monitor(&self, monitor: Monitor) {
        self.monitors.insert(monitor.id, MonitorEntry { monitor, ads: Vec::new() });
    }

    pub fn insert_box(&self, relay: RelayBox, address: BoxAddress) {
        self.addresses.insert(address.id, address);
        self.boxes.insert(relay.id, relay);
    }

    pub fn set_box_active(&self, box_id: Uuid, active: bool) -> bool {
        match self.boxes.get_mut(&box_id) {
            Some(mut relay) => {
                relay.active = active;
                true
            }
            None => false,
        }
    }

    /// Adds a subscription. The monitor's version moves because the
    /// subscription gate reads it.
    pub fn insert_subscription(&self, subscription: SubscriptionMonitor) {
        let entry = self.monitors.get_mut(&subscription.monitor_id);
        self.subscriptions.insert(subscription.id, subscription);
        if let Some(mut entry) = entry {
            entry.bump();
        }
    }

    /// Rotation of one monitor in order.
    pub fn assignments(&self, monitor_id: Uuid) -> Vec<MonitorAd> {
        self.monitors.get(&monitor_id).map(|entry| entry.ads.clone()).unwrap_or_default()
    }

    /// The administrators' inbox, oldest first.
    pub fn notifications(&self) -> Vec<AdminNotification> {
        let mut all: Vec<_> = self.notifications.iter().map(|n| n.value().clone()).collect();
        all.sort_by_key(|n| n.created_at);
        all
    }

    fn slot_for(&self, row: &MonitorAd) -> Result<AdSlot> {
        let ad = self
            .ads
            .get(&row.ad_id)
            .ok_or_else(|| DomainError::Storage(format!("assignment on monitor {} points at unknown ad {}", row.monitor_id, row.ad_id)))?;
        Ok(AdSlot {
            ad_id: ad.id,
            client_id: ad.client_id,
            file_name: ad.file_name.clone(),
            order_index: row.order_index,
            block_quantity: row.block_quantity,
        })
    }
}

#[async_trait]
impl FleetRepo for MemoryStore {
    async fn monitor(&self, id: Uuid) -> Result<Option<Monitor>> {
        Ok(self.monitors.get(&id).map(|entry| entry.monitor.clone()))
    }

    async fn monitors_for_box(&self, box_id: Uuid) -> Result<Vec<Monitor>> {
        let mut monitors: Vec<Monitor> = self
            .monitors
            .iter()
            .filter(|entry| entry.monitor.box_id == Some(box_id))
            .map(|entry| entry.monitor.clone())
            .collect();
        monitors.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(monitors)
    }

    async fn snapshot(&self, monitor_id: Uuid) -> Result<Option<MonitorSnapshot>> {
        let Some(entry) = self.monitors.get(&monitor_id) else {
            return Ok(None);
        };

        let ads = entry.ads.iter().map(|row| self.slot_for(row)).collect::<Result<Vec<_>>>()?;
        let subscriptions = self
            .subscriptions
            .iter()
            .filter(|s| s.monitor_id == monitor_id && s.active)
            .map(|s| SubscriptionSlot {
                subscription_id: s.id,
                client_id: s.client_id,
                slots_quantity: s.slots_quantity,
            })
            .collect();
        Ok(Some(MonitorSnapshot { monitor: entry.monitor.clone(), ads, subscriptions }))
    }

    async fn commit_assignment(&self, monitor_id: Uuid, expected_version: u64, row: MonitorAd) -> Result<u64> {
        let mut entry = self
            .monitors
            .get_mut(&monitor_id)
            .ok_or_else(|| DomainError::not_found("monitor", monitor_id))?;
        entry.check_version(expected_version)?;
        if entry.ads.iter().any(|existing| existing.ad_id == row.ad_id) {
            return Err(DomainError::Conflict(format!("ad {} is already on monitor {monitor_id}", row.ad_id)));
        }
        entry.ads.push(row);
        entry.ads.sort_by_key(|r| r.order_index);
        Ok(entry.bump())
    }

    async fn remove_assignments(&self, monitor_id: Uuid, ad_ids: Vec<Uuid>) -> Result<Vec<MonitorAd>> {
        let Some(mut entry) = self.monitors.get_mut(&monitor_id) else {
            return Ok(Vec::new());
        };
        let (removed, kept): (Vec<_>, Vec<_>) = entry.ads.drain(..).partition(|row| ad_ids.contains(&row.ad_id));
        entry.ads = kept;
        if removed.is_empty() {
            return Ok(removed);
        }
        for (position, row) in entry.ads.iter_mut().enumerate() {
            row.order_index = position as u32 + 1;
        }
        let version = entry.bump();
        debug!(monitor_id = %monitor_id, removed = removed.len(), version, "assignments removed");
        Ok(removed)
    }

    async fn reorder_assignments(&self, monitor_id: Uuid, expected_version: u64, order: Vec<(Uuid, u32)>) -> Result<u64> {
        let mut entry = self
            .monitors
            .get_mut(&monitor_id)
            .ok_or_else(|| DomainError::not_found("monitor", monitor_id))?;
        entry.check_version(expected_version)?;
        if order.len() != entry.ads.len() {
            return Err(DomainError::Validation("rotation must list every assigned ad".into()));
        }
        let mut rows = entry.ads.clone();
        for row in rows.iter_mut() {
            let (_, index) = order
                .iter()
                .find(|(ad_id, _)| *ad_id == row.ad_id)
                .ok_or_else(|| DomainError::Validation(format!("ad {} missing from rotation", row.ad_id)))?;
            row.order_index = *index;
        }
        rows.sort_by_key(|r| r.order_index);
        entry.ads = rows;
        Ok(entry.bump())
    }

    async fn assignments_for_ad(&self, ad_id: Uuid) -> Result<Vec<MonitorAd>> {
        Ok(self
            .monitors
            .iter()
            .flat_map(|entry| entry.ads.iter().filter(|row| row.ad_id == ad_id).cloned().collect::<Vec<_>>())
            .collect())
    }

    async fn set_monitor_active(&self, monitor_id: Uuid, active: bool) -> Result<Option<bool>> {
        Ok(self
            .monitors
            .get_mut(&monitor_id)
            .map(|mut entry| std::mem::replace(&mut entry.monitor.active, active)))
    }

    async fn bind_box(&self, monitor_id: Uuid, box_id: Option<Uuid>) -> Result<Option<Uuid>> {
        let mut entry = self
            .monitors
            .get_mut(&monitor_id)
            .ok_or_else(|| DomainError::not_found("monitor", monitor_id))?;
        Ok(std::mem::replace(&mut entry.monitor.box_id, box_id))
    }

    async fn box_route(&self, box_id: Uuid) -> Result<Option<BoxRoute>> {
        let Some(relay) = self.boxes.get(&box_id).map(|r| r.value().clone()) else {
            return Ok(None);
        };
        let address = self
            .addresses
            .get(&relay.address_id)
            .ok_or_else(|| DomainError::Storage(format!("box {box_id} has no address")))?;
        Ok(Some(BoxRoute {
            box_id,
            ip: address.ip.clone(),
            mac: address.mac.clone(),
            active: relay.active,
        }))
    }

    async fn subscription(&self, id: Uuid) -> Result<Option<SubscriptionMonitor>> {
        Ok(self.subscriptions.get(&id).map(|s| s.value().clone()))
    }

    async fn deactivate_subscription(&self, id: Uuid) -> Result<()> {
        let monitor_id = self
            .subscriptions
            .get(&id)
            .map(|s| s.monitor_id)
            .ok_or_else(|| DomainError::not_found("subscription", id))?;
        let entry = self.monitors.get_mut(&monitor_id);
        if let Some(mut subscription) = self.subscriptions.get_mut(&id) {
            subscription.active = false;
        }
        if let Some(mut entry) = entry {
            entry.bump();
        }
        Ok(())
    }

    async fn subscribed_monitors(&self, client_id: Uuid) -> Result<Vec<Uuid>> {
        let mut monitors: Vec<Uuid> = self
            .subscriptions
            .iter()
            .filter(|s| s.client_id == client_id && s.active)
            .map(|s| s.monitor_id)
            .collect();
        monitors.sort();
        monitors.dedup();
        Ok(monitors)
    }
}

#[async_trait]
impl AdRepo for MemoryStore {
    async fn ad(&self, id: Uuid) -> Result<Option<Ad>> {
        Ok(self.ads.get(&id).map(|ad| ad.value().clone()))
    }

    async fn save_ad(&self, ad: Ad) -> Result<()> {
        self.ads.insert(ad.id, ad);
        Ok(())
    }

    async fn ad_request(&self, id: Uuid) -> Result<Option<AdRequest>> {
        Ok(self.requests.get(&id).map(|r| r.value().clone()))
    }

    async fn save_ad_request(&self, request: AdRequest) -> Result<()> {
        self.requests.insert(request.id, request);
        Ok(())
    }
}

#[async_trait]
impl Notifier for MemoryStore {
    async fn notify(&self, notification: AdminNotification) -> Result<()> {
        self.notifications.insert(notification.id, notification);
        Ok(())
    }
}
