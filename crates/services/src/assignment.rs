//! # Assignment engine
//!
//! Places an approved ad on a set of candidate monitors. Every monitor is
//! evaluated on its own: a monitor that fails a gate is skipped and reported,
//! it never aborts the batch. Gates run in a fixed order, subscription then
//! duplicate then capacity.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use domains::{
    Actor, Ad, AdRepo, AdminNotification, Capability, DomainError, FleetRepo, MonitorAd,
    MonitorSnapshot, NotificationKind, Notifier, Result, Validation,
};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::box_sync::BoxSyncGateway;
use crate::slot_accountant::{Ceiling, SlotAccountant, SlotDecision, SlotRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssignmentPolicy {
    pub reserved_partner_slots: u32,
    /// Slots an assignment consumes when the caller does not size it
    pub default_block_quantity: u32,
    /// Compare-and-swap attempts per monitor before giving up
    pub max_attempts: u32,
}

impl Default for AssignmentPolicy {
    fn default() -> Self {
        Self { reserved_partner_slots: 7, default_block_quantity: 1, max_attempts: 3 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    MonitorNotFound,
    /// The monitor is reserved for its subscribers and the client is not one
    NotSubscribed,
    /// The client already has an ad in this monitor's rotation
    AlreadyAssigned,
    Capacity { ceiling: Ceiling, requested: u64, limit: u64 },
    /// Lost every compare-and-swap attempt against concurrent writers
    Contention,
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedMonitor {
    pub monitor_id: Uuid,
    #[serde(flatten)]
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssignmentReport {
    pub ad_id: Uuid,
    pub assigned: Vec<MonitorAd>,
    pub skipped: Vec<SkippedMonitor>,
}

impl AssignmentReport {
    fn new(ad_id: Uuid) -> Self {
        Self { ad_id, assigned: Vec::new(), skipped: Vec::new() }
    }
}

/// Runs the three gates against one snapshot. `None` means the monitor can
/// take the ad.
pub fn evaluate_gates(
    accountant: &SlotAccountant,
    snapshot: &MonitorSnapshot,
    client_id: Uuid,
    quantity: u32,
) -> Option<SkipReason> {
    if !snapshot.subscriptions.is_empty() && !snapshot.has_subscriber(client_id) {
        return Some(SkipReason::NotSubscribed);
    }
    if snapshot.client_has_ad(client_id) {
        return Some(SkipReason::AlreadyAssigned);
    }
    match accountant.check(snapshot, SlotRequest::ad(client_id, quantity)) {
        SlotDecision::Accepted => None,
        SlotDecision::Rejected { ceiling, requested, limit } => Some(SkipReason::Capacity { ceiling, requested, limit }),
    }
}

/// Position for an ad appended to the rotation. Follows the highest index in
/// use so removals that leave gaps never produce a duplicate.
pub fn next_order_index(snapshot: &MonitorSnapshot) -> u32 {
    snapshot.ads.iter().map(|slot| slot.order_index).max().unwrap_or(0) + 1
}

enum Placement {
    Placed { row: MonitorAd, box_id: Option<Uuid> },
    Skipped { reason: SkipReason, address: Option<String> },
}

pub struct AssignmentEngine {
    fleet: Arc<dyn FleetRepo>,
    ads: Arc<dyn AdRepo>,
    notifier: Arc<dyn Notifier>,
    gateway: Arc<BoxSyncGateway>,
    accountant: SlotAccountant,
    policy: AssignmentPolicy,
}

impl AssignmentEngine {
    pub fn new(
        fleet: Arc<dyn FleetRepo>,
        ads: Arc<dyn AdRepo>,
        notifier: Arc<dyn Notifier>,
        gateway: Arc<BoxSyncGateway>,
        policy: AssignmentPolicy,
    ) -> Self {
        Self {
            fleet,
            ads,
            notifier,
            gateway,
            accountant: SlotAccountant::new(policy.reserved_partner_slots),
            policy,
        }
    }

    pub fn accountant(&self) -> &SlotAccountant {
        &self.accountant
    }

    /// Administrative path: place any approved ad on explicit monitors.
    pub async fn assign_as(
        &self,
        actor: &Actor,
        ad_id: Uuid,
        monitor_ids: &[Uuid],
        block_quantity: Option<u32>,
    ) -> Result<AssignmentReport> {
        actor.require(Capability::AssignAds)?;
        let ad = self.load_ad(ad_id).await?;
        self.assign(&ad, monitor_ids, block_quantity).await
    }

    /// Places `ad` on every candidate that passes the gates, then pushes one
    /// batch per box.
    pub async fn assign(&self, ad: &Ad, monitor_ids: &[Uuid], block_quantity: Option<u32>) -> Result<AssignmentReport> {
        if ad.validation != Validation::Approved {
            return Err(DomainError::InvalidState(format!(
                "ad {} is {} and cannot be assigned",
                ad.id, ad.validation
            )));
        }
        let quantity = block_quantity.unwrap_or(self.policy.default_block_quantity);
        if quantity == 0 {
            return Err(DomainError::Validation("block quantity must be at least 1".into()));
        }

        let mut report = AssignmentReport::new(ad.id);
        let mut by_box: BTreeMap<Uuid, Vec<MonitorAd>> = BTreeMap::new();
        let mut seen = HashSet::new();

        for &monitor_id in monitor_ids.iter().filter(|id| seen.insert(**id)) {
            let placement = match self.place(ad, monitor_id, quantity).await {
                Ok(placement) => placement,
                Err(e) => {
                    error!(monitor_id = %monitor_id, ad_id = %ad.id, error = %e, "assignment failed");
                    Placement::Skipped { reason: SkipReason::Failed { message: e.to_string() }, address: None }
                }
            };

            match placement {
                Placement::Placed { row, box_id } => {
                    info!(monitor_id = %monitor_id, ad_id = %ad.id, order_index = row.order_index, "ad assigned");
                    match box_id {
                        Some(box_id) => by_box.entry(box_id).or_default().push(row.clone()),
                        None => debug!(monitor_id = %monitor_id, "monitor has no box, nothing to push"),
                    }
                    report.assigned.push(row);
                }
                Placement::Skipped { reason, address } => {
                    info!(monitor_id = %monitor_id, ad_id = %ad.id, reason = ?reason, "monitor skipped");
                    if matches!(reason, SkipReason::Capacity { .. }) {
                        self.notify_capacity(ad, monitor_id, address.as_deref()).await;
                    }
                    report.skipped.push(SkippedMonitor { monitor_id, reason });
                }
            }
        }

        for (box_id, rows) in by_box {
            self.gateway.push_assign(box_id, ad, &rows).await;
        }
        Ok(report)
    }

    /// Administrative rejection: takes an ad off the given monitors.
    pub async fn detach(&self, actor: &Actor, ad_id: Uuid, monitor_ids: &[Uuid]) -> Result<Vec<MonitorAd>> {
        actor.require(Capability::AssignAds)?;
        let ad = self.load_ad(ad_id).await?;

        let mut removed = Vec::new();
        for &monitor_id in monitor_ids {
            removed.extend(self.unassign(monitor_id, &[(ad.id, ad.file_name.clone())]).await?);
        }
        Ok(removed)
    }

    /// Removes the listed ads (`(ad_id, file_name)`) from one monitor and tells
    /// its box to stop showing them.
    pub async fn unassign(&self, monitor_id: Uuid, ads: &[(Uuid, String)]) -> Result<Vec<MonitorAd>> {
        if ads.is_empty() {
            return Ok(Vec::new());
        }
        let ad_ids = ads.iter().map(|(id, _)| *id).collect();
        let removed = self.fleet.remove_assignments(monitor_id, ad_ids).await?;
        if removed.is_empty() {
            return Ok(removed);
        }

        let file_names = ads
            .iter()
            .filter(|(id, _)| removed.iter().any(|row| row.ad_id == *id))
            .map(|(_, file)| file.clone())
            .collect();
        match self.fleet.monitor(monitor_id).await? {
            Some(monitor) => self.gateway.push_remove(&monitor, file_names).await,
            None => warn!(monitor_id = %monitor_id, "monitor vanished after removal"),
        }
        info!(monitor_id = %monitor_id, removed = removed.len(), "ads removed from rotation");
        Ok(removed)
    }

    async fn place(&self, ad: &Ad, monitor_id: Uuid, quantity: u32) -> Result<Placement> {
        for attempt in 1..=self.policy.max_attempts.max(1) {
            let Some(snapshot) = self.fleet.snapshot(monitor_id).await? else {
                return Ok(Placement::Skipped { reason: SkipReason::MonitorNotFound, address: None });
            };
            if let Some(reason) = evaluate_gates(&self.accountant, &snapshot, ad.client_id, quantity) {
                return Ok(Placement::Skipped { reason, address: Some(snapshot.monitor.address) });
            }

            // Append to the end of the rotation; existing ads keep their positions.
            let row = MonitorAd {
                monitor_id,
                ad_id: ad.id,
                order_index: next_order_index(&snapshot),
                block_quantity: quantity,
            };
            match self.fleet.commit_assignment(monitor_id, snapshot.monitor.version, row.clone()).await {
                Ok(_) => return Ok(Placement::Placed { row, box_id: snapshot.monitor.box_id }),
                Err(DomainError::VersionConflict { .. }) => {
                    debug!(monitor_id = %monitor_id, attempt, "monitor changed underneath, re-evaluating");
                }
                Err(e) => return Err(e),
            }
        }
        warn!(monitor_id = %monitor_id, ad_id = %ad.id, "gave up after repeated version conflicts");
        Ok(Placement::Skipped { reason: SkipReason::Contention, address: None })
    }

    async fn notify_capacity(&self, ad: &Ad, monitor_id: Uuid, address: Option<&str>) {
        let target = address.map(str::to_owned).unwrap_or_else(|| monitor_id.to_string());
        let notification = AdminNotification::new(
            NotificationKind::CapacityRejected,
            format!("ad {} could not be sent to monitor {target}", ad.file_name),
        )
        .for_monitor(monitor_id)
        .for_ad(ad.id);
        if let Err(e) = self.notifier.notify(notification).await {
            warn!(monitor_id = %monitor_id, error = %e, "could not record notification");
        }
    }

    async fn load_ad(&self, ad_id: Uuid) -> Result<Ad> {
        self.ads.ad(ad_id).await?.ok_or_else(|| DomainError::not_found("ad", ad_id))
    }
}
