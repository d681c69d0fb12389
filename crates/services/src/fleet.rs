//! Fleet administration: box binding, subscription expiry, rotation order.

use std::collections::HashSet;
use std::sync::Arc;

use domains::{Actor, Capability, DomainError, FleetRepo, MonitorAd, MonitorSnapshot, Result};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::assignment::AssignmentEngine;
use crate::box_sync::BoxSyncGateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationEntry {
    pub ad_id: Uuid,
    pub order_index: u32,
}

/// Checks that `entries` is a permutation-style rewrite of the monitor's
/// current rotation: same ads, indexes exactly `1..=n`.
pub fn validate_rotation(snapshot: &MonitorSnapshot, entries: &[RotationEntry]) -> Result<()> {
    let current: HashSet<Uuid> = snapshot.ads.iter().map(|slot| slot.ad_id).collect();
    let mut ads = HashSet::new();
    let mut indexes = HashSet::new();
    for entry in entries {
        if entry.order_index == 0 {
            return Err(DomainError::Validation("order indexes start at 1".into()));
        }
        if entry.order_index as usize > entries.len() {
            return Err(DomainError::Validation(format!(
                "order index {} leaves a gap, expected 1 to {}",
                entry.order_index,
                entries.len()
            )));
        }
        if !indexes.insert(entry.order_index) {
            return Err(DomainError::Validation(format!("order index {} is used twice", entry.order_index)));
        }
        if !ads.insert(entry.ad_id) {
            return Err(DomainError::Validation(format!("ad {} is listed twice", entry.ad_id)));
        }
    }
    if ads != current {
        return Err(DomainError::Validation(
            "rotation must list exactly the ads currently assigned to the monitor".into(),
        ));
    }
    Ok(())
}

pub struct FleetService {
    fleet: Arc<dyn FleetRepo>,
    gateway: Arc<BoxSyncGateway>,
    engine: Arc<AssignmentEngine>,
}

impl FleetService {
    pub fn new(fleet: Arc<dyn FleetRepo>, gateway: Arc<BoxSyncGateway>, engine: Arc<AssignmentEngine>) -> Self {
        Self { fleet, gateway, engine }
    }

    /// Moves a monitor to another box, or detaches it with `None`. The old box
    /// forgets the monitor and the new one receives the full rotation.
    pub async fn bind_monitor(&self, actor: &Actor, monitor_id: Uuid, box_id: Option<Uuid>) -> Result<Option<Uuid>> {
        actor.require(Capability::ManageFleet)?;
        if let Some(box_id) = box_id {
            if self.fleet.box_route(box_id).await?.is_none() {
                return Err(DomainError::not_found("box", box_id));
            }
        }
        let previous = self.fleet.bind_box(monitor_id, box_id).await?;
        if previous == box_id {
            return Ok(previous);
        }

        if let Some(old) = previous {
            self.gateway.remove_monitor(old, monitor_id).await;
        }
        if let Some(new) = box_id {
            self.gateway.push_bulk(new).await;
        }
        info!(monitor_id = %monitor_id, from = ?previous, to = ?box_id, "monitor rebound");
        Ok(previous)
    }

    /// Ends a subscription and pulls the subscriber's ads off the monitor.
    pub async fn expire_subscription(&self, actor: &Actor, subscription_id: Uuid) -> Result<Vec<MonitorAd>> {
        actor.require(Capability::ManageFleet)?;
        let subscription = self
            .fleet
            .subscription(subscription_id)
            .await?
            .ok_or_else(|| DomainError::not_found("subscription", subscription_id))?;
        if !subscription.active {
            return Ok(Vec::new());
        }
        self.fleet.deactivate_subscription(subscription_id).await?;

        let Some(snapshot) = self.fleet.snapshot(subscription.monitor_id).await? else {
            return Ok(Vec::new());
        };
        let ads: Vec<(Uuid, String)> = snapshot
            .ads
            .into_iter()
            .filter(|slot| slot.client_id == subscription.client_id)
            .map(|slot| (slot.ad_id, slot.file_name))
            .collect();
        let removed = self.engine.unassign(subscription.monitor_id, &ads).await?;
        info!(
            subscription_id = %subscription_id,
            monitor_id = %subscription.monitor_id,
            removed = removed.len(),
            "subscription expired"
        );
        Ok(removed)
    }

    pub async fn displayed_ads(&self, actor: &Actor, monitor_id: Uuid) -> Result<Vec<String>> {
        actor.require(Capability::ManageFleet)?;
        self.gateway.displayed_ads(monitor_id).await
    }

    /// Rewrites the rotation order of one monitor and resends it to its box.
    pub async fn reorder_rotation(&self, actor: &Actor, monitor_id: Uuid, entries: Vec<RotationEntry>) -> Result<u64> {
        actor.require(Capability::ManageFleet)?;
        let snapshot = self
            .fleet
            .snapshot(monitor_id)
            .await?
            .ok_or_else(|| DomainError::not_found("monitor", monitor_id))?;
        validate_rotation(&snapshot, &entries)?;

        let order = entries.iter().map(|e| (e.ad_id, e.order_index)).collect();
        let version = match self.fleet.reorder_assignments(monitor_id, snapshot.monitor.version, order).await {
            Ok(version) => version,
            Err(DomainError::VersionConflict { .. }) => {
                return Err(DomainError::Conflict(format!(
                    "monitor {monitor_id} changed while reordering, reload and retry"
                )))
            }
            Err(e) => return Err(e),
        };
        if let Some(box_id) = snapshot.monitor.box_id {
            self.gateway.push_bulk(box_id).await;
        }
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domains::{AdSlot, Monitor};

    fn snapshot_with(ads: &[Uuid]) -> MonitorSnapshot {
        MonitorSnapshot {
            monitor: Monitor {
                id: Uuid::new_v4(),
                address: "Main st".into(),
                max_blocks: 10,
                partner_id: None,
                box_id: None,
                active: true,
                version: 4,
            },
            ads: ads
                .iter()
                .enumerate()
                .map(|(i, id)| AdSlot {
                    ad_id: *id,
                    client_id: Uuid::new_v4(),
                    file_name: format!("{i}.png"),
                    order_index: i as u32 + 1,
                    block_quantity: 1,
                })
                .collect(),
            subscriptions: Vec::new(),
        }
    }

    fn entry(ad_id: Uuid, order_index: u32) -> RotationEntry {
        RotationEntry { ad_id, order_index }
    }

    #[test]
    fn accepts_a_full_reordering() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let snapshot = snapshot_with(&[a, b]);
        assert!(validate_rotation(&snapshot, &[entry(a, 2), entry(b, 1)]).is_ok());
    }

    #[test]
    fn rejects_duplicate_and_zero_indexes() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let snapshot = snapshot_with(&[a, b]);
        assert!(validate_rotation(&snapshot, &[entry(a, 1), entry(b, 1)]).is_err());
        assert!(validate_rotation(&snapshot, &[entry(a, 0), entry(b, 1)]).is_err());
    }

    #[test]
    fn rejects_indexes_with_gaps() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let snapshot = snapshot_with(&[a, b]);
        let err = validate_rotation(&snapshot, &[entry(a, 2), entry(b, 3)]).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)), "{err}");
        assert!(validate_rotation(&snapshot, &[entry(a, 1), entry(b, 3)]).is_err());
    }

    #[test]
    fn rejects_partial_or_foreign_lists() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let snapshot = snapshot_with(&[a, b]);
        assert!(validate_rotation(&snapshot, &[entry(a, 1)]).is_err());
        assert!(validate_rotation(&snapshot, &[entry(a, 1), entry(Uuid::new_v4(), 2)]).is_err());
    }
}
