//! # Box synchronization gateway
//!
//! Turns assignment changes into jobs for the sync queue and turns box health
//! reports into monitor state. Outbound work is best-effort: nothing here
//! returns a delivery error to the caller, and storage is never rolled back
//! because a box could not be reached.

use std::collections::BTreeSet;
use std::sync::Arc;

use domains::{
    Actor, Ad, AdDelivery, AdminNotification, BoxClient, BoxRoute, Capability, DomainError,
    ErrorLevel, FleetRepo, HealthReport, LinkSigner, Monitor, MonitorAd, NotificationKind,
    Notifier, PushMode, RemoveAds, Result,
};
use prometheus_client::metrics::counter::Counter;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::sync_queue::{QueueStats, SyncCounters, SyncJob, SyncQueue};

/// What `ingest_health` did with a batch of reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthSummary {
    pub healthy: usize,
    pub deactivated: Vec<Uuid>,
    pub warned: Vec<Uuid>,
    pub unknown_monitors: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    pub queue: QueueStats,
    pub health_deactivations: u64,
}

/// Live counter handles for a metrics registry.
#[derive(Debug, Clone)]
pub struct GatewayCounters {
    pub queue: SyncCounters,
    pub health_deactivations: Counter,
}

pub struct BoxSyncGateway {
    fleet: Arc<dyn FleetRepo>,
    signer: Arc<dyn LinkSigner>,
    notifier: Arc<dyn Notifier>,
    client: Arc<dyn BoxClient>,
    queue: SyncQueue,
    deactivations: Counter,
}

impl BoxSyncGateway {
    pub fn new(
        fleet: Arc<dyn FleetRepo>,
        signer: Arc<dyn LinkSigner>,
        notifier: Arc<dyn Notifier>,
        client: Arc<dyn BoxClient>,
        queue: SyncQueue,
    ) -> Self {
        Self {
            fleet,
            signer,
            notifier,
            client,
            queue,
            deactivations: Counter::default(),
        }
    }

    /// Fans one ad out to the given monitors of a box (`/ad`).
    pub async fn push_assign(&self, box_id: Uuid, ad: &Ad, rows: &[MonitorAd]) {
        if rows.is_empty() {
            return;
        }
        let Some(route) = self.reachable_route(box_id).await else { return };
        let link = match self.signer.sign(&ad.file_name) {
            Ok(link) => link,
            Err(e) => {
                error!(box_id = %box_id, ad_id = %ad.id, error = %e, "could not sign ad link, push skipped");
                return;
            }
        };
        let ads = rows
            .iter()
            .map(|row| AdDelivery {
                monitor_id: row.monitor_id,
                file_name: ad.file_name.clone(),
                link: link.clone(),
            })
            .collect();
        self.queue.enqueue(SyncJob::PushAds { route, mode: PushMode::Single, ads });
    }

    /// Sends the complete rotation of every active monitor on the box (`/update-ads`).
    pub async fn push_bulk(&self, box_id: Uuid) {
        let Some(route) = self.reachable_route(box_id).await else { return };
        let monitors = match self.fleet.monitors_for_box(box_id).await {
            Ok(monitors) => monitors,
            Err(e) => {
                error!(box_id = %box_id, error = %e, "could not list monitors for bulk update");
                return;
            }
        };

        let mut ads = Vec::new();
        for monitor in monitors.iter().filter(|m| m.active) {
            let snapshot = match self.fleet.snapshot(monitor.id).await {
                Ok(Some(snapshot)) => snapshot,
                Ok(None) => continue,
                Err(e) => {
                    error!(box_id = %box_id, monitor_id = %monitor.id, error = %e, "could not read monitor rotation");
                    continue;
                }
            };
            let mut slots = snapshot.ads;
            slots.sort_by_key(|slot| slot.order_index);
            for slot in slots {
                match self.signer.sign(&slot.file_name) {
                    Ok(link) => ads.push(AdDelivery { monitor_id: monitor.id, file_name: slot.file_name, link }),
                    Err(e) => error!(monitor_id = %monitor.id, file_name = %slot.file_name, error = %e, "could not sign ad link"),
                }
            }
        }
        self.queue.enqueue(SyncJob::PushAds { route, mode: PushMode::Bulk, ads });
    }

    /// Tells the monitor's box to stop showing `file_names` (`/remove-ads`).
    pub async fn push_remove(&self, monitor: &Monitor, file_names: Vec<String>) {
        if file_names.is_empty() {
            return;
        }
        let Some(box_id) = monitor.box_id else {
            debug!(monitor_id = %monitor.id, "monitor has no box, removal not pushed");
            return;
        };
        let Some(route) = self.reachable_route(box_id).await else { return };
        let body = RemoveAds { monitor_id: monitor.id, file_names };
        self.queue.enqueue(SyncJob::RemoveAds { route, body });
    }

    /// Tells a box that a monitor is no longer attached to it.
    pub async fn remove_monitor(&self, box_id: Uuid, monitor_id: Uuid) {
        let Some(route) = self.reachable_route(box_id).await else { return };
        self.queue.enqueue(SyncJob::RemoveMonitor { route, monitor_id });
    }

    /// Asks the monitor's box which files it is currently showing.
    pub async fn displayed_ads(&self, monitor_id: Uuid) -> Result<Vec<String>> {
        let monitor = self
            .fleet
            .monitor(monitor_id)
            .await?
            .ok_or_else(|| DomainError::not_found("monitor", monitor_id))?;
        let box_id = monitor
            .box_id
            .ok_or_else(|| DomainError::InvalidState(format!("monitor {monitor_id} is not bound to a box")))?;
        let route = self
            .fleet
            .box_route(box_id)
            .await?
            .ok_or_else(|| DomainError::not_found("box", box_id))?;

        self.client.displayed_ads(&route, monitor_id).await.map_err(|e| {
            warn!(box_id = %box_id, ip = %route.ip, url = e.url(), error = %e, "displayed ads query failed");
            DomainError::Upstream(e.to_string())
        })
    }

    /// Applies box health reports. High severity takes the monitor offline,
    /// anything else is only logged.
    pub async fn ingest_health(&self, actor: &Actor, reports: Vec<HealthReport>) -> Result<HealthSummary> {
        actor.require(Capability::ReportHealth)?;

        let mut summary = HealthSummary::default();
        let mut seen_high = BTreeSet::new();
        for report in reports {
            if report.status_code == 200 {
                summary.healthy += 1;
                continue;
            }
            match report.error_level {
                ErrorLevel::High => {
                    if !seen_high.insert(report.monitor_id) {
                        continue;
                    }
                    match self.fleet.set_monitor_active(report.monitor_id, false).await? {
                        Some(true) => {
                            self.deactivations.inc();
                            error!(
                                monitor_id = %report.monitor_id,
                                status = report.status_code,
                                message = %report.message,
                                "monitor deactivated after high severity health report"
                            );
                            let notification = AdminNotification::new(
                                NotificationKind::MonitorDeactivated,
                                format!(
                                    "monitor {} was deactivated: {} ({})",
                                    report.monitor_id, report.message, report.status_code
                                ),
                            )
                            .for_monitor(report.monitor_id);
                            if let Err(e) = self.notifier.notify(notification).await {
                                warn!(monitor_id = %report.monitor_id, error = %e, "could not record notification");
                            }
                            summary.deactivated.push(report.monitor_id);
                        }
                        Some(false) => {
                            debug!(monitor_id = %report.monitor_id, "high severity report for inactive monitor");
                        }
                        None => {
                            warn!(monitor_id = %report.monitor_id, "health report for unknown monitor");
                            summary.unknown_monitors.push(report.monitor_id);
                        }
                    }
                }
                ErrorLevel::Moderate | ErrorLevel::Unknown => {
                    warn!(
                        monitor_id = %report.monitor_id,
                        status = report.status_code,
                        level = ?report.error_level,
                        message = %report.message,
                        "monitor reported a problem"
                    );
                    summary.warned.push(report.monitor_id);
                }
            }
        }

        if !summary.deactivated.is_empty() {
            info!(count = summary.deactivated.len(), "health reports deactivated monitors");
        }
        Ok(summary)
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            queue: self.queue.stats(),
            health_deactivations: self.deactivations.get(),
        }
    }

    pub fn counters(&self) -> GatewayCounters {
        GatewayCounters { queue: self.queue.counters().clone(), health_deactivations: self.deactivations.clone() }
    }

    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
    }

    async fn reachable_route(&self, box_id: Uuid) -> Option<BoxRoute> {
        match self.fleet.box_route(box_id).await {
            Ok(Some(route)) if route.active => Some(route),
            Ok(Some(_)) => {
                debug!(box_id = %box_id, "box is inactive, sync skipped");
                None
            }
            Ok(None) => {
                warn!(box_id = %box_id, "box not found, sync skipped");
                None
            }
            Err(e) => {
                error!(box_id = %box_id, error = %e, "could not resolve box route");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domains::{MockBoxClient, MockFleetRepo, MockLinkSigner, MockNotifier, SyncError};
    use mockall::predicate::eq;

    fn route(box_id: Uuid, active: bool) -> BoxRoute {
        BoxRoute { box_id, ip: "192.168.0.20".into(), mac: "aa:bb:cc:dd:ee:ff".into(), active }
    }

    fn gateway(fleet: MockFleetRepo, notifier: MockNotifier, client: MockBoxClient) -> BoxSyncGateway {
        let client: Arc<dyn BoxClient> = Arc::new(client);
        let mut signer = MockLinkSigner::new();
        signer.expect_sign().returning(|file| Ok(format!("https://files.example/{file}?sig=t")));
        let queue = SyncQueue::start(Arc::clone(&client), 8, 1);
        BoxSyncGateway::new(Arc::new(fleet), Arc::new(signer), Arc::new(notifier), client, queue)
    }

    fn report(monitor_id: Uuid, status_code: u16, error_level: ErrorLevel) -> HealthReport {
        HealthReport { monitor_id, status_code, error_level, message: "no signal".into() }
    }

    #[tokio::test]
    async fn high_severity_deactivates_and_moderate_only_warns() {
        let high = Uuid::new_v4();
        let moderate = Uuid::new_v4();

        let mut fleet = MockFleetRepo::new();
        fleet
            .expect_set_monitor_active()
            .with(eq(high), eq(false))
            .times(1)
            .returning(|_, _| Ok(Some(true)));
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().times(1).returning(|_| Ok(()));

        let gateway = gateway(fleet, notifier, MockBoxClient::new());
        let summary = gateway
            .ingest_health(
                &Actor::relay(Uuid::new_v4()),
                vec![
                    report(high, 503, ErrorLevel::High),
                    report(moderate, 500, ErrorLevel::Moderate),
                    report(Uuid::new_v4(), 200, ErrorLevel::High),
                ],
            )
            .await
            .unwrap();

        assert_eq!(summary.deactivated, vec![high]);
        assert_eq!(summary.warned, vec![moderate]);
        assert_eq!(summary.healthy, 1);
        assert_eq!(gateway.stats().health_deactivations, 1);
    }

    #[tokio::test]
    async fn repeated_high_reports_deactivate_once() {
        let monitor = Uuid::new_v4();
        let mut fleet = MockFleetRepo::new();
        fleet.expect_set_monitor_active().times(1).returning(|_, _| Ok(Some(true)));
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().times(1).returning(|_| Ok(()));

        let gateway = gateway(fleet, notifier, MockBoxClient::new());
        let summary = gateway
            .ingest_health(
                &Actor::relay(Uuid::new_v4()),
                vec![report(monitor, 500, ErrorLevel::High), report(monitor, 500, ErrorLevel::High)],
            )
            .await
            .unwrap();
        assert_eq!(summary.deactivated, vec![monitor]);
    }

    #[tokio::test]
    async fn health_reports_require_capability() {
        let gateway = gateway(MockFleetRepo::new(), MockNotifier::new(), MockBoxClient::new());
        let err = gateway
            .ingest_health(&Actor::client(Uuid::new_v4()), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn inactive_box_is_not_contacted() {
        let box_id = Uuid::new_v4();
        let mut fleet = MockFleetRepo::new();
        fleet.expect_box_route().returning(move |id| Ok(Some(route(id, false))));

        let gateway = gateway(fleet, MockNotifier::new(), MockBoxClient::new());
        gateway.remove_monitor(box_id, Uuid::new_v4()).await;
        gateway.shutdown().await;
        assert_eq!(gateway.stats().queue.enqueued, 0);
    }

    #[tokio::test]
    async fn assign_push_carries_signed_link_per_monitor() {
        let box_id = Uuid::new_v4();
        let ad = Ad::new(Uuid::new_v4(), "summer.mp4", None);
        let rows: Vec<MonitorAd> = (0..2)
            .map(|i| MonitorAd { monitor_id: Uuid::new_v4(), ad_id: ad.id, order_index: i + 1, block_quantity: 1 })
            .collect();
        let expected: Vec<Uuid> = rows.iter().map(|r| r.monitor_id).collect();

        let mut fleet = MockFleetRepo::new();
        fleet.expect_box_route().returning(move |id| Ok(Some(route(id, true))));
        let mut client = MockBoxClient::new();
        client
            .expect_push_ads()
            .withf(move |route, mode, ads| {
                route.box_id == box_id
                    && *mode == PushMode::Single
                    && ads.iter().map(|a| a.monitor_id).collect::<Vec<_>>() == expected
                    && ads.iter().all(|a| a.link == "https://files.example/summer.mp4?sig=t")
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let gateway = gateway(fleet, MockNotifier::new(), client);
        gateway.push_assign(box_id, &ad, &rows).await;
        gateway.shutdown().await;
        assert_eq!(gateway.stats().queue.delivered, 1);
    }

    #[tokio::test]
    async fn displayed_ads_surfaces_relay_failure() {
        let monitor_id = Uuid::new_v4();
        let box_id = Uuid::new_v4();
        let mut fleet = MockFleetRepo::new();
        fleet.expect_monitor().returning(move |id| {
            Ok(Some(Monitor {
                id,
                address: "Rua B".into(),
                max_blocks: 10,
                partner_id: None,
                box_id: Some(box_id),
                active: true,
                version: 3,
            }))
        });
        fleet.expect_box_route().returning(move |id| Ok(Some(route(id, true))));
        let mut client = MockBoxClient::new();
        client.expect_displayed_ads().returning(|route, id| {
            Err(SyncError::Timeout { url: format!("http://{}:8081/get-ads/{id}", route.ip) })
        });

        let gateway = gateway(fleet, MockNotifier::new(), client);
        let err = gateway.displayed_ads(monitor_id).await.unwrap_err();
        assert!(matches!(err, DomainError::Upstream(_)));
    }
}
