//! # Ports
//!
//! Every adapter must implement these traits to be wired into the binary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::models::{
    Ad, AdRequest, AdminNotification, BoxRoute, Monitor, MonitorAd, MonitorSnapshot,
    SubscriptionMonitor,
};

/// Monitors, boxes, assignments and subscriptions.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait FleetRepo: Send + Sync {
    async fn monitor(&self, id: Uuid) -> Result<Option<Monitor>>;
    async fn monitors_for_box(&self, box_id: Uuid) -> Result<Vec<Monitor>>;

    /// Monitor, its assignments and its active subscriptions, read at one version.
    async fn snapshot(&self, monitor_id: Uuid) -> Result<Option<MonitorSnapshot>>;

    /// Inserts `row` if the monitor is still at `expected_version`.
    ///
    /// Returns the new version, or `DomainError::VersionConflict` when another
    /// writer got there first. Nothing is written on conflict.
    async fn commit_assignment(&self, monitor_id: Uuid, expected_version: u64, row: MonitorAd) -> Result<u64>;

    /// Deletes the monitor's rows for `ad_ids`, compacts the remaining order
    /// indexes and bumps the version. Returns the removed rows.
    async fn remove_assignments(&self, monitor_id: Uuid, ad_ids: Vec<Uuid>) -> Result<Vec<MonitorAd>>;

    /// Rewrites order indexes (`(ad_id, order_index)`) if the monitor is still
    /// at `expected_version`. Returns the new version.
    async fn reorder_assignments(&self, monitor_id: Uuid, expected_version: u64, order: Vec<(Uuid, u32)>) -> Result<u64>;

    async fn assignments_for_ad(&self, ad_id: Uuid) -> Result<Vec<MonitorAd>>;

    /// Returns the previous `active` flag, or `None` if the monitor does not exist.
    async fn set_monitor_active(&self, monitor_id: Uuid, active: bool) -> Result<Option<bool>>;

    /// Binds (or unbinds with `None`) a monitor to a box; returns the previous box.
    async fn bind_box(&self, monitor_id: Uuid, box_id: Option<Uuid>) -> Result<Option<Uuid>>;

    async fn box_route(&self, box_id: Uuid) -> Result<Option<BoxRoute>>;

    async fn subscription(&self, id: Uuid) -> Result<Option<SubscriptionMonitor>>;
    async fn deactivate_subscription(&self, id: Uuid) -> Result<()>;

    /// Monitors on which the client holds an active subscription.
    async fn subscribed_monitors(&self, client_id: Uuid) -> Result<Vec<Uuid>>;
}

/// Ads and the requests that originate them.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait AdRepo: Send + Sync {
    async fn ad(&self, id: Uuid) -> Result<Option<Ad>>;
    async fn save_ad(&self, ad: Ad) -> Result<()>;
    async fn ad_request(&self, id: Uuid) -> Result<Option<AdRequest>>;
    async fn save_ad_request(&self, request: AdRequest) -> Result<()>;
}

/// Administrators' inbox.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: AdminNotification) -> Result<()>;
}

/// Produces short-lived download links for ad artifacts.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait LinkSigner: Send + Sync {
    fn sign(&self, file_name: &str) -> Result<String>;
}

/// One entry of an `/ad` or `/update-ads` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdDelivery {
    pub monitor_id: Uuid,
    pub file_name: String,
    pub link: String,
}

/// Body of `/remove-ads`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveAds {
    pub monitor_id: Uuid,
    pub file_names: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushMode {
    /// One ad fanned out to monitors of the box (`/ad`)
    Single,
    /// Full lists replacing whatever the box shows (`/update-ads`)
    Bulk,
}

/// HTTP contract of the box relay.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait BoxClient: Send + Sync {
    async fn push_ads(&self, route: &BoxRoute, mode: PushMode, ads: Vec<AdDelivery>) -> std::result::Result<(), SyncError>;
    async fn remove_ads(&self, route: &BoxRoute, body: RemoveAds) -> std::result::Result<(), SyncError>;
    async fn remove_monitor(&self, route: &BoxRoute, monitor_id: Uuid) -> std::result::Result<(), SyncError>;
    async fn displayed_ads(&self, route: &BoxRoute, monitor_id: Uuid) -> std::result::Result<Vec<String>, SyncError>;
}
