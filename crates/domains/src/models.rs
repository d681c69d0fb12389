//! # Domain Models
//!
//! Flat records keyed by id. Relationships (monitor -> box, box -> address,
//! assignment -> monitor/ad) are id references resolved through the ports,
//! so no record owns another.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A physical display with a fixed number of rotation slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Monitor {
    pub id: Uuid,
    /// Human readable location of the hosting premises
    pub address: String,
    pub max_blocks: u32,
    /// The client hosting the monitor, entitled to the reserved slots
    pub partner_id: Option<Uuid>,
    pub box_id: Option<Uuid>,
    pub active: bool,
    /// Bumped by every assignment mutation; used for compare-and-swap.
    pub version: u64,
}

/// A relay device driving one or more monitors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayBox {
    pub id: Uuid,
    pub address_id: Uuid,
    pub active: bool,
}

/// Network identity of a box.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxAddress {
    pub id: Uuid,
    pub ip: String,
    pub mac: String,
}

/// A box joined with its address: everything needed to route a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxRoute {
    pub box_id: Uuid,
    pub ip: String,
    pub mac: String,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Validation {
    Pending,
    Approved,
    Rejected,
}

impl Validation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }
}

impl std::fmt::Display for Validation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Validation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "APPROVED" => Ok(Self::Approved),
            "REJECTED" => Ok(Self::Rejected),
            other => Err(format!("unknown validation state: {other}")),
        }
    }
}

/// One refusal of an ad by its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefusedAd {
    pub id: Uuid,
    pub justification: String,
    pub refused_at: DateTime<Utc>,
}

/// An advertisement artifact subject to moderation by its owning client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ad {
    pub id: Uuid,
    pub client_id: Uuid,
    /// Name of the artifact in the file store; boxes address ads by it
    pub file_name: String,
    pub validation: Validation,
    /// Most recent refusals, oldest first, bounded by the refusal cap
    pub refusals: Vec<RefusedAd>,
    /// Total number of refusals ever recorded; never decremented
    pub refusal_count: u32,
    pub ad_request_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Ad {
    pub fn new(client_id: Uuid, file_name: impl Into<String>, ad_request_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            client_id,
            file_name: file_name.into(),
            validation: Validation::Pending,
            refusals: Vec::new(),
            refusal_count: 0,
            ad_request_id,
            created_at: Utc::now(),
        }
    }
}

/// A client's request for a new ad to be produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdRequest {
    pub id: Uuid,
    pub client_id: Uuid,
    pub description: String,
    /// Open while the client is waiting for (another) ad
    pub active: bool,
}

/// Placement of an ad in a monitor's rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorAd {
    pub monitor_id: Uuid,
    pub ad_id: Uuid,
    pub order_index: u32,
    pub block_quantity: u32,
}

/// Slots granted to a client on a monitor by a paid subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionMonitor {
    pub id: Uuid,
    pub client_id: Uuid,
    pub monitor_id: Uuid,
    pub slots_quantity: u32,
    pub active: bool,
}

/// An assignment row joined with the owner of its ad.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdSlot {
    pub ad_id: Uuid,
    pub client_id: Uuid,
    pub file_name: String,
    pub order_index: u32,
    pub block_quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSlot {
    pub subscription_id: Uuid,
    pub client_id: Uuid,
    pub slots_quantity: u32,
}

/// Everything slot accounting needs about one monitor, read at a single version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    pub monitor: Monitor,
    pub ads: Vec<AdSlot>,
    /// Active subscriptions only
    pub subscriptions: Vec<SubscriptionSlot>,
}

impl MonitorSnapshot {
    pub fn client_has_ad(&self, client_id: Uuid) -> bool {
        self.ads.iter().any(|slot| slot.client_id == client_id)
    }

    pub fn has_subscriber(&self, client_id: Uuid) -> bool {
        self.subscriptions.iter().any(|s| s.client_id == client_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// An approved ad did not fit on a monitor
    CapacityRejected,
    /// A health report took a monitor offline
    MonitorDeactivated,
}

/// Persisted entry of the administrators' inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminNotification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub message: String,
    pub monitor_id: Option<Uuid>,
    pub ad_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl AdminNotification {
    pub fn new(kind: NotificationKind, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            message: message.into(),
            monitor_id: None,
            ad_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn for_monitor(mut self, monitor_id: Uuid) -> Self {
        self.monitor_id = Some(monitor_id);
        self
    }

    pub fn for_ad(mut self, ad_id: Uuid) -> Self {
        self.ad_id = Some(ad_id);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorLevel {
    High,
    Moderate,
    #[serde(other)]
    Unknown,
}

/// A health check result sent by a box for one of its monitors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub monitor_id: Uuid,
    pub status_code: u16,
    pub error_level: ErrorLevel,
    #[serde(default)]
    pub message: String,
}
