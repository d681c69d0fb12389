//! Actor capabilities.
//!
//! Callers are described by what they may do rather than by a role enum
//! that every component branches on. Roles only exist as constructors.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Approve or refuse ads the actor owns
    DecideOwnAds,
    /// Upload a replacement artifact for an ad the actor owns
    ReplaceOwnAds,
    /// Submit produced ads for clients' ad requests
    SubmitAds,
    /// Place or remove any approved ad on any monitor
    AssignAds,
    /// Bind monitors to boxes, expire subscriptions, query boxes
    ManageFleet,
    /// Send monitor health reports
    ReportHealth,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub capabilities: CapabilitySet,
}

impl Actor {
    pub fn new(id: Uuid, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            id,
            capabilities: capabilities.into_iter().collect(),
        }
    }

    pub fn admin(id: Uuid) -> Self {
        Self::new(
            id,
            [
                Capability::SubmitAds,
                Capability::AssignAds,
                Capability::ManageFleet,
                Capability::ReportHealth,
            ],
        )
    }

    /// Advertisers, including partners acting as advertisers on other monitors.
    pub fn client(id: Uuid) -> Self {
        Self::new(id, [Capability::DecideOwnAds, Capability::ReplaceOwnAds])
    }

    pub fn relay(id: Uuid) -> Self {
        Self::new(id, [Capability::ReportHealth])
    }

    pub fn can(&self, capability: Capability) -> bool {
        self.capabilities.contains(capability)
    }

    pub fn require(&self, capability: Capability) -> Result<(), DomainError> {
        if self.can(capability) {
            Ok(())
        } else {
            Err(DomainError::PermissionDenied(format!(
                "actor {} lacks {capability:?}",
                self.id
            )))
        }
    }

    /// Requires the capability and that the actor is `owner_id`.
    pub fn require_owner(&self, capability: Capability, owner_id: Uuid) -> Result<(), DomainError> {
        self.require(capability)?;
        if self.id != owner_id {
            return Err(DomainError::PermissionDenied(format!(
                "actor {} does not own the resource",
                self.id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_may_decide_only_own_ads() {
        let owner = Uuid::new_v4();
        let actor = Actor::client(owner);
        assert!(actor.require_owner(Capability::DecideOwnAds, owner).is_ok());
        assert!(matches!(
            actor.require_owner(Capability::DecideOwnAds, Uuid::new_v4()),
            Err(DomainError::PermissionDenied(_))
        ));
    }

    #[test]
    fn admin_cannot_decide_on_behalf_of_client() {
        let admin = Actor::admin(Uuid::new_v4());
        assert!(admin.require(Capability::AssignAds).is_ok());
        assert!(admin.require(Capability::DecideOwnAds).is_err());
    }

    #[test]
    fn relay_only_reports_health() {
        let relay = Actor::relay(Uuid::new_v4());
        assert_eq!(
            relay.capabilities.iter().collect::<Vec<_>>(),
            vec![Capability::ReportHealth]
        );
    }
}
