//! # Ad lifecycle
//!
//! An ad is produced for a client's request and then judged by that client.
//! `PENDING` moves to `APPROVED` or `REJECTED`. Approval is final and
//! repeating it changes nothing. Each refusal is recorded; only the most
//! recent `max_refusals` justifications are kept, and the request is
//! reopened for another attempt until the refusal count passes the cap.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use domains::{
    Actor, Ad, AdRepo, AdRequest, Capability, DomainError, FleetRepo, RefusedAd, Result, Validation,
};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::assignment::{AssignmentEngine, AssignmentReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecyclePolicy {
    pub max_refusals: u32,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self { max_refusals: 3 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject { justification: String },
}

impl Decision {
    /// Builds a decision from the wire form. A refusal needs a non-blank
    /// justification and `PENDING` is not a decision at all.
    pub fn parse(validation: Validation, justification: Option<String>) -> Result<Self> {
        match validation {
            Validation::Approved => Ok(Self::Approve),
            Validation::Rejected => {
                let justification = justification
                    .map(|j| j.trim().to_owned())
                    .filter(|j| !j.is_empty())
                    .ok_or_else(|| DomainError::Validation("a justification is required to refuse an ad".into()))?;
                Ok(Self::Reject { justification })
            }
            Validation::Pending => Err(DomainError::Validation("PENDING is not a decision".into())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Approved,
    /// Approval repeated on an approved ad; nothing changed
    AlreadyApproved,
    Rejected,
}

/// Applies a decision to the ad in place.
pub fn apply_decision(ad: &mut Ad, decision: Decision, max_refusals: u32, now: DateTime<Utc>) -> Result<Transition> {
    match (ad.validation, decision) {
        (Validation::Approved, Decision::Approve) => Ok(Transition::AlreadyApproved),
        (Validation::Pending, Decision::Approve) => {
            ad.validation = Validation::Approved;
            Ok(Transition::Approved)
        }
        (Validation::Pending, Decision::Reject { justification }) => {
            ad.validation = Validation::Rejected;
            ad.refusal_count += 1;
            ad.refusals.push(RefusedAd { id: Uuid::new_v4(), justification, refused_at: now });
            // FIFO: the oldest justification goes first.
            let excess = ad.refusals.len().saturating_sub(max_refusals as usize);
            ad.refusals.drain(..excess);
            Ok(Transition::Rejected)
        }
        (state, _) => Err(DomainError::InvalidState(format!("ad {} is {state} and cannot be decided", ad.id))),
    }
}

/// Reopens the request while the ad is within the refusal cap and closes it
/// for good once the cap is passed. Returns the resulting `active` flag.
pub fn settle_request(request: &mut AdRequest, refusal_count: u32, max_refusals: u32) -> bool {
    request.active = refusal_count <= max_refusals;
    request.active
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionOutcome {
    pub ad: Ad,
    pub transition: Transition,
    /// Present when the approval triggered an assignment
    pub assignment: Option<AssignmentReport>,
    /// `active` flag of the parent request after a refusal
    pub request_active: Option<bool>,
}

pub struct AdLifecycle {
    ads: Arc<dyn AdRepo>,
    fleet: Arc<dyn FleetRepo>,
    engine: Arc<AssignmentEngine>,
    policy: LifecyclePolicy,
}

impl AdLifecycle {
    pub fn new(
        ads: Arc<dyn AdRepo>,
        fleet: Arc<dyn FleetRepo>,
        engine: Arc<AssignmentEngine>,
        policy: LifecyclePolicy,
    ) -> Self {
        Self { ads, fleet, engine, policy }
    }

    /// The owning client approves or refuses an ad.
    pub async fn decide(
        &self,
        actor: &Actor,
        ad_id: Uuid,
        validation: Validation,
        justification: Option<String>,
    ) -> Result<DecisionOutcome> {
        let mut ad = self.load_ad(ad_id).await?;
        actor.require_owner(Capability::DecideOwnAds, ad.client_id)?;
        let decision = Decision::parse(validation, justification)?;
        let transition = apply_decision(&mut ad, decision, self.policy.max_refusals, Utc::now())?;

        match transition {
            Transition::AlreadyApproved => {
                info!(ad_id = %ad.id, "ad already approved, nothing to do");
                Ok(DecisionOutcome { ad, transition, assignment: None, request_active: None })
            }
            Transition::Approved => {
                self.ads.save_ad(ad.clone()).await?;
                info!(ad_id = %ad.id, client_id = %ad.client_id, "ad approved");
                let monitors = self.entitled_monitors(ad.client_id).await?;
                let report = self.engine.assign(&ad, &monitors, None).await?;
                Ok(DecisionOutcome { ad, transition, assignment: Some(report), request_active: None })
            }
            Transition::Rejected => {
                self.ads.save_ad(ad.clone()).await?;
                info!(ad_id = %ad.id, refusals = ad.refusal_count, "ad refused");
                let request_active = self.settle_parent_request(&ad).await?;
                Ok(DecisionOutcome { ad, transition, assignment: None, request_active })
            }
        }
    }

    /// Submits a freshly produced ad for an open request. The request counts
    /// as fulfilled and closes.
    pub async fn submit(&self, actor: &Actor, request_id: Uuid, file_name: &str) -> Result<Ad> {
        actor.require(Capability::SubmitAds)?;
        let file_name = non_blank_file_name(file_name)?;
        let mut request = self.load_open_request(request_id).await?;

        let ad = Ad::new(request.client_id, file_name, Some(request.id));
        self.ads.save_ad(ad.clone()).await?;
        request.active = false;
        self.ads.save_ad_request(request).await?;
        info!(ad_id = %ad.id, request_id = %request_id, "ad submitted");
        Ok(ad)
    }

    /// Sends a refused ad back for judgement with a new artifact. Only
    /// possible while its request is still open.
    pub async fn resubmit(&self, actor: &Actor, ad_id: Uuid, file_name: &str) -> Result<Ad> {
        actor.require(Capability::SubmitAds)?;
        let file_name = non_blank_file_name(file_name)?;
        let mut ad = self.load_ad(ad_id).await?;
        if ad.validation != Validation::Rejected {
            return Err(DomainError::InvalidState(format!("ad {} is {} and cannot be resubmitted", ad.id, ad.validation)));
        }
        let request_id = ad
            .ad_request_id
            .ok_or_else(|| DomainError::InvalidState(format!("ad {} has no request to resubmit against", ad.id)))?;
        let mut request = self.load_open_request(request_id).await?;

        ad.file_name = file_name;
        ad.validation = Validation::Pending;
        self.ads.save_ad(ad.clone()).await?;
        request.active = false;
        self.ads.save_ad_request(request).await?;
        info!(ad_id = %ad.id, attempt = ad.refusal_count + 1, "ad resubmitted");
        Ok(ad)
    }

    /// The owner swaps the artifact. The old file leaves every rotation and
    /// the ad goes back to `PENDING`.
    pub async fn replace_artifact(&self, actor: &Actor, ad_id: Uuid, file_name: &str) -> Result<Ad> {
        let file_name = non_blank_file_name(file_name)?;
        let mut ad = self.load_ad(ad_id).await?;
        actor.require_owner(Capability::ReplaceOwnAds, ad.client_id)?;

        let previous = std::mem::replace(&mut ad.file_name, file_name);
        ad.validation = Validation::Pending;
        self.ads.save_ad(ad.clone()).await?;

        for row in self.fleet.assignments_for_ad(ad.id).await? {
            self.engine.unassign(row.monitor_id, &[(ad.id, previous.clone())]).await?;
        }
        info!(ad_id = %ad.id, "ad artifact replaced");
        Ok(ad)
    }

    /// Active monitors on which the client holds an active subscription.
    async fn entitled_monitors(&self, client_id: Uuid) -> Result<Vec<Uuid>> {
        let mut monitors = Vec::new();
        for monitor_id in self.fleet.subscribed_monitors(client_id).await? {
            match self.fleet.monitor(monitor_id).await? {
                Some(monitor) if monitor.active => monitors.push(monitor.id),
                Some(_) => info!(monitor_id = %monitor_id, "monitor inactive, not entitled"),
                None => warn!(monitor_id = %monitor_id, "subscription points at unknown monitor"),
            }
        }
        Ok(monitors)
    }

    async fn settle_parent_request(&self, ad: &Ad) -> Result<Option<bool>> {
        let Some(request_id) = ad.ad_request_id else { return Ok(None) };
        let Some(mut request) = self.ads.ad_request(request_id).await? else {
            warn!(ad_id = %ad.id, request_id = %request_id, "refused ad points at unknown request");
            return Ok(None);
        };
        let active = settle_request(&mut request, ad.refusal_count, self.policy.max_refusals);
        self.ads.save_ad_request(request).await?;
        if active {
            info!(request_id = %request_id, "ad request reopened");
        } else {
            info!(request_id = %request_id, refusals = ad.refusal_count, "ad request closed after too many refusals");
        }
        Ok(Some(active))
    }

    async fn load_ad(&self, ad_id: Uuid) -> Result<Ad> {
        self.ads.ad(ad_id).await?.ok_or_else(|| DomainError::not_found("ad", ad_id))
    }

    async fn load_open_request(&self, request_id: Uuid) -> Result<AdRequest> {
        let request = self
            .ads
            .ad_request(request_id)
            .await?
            .ok_or_else(|| DomainError::not_found("ad request", request_id))?;
        if !request.active {
            return Err(DomainError::InvalidState(format!("ad request {request_id} is closed")));
        }
        Ok(request)
    }
}

fn non_blank_file_name(file_name: &str) -> Result<String> {
    let trimmed = file_name.trim();
    if trimmed.is_empty() {
        return Err(DomainError::Validation("file name must not be blank".into()));
    }
    Ok(trimmed.to_owned())
}
