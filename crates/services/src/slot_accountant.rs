//! # Slot accounting
//!
//! Decides whether a monitor has room for more rotation slots. Pure: the
//! answer depends only on the snapshot and the request, never on the order
//! of the rows inside the snapshot.
//!
//! Two buckets are tracked, ad slots and subscription slots. In each bucket
//! the slots held by the hosting partner are set aside and everybody else
//! shares `max_blocks - reserved_partner_slots`. That shared limit also binds
//! the two non-partner buckets combined, and across everything the grand total
//! may never exceed `max_blocks`.

use domains::MonitorSnapshot;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Ad,
    Subscription,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRequest {
    pub requester: Uuid,
    pub kind: SlotKind,
    pub quantity: u32,
}

impl SlotRequest {
    pub fn ad(requester: Uuid, quantity: u32) -> Self {
        Self { requester, kind: SlotKind::Ad, quantity }
    }

    pub fn subscription(requester: Uuid, quantity: u32) -> Self {
        Self { requester, kind: SlotKind::Subscription, quantity }
    }
}

/// The limit a rejected request ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Ceiling {
    /// Non-partner ad slots
    AdSlots,
    /// Non-partner subscription slots
    SubscriptionSlots,
    /// Non-partner ad and subscription slots together
    SharedSlots,
    /// All slots of the monitor
    Total,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotDecision {
    Accepted,
    Rejected { ceiling: Ceiling, requested: u64, limit: u64 },
}

impl SlotDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Slot sums of one snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotUsage {
    pub ad_slots: u64,
    pub partner_ad_slots: u64,
    pub subscription_slots: u64,
    pub partner_subscription_slots: u64,
}

impl SlotUsage {
    pub fn of(snapshot: &MonitorSnapshot) -> Self {
        let partner = snapshot.monitor.partner_id;
        let owned_by_partner = |client: Uuid| partner == Some(client);

        let mut usage = Self::default();
        for slot in &snapshot.ads {
            let qty = u64::from(slot.block_quantity);
            usage.ad_slots += qty;
            if owned_by_partner(slot.client_id) {
                usage.partner_ad_slots += qty;
            }
        }
        for sub in &snapshot.subscriptions {
            let qty = u64::from(sub.slots_quantity);
            usage.subscription_slots += qty;
            if owned_by_partner(sub.client_id) {
                usage.partner_subscription_slots += qty;
            }
        }
        usage
    }

    pub fn other_ad_slots(&self) -> u64 {
        self.ad_slots - self.partner_ad_slots
    }

    pub fn other_subscription_slots(&self) -> u64 {
        self.subscription_slots - self.partner_subscription_slots
    }

    pub fn other_slots(&self) -> u64 {
        self.other_ad_slots() + self.other_subscription_slots()
    }

    pub fn total(&self) -> u64 {
        self.ad_slots + self.subscription_slots
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotAccountant {
    reserved_partner_slots: u32,
}

impl SlotAccountant {
    pub fn new(reserved_partner_slots: u32) -> Self {
        Self { reserved_partner_slots }
    }

    pub fn reserved_partner_slots(&self) -> u32 {
        self.reserved_partner_slots
    }

    /// Slots third parties share on a monitor of `max_blocks` slots.
    pub fn shared_limit(&self, max_blocks: u32) -> u64 {
        u64::from(max_blocks.saturating_sub(self.reserved_partner_slots))
    }

    pub fn check(&self, snapshot: &MonitorSnapshot, request: SlotRequest) -> SlotDecision {
        let usage = SlotUsage::of(snapshot);
        let max_blocks = u64::from(snapshot.monitor.max_blocks);
        let qty = u64::from(request.quantity);

        // The partner draws on the reserved headroom, so only the grand total binds.
        let is_partner = snapshot.monitor.partner_id == Some(request.requester);
        if !is_partner {
            let shared = self.shared_limit(snapshot.monitor.max_blocks);
            let (ad_qty, sub_qty) = match request.kind {
                SlotKind::Ad => (qty, 0),
                SlotKind::Subscription => (0, qty),
            };

            let ads = usage.other_ad_slots() + ad_qty;
            if ads > shared {
                return SlotDecision::Rejected { ceiling: Ceiling::AdSlots, requested: ads, limit: shared };
            }
            let subs = usage.other_subscription_slots() + sub_qty;
            if subs > shared {
                return SlotDecision::Rejected {
                    ceiling: Ceiling::SubscriptionSlots,
                    requested: subs,
                    limit: shared,
                };
            }
            let combined = usage.other_slots() + qty;
            if combined > shared {
                return SlotDecision::Rejected { ceiling: Ceiling::SharedSlots, requested: combined, limit: shared };
            }
        }

        let total = usage.total() + qty;
        if total > max_blocks {
            return SlotDecision::Rejected { ceiling: Ceiling::Total, requested: total, limit: max_blocks };
        }
        SlotDecision::Accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domains::{AdSlot, Monitor, SubscriptionSlot};
    use proptest::prelude::*;

    fn monitor(max_blocks: u32, partner_id: Option<Uuid>) -> Monitor {
        Monitor {
            id: Uuid::new_v4(),
            address: "Av. Central, 200".into(),
            max_blocks,
            partner_id,
            box_id: None,
            active: true,
            version: 0,
        }
    }

    fn ad(client_id: Uuid, block_quantity: u32) -> AdSlot {
        AdSlot {
            ad_id: Uuid::new_v4(),
            client_id,
            file_name: format!("{client_id}.mp4"),
            order_index: 0,
            block_quantity,
        }
    }

    fn sub(client_id: Uuid, slots_quantity: u32) -> SubscriptionSlot {
        SubscriptionSlot { subscription_id: Uuid::new_v4(), client_id, slots_quantity }
    }

    fn snapshot(max_blocks: u32, partner: Option<Uuid>, ads: Vec<AdSlot>, subs: Vec<SubscriptionSlot>) -> MonitorSnapshot {
        MonitorSnapshot { monitor: monitor(max_blocks, partner), ads, subscriptions: subs }
    }

    #[test]
    fn third_parties_share_what_the_partner_reservation_leaves() {
        let accountant = SlotAccountant::new(7);
        let partner = Uuid::new_v4();
        let clients: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let full = snapshot(10, Some(partner), clients.iter().map(|c| ad(*c, 1)).collect(), vec![]);

        let fourth = SlotRequest::ad(Uuid::new_v4(), 1);
        assert_eq!(
            accountant.check(&full, fourth),
            SlotDecision::Rejected { ceiling: Ceiling::AdSlots, requested: 4, limit: 3 }
        );

        let almost = snapshot(10, Some(partner), clients[..2].iter().map(|c| ad(*c, 1)).collect(), vec![]);
        assert!(accountant.check(&almost, fourth).is_accepted());
    }

    #[test]
    fn partner_ads_do_not_count_against_third_parties() {
        let accountant = SlotAccountant::new(7);
        let partner = Uuid::new_v4();
        let snap = snapshot(10, Some(partner), vec![ad(partner, 5)], vec![]);
        assert!(accountant.check(&snap, SlotRequest::ad(Uuid::new_v4(), 3)).is_accepted());
    }

    #[test]
    fn without_partner_everything_is_third_party() {
        let accountant = SlotAccountant::new(7);
        let someone = Uuid::new_v4();
        let snap = snapshot(10, None, vec![ad(someone, 3)], vec![]);
        assert!(!accountant.check(&snap, SlotRequest::ad(Uuid::new_v4(), 1)).is_accepted());
    }

    #[test]
    fn partner_requests_are_bound_by_the_total_only() {
        let accountant = SlotAccountant::new(7);
        let partner = Uuid::new_v4();
        let others: Vec<AdSlot> = (0..3).map(|_| ad(Uuid::new_v4(), 1)).collect();
        let snap = snapshot(10, Some(partner), others, vec![]);

        assert!(accountant.check(&snap, SlotRequest::ad(partner, 7)).is_accepted());
        assert_eq!(
            accountant.check(&snap, SlotRequest::ad(partner, 8)),
            SlotDecision::Rejected { ceiling: Ceiling::Total, requested: 11, limit: 10 }
        );
    }

    #[test]
    fn saturated_subscriptions_block_ads_too() {
        let accountant = SlotAccountant::new(7);
        let snap = snapshot(10, None, vec![], vec![sub(Uuid::new_v4(), 4)]);
        assert_eq!(
            accountant.check(&snap, SlotRequest::ad(Uuid::new_v4(), 1)),
            SlotDecision::Rejected { ceiling: Ceiling::SubscriptionSlots, requested: 4, limit: 3 }
        );
    }

    #[test]
    fn third_party_ads_and_subscriptions_share_one_limit() {
        let accountant = SlotAccountant::new(7);
        let partner = Uuid::new_v4();
        let snap = snapshot(10, Some(partner), vec![], vec![sub(Uuid::new_v4(), 3)]);
        assert_eq!(
            accountant.check(&snap, SlotRequest::ad(Uuid::new_v4(), 1)),
            SlotDecision::Rejected { ceiling: Ceiling::SharedSlots, requested: 4, limit: 3 }
        );
        assert!(accountant.check(&snap, SlotRequest::ad(partner, 1)).is_accepted());

        let mixed = snapshot(10, Some(partner), vec![ad(Uuid::new_v4(), 2)], vec![sub(Uuid::new_v4(), 1)]);
        assert!(!accountant.check(&mixed, SlotRequest::subscription(Uuid::new_v4(), 1)).is_accepted());
    }

    #[test]
    fn subscription_requests_use_the_subscription_bucket() {
        let accountant = SlotAccountant::new(7);
        let partner = Uuid::new_v4();
        let snap = snapshot(10, Some(partner), vec![], vec![sub(partner, 2), sub(Uuid::new_v4(), 2)]);
        assert!(accountant.check(&snap, SlotRequest::subscription(Uuid::new_v4(), 1)).is_accepted());
        assert!(!accountant.check(&snap, SlotRequest::subscription(Uuid::new_v4(), 2)).is_accepted());
    }

    #[test]
    fn reservation_larger_than_monitor_leaves_nothing_shared() {
        let accountant = SlotAccountant::new(7);
        assert_eq!(accountant.shared_limit(5), 0);
        let snap = snapshot(5, None, vec![], vec![]);
        assert!(!accountant.check(&snap, SlotRequest::ad(Uuid::new_v4(), 1)).is_accepted());
    }

    fn arb_request(clients: Vec<Uuid>) -> impl Strategy<Value = SlotRequest> {
        (prop::sample::select(clients), any::<bool>(), 1u32..4).prop_map(|(requester, is_ad, quantity)| {
            if is_ad {
                SlotRequest::ad(requester, quantity)
            } else {
                SlotRequest::subscription(requester, quantity)
            }
        })
    }

    fn scenario() -> impl Strategy<Value = (u32, u32, bool, Vec<SlotRequest>)> {
        let clients: Vec<Uuid> = (0..5).map(|i| Uuid::from_u128(i + 1)).collect();
        (
            1u32..30,
            0u32..12,
            any::<bool>(),
            prop::collection::vec(arb_request(clients), 0..40),
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, failure_persistence: None, .. ProptestConfig::default() })]

        #[test]
        fn accepted_requests_never_break_capacity((max_blocks, reserved, has_partner, requests) in scenario()) {
            let partner = has_partner.then(|| Uuid::from_u128(1));
            let accountant = SlotAccountant::new(reserved);
            let mut snap = snapshot(max_blocks, partner, vec![], vec![]);

            for request in requests {
                if accountant.check(&snap, request).is_accepted() {
                    match request.kind {
                        SlotKind::Ad => snap.ads.push(ad(request.requester, request.quantity)),
                        SlotKind::Subscription => snap.subscriptions.push(sub(request.requester, request.quantity)),
                    }
                }
                let usage = SlotUsage::of(&snap);
                let shared = accountant.shared_limit(max_blocks);
                prop_assert!(usage.total() <= u64::from(max_blocks));
                prop_assert!(usage.other_ad_slots() <= shared);
                prop_assert!(usage.other_subscription_slots() <= shared);
                prop_assert!(usage.other_slots() <= shared);
            }
        }

        #[test]
        fn decision_ignores_row_order(
            (max_blocks, reserved, has_partner, requests) in scenario(),
            candidate in arb_request((0..5).map(|i| Uuid::from_u128(i + 1)).collect()),
        ) {
            let partner = has_partner.then(|| Uuid::from_u128(1));
            let mut snap = snapshot(max_blocks, partner, vec![], vec![]);
            for request in requests {
                match request.kind {
                    SlotKind::Ad => snap.ads.push(ad(request.requester, request.quantity)),
                    SlotKind::Subscription => snap.subscriptions.push(sub(request.requester, request.quantity)),
                }
            }
            let accountant = SlotAccountant::new(reserved);
            let forward = accountant.check(&snap, candidate);
            snap.ads.reverse();
            snap.subscriptions.reverse();
            prop_assert_eq!(forward, accountant.check(&snap, candidate));
        }
    }
}
