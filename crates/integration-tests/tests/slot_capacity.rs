use std::collections::HashSet;

use domains::{NotificationKind, Validation};
use integration_tests::Fleet;
use services::{Ceiling, SkipReason};
use uuid::Uuid;

#[tokio::test]
async fn third_parties_share_three_of_ten_slots() {
    let fleet = Fleet::new();
    let partner = Uuid::new_v4();
    let monitor = fleet.add_monitor(10, Some(partner), None);

    for i in 0..3 {
        let ad = fleet.approved_ad(Uuid::new_v4(), &format!("client-{i}.png")).await;
        let report = fleet
            .services
            .assignments
            .assign_as(&fleet.admin, ad.id, &[monitor.id], None)
            .await
            .unwrap();
        assert_eq!(report.assigned.len(), 1, "ad {i} should fit");
    }

    let fourth = fleet.approved_ad(Uuid::new_v4(), "client-3.png").await;
    let report = fleet
        .services
        .assignments
        .assign_as(&fleet.admin, fourth.id, &[monitor.id], None)
        .await
        .unwrap();

    assert!(report.assigned.is_empty());
    assert_eq!(
        report.skipped[0].reason,
        SkipReason::Capacity { ceiling: Ceiling::AdSlots, requested: 4, limit: 3 }
    );
    assert_eq!(fleet.store.assignments(monitor.id).len(), 3);

    let inbox = fleet.store.notifications();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].kind, NotificationKind::CapacityRejected);
    assert!(inbox[0].message.contains("client-3.png"), "{}", inbox[0].message);
}

#[tokio::test]
async fn partner_fills_reserved_slots_up_to_the_total() {
    let fleet = Fleet::new();
    let partner = Uuid::new_v4();
    let monitor = fleet.add_monitor(10, Some(partner), None);

    for i in 0..3 {
        let ad = fleet.approved_ad(Uuid::new_v4(), &format!("third-{i}.png")).await;
        fleet.services.assignments.assign(&ad, &[monitor.id], None).await.unwrap();
    }

    let partner_ad = fleet.approved_ad(partner, "partner.png").await;
    let report = fleet.services.assignments.assign(&partner_ad, &[monitor.id], Some(7)).await.unwrap();
    assert_eq!(report.assigned.len(), 1);

    let late = fleet.approved_ad(Uuid::new_v4(), "late.png").await;
    let report = fleet.services.assignments.assign(&late, &[monitor.id], None).await.unwrap();
    assert!(matches!(report.skipped[0].reason, SkipReason::Capacity { .. }));

    let rows = fleet.store.assignments(monitor.id);
    let total: u32 = rows.iter().map(|r| r.block_quantity).sum();
    assert_eq!(total, 10);
}

#[tokio::test]
async fn subscriptions_and_ads_share_the_third_party_slots() {
    let fleet = Fleet::new();
    let partner = Uuid::new_v4();
    let monitor = fleet.add_monitor(10, Some(partner), None);
    let subscriber = Uuid::new_v4();
    fleet.subscribe(subscriber, monitor.id, 3);

    let ad = fleet.approved_ad(subscriber, "subscriber.png").await;
    let report = fleet.services.assignments.assign(&ad, &[monitor.id], None).await.unwrap();

    assert!(report.assigned.is_empty());
    assert_eq!(
        report.skipped[0].reason,
        SkipReason::Capacity { ceiling: Ceiling::SharedSlots, requested: 4, limit: 3 }
    );
    assert!(fleet.store.assignments(monitor.id).is_empty());

    let inbox = fleet.store.notifications();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].kind, NotificationKind::CapacityRejected);
    assert_eq!(inbox[0].monitor_id, Some(monitor.id));
}

#[tokio::test]
async fn gates_are_evaluated_per_monitor() {
    let fleet = Fleet::new();
    let client = Uuid::new_v4();

    let reserved = fleet.add_monitor(10, None, None);
    fleet.subscribe(Uuid::new_v4(), reserved.id, 2);

    let duplicate = fleet.add_monitor(10, None, None);
    let earlier = fleet.approved_ad(client, "earlier.png").await;
    fleet.services.assignments.assign(&earlier, &[duplicate.id], None).await.unwrap();

    let tiny = fleet.add_monitor(5, None, None);
    let open = fleet.add_monitor(10, None, None);
    let missing = Uuid::new_v4();

    let ad = fleet.approved_ad(client, "new.png").await;
    let report = fleet
        .services
        .assignments
        .assign(&ad, &[reserved.id, duplicate.id, tiny.id, missing, open.id], None)
        .await
        .unwrap();

    assert_eq!(report.assigned.len(), 1);
    assert_eq!(report.assigned[0].monitor_id, open.id);

    let reasons: Vec<(Uuid, &SkipReason)> = report.skipped.iter().map(|s| (s.monitor_id, &s.reason)).collect();
    assert_eq!(reasons[0], (reserved.id, &SkipReason::NotSubscribed));
    assert_eq!(reasons[1], (duplicate.id, &SkipReason::AlreadyAssigned));
    assert!(matches!(reasons[2], (id, SkipReason::Capacity { .. }) if id == tiny.id));
    assert_eq!(reasons[3], (missing, &SkipReason::MonitorNotFound));
}

#[tokio::test]
async fn pending_ads_are_never_placed() {
    let fleet = Fleet::new();
    let monitor = fleet.add_monitor(10, None, None);
    let ad = fleet.pending_ad(Uuid::new_v4(), "draft.png").await;
    assert_eq!(ad.validation, Validation::Pending);

    let err = fleet.services.assignments.assign(&ad, &[monitor.id], None).await.unwrap_err();
    assert!(matches!(err, domains::DomainError::InvalidState(_)));
    assert!(fleet.store.assignments(monitor.id).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_assignments_respect_capacity() {
    let fleet = Fleet::new();
    let monitor = fleet.add_monitor(10, Some(Uuid::new_v4()), None);

    let mut ads = Vec::new();
    for i in 0..8 {
        ads.push(fleet.approved_ad(Uuid::new_v4(), &format!("rush-{i}.png")).await);
    }

    let mut handles = Vec::new();
    for ad in ads {
        let engine = fleet.services.assignments.clone();
        let monitor_id = monitor.id;
        handles.push(tokio::spawn(async move { engine.assign(&ad, &[monitor_id], None).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let rows = fleet.store.assignments(monitor.id);
    assert!(rows.len() <= 3, "placed {} third-party ads", rows.len());
    let indexes: HashSet<u32> = rows.iter().map(|r| r.order_index).collect();
    assert_eq!(indexes.len(), rows.len(), "order indexes must be unique");
}
