use domains::{Actor, DomainError, FleetRepo, PushMode};
use integration_tests::{BoxCall, Fleet};
use services::RotationEntry;
use uuid::Uuid;

#[tokio::test]
async fn moving_a_monitor_resyncs_both_boxes() {
    let fleet = Fleet::new();
    let old_box = fleet.add_box();
    let new_box = fleet.add_box();
    let monitor = fleet.add_monitor(10, None, Some(old_box));
    let ad = fleet.approved_ad(Uuid::new_v4(), "mall.mp4").await;
    fleet.services.assignments.assign(&ad, &[monitor.id], None).await.unwrap();

    let previous = fleet.services.fleet.bind_monitor(&fleet.admin, monitor.id, Some(new_box)).await.unwrap();
    assert_eq!(previous, Some(old_box));
    assert_eq!(fleet.store.monitor(monitor.id).await.unwrap().unwrap().box_id, Some(new_box));

    fleet.drain().await;
    let calls = fleet.boxes.calls();
    assert!(calls.contains(&BoxCall::RemoveMonitor { box_id: old_box, monitor_id: monitor.id }));
    let bulk = calls
        .iter()
        .find_map(|call| match call {
            BoxCall::Push { box_id, mode: PushMode::Bulk, ads } if *box_id == new_box => Some(ads.clone()),
            _ => None,
        })
        .expect("bulk push to the new box");
    assert_eq!(bulk.len(), 1);
    assert_eq!(bulk[0].monitor_id, monitor.id);
    assert_eq!(bulk[0].file_name, "mall.mp4");
}

#[tokio::test]
async fn binding_to_an_unknown_box_fails() {
    let fleet = Fleet::new();
    let monitor = fleet.add_monitor(10, None, None);
    let err = fleet
        .services
        .fleet
        .bind_monitor(&fleet.admin, monitor.id, Some(Uuid::new_v4()))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::NotFound(..)), "{err}");
    assert_eq!(fleet.store.monitor(monitor.id).await.unwrap().unwrap().box_id, None);
}

#[tokio::test]
async fn expiring_a_subscription_pulls_the_clients_ads() {
    let fleet = Fleet::new();
    let box_id = fleet.add_box();
    let monitor = fleet.add_monitor(10, None, Some(box_id));
    let client_id = Uuid::new_v4();
    let subscription = fleet.subscribe(client_id, monitor.id, 1);
    let theirs = fleet.approved_ad(client_id, "subscriber.mp4").await;
    fleet.services.assignments.assign(&theirs, &[monitor.id], None).await.unwrap();

    let removed = fleet.services.fleet.expire_subscription(&fleet.admin, subscription.id).await.unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].ad_id, theirs.id);
    assert!(fleet.store.assignments(monitor.id).is_empty());

    // Already expired: nothing left to do.
    let again = fleet.services.fleet.expire_subscription(&fleet.admin, subscription.id).await.unwrap();
    assert!(again.is_empty());

    fleet.drain().await;
    let removals: Vec<_> = fleet
        .boxes
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            BoxCall::Remove { body, .. } => Some(body),
            _ => None,
        })
        .collect();
    assert_eq!(removals.len(), 1);
    assert_eq!(removals[0].monitor_id, monitor.id);
    assert_eq!(removals[0].file_names, ["subscriber.mp4"]);
}

#[tokio::test]
async fn displayed_ads_come_from_the_box() {
    let fleet = Fleet::new();
    let box_id = fleet.add_box();
    let bound = fleet.add_monitor(10, None, Some(box_id));
    let loose = fleet.add_monitor(10, None, None);
    fleet.boxes.set_displayed(&["a.mp4", "b.mp4"]);

    let shown = fleet.services.fleet.displayed_ads(&fleet.admin, bound.id).await.unwrap();
    assert_eq!(shown, ["a.mp4", "b.mp4"]);

    let err = fleet.services.fleet.displayed_ads(&fleet.admin, loose.id).await.unwrap_err();
    assert!(matches!(err, DomainError::InvalidState(_)));
}

#[tokio::test]
async fn reorder_rewrites_rotation_and_resends_it() {
    let fleet = Fleet::new();
    let box_id = fleet.add_box();
    let monitor = fleet.add_monitor(10, None, Some(box_id));
    let first = fleet.approved_ad(Uuid::new_v4(), "first.mp4").await;
    let second = fleet.approved_ad(Uuid::new_v4(), "second.mp4").await;
    fleet.services.assignments.assign(&first, &[monitor.id], None).await.unwrap();
    fleet.services.assignments.assign(&second, &[monitor.id], None).await.unwrap();

    let entries = vec![
        RotationEntry { ad_id: first.id, order_index: 2 },
        RotationEntry { ad_id: second.id, order_index: 1 },
    ];
    fleet.services.fleet.reorder_rotation(&fleet.admin, monitor.id, entries).await.unwrap();

    let rotation: Vec<Uuid> = fleet.store.assignments(monitor.id).iter().map(|r| r.ad_id).collect();
    assert_eq!(rotation, vec![second.id, first.id]);

    fleet.drain().await;
    let bulk = fleet
        .boxes
        .calls()
        .into_iter()
        .find_map(|call| match call {
            BoxCall::Push { mode: PushMode::Bulk, ads, .. } => Some(ads),
            _ => None,
        })
        .expect("bulk push after reorder");
    let files: Vec<&str> = bulk.iter().map(|d| d.file_name.as_str()).collect();
    assert_eq!(files, ["second.mp4", "first.mp4"]);
}

#[tokio::test]
async fn rotation_with_gaps_is_refused_and_appends_stay_unique() {
    let fleet = Fleet::new();
    let monitor = fleet.add_monitor(10, None, None);
    let a = fleet.approved_ad(Uuid::new_v4(), "a.mp4").await;
    let b = fleet.approved_ad(Uuid::new_v4(), "b.mp4").await;
    fleet.services.assignments.assign(&a, &[monitor.id], None).await.unwrap();
    fleet.services.assignments.assign(&b, &[monitor.id], None).await.unwrap();

    let shifted = vec![RotationEntry { ad_id: a.id, order_index: 2 }, RotationEntry { ad_id: b.id, order_index: 3 }];
    let err = fleet.services.fleet.reorder_rotation(&fleet.admin, monitor.id, shifted).await.unwrap_err();
    assert!(matches!(err, DomainError::Validation(_)), "{err}");

    let c = fleet.approved_ad(Uuid::new_v4(), "c.mp4").await;
    fleet.services.assignments.assign(&c, &[monitor.id], None).await.unwrap();
    let indexes: Vec<u32> = fleet.store.assignments(monitor.id).iter().map(|r| r.order_index).collect();
    assert_eq!(indexes, [1, 2, 3]);
}

#[tokio::test]
async fn fleet_management_is_admin_only() {
    let fleet = Fleet::new();
    let monitor = fleet.add_monitor(10, None, None);
    let client = Actor::client(Uuid::new_v4());

    let err = fleet.services.fleet.reorder_rotation(&client, monitor.id, Vec::new()).await.unwrap_err();
    assert!(matches!(err, DomainError::PermissionDenied(_)));
    let err = fleet.services.fleet.bind_monitor(&client, monitor.id, None).await.unwrap_err();
    assert!(matches!(err, DomainError::PermissionDenied(_)));
}
