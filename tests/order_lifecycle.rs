mod common;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use rust_decimal::Decimal;
use uuid::Uuid;

use common::Harness;
use delivery_orders::domain::order::{OrderError, PaymentStatus, Role, ShopOrder, ShopOrderStatus};
use delivery_orders::domain::otp::OtpError;
use delivery_orders::event_sourcing::core::Aggregate;
use delivery_orders::notify::{Audience, Notifier, RealtimeEnvelope};
use delivery_orders::ActorOrders;

#[tokio::test]
async fn test_two_shop_order_through_delivery() {
    let h = Harness::new().await;
    let partner = h.partner_near_a(1.0).await;

    let order = h.place_cod().await;
    assert_eq!(order.shop_orders.len(), 2);
    assert_eq!(order.shop_orders[0].shop_id, h.shop_a.id);
    assert_eq!(order.shop_orders[0].subtotal, Decimal::new(250, 0));
    assert_eq!(order.shop_orders[1].subtotal, Decimal::new(200, 0));
    assert_eq!(order.total_amount, Decimal::new(450, 0));
    assert!(order.shop_orders.iter().all(|so| so.status == ShopOrderStatus::Pending));

    let id = order.shop_orders[0].id;
    let owner = h.shop_a.owner_id;
    h.service.transition(id, ShopOrderStatus::Preparing, owner, None).await.unwrap();
    h.service.transition(id, ShopOrderStatus::Ready, owner, None).await.unwrap();

    let early = h.service.transition(id, ShopOrderStatus::OutOfDelivery, owner, None).await;
    assert!(matches!(early, Err(OrderError::Precondition(_))));

    h.service.accept_assignment(id, partner).await.unwrap();
    let dispatched = h
        .service
        .transition(id, ShopOrderStatus::OutOfDelivery, owner, None)
        .await
        .unwrap();

    let code = h.mailer.last_code(id).expect("customer received a code");
    assert_eq!(code.len(), 4);
    assert!(code.chars().all(|c| c.is_ascii_digit()));
    assert_eq!(dispatched.delivery_otp.as_ref().map(|otp| otp.code.as_str()), Some(code.as_str()));

    let too_soon = h.service.transition(id, ShopOrderStatus::Delivered, partner, None).await;
    assert!(matches!(too_soon, Err(OrderError::Precondition(_))));

    let wrong = h.service.verify_otp(id, partner, "0000").await;
    assert!(matches!(wrong, Err(OrderError::Otp(OtpError::InvalidCode))));

    h.service.verify_otp(id, partner, &code).await.unwrap();
    let delivered = h
        .service
        .transition(id, ShopOrderStatus::Delivered, partner, None)
        .await
        .unwrap();

    assert_eq!(delivered.status, ShopOrderStatus::Delivered);
    assert_eq!(delivered.assigned_delivery_partner, Some(partner));
    assert_eq!(delivered.subtotal, Decimal::new(250, 0));
    assert!(delivered.delivered_at.is_some());
    assert_eq!(
        h.metrics.transitions.with_label_values(&["out of delivery", "delivered"]).get(),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_status_changes_commit_once() {
    let h = Harness::new().await;
    let order = h.place_cod().await;
    let id = order.shop_orders[0].id;
    let owner = h.shop_a.owner_id;
    let before = h.service.get_shop_order(id).await.unwrap();

    let h = Arc::new(h);
    let mut attempts = Vec::new();
    for _ in 0..8 {
        let h = h.clone();
        attempts.push(tokio::spawn(async move {
            h.service.transition(id, ShopOrderStatus::Preparing, owner, None).await
        }));
    }

    let mut committed = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(so) => {
                assert_eq!(so.status, ShopOrderStatus::Preparing);
                committed += 1;
            }
            // lost the race, or loaded after the winner committed
            Err(OrderError::Conflict(_)) | Err(OrderError::InvalidTransition { .. }) => {}
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }

    assert_eq!(committed, 1);
    let stored = h.service.get_shop_order(id).await.unwrap();
    assert_eq!(stored.status, ShopOrderStatus::Preparing);
    assert_eq!(stored.version, before.version + 1);
    assert_eq!(h.service.shop_order_history(id).await.unwrap().len() as i64, stored.version);
    assert_eq!(
        h.metrics.transitions.with_label_values(&["pending", "preparing"]).get(),
        1
    );
}

#[tokio::test]
async fn test_status_changes_reach_every_role() {
    let h = Harness::new().await;
    let partner = h.partner_near_a(0.5).await;
    let (_, ready) = h.ready_shop_order().await;
    h.service.accept_assignment(ready.id, partner).await.unwrap();

    let mut customer = h.notifier.subscribe(Audience::Customer(h.customer)).await;
    let mut owner = h.notifier.subscribe(Audience::Owner(h.shop_a.owner_id)).await;
    let mut rider = h.notifier.subscribe(Audience::DeliveryPartner(partner)).await;

    h.service
        .transition(ready.id, ShopOrderStatus::OutOfDelivery, h.shop_a.owner_id, None)
        .await
        .unwrap();

    for feed in [&mut customer, &mut owner, &mut rider] {
        let envelope = feed.try_recv().unwrap();
        assert_eq!(envelope.event_type, "statusChanged");
        assert_eq!(envelope.aggregate_id, ready.id);
    }
}

#[tokio::test]
async fn test_online_orders_wait_for_payment() {
    let h = Harness::new().await;
    let mut owner_feed = h.notifier.subscribe(Audience::Owner(h.shop_a.owner_id)).await;

    let order = h.service.place_order(h.request("online")).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert!(order.shop_orders.iter().all(|so| so.awaiting_payment));
    assert!(owner_feed.try_recv().is_err());

    let id = order.shop_orders[0].id;
    let unpaid = h
        .service
        .transition(id, ShopOrderStatus::Preparing, h.shop_a.owner_id, None)
        .await;
    assert!(matches!(unpaid, Err(OrderError::Precondition(_))));

    let paid = h.service.confirm_payment(order.id).await.unwrap();
    assert_eq!(paid.payment_status, PaymentStatus::Paid);
    assert!(paid.shop_orders.iter().all(|so| !so.awaiting_payment));
    assert_eq!(owner_feed.try_recv().unwrap().event_type, "newOrder");

    let preparing = h
        .service
        .transition(id, ShopOrderStatus::Preparing, h.shop_a.owner_id, None)
        .await
        .unwrap();
    assert_eq!(preparing.status, ShopOrderStatus::Preparing);

    let again = h.service.confirm_payment(order.id).await;
    assert!(matches!(again, Err(OrderError::Precondition(_))));

    let stored = h.service.get_order(order.id).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn test_cash_orders_notify_owners_at_once() {
    let h = Harness::new().await;
    let mut owner_a = h.notifier.subscribe(Audience::Owner(h.shop_a.owner_id)).await;
    let mut owner_b = h.notifier.subscribe(Audience::Owner(h.shop_b.owner_id)).await;

    let order = h.place_cod().await;

    assert_eq!(owner_a.try_recv().unwrap().aggregate_id, order.shop_orders[0].id);
    assert_eq!(owner_b.try_recv().unwrap().aggregate_id, order.shop_orders[1].id);

    let cod = h.service.confirm_payment(order.id).await;
    assert!(matches!(cod, Err(OrderError::Precondition(_))));
}

#[tokio::test]
async fn test_invalid_checkout_is_rejected() {
    let h = Harness::new().await;

    let mut empty = h.request("cod");
    empty.items.clear();
    assert!(matches!(h.service.place_order(empty).await, Err(OrderError::Validation(_))));

    let card = h.request("card");
    assert!(matches!(h.service.place_order(card).await, Err(OrderError::Validation(_))));

    let mut nowhere = h.request("cod");
    nowhere.delivery_address.location = None;
    assert!(matches!(h.service.place_order(nowhere).await, Err(OrderError::Validation(_))));

    let mut unknown_shop = h.request("cod");
    unknown_shop.items[0].shop_id = Uuid::new_v4();
    assert!(matches!(
        h.service.place_order(unknown_shop).await,
        Err(OrderError::NotFound { entity: "shop", .. })
    ));

    assert_eq!(h.metrics.commands_rejected.with_label_values(&["place_order", "validation"]).get(), 3);
}

#[tokio::test]
async fn test_delete_only_while_everything_is_pending() {
    let h = Harness::new().await;

    let pending = h.place_cod().await;
    let stranger = h.service.delete_order(pending.id, Uuid::new_v4()).await;
    assert!(matches!(stranger, Err(OrderError::Forbidden(_))));

    h.service.delete_order(pending.id, h.customer).await.unwrap();
    assert!(matches!(
        h.service.get_order(pending.id).await,
        Err(OrderError::NotFound { .. })
    ));

    let started = h.place_cod().await;
    h.service
        .transition(started.shop_orders[1].id, ShopOrderStatus::Preparing, h.shop_b.owner_id, None)
        .await
        .unwrap();
    let refused = h.service.delete_order(started.id, h.customer).await;
    assert!(matches!(refused, Err(OrderError::Conflict(_))));
    assert!(h.service.get_order(started.id).await.is_ok());
}

#[tokio::test]
async fn test_cancel_order_cascades_to_unfinished_shop_orders() {
    let h = Harness::new().await;
    let order = h.place_cod().await;
    let (a, b) = (order.shop_orders[0].id, order.shop_orders[1].id);

    h.service
        .transition(a, ShopOrderStatus::Preparing, h.shop_a.owner_id, None)
        .await
        .unwrap();
    h.service.cancel(b, h.shop_b.owner_id, "Out of stock").await.unwrap();

    let blank = h.service.cancel_order(order.id, h.customer, "  ").await;
    assert!(matches!(blank, Err(OrderError::Validation(_))));

    let cancelled = h.service.cancel_order(order.id, h.customer, "Changed my mind").await.unwrap();
    let reasons: Vec<_> = cancelled
        .shop_orders
        .iter()
        .map(|so| (so.status, so.cancellation_reason.as_deref()))
        .collect();
    assert_eq!(
        reasons,
        vec![
            (ShopOrderStatus::Cancelled, Some("Changed my mind")),
            (ShopOrderStatus::Cancelled, Some("Out of stock")),
        ]
    );
}

#[tokio::test]
async fn test_cancelling_releases_partner_and_withdraws_offer() {
    let h = Harness::new().await;
    let partner = h.partner_near_a(1.0).await;
    let other = h.partner_near_a(2.0).await;

    let (_, ready) = h.ready_shop_order().await;
    h.service.accept_assignment(ready.id, partner).await.unwrap();

    let cancelled = h.service.cancel(ready.id, h.customer, "Taking too long").await.unwrap();
    assert_eq!(cancelled.assigned_delivery_partner, None);

    let late = h.service.accept_assignment(ready.id, other).await;
    assert!(late.is_err());

    let again = h.service.cancel(ready.id, h.customer, "Still cancelled").await;
    assert!(matches!(
        again,
        Err(OrderError::InvalidTransition {
            from: ShopOrderStatus::Cancelled,
            to: ShopOrderStatus::Cancelled
        })
    ));
}

#[tokio::test]
async fn test_rating_after_delivery() {
    let h = Harness::new().await;
    let partner = h.partner_near_a(1.0).await;
    let dispatched = h.dispatched_to(partner).await;
    let order_id = dispatched.order_id;

    let early = h.service.rate_order(order_id, h.customer, 5, None).await;
    assert!(matches!(early, Err(OrderError::Precondition(_))));

    let code = h.mailer.last_code(dispatched.id).unwrap();
    h.service.verify_otp(dispatched.id, partner, &code).await.unwrap();
    h.service
        .transition(dispatched.id, ShopOrderStatus::Delivered, partner, None)
        .await
        .unwrap();

    let order = h.service.get_order(order_id).await.unwrap();
    h.service
        .cancel(order.shop_orders[1].id, h.shop_b.owner_id, "Kitchen closed")
        .await
        .unwrap();

    let stranger = h.service.rate_order(order_id, partner, 5, None).await;
    assert!(matches!(stranger, Err(OrderError::Forbidden(_))));
    let out_of_range = h.service.rate_order(order_id, h.customer, 6, None).await;
    assert!(matches!(out_of_range, Err(OrderError::Validation(_))));

    h.service.rate_order(order_id, h.customer, 3, None).await.unwrap();
    let rerated = h
        .service
        .rate_order(order_id, h.customer, 5, Some(" Great ".into()))
        .await
        .unwrap();
    let rating = rerated.rating.unwrap();
    assert_eq!(rating.stars, 5);
    assert_eq!(rating.review.as_deref(), Some("Great"));

    let stored = h.service.get_order(order_id).await.unwrap();
    assert_eq!(stored.rating.map(|r| r.stars), Some(5));
}

#[tokio::test]
async fn test_listings_are_scoped_and_newest_first() {
    let h = Harness::new().await;
    let partner = h.partner_near_a(1.0).await;

    let first = h.place_cod().await;
    h.advance(Duration::minutes(1));
    let second = h.place_cod().await;

    match h.service.list_orders_for_actor(h.customer, Role::Customer).await.unwrap() {
        ActorOrders::Customer(orders) => {
            let ids: Vec<_> = orders.iter().map(|o| o.id).collect();
            assert_eq!(ids, vec![second.id, first.id]);
            assert!(orders.iter().all(|o| o.shop_orders.len() == 2));
        }
        other => panic!("unexpected listing {other:?}"),
    }

    match h.service.list_orders_for_actor(h.shop_b.owner_id, Role::Owner).await.unwrap() {
        ActorOrders::Owner(shop_orders) => {
            let ids: Vec<_> = shop_orders.iter().map(|so| so.id).collect();
            assert_eq!(ids, vec![second.shop_orders[1].id, first.shop_orders[1].id]);
        }
        other => panic!("unexpected listing {other:?}"),
    }

    let id = second.shop_orders[0].id;
    h.service
        .transition(id, ShopOrderStatus::Preparing, h.shop_a.owner_id, None)
        .await
        .unwrap();
    h.service
        .transition(id, ShopOrderStatus::Ready, h.shop_a.owner_id, None)
        .await
        .unwrap();

    match h.service.list_orders_for_actor(partner, Role::DeliveryPartner).await.unwrap() {
        ActorOrders::DeliveryPartner { assigned, offered } => {
            assert!(assigned.is_empty());
            assert_eq!(offered.iter().map(|o| o.shop_order_id).collect::<Vec<_>>(), vec![id]);
        }
        other => panic!("unexpected listing {other:?}"),
    }

    h.service.accept_assignment(id, partner).await.unwrap();
    match h.service.list_orders_for_actor(partner, Role::DeliveryPartner).await.unwrap() {
        ActorOrders::DeliveryPartner { assigned, offered } => {
            assert_eq!(assigned.iter().map(|so| so.id).collect::<Vec<_>>(), vec![id]);
            assert!(offered.is_empty());
        }
        other => panic!("unexpected listing {other:?}"),
    }
}

#[tokio::test]
async fn test_history_rebuilds_the_stored_shop_order() {
    let h = Harness::new().await;
    let partner = h.partner_near_a(1.0).await;
    let dispatched = h.dispatched_to(partner).await;
    h.service.issue_otp(dispatched.id, h.customer).await.unwrap();

    let history = h.service.shop_order_history(dispatched.id).await.unwrap();
    let names: Vec<_> = history.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "ShopOrderCreated",
            "ShopOrderStatusChanged",
            "ShopOrderStatusChanged",
            "DeliveryPartnerAssigned",
            "ShopOrderStatusChanged",
            "DeliveryOtpIssued",
            "DeliveryOtpIssued",
        ]
    );
    let sequence: Vec<_> = history.iter().map(|e| e.sequence_number).collect();
    assert_eq!(sequence, (1..=7).collect::<Vec<i64>>());

    let rebuilt = ShopOrder::load_from_events(&history).unwrap();
    let stored = h.service.get_shop_order(dispatched.id).await.unwrap();
    assert_eq!(rebuilt, stored);
    assert_eq!(rebuilt.version, 7);
}

struct Unreachable;

#[async_trait]
impl Notifier for Unreachable {
    async fn publish(&self, _: &RealtimeEnvelope, _: &[Audience]) -> anyhow::Result<()> {
        anyhow::bail!("connection refused")
    }
}

#[tokio::test]
async fn test_broken_notifier_does_not_block_transitions() {
    let h = Harness::with_notifier(Some(Arc::new(Unreachable))).await;

    let order = h.place_cod().await;
    let id = order.shop_orders[0].id;
    let preparing = h
        .service
        .transition(id, ShopOrderStatus::Preparing, h.shop_a.owner_id, None)
        .await
        .unwrap();

    assert_eq!(preparing.status, ShopOrderStatus::Preparing);
    assert_eq!(h.service.get_shop_order(id).await.unwrap().status, ShopOrderStatus::Preparing);
    assert_eq!(h.metrics.notifications.with_label_values(&["newOrder", "failed"]).get(), 2);
    assert_eq!(h.metrics.notifications.with_label_values(&["statusChanged", "failed"]).get(), 1);
}
