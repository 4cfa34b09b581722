mod common;

use std::sync::Arc;

use chrono::Duration;

use common::Harness;
use delivery_orders::domain::order::{OrderError, ShopOrderStatus};
use delivery_orders::domain::otp::OtpError;
use delivery_orders::notify::Handoff;
use delivery_orders::utils::Clock;

#[tokio::test]
async fn test_code_is_single_use() {
    let h = Harness::new().await;
    let partner = h.partner_near_a(1.0).await;
    let dispatched = h.dispatched_to(partner).await;
    let code = h.mailer.last_code(dispatched.id).unwrap();

    let verified = h.service.verify_otp(dispatched.id, partner, &code).await.unwrap();
    assert!(verified.otp_verified());

    let replay = h.service.verify_otp(dispatched.id, partner, &code).await;
    assert!(matches!(replay, Err(OrderError::Otp(OtpError::AlreadyConsumed))));

    let resend = h.service.issue_otp(dispatched.id, h.customer).await;
    assert!(matches!(resend, Err(OrderError::Precondition(_))));

    assert_eq!(h.metrics.otp_verifications.with_label_values(&["verified"]).get(), 1);
    assert_eq!(h.metrics.otp_verifications.with_label_values(&["otp_already_consumed"]).get(), 1);
}

#[tokio::test]
async fn test_expired_code_then_resend() {
    let h = Harness::new().await;
    let partner = h.partner_near_a(1.0).await;
    let dispatched = h.dispatched_to(partner).await;
    let old = h.mailer.last_code(dispatched.id).unwrap();

    h.advance(Duration::minutes(5));
    let expired = h.service.verify_otp(dispatched.id, partner, &old).await.unwrap_err();
    assert!(matches!(expired, OrderError::Otp(OtpError::Expired)));
    assert_eq!(expired.user_message(), "OTP expired, please resend");

    let mut fresh = h.service.issue_otp(dispatched.id, h.customer).await.unwrap();
    while fresh.code == old {
        fresh = h.service.issue_otp(dispatched.id, h.customer).await.unwrap();
    }
    assert_eq!(fresh.expires_at, h.clock.now() + Duration::minutes(5));
    assert_eq!(h.mailer.last_code(dispatched.id).as_deref(), Some(fresh.code.as_str()));

    let stale = h.service.verify_otp(dispatched.id, partner, &old).await;
    assert!(matches!(stale, Err(OrderError::Otp(OtpError::InvalidCode))));

    h.service.verify_otp(dispatched.id, partner, &fresh.code).await.unwrap();
    let delivered = h
        .service
        .transition(dispatched.id, ShopOrderStatus::Delivered, partner, None)
        .await
        .unwrap();
    assert_eq!(delivered.status, ShopOrderStatus::Delivered);
}

#[tokio::test]
async fn test_every_issue_is_handed_to_the_customer() {
    let h = Harness::new().await;
    let partner = h.partner_near_a(1.0).await;
    let dispatched = h.dispatched_to(partner).await;

    let first = dispatched.delivery_otp.clone().unwrap();
    let second = h.service.issue_otp(dispatched.id, partner).await.unwrap();
    assert_eq!(first.version, 1);
    assert_eq!(second.version, 2);

    let handed: Vec<_> = h
        .mailer
        .sent()
        .into_iter()
        .filter_map(|handoff| match handoff {
            Handoff::DeliveryOtp { recipient, .. } => Some(recipient),
            _ => None,
        })
        .collect();
    assert_eq!(handed, vec![h.customer, h.customer]);
}

#[tokio::test]
async fn test_who_may_issue_and_verify() {
    let h = Harness::new().await;
    let partner = h.partner_near_a(1.0).await;
    let (_, ready) = h.ready_shop_order().await;

    let not_dispatched = h.service.issue_otp(ready.id, h.customer).await;
    assert!(matches!(not_dispatched, Err(OrderError::Precondition(_))));

    h.service.accept_assignment(ready.id, partner).await.unwrap();
    h.service
        .transition(ready.id, ShopOrderStatus::OutOfDelivery, h.shop_a.owner_id, None)
        .await
        .unwrap();
    let code = h.mailer.last_code(ready.id).unwrap();

    let owner_issue = h.service.issue_otp(ready.id, h.shop_a.owner_id).await;
    assert!(matches!(owner_issue, Err(OrderError::Forbidden(_))));

    let customer_verify = h.service.verify_otp(ready.id, h.customer, &code).await;
    assert!(matches!(customer_verify, Err(OrderError::Forbidden(_))));

    let owner_delivers = h
        .service
        .transition(ready.id, ShopOrderStatus::Delivered, h.shop_a.owner_id, None)
        .await;
    assert!(matches!(owner_delivers, Err(OrderError::Forbidden(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_resend_racing_verify_never_accepts_a_stale_code() {
    for _ in 0..20 {
        let h = Arc::new(Harness::new().await);
        let partner = h.partner_near_a(1.0).await;
        let dispatched = h.dispatched_to(partner).await;
        let old = h.mailer.last_code(dispatched.id).unwrap();

        let verifier = {
            let h = h.clone();
            let old = old.clone();
            tokio::spawn(async move { h.service.verify_otp(dispatched.id, partner, &old).await })
        };
        let resender = {
            let h = h.clone();
            let customer = h.customer;
            tokio::spawn(async move { h.service.issue_otp(dispatched.id, customer).await })
        };

        let verified = verifier.await.unwrap();
        let reissued = resender.await.unwrap();

        match (verified, reissued) {
            // Verify committed first; nothing left to resend
            (Ok(_), Err(OrderError::Precondition(_))) => {}
            // Resend committed first; the old code is dead unless the new one happens to match
            (Err(OrderError::Otp(OtpError::InvalidCode)), Ok(_)) => {}
            (Ok(_), Ok(fresh)) => assert_eq!(fresh.code, old, "stale code accepted after a resend"),
            (v, r) => panic!("unexpected outcome: verify {v:?}, resend {r:?}"),
        }
    }
}
