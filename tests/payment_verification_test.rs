//! Integration tests for the payment verification transitions: the
//! pending guard, idempotence, and promo usage accounting.

mod common;

use common::{
    build_reaper, build_services, fetch_order, fetch_promo, insert_order, insert_promo, setup_db,
    OrderSpec,
};
use milletmart_api::errors::ServiceError;
use milletmart_api::gateways::VerificationOutcome;
use milletmart_api::services::payments::AppliedVerification;
use rust_decimal_macros::dec;

#[tokio::test]
async fn success_transitions_pending_to_accepted() {
    let db = setup_db().await;
    let services = build_services(&db);

    let order_id = insert_order(
        &db,
        OrderSpec {
            gateway_reference: Some("order_rzp_101".to_string()),
            ..Default::default()
        },
    )
    .await;

    let updated = services
        .payments
        .apply_success(order_id, "pay_abc123")
        .await
        .unwrap();

    assert_eq!(updated.status, "accepted");
    assert_eq!(updated.payment_status, "completed");
    assert_eq!(updated.payment_transaction_id.as_deref(), Some("pay_abc123"));
    assert!(updated.payment_verified_at.is_some());
}

#[tokio::test]
async fn repeated_success_is_idempotent_and_keeps_the_first_timestamp() {
    let db = setup_db().await;
    let services = build_services(&db);

    let order_id = insert_order(
        &db,
        OrderSpec {
            gateway_reference: Some("order_rzp_102".to_string()),
            ..Default::default()
        },
    )
    .await;

    let first = services
        .payments
        .apply_success(order_id, "pay_abc123")
        .await
        .unwrap();
    let first_verified_at = first.payment_verified_at.expect("first verification stamps");
    let first_version = first.version;

    let second = services
        .payments
        .apply_success(order_id, "pay_abc123")
        .await
        .unwrap();

    assert_eq!(second.status, "accepted");
    assert_eq!(second.payment_verified_at, Some(first_verified_at));
    assert_eq!(second.version, first_version);

    let stored = fetch_order(&db, order_id).await;
    assert_eq!(stored.payment_verified_at, Some(first_verified_at));
}

#[tokio::test]
async fn late_success_after_reaper_cancellation_is_a_conflict() {
    let db = setup_db().await;
    let services = build_services(&db);
    let reaper = build_reaper(&db, 300);

    let order_id = insert_order(
        &db,
        OrderSpec {
            gateway_reference: Some("TXN17000000000001".to_string()),
            created_at: chrono::Utc::now() - chrono::Duration::minutes(10),
            ..Default::default()
        },
    )
    .await;

    let swept = reaper.sweep(chrono::Utc::now()).await.unwrap();
    assert_eq!(swept, vec![order_id]);

    // A slow gateway success lands after the order was reaped
    let err = services
        .payments
        .apply_success(order_id, "pay_too_late")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));

    // The order stays cancelled; nothing was resurrected
    let stored = fetch_order(&db, order_id).await;
    assert_eq!(stored.status, "cancelled");
    assert_eq!(stored.payment_status, "failed");
    assert!(stored.payment_verified_at.is_none());
}

#[tokio::test]
async fn failure_cancels_a_pending_order_and_repeats_harmlessly() {
    let db = setup_db().await;
    let services = build_services(&db);

    let order_id = insert_order(
        &db,
        OrderSpec {
            gateway_reference: Some("order_rzp_103".to_string()),
            ..Default::default()
        },
    )
    .await;

    let first = services
        .payments
        .apply_failure(order_id, "signature mismatch")
        .await
        .unwrap();
    assert_eq!(first.status, "cancelled");
    assert_eq!(first.payment_status, "failed");

    // Second failure report (e.g. webhook retry) changes nothing
    let second = services
        .payments
        .apply_failure(order_id, "signature mismatch")
        .await
        .unwrap();
    assert_eq!(second.version, first.version);
}

#[tokio::test]
async fn failure_never_cancels_an_accepted_order() {
    let db = setup_db().await;
    let services = build_services(&db);

    let order_id = insert_order(
        &db,
        OrderSpec {
            gateway_reference: Some("order_rzp_104".to_string()),
            ..Default::default()
        },
    )
    .await;

    services
        .payments
        .apply_success(order_id, "pay_ok")
        .await
        .unwrap();

    let err = services
        .payments
        .apply_failure(order_id, "stale webhook retry")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));

    let stored = fetch_order(&db, order_id).await;
    assert_eq!(stored.status, "accepted");
    assert_eq!(stored.payment_status, "completed");
}

#[tokio::test]
async fn promo_usage_is_counted_exactly_once() {
    let db = setup_db().await;
    let services = build_services(&db);

    let promo_id = insert_promo(&db, "RAGI10", "percentage", dec!(10), Some(100)).await;
    let order_id = insert_order(
        &db,
        OrderSpec {
            gateway_reference: Some("order_rzp_105".to_string()),
            promo_code_id: Some(promo_id),
            ..Default::default()
        },
    )
    .await;

    services
        .payments
        .apply_success(order_id, "pay_with_promo")
        .await
        .unwrap();
    // Idempotent repeat must not double-count
    services
        .payments
        .apply_success(order_id, "pay_with_promo")
        .await
        .unwrap();

    let promo = fetch_promo(&db, promo_id).await;
    assert_eq!(promo.usage_count, 1);
}

#[tokio::test]
async fn ambiguous_outcome_leaves_the_order_untouched() {
    let db = setup_db().await;
    let services = build_services(&db);

    let order_id = insert_order(
        &db,
        OrderSpec {
            gateway_reference: Some("TXN17000000000002".to_string()),
            payment_method: "phonepe",
            ..Default::default()
        },
    )
    .await;

    let applied = services
        .payments
        .apply_outcome(order_id, &VerificationOutcome::pending())
        .await
        .unwrap();
    assert_eq!(applied, AppliedVerification::Pending);

    let stored = fetch_order(&db, order_id).await;
    assert_eq!(stored.status, "pending");
    assert_eq!(stored.payment_status, "pending");
    assert_eq!(stored.version, 1);
}
