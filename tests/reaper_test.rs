//! Integration tests for the stale-order reaper sweep.

mod common;

use chrono::{Duration, Utc};
use common::{build_reaper, fetch_order, insert_order, setup_db, OrderSpec};

#[tokio::test]
async fn sweep_cancels_only_timed_out_online_attempts() {
    let db = setup_db().await;
    let reaper = build_reaper(&db, 300);
    let now = Utc::now();

    // 6 minutes old with a gateway attempt: reaped
    let stale = insert_order(
        &db,
        OrderSpec {
            gateway_reference: Some("TXN17000000000010".to_string()),
            created_at: now - Duration::minutes(6),
            ..Default::default()
        },
    )
    .await;

    // 4 minutes old with a gateway attempt: still inside the window
    let fresh = insert_order(
        &db,
        OrderSpec {
            gateway_reference: Some("TXN17000000000011".to_string()),
            created_at: now - Duration::minutes(4),
            ..Default::default()
        },
    )
    .await;

    // Old but cash-on-delivery (no gateway reference): never touched
    let cod = insert_order(
        &db,
        OrderSpec {
            payment_method: "cod",
            gateway_reference: None,
            created_at: now - Duration::minutes(30),
            ..Default::default()
        },
    )
    .await;

    let swept = reaper.sweep(now).await.unwrap();
    assert_eq!(swept, vec![stale]);

    let stale_row = fetch_order(&db, stale).await;
    assert_eq!(stale_row.status, "cancelled");
    assert_eq!(stale_row.payment_status, "failed");
    assert_eq!(stale_row.version, 2);

    let fresh_row = fetch_order(&db, fresh).await;
    assert_eq!(fresh_row.status, "pending");
    assert_eq!(fresh_row.payment_status, "pending");

    let cod_row = fetch_order(&db, cod).await;
    assert_eq!(cod_row.status, "pending");
}

#[tokio::test]
async fn second_sweep_in_a_row_finds_nothing() {
    let db = setup_db().await;
    let reaper = build_reaper(&db, 300);
    let now = Utc::now();

    insert_order(
        &db,
        OrderSpec {
            gateway_reference: Some("TXN17000000000012".to_string()),
            created_at: now - Duration::minutes(7),
            ..Default::default()
        },
    )
    .await;

    let first = reaper.sweep(now).await.unwrap();
    assert_eq!(first.len(), 1);

    let second = reaper.sweep(now).await.unwrap();
    assert!(second.is_empty());
}

#[tokio::test]
async fn orders_that_never_reached_a_gateway_are_left_for_checkout_retry() {
    let db = setup_db().await;
    let reaper = build_reaper(&db, 300);
    let now = Utc::now();

    // Online method but the gateway session was never created
    let no_attempt = insert_order(
        &db,
        OrderSpec {
            gateway_reference: None,
            created_at: now - Duration::minutes(20),
            ..Default::default()
        },
    )
    .await;

    let swept = reaper.sweep(now).await.unwrap();
    assert!(swept.is_empty());

    let row = fetch_order(&db, no_attempt).await;
    assert_eq!(row.status, "pending");
}
