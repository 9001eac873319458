//! End-to-end flows at the service layer: cash-on-delivery checkout,
//! the Razorpay verification round trip, and admin fulfillment
//! progression.

mod common;

use common::{build_services, fetch_order, insert_promo, setup_db};
use milletmart_api::config::RazorpayConfig;
use milletmart_api::errors::ServiceError;
use milletmart_api::gateways::razorpay::RazorpayGateway;
use milletmart_api::gateways::signature;
use milletmart_api::gateways::{PaymentGateway, PaymentMethod, VerificationRequest};
use milletmart_api::services::orders::{CreateOrderRequest, OrderStatus};
use rust_decimal_macros::dec;
use uuid::Uuid;

fn checkout_request(method: PaymentMethod, total: rust_decimal::Decimal) -> CreateOrderRequest {
    CreateOrderRequest {
        customer_id: Uuid::new_v4(),
        order_number: format!("MM-{}", Uuid::new_v4().simple()),
        total_amount: total,
        currency: "INR".to_string(),
        payment_method: method,
        shipping_address: Some("12 Ragi Lane, Bengaluru".to_string()),
        notes: None,
        promo_code_id: None,
        discount_amount: None,
    }
}

#[tokio::test]
async fn cod_checkout_is_accepted_without_any_gateway_step() {
    let db = setup_db().await;
    let services = build_services(&db);

    let order = services
        .orders
        .create_order(checkout_request(PaymentMethod::Cod, dec!(499)))
        .await
        .unwrap();

    assert_eq!(order.status, "accepted");
    assert_eq!(order.payment_method, "cod");
    // COD collects on delivery; the payment subsystem owes no transition
    assert_eq!(order.payment_status, "pending");
    assert!(order.payment_transaction_id.is_none());
}

#[tokio::test]
async fn online_checkout_starts_pending() {
    let db = setup_db().await;
    let services = build_services(&db);

    let order = services
        .orders
        .create_order(checkout_request(PaymentMethod::Razorpay, dec!(1200)))
        .await
        .unwrap();

    assert_eq!(order.status, "pending");
    assert_eq!(order.payment_status, "pending");
}

#[tokio::test]
async fn razorpay_round_trip_with_a_valid_signature_accepts_the_order() {
    let db = setup_db().await;
    let services = build_services(&db);

    let order = services
        .orders
        .create_order(checkout_request(PaymentMethod::Razorpay, dec!(1200)))
        .await
        .unwrap();

    // Gateway order creation persisted the reference before checkout opened
    services
        .orders
        .attach_gateway_reference(order.id, PaymentMethod::Razorpay, "order_rzp_e2e")
        .await
        .unwrap();

    // Completion handler reports back; verification is pure crypto
    let gateway = RazorpayGateway::new(
        reqwest::Client::new(),
        RazorpayConfig {
            key_id: "rzp_test_key".to_string(),
            key_secret: "test_secret_key".to_string(),
            base_url: "https://api.razorpay.com".to_string(),
        },
    );
    let sig =
        signature::razorpay_signature("test_secret_key", "order_rzp_e2e", "pay_e2e_1").unwrap();
    let outcome = gateway
        .verify(&VerificationRequest::Razorpay {
            gateway_order_id: "order_rzp_e2e".to_string(),
            payment_id: "pay_e2e_1".to_string(),
            signature: sig,
        })
        .await
        .unwrap();

    services
        .payments
        .apply_outcome(order.id, &outcome)
        .await
        .unwrap();

    let stored = fetch_order(&db, order.id).await;
    assert_eq!(stored.status, "accepted");
    assert_eq!(stored.payment_status, "completed");
    assert_eq!(stored.payment_transaction_id.as_deref(), Some("pay_e2e_1"));
}

#[tokio::test]
async fn razorpay_round_trip_with_a_forged_signature_cancels_explicitly() {
    let db = setup_db().await;
    let services = build_services(&db);

    let order = services
        .orders
        .create_order(checkout_request(PaymentMethod::Razorpay, dec!(1200)))
        .await
        .unwrap();
    services
        .orders
        .attach_gateway_reference(order.id, PaymentMethod::Razorpay, "order_rzp_e2e2")
        .await
        .unwrap();

    let gateway = RazorpayGateway::new(
        reqwest::Client::new(),
        RazorpayConfig {
            key_id: "rzp_test_key".to_string(),
            key_secret: "test_secret_key".to_string(),
            base_url: "https://api.razorpay.com".to_string(),
        },
    );
    let outcome = gateway
        .verify(&VerificationRequest::Razorpay {
            gateway_order_id: "order_rzp_e2e2".to_string(),
            payment_id: "pay_e2e_2".to_string(),
            signature: "0".repeat(64),
        })
        .await
        .unwrap();

    services
        .payments
        .apply_outcome(order.id, &outcome)
        .await
        .unwrap();

    // Explicit failure handling, never a silently inconsistent row
    let stored = fetch_order(&db, order.id).await;
    assert_eq!(stored.status, "cancelled");
    assert_eq!(stored.payment_status, "failed");
}

#[tokio::test]
async fn checkout_applies_an_active_promo_code() {
    let db = setup_db().await;
    let services = build_services(&db);

    let promo_id = insert_promo(&db, "MILLET10", "percentage", dec!(10), None).await;
    let promo = services
        .promotions
        .find_active_code("MILLET10")
        .await
        .unwrap()
        .expect("code is active");
    assert_eq!(promo.id, promo_id);

    let discount = services
        .promotions
        .calculate_discount(&promo, dec!(500))
        .unwrap();
    assert_eq!(discount, dec!(50.00));

    let mut request = checkout_request(PaymentMethod::Cod, dec!(450));
    request.promo_code_id = Some(promo_id);
    request.discount_amount = Some(discount);
    let order = services.orders.create_order(request).await.unwrap();

    assert_eq!(order.promo_code_id, Some(promo_id));
    assert_eq!(order.discount_amount, Some(dec!(50.00)));
}

#[tokio::test]
async fn admin_progression_moves_strictly_forward() {
    let db = setup_db().await;
    let services = build_services(&db);

    let order = services
        .orders
        .create_order(checkout_request(PaymentMethod::Cod, dec!(750)))
        .await
        .unwrap();
    assert_eq!(order.status, "accepted");

    for status in [
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::OutForDelivery,
        OrderStatus::Delivered,
        OrderStatus::Completed,
    ] {
        services.orders.update_status(order.id, status).await.unwrap();
    }

    // Terminal: no going back
    let err = services
        .orders
        .update_status(order.id, OrderStatus::Processing)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidStatus(_)));

    let stored = fetch_order(&db, order.id).await;
    assert_eq!(stored.status, "completed");
}

#[tokio::test]
async fn skipping_a_fulfillment_step_is_rejected() {
    let db = setup_db().await;
    let services = build_services(&db);

    let order = services
        .orders
        .create_order(checkout_request(PaymentMethod::Cod, dec!(300)))
        .await
        .unwrap();

    let err = services
        .orders
        .update_status(order.id, OrderStatus::Shipped)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidStatus(_)));
}
