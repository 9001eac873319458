use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::entities::order::Model as OrderModel;
use crate::errors::ServiceError;
use crate::gateways::{
    to_minor_units, ClientLaunchParams, CreateSessionRequest, CustomerInfo, GatewaySession,
    PaymentMethod, VerificationRequest,
};
use crate::handlers::require_admin;
use crate::services::orders::OrderStatus;
use crate::services::payments::AppliedVerification;
use crate::AppState;

// ==================== Request/response DTOs ====================

/// Shared creation request for all three gateways.
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
    /// Must equal the stored order total; the stored value is authoritative
    pub amount: Decimal,
    /// Defaults to the order currency
    pub currency: Option<String>,
    pub order_id: Uuid,
    #[validate]
    pub customer_info: CustomerInfo,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RazorpayPaymentResponse {
    pub success: bool,
    pub razorpay_order_id: String,
    /// Minor units (paise)
    pub amount: i64,
    pub currency: String,
    pub key_id: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RazorpayVerifyRequest {
    pub razorpay_order_id: String,
    pub razorpay_payment_id: String,
    pub razorpay_signature: String,
    #[serde(rename = "orderId")]
    pub order_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RazorpayVerifyResponse {
    pub success: bool,
    pub order_id: Uuid,
    pub payment_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PhonepePaymentResponse {
    pub success: bool,
    pub transaction_id: String,
    pub redirect_url: String,
    /// Minor units (paise)
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PhonepeVerifyRequest {
    pub transaction_id: String,
    pub order_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PhonepeVerifyResponse {
    pub success: bool,
    pub payment_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    pub order_id: Uuid,
    pub transaction_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PhonepeCallbackParams {
    #[serde(rename = "orderId")]
    pub order_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookResponse {
    pub success: bool,
    pub message: String,
    pub event: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CashfreePaymentResponse {
    pub success: bool,
    pub cf_order_id: String,
    pub payment_session_id: String,
    /// Major units; Cashfree checkout takes rupees
    pub amount: Decimal,
    pub currency: String,
    pub environment: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CashfreeVerifyRequest {
    pub cf_order_id: String,
    pub payment_id: Option<String>,
    pub order_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CashfreeVerifyResponse {
    pub success: bool,
    pub payment_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    pub order_id: Uuid,
    pub cf_order_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CleanupResponse {
    pub success: bool,
    pub message: String,
    pub processed: usize,
    pub orders: Vec<Uuid>,
}

// ==================== Shared flow ====================

/// Loads the order and runs the creation-side checks shared by all three
/// gateways: the order must exist, be awaiting payment with the matching
/// method, and the client-posted amount must agree with the stored total
/// (the stored total is what gets charged).
async fn load_order_for_session(
    state: &AppState,
    method: PaymentMethod,
    request: &CreatePaymentRequest,
) -> Result<OrderModel, ServiceError> {
    request.validate()?;

    let order = state
        .services
        .orders
        .get_order_required(request.order_id)
        .await?;

    if order.payment_method != method.to_string() {
        return Err(ServiceError::ValidationError(format!(
            "Order {} was placed with payment method '{}', not '{}'",
            order.id, order.payment_method, method
        )));
    }
    if order.status != OrderStatus::Pending.to_string() {
        return Err(ServiceError::Conflict(format!(
            "Order {} is not awaiting payment (status: {})",
            order.id, order.status
        )));
    }
    if request.amount != order.total_amount {
        return Err(ServiceError::ValidationError(
            "Amount does not match the order total".to_string(),
        ));
    }
    if let Some(currency) = &request.currency {
        if !currency.eq_ignore_ascii_case(&order.currency) {
            return Err(ServiceError::ValidationError(format!(
                "Order {} is denominated in {}, not {}",
                order.id, order.currency, currency
            )));
        }
    }

    Ok(order)
}

/// Creates the gateway session and persists the returned reference on the
/// order row. A gateway-side creation failure proactively cancels the
/// order so it never lingers as an orphaned pending row.
async fn create_session_for(
    state: &AppState,
    method: PaymentMethod,
    order: &OrderModel,
    customer: CustomerInfo,
) -> Result<GatewaySession, ServiceError> {
    let adapter = state.services.gateways.get(method)?;

    let session_request = CreateSessionRequest {
        order_id: order.id,
        order_number: order.order_number.clone(),
        amount: order.total_amount,
        currency: order.currency.clone(),
        customer,
    };

    match adapter.create_session(&session_request).await {
        Ok(session) => {
            state
                .services
                .orders
                .attach_gateway_reference(order.id, method, &session.gateway_reference)
                .await?;
            Ok(session)
        }
        Err(ServiceError::ValidationError(msg)) => Err(ServiceError::ValidationError(msg)),
        Err(err) => {
            warn!(order_id = %order.id, error = %err, "Gateway order creation failed; cancelling order");
            if let Err(cancel_err) = state
                .services
                .payments
                .apply_failure(order.id, "gateway order creation failed")
                .await
            {
                warn!(order_id = %order.id, error = %cancel_err, "Could not cancel order after gateway failure");
            }
            Err(err)
        }
    }
}

fn frontend_redirect(state: &AppState, route: &str) -> Response {
    let url = format!(
        "{}{}",
        state.config.frontend_base_url.trim_end_matches('/'),
        route
    );
    (StatusCode::FOUND, [(header::LOCATION, url)]).into_response()
}

// ==================== Razorpay ====================

/// Create a Razorpay order for hosted-overlay checkout
#[utoipa::path(
    post,
    path = "/api/v1/payments/razorpay",
    request_body = CreatePaymentRequest,
    responses(
        (status = 200, description = "Gateway order created", body = RazorpayPaymentResponse),
        (status = 400, description = "Bad request", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway error", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn create_razorpay_payment(
    State(state): State<AppState>,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<Json<RazorpayPaymentResponse>, ServiceError> {
    let order = load_order_for_session(&state, PaymentMethod::Razorpay, &request).await?;
    let session =
        create_session_for(&state, PaymentMethod::Razorpay, &order, request.customer_info).await?;

    let ClientLaunchParams::HostedOverlay { key_id } = session.launch else {
        return Err(ServiceError::InternalError(
            "Razorpay adapter returned unexpected launch parameters".to_string(),
        ));
    };

    Ok(Json(RazorpayPaymentResponse {
        success: true,
        razorpay_order_id: session.gateway_reference,
        amount: to_minor_units(order.total_amount)?,
        currency: order.currency,
        key_id,
    }))
}

/// Verify a Razorpay completion handler result
///
/// Trust is cryptographic: the signature is recomputed server-side. A
/// mismatch cancels the order and reports failure.
#[utoipa::path(
    post,
    path = "/api/v1/payments/razorpay/verify",
    request_body = RazorpayVerifyRequest,
    responses(
        (status = 200, description = "Payment verified", body = RazorpayVerifyResponse),
        (status = 401, description = "Signature mismatch", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn verify_razorpay_payment(
    State(state): State<AppState>,
    Json(request): Json<RazorpayVerifyRequest>,
) -> Result<Json<RazorpayVerifyResponse>, ServiceError> {
    let order = state
        .services
        .orders
        .get_order_required(request.order_id)
        .await?;

    // While the order is still pending, the stored gateway reference must
    // match what the completion handler claims to verify
    if order.status == OrderStatus::Pending.to_string() {
        if let Some(stored_ref) = &order.payment_transaction_id {
            if stored_ref != &request.razorpay_order_id {
                warn!(
                    order_id = %order.id,
                    expected = %stored_ref,
                    received = %request.razorpay_order_id,
                    "Razorpay order id mismatch"
                );
                return Err(ServiceError::BadRequest(
                    "Gateway order id does not match this order".to_string(),
                ));
            }
        }
    }

    let adapter = state.services.gateways.get(PaymentMethod::Razorpay)?;
    let outcome = adapter
        .verify(&VerificationRequest::Razorpay {
            gateway_order_id: request.razorpay_order_id.clone(),
            payment_id: request.razorpay_payment_id.clone(),
            signature: request.razorpay_signature.clone(),
        })
        .await?;

    match state
        .services
        .payments
        .apply_outcome(request.order_id, &outcome)
        .await?
    {
        AppliedVerification::Completed => Ok(Json(RazorpayVerifyResponse {
            success: true,
            order_id: request.order_id,
            payment_id: request.razorpay_payment_id,
        })),
        // A forged or corrupted signature already cancelled the order
        AppliedVerification::Failed => Err(ServiceError::SignatureVerificationFailed),
        AppliedVerification::Pending => Err(ServiceError::InternalError(
            "Razorpay verification cannot be pending".to_string(),
        )),
    }
}

// ==================== PhonePe ====================

/// Create a PhonePe pay-page session (full-page redirect flow)
#[utoipa::path(
    post,
    path = "/api/v1/payments/phonepe",
    request_body = CreatePaymentRequest,
    responses(
        (status = 200, description = "Session created", body = PhonepePaymentResponse),
        (status = 400, description = "Bad request", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway error", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn create_phonepe_payment(
    State(state): State<AppState>,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<Json<PhonepePaymentResponse>, ServiceError> {
    let order = load_order_for_session(&state, PaymentMethod::Phonepe, &request).await?;
    let session =
        create_session_for(&state, PaymentMethod::Phonepe, &order, request.customer_info).await?;

    let ClientLaunchParams::Redirect { url } = session.launch else {
        return Err(ServiceError::InternalError(
            "PhonePe adapter returned unexpected launch parameters".to_string(),
        ));
    };

    Ok(Json(PhonepePaymentResponse {
        success: true,
        transaction_id: session.gateway_reference,
        redirect_url: url,
        amount: to_minor_units(order.total_amount)?,
        currency: order.currency,
    }))
}

/// PhonePe redirect landing: re-checks the payment out-of-band, applies
/// the transition and bounces the browser to the storefront result page.
#[utoipa::path(
    get,
    path = "/api/v1/payments/phonepe/callback",
    params(("orderId" = Uuid, Query, description = "Originating order")),
    responses((status = 302, description = "Redirect to the storefront result page")),
    tag = "Payments"
)]
pub async fn phonepe_callback(
    State(state): State<AppState>,
    Query(params): Query<PhonepeCallbackParams>,
) -> Response {
    match phonepe_callback_inner(&state, params.order_id).await {
        Ok(applied) => match applied {
            AppliedVerification::Completed => frontend_redirect(&state, "/payment-success"),
            AppliedVerification::Failed => frontend_redirect(&state, "/payment-failed"),
            AppliedVerification::Pending => frontend_redirect(&state, "/payment-pending"),
        },
        Err(err) => {
            warn!(order_id = %params.order_id, error = %err, "PhonePe callback handling failed");
            frontend_redirect(&state, "/payment-error")
        }
    }
}

async fn phonepe_callback_inner(
    state: &AppState,
    order_id: Uuid,
) -> Result<AppliedVerification, ServiceError> {
    let order = state.services.orders.get_order_required(order_id).await?;

    // Already resolved (e.g. by the webhook); route by current state
    if order.status == OrderStatus::Accepted.to_string() {
        return Ok(AppliedVerification::Completed);
    }
    if order.status == OrderStatus::Cancelled.to_string() {
        return Ok(AppliedVerification::Failed);
    }

    let transaction_id = order.payment_transaction_id.clone().ok_or_else(|| {
        ServiceError::InvalidOperation(format!(
            "Order {} has no payment attempt to verify",
            order_id
        ))
    })?;

    let adapter = state.services.gateways.get(PaymentMethod::Phonepe)?;
    let outcome = adapter
        .verify(&VerificationRequest::Phonepe { transaction_id })
        .await?;

    state.services.payments.apply_outcome(order_id, &outcome).await
}

/// Verify a PhonePe payment via the status API
#[utoipa::path(
    post,
    path = "/api/v1/payments/phonepe/verify",
    request_body = PhonepeVerifyRequest,
    responses(
        (status = 200, description = "Status checked", body = PhonepeVerifyResponse),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn verify_phonepe_payment(
    State(state): State<AppState>,
    Json(request): Json<PhonepeVerifyRequest>,
) -> Result<Json<PhonepeVerifyResponse>, ServiceError> {
    let adapter = state.services.gateways.get(PaymentMethod::Phonepe)?;
    let outcome = adapter
        .verify(&VerificationRequest::Phonepe {
            transaction_id: request.transaction_id.clone(),
        })
        .await?;

    let applied = state
        .services
        .payments
        .apply_outcome(request.order_id, &outcome)
        .await?;

    Ok(Json(PhonepeVerifyResponse {
        success: applied == AppliedVerification::Completed,
        payment_status: outcome.status.to_string(),
        amount: outcome.amount_minor,
        order_id: request.order_id,
        transaction_id: request.transaction_id,
        payment_id: outcome.payment_id,
    }))
}

/// PhonePe server-to-server webhook
///
/// Gated on the `X-MERCHANT-ID` header; completion events are still
/// re-verified through the status API before any mutation.
#[utoipa::path(
    post,
    path = "/api/v1/payments/phonepe/webhook",
    responses(
        (status = 200, description = "Event processed", body = WebhookResponse),
        (status = 401, description = "Merchant mismatch", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn phonepe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<Json<WebhookResponse>, ServiceError> {
    let configured = state
        .config
        .gateways
        .phonepe
        .as_ref()
        .ok_or_else(|| ServiceError::ConfigurationError("phonepe".to_string()))?;

    let merchant = headers
        .get("X-MERCHANT-ID")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if merchant != configured.merchant_id {
        warn!(received = %merchant, "PhonePe webhook with unexpected merchant id");
        return Err(ServiceError::Unauthorized(
            "Webhook merchant id mismatch".to_string(),
        ));
    }

    let event = payload
        .get("event")
        .and_then(|e| e.as_str())
        .unwrap_or("")
        .to_string();

    let message = match event.as_str() {
        "checkout.order.completed" | "checkout.order.failed" => {
            let order = resolve_webhook_order(&state, &payload).await?;

            // Retried deliveries for an already-resolved order are
            // acknowledged without another status round trip
            if order.status != OrderStatus::Pending.to_string() {
                info!(order_id = %order.id, status = %order.status, "Webhook for resolved order");
                return Ok(Json(WebhookResponse {
                    success: true,
                    message: format!("order {} already resolved", order.id),
                    event: event.clone(),
                }));
            }

            let transaction_id = order.payment_transaction_id.clone().ok_or_else(|| {
                ServiceError::InvalidOperation(format!(
                    "Order {} has no payment attempt to verify",
                    order.id
                ))
            })?;

            let adapter = state.services.gateways.get(PaymentMethod::Phonepe)?;
            let outcome = adapter
                .verify(&VerificationRequest::Phonepe { transaction_id })
                .await?;
            let applied = state.services.payments.apply_outcome(order.id, &outcome).await?;

            info!(order_id = %order.id, event = %event, applied = ?applied, "PhonePe webhook applied");
            format!("order {} processed", order.id)
        }
        "pg.refund.completed" | "pg.refund.failed" | "pg.refund.accepted" => {
            // Refunds are admin-tooling territory; acknowledge so PhonePe
            // stops retrying
            info!(event = %event, "PhonePe refund webhook acknowledged");
            "refund event acknowledged".to_string()
        }
        other => {
            info!(event = %other, "Unhandled PhonePe webhook event");
            "event ignored".to_string()
        }
    };

    Ok(Json(WebhookResponse {
        success: true,
        message,
        event,
    }))
}

/// Webhook payloads may carry our order id directly or only the merchant
/// transaction id; accept either.
async fn resolve_webhook_order(
    state: &AppState,
    payload: &Value,
) -> Result<OrderModel, ServiceError> {
    if let Some(order_id) = payload
        .pointer("/payload/orderId")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
    {
        return state.services.orders.get_order_required(order_id).await;
    }

    if let Some(reference) = payload
        .pointer("/payload/merchantTransactionId")
        .and_then(|v| v.as_str())
    {
        return state
            .services
            .orders
            .find_by_gateway_reference(reference)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("No order for transaction {}", reference))
            });
    }

    Err(ServiceError::BadRequest(
        "Webhook payload carries no order reference".to_string(),
    ))
}

// ==================== Cashfree ====================

/// Create a Cashfree order and payment session for modal checkout
#[utoipa::path(
    post,
    path = "/api/v1/payments/cashfree",
    request_body = CreatePaymentRequest,
    responses(
        (status = 200, description = "Session created", body = CashfreePaymentResponse),
        (status = 400, description = "Bad request", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway error", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn create_cashfree_payment(
    State(state): State<AppState>,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<Json<CashfreePaymentResponse>, ServiceError> {
    let order = load_order_for_session(&state, PaymentMethod::Cashfree, &request).await?;
    let session =
        create_session_for(&state, PaymentMethod::Cashfree, &order, request.customer_info).await?;

    let ClientLaunchParams::ModalSession { payment_session_id } = session.launch else {
        return Err(ServiceError::InternalError(
            "Cashfree adapter returned unexpected launch parameters".to_string(),
        ));
    };

    Ok(Json(CashfreePaymentResponse {
        success: true,
        cf_order_id: session.gateway_reference,
        payment_session_id,
        amount: order.total_amount,
        currency: order.currency,
        environment: state.config.gateway_environment().to_string(),
    }))
}

/// Verify a Cashfree payment by listing the order's payments server-side
///
/// The modal flow surfaces no payment id to the client, so the newest
/// entry from the gateway's payments list is authoritative.
#[utoipa::path(
    post,
    path = "/api/v1/payments/cashfree/verify",
    request_body = CashfreeVerifyRequest,
    responses(
        (status = 200, description = "Status checked", body = CashfreeVerifyResponse),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn verify_cashfree_payment(
    State(state): State<AppState>,
    Json(request): Json<CashfreeVerifyRequest>,
) -> Result<Json<CashfreeVerifyResponse>, ServiceError> {
    let adapter = state.services.gateways.get(PaymentMethod::Cashfree)?;
    let outcome = adapter
        .verify(&VerificationRequest::Cashfree {
            cf_order_id: request.cf_order_id.clone(),
        })
        .await?;

    let applied = state
        .services
        .payments
        .apply_outcome(request.order_id, &outcome)
        .await?;

    Ok(Json(CashfreeVerifyResponse {
        success: applied == AppliedVerification::Completed,
        payment_status: outcome.status.to_string(),
        payment_method: outcome.payment_method,
        amount: outcome.amount_minor,
        order_id: request.order_id,
        cf_order_id: request.cf_order_id,
        payment_id: outcome.payment_id.or(request.payment_id),
    }))
}

// ==================== Cleanup ====================

/// Cron/admin: cancel stale pending online-payment orders
#[utoipa::path(
    post,
    path = "/api/v1/payments/cleanup-pending",
    responses(
        (status = 200, description = "Sweep completed", body = CleanupResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn cleanup_pending_orders(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<CleanupResponse>, ServiceError> {
    require_admin(&headers, &state.config)?;

    let swept = state.services.reaper.sweep(Utc::now()).await?;

    Ok(Json(CleanupResponse {
        success: true,
        message: format!("Cancelled {} stale pending orders", swept.len()),
        processed: swept.len(),
        orders: swept,
    }))
}

/// Payment routes
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/razorpay", post(create_razorpay_payment))
        .route("/razorpay/verify", post(verify_razorpay_payment))
        .route("/phonepe", post(create_phonepe_payment))
        .route(
            "/phonepe/callback",
            get(phonepe_callback).post(phonepe_callback),
        )
        .route("/phonepe/verify", post(verify_phonepe_payment))
        .route("/phonepe/webhook", post(phonepe_webhook))
        .route("/cashfree", post(create_cashfree_payment))
        .route("/cashfree/verify", post(verify_cashfree_payment))
        .route("/cleanup-pending", post(cleanup_pending_orders))
}
