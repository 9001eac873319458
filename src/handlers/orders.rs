use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::entities::order::Model as OrderModel;
use crate::errors::ServiceError;
use crate::gateways::PaymentMethod;
use crate::handlers::require_admin;
use crate::services::orders::{self as svc_orders, OrderStatus};
use crate::{ApiResponse, AppState, ListQuery, PaginatedResponse};

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateOrderRequest {
    pub customer_id: Uuid,

    /// Cart total before any promo discount
    pub total_amount: Decimal,

    /// `cod`, `razorpay`, `phonepe` or `cashfree`
    pub payment_method: PaymentMethod,

    #[validate(length(min = 1, message = "Shipping address is required"))]
    pub shipping_address: String,

    pub notes: Option<String>,
    pub promo_code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub customer_id: Uuid,
    pub status: OrderStatus,
    pub total_amount: Decimal,
    pub currency: String,
    pub payment_method: String,
    pub payment_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_amount: Option<Decimal>,
    pub shipping_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

pub(crate) fn map_order(model: &OrderModel) -> Result<OrderResponse, ServiceError> {
    Ok(OrderResponse {
        id: model.id,
        order_number: model.order_number.clone(),
        customer_id: model.customer_id,
        status: svc_orders::parse_status(&model.status)?,
        total_amount: model.total_amount,
        currency: model.currency.clone(),
        payment_method: model.payment_method.clone(),
        payment_status: model.payment_status.clone(),
        payment_transaction_id: model.payment_transaction_id.clone(),
        discount_amount: model.discount_amount,
        shipping_address: model.shipping_address.clone(),
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

fn new_order_number() -> String {
    let suffix: u16 = rand::thread_rng().gen_range(0..10_000);
    format!("MM{}{:04}", Utc::now().format("%Y%m%d%H%M%S"), suffix)
}

/// Create an order (checkout confirmation)
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Bad request", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderResponse>>), ServiceError> {
    request.validate()?;

    // Resolve the promo code before the order exists so an invalid code
    // fails the whole checkout
    let (promo_code_id, discount_amount, total_amount) = match &request.promo_code {
        Some(code) => {
            let promo = state
                .services
                .promotions
                .find_active_code(code)
                .await?
                .ok_or_else(|| {
                    ServiceError::ValidationError(format!("Promo code '{}' is not valid", code))
                })?;
            if let Some(per_user) = promo.per_user_limit {
                let used = state
                    .services
                    .promotions
                    .customer_usage(promo.id, request.customer_id)
                    .await?;
                if used >= per_user as u64 {
                    return Err(ServiceError::ValidationError(format!(
                        "Promo code '{}' has already been used the maximum number of times",
                        code
                    )));
                }
            }
            let discount = state
                .services
                .promotions
                .calculate_discount(&promo, request.total_amount)?;
            (
                Some(promo.id),
                Some(discount),
                request.total_amount - discount,
            )
        }
        None => (None, None, request.total_amount),
    };

    let order = state
        .services
        .orders
        .create_order(svc_orders::CreateOrderRequest {
            customer_id: request.customer_id,
            order_number: new_order_number(),
            total_amount,
            currency: state.config.currency.clone(),
            payment_method: request.payment_method,
            shipping_address: Some(request.shipping_address),
            notes: request.notes,
            promo_code_id,
            discount_amount,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(map_order(&order)?)),
    ))
}

/// Get order by ID
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order details", body = ApiResponse<OrderResponse>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state.services.orders.get_order_required(id).await?;
    Ok(Json(ApiResponse::success(map_order(&order)?)))
}

/// List orders with pagination
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    responses(
        (status = 200, description = "Orders", body = ApiResponse<PaginatedResponse<OrderResponse>>)
    ),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(params): Query<ListQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<OrderResponse>>>, ServiceError> {
    let (orders, total) = state
        .services
        .orders
        .list_orders(params.page, params.limit)
        .await?;

    let items = orders
        .iter()
        .map(map_order)
        .collect::<Result<Vec<_>, _>>()?;

    let response = PaginatedResponse {
        items,
        total,
        page: params.page,
        limit: params.limit,
        total_pages: total.div_ceil(params.limit.max(1)),
    };

    Ok(Json(ApiResponse::success(response)))
}

/// Admin: progress an order through fulfillment
///
/// `pending` and `accepted` are written exclusively by the payment
/// subsystem and cannot be set here.
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Invalid transition", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    require_admin(&headers, &state.config)?;

    if matches!(request.status, OrderStatus::Pending | OrderStatus::Accepted) {
        return Err(ServiceError::InvalidStatus(format!(
            "Status '{}' is reserved for the payment flow",
            request.status
        )));
    }

    let order = state
        .services
        .orders
        .update_status(id, request.status)
        .await?;
    Ok(Json(ApiResponse::success(map_order(&order)?)))
}

/// Admin: cancel an order in any non-terminal state
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/cancel",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order cancelled", body = ApiResponse<OrderResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order is terminal", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    require_admin(&headers, &state.config)?;

    let order = state
        .services
        .orders
        .update_status(id, OrderStatus::Cancelled)
        .await?;
    Ok(Json(ApiResponse::success(map_order(&order)?)))
}

/// Order routes
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order).get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/status", put(update_order_status))
        .route("/:id/cancel", post(cancel_order))
}
