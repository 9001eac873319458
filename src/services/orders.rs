use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::order::{
        self, ActiveModel as OrderActiveModel, Entity as OrderEntity, Model as OrderModel,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    gateways::PaymentMethod,
};

/// Order lifecycle states. The payment subsystem only ever writes
/// `pending`, `accepted` and `cancelled`; everything downstream of
/// `accepted` is admin-authored fulfillment progression.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Accepted,
    Processing,
    Shipped,
    OutForDelivery,
    Delivered,
    Completed,
    Cancelled,
}

impl OrderStatus {
    /// No forward path out of these states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Completed)
    }

    /// The transition matrix. Fulfillment moves strictly forward; any
    /// non-terminal state can be cancelled; same-state writes are no-ops.
    pub fn can_transition_to(&self, to: OrderStatus) -> bool {
        use OrderStatus::*;

        if *self == to {
            return true;
        }
        if to == Cancelled {
            return !self.is_terminal();
        }

        matches!(
            (*self, to),
            (Pending, Accepted)
                | (Accepted, Processing)
                | (Processing, Shipped)
                | (Shipped, OutForDelivery)
                | (OutForDelivery, Delivered)
                | (Delivered, Completed)
        )
    }
}

/// Payment state carried on the order row.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

pub(crate) fn parse_status(raw: &str) -> Result<OrderStatus, ServiceError> {
    OrderStatus::from_str(raw)
        .map_err(|_| ServiceError::InvalidStatus(format!("Unknown order status: {}", raw)))
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub customer_id: Uuid,
    #[validate(length(min = 1, message = "Order number is required"))]
    pub order_number: String,
    pub total_amount: Decimal,
    #[validate(length(min = 3, max = 3, message = "Currency must be 3 characters"))]
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub shipping_address: Option<String>,
    pub notes: Option<String>,
    pub promo_code_id: Option<Uuid>,
    pub discount_amount: Option<Decimal>,
}

/// Service for managing orders and their lifecycle transitions
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    pub fn new(db: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self { db, event_sender }
    }

    /// Creates a new order. Cash-on-delivery orders skip the gateway
    /// entirely and are accepted immediately; online orders start
    /// `pending` until verification.
    #[instrument(skip(self, request), fields(customer_id = %request.customer_id, order_number = %request.order_number))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<OrderModel, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        if request.total_amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Order total must be greater than zero".to_string(),
            ));
        }
        if let Some(discount) = request.discount_amount {
            if discount < Decimal::ZERO || discount > request.total_amount {
                return Err(ServiceError::ValidationError(
                    "Discount cannot be negative or exceed the order total".to_string(),
                ));
            }
        }

        let db = &*self.db;
        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let initial_status = if request.payment_method.is_online() {
            OrderStatus::Pending
        } else {
            OrderStatus::Accepted
        };

        let order_active_model = OrderActiveModel {
            id: Set(order_id),
            order_number: Set(request.order_number.clone()),
            customer_id: Set(request.customer_id),
            status: Set(initial_status.to_string()),
            total_amount: Set(request.total_amount),
            currency: Set(request.currency),
            payment_method: Set(request.payment_method.to_string()),
            payment_status: Set(PaymentStatus::Pending.to_string()),
            payment_transaction_id: Set(None),
            payment_verified_at: Set(None),
            shipping_address: Set(request.shipping_address),
            notes: Set(request.notes),
            promo_code_id: Set(request.promo_code_id),
            discount_amount: Set(request.discount_amount),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        };

        let order_model = order_active_model.insert(db).await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to create order in database");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order_id, status = %initial_status, "Order created");

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(Event::OrderCreated(order_id)).await {
                warn!(error = %e, order_id = %order_id, "Failed to send order created event");
            }
        }

        Ok(order_model)
    }

    /// Retrieves an order by ID
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<Option<OrderModel>, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    pub async fn get_order_required(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        self.get_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    pub async fn find_by_order_number(
        &self,
        order_number: &str,
    ) -> Result<Option<OrderModel>, ServiceError> {
        OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    /// Correlates a gateway-side transaction reference back to its order,
    /// used by webhook handlers that only carry the merchant transaction id.
    pub async fn find_by_gateway_reference(
        &self,
        reference: &str,
    ) -> Result<Option<OrderModel>, ServiceError> {
        OrderEntity::find()
            .filter(order::Column::PaymentTransactionId.eq(reference))
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    /// Lists orders with pagination, newest first
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let paginator = OrderEntity::find()
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page.max(1));

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((orders, total))
    }

    /// Applies a status transition after validating it against the
    /// transition matrix. Used by the admin fulfillment endpoints.
    #[instrument(skip(self), fields(order_id = %order_id, new_status = %new_status))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<OrderModel, ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await?;

        let order = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let old_status = parse_status(&order.status)?;

        if !old_status.can_transition_to(new_status) {
            warn!(
                order_id = %order_id,
                from = %old_status,
                to = %new_status,
                "Rejected status transition"
            );
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot transition from status '{}' to '{}'",
                old_status, new_status
            )));
        }

        if old_status == new_status {
            return Ok(order);
        }

        let current_version = order.version;
        let mut active: OrderActiveModel = order.into();
        active.status = Set(new_status.to_string());
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(current_version + 1);

        let updated = active.update(&txn).await?;
        txn.commit().await?;

        info!(order_id = %order_id, from = %old_status, to = %new_status, "Order status updated");

        if let Some(event_sender) = &self.event_sender {
            let event = Event::OrderStatusChanged {
                order_id,
                old_status: old_status.to_string(),
                new_status: new_status.to_string(),
            };
            if let Err(e) = event_sender.send(event).await {
                warn!(error = %e, order_id = %order_id, "Failed to send status changed event");
            }
        }

        Ok(updated)
    }

    /// Records the gateway-side reference on a still-pending order so a
    /// later verification or reaper pass can correlate the attempt.
    #[instrument(skip(self), fields(order_id = %order_id, gateway = %method))]
    pub async fn attach_gateway_reference(
        &self,
        order_id: Uuid,
        method: PaymentMethod,
        gateway_reference: &str,
    ) -> Result<OrderModel, ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await?;

        let order = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let status = parse_status(&order.status)?;
        if status != OrderStatus::Pending {
            return Err(ServiceError::Conflict(format!(
                "Order {} is no longer awaiting payment (status: {})",
                order_id, status
            )));
        }

        let expected_method = order.payment_method.clone();
        if expected_method != method.to_string() {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} was placed with payment method '{}', not '{}'",
                order_id, expected_method, method
            )));
        }

        let current_version = order.version;
        let mut active: OrderActiveModel = order.into();
        active.payment_transaction_id = Set(Some(gateway_reference.to_string()));
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(current_version + 1);

        let updated = active.update(&txn).await?;
        txn.commit().await?;

        if let Some(event_sender) = &self.event_sender {
            let event = Event::PaymentSessionCreated {
                order_id,
                gateway: method.to_string(),
                gateway_reference: gateway_reference.to_string(),
            };
            if let Err(e) = event_sender.send(event).await {
                warn!(error = %e, order_id = %order_id, "Failed to send session created event");
            }
        }

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(OrderStatus::Pending, OrderStatus::Accepted, true)]
    #[case(OrderStatus::Pending, OrderStatus::Cancelled, true)]
    #[case(OrderStatus::Pending, OrderStatus::Shipped, false)]
    #[case(OrderStatus::Accepted, OrderStatus::Processing, true)]
    #[case(OrderStatus::Processing, OrderStatus::Shipped, true)]
    #[case(OrderStatus::Shipped, OrderStatus::OutForDelivery, true)]
    #[case(OrderStatus::OutForDelivery, OrderStatus::Delivered, true)]
    #[case(OrderStatus::Delivered, OrderStatus::Completed, true)]
    #[case(OrderStatus::Shipped, OrderStatus::Processing, false)]
    #[case(OrderStatus::Delivered, OrderStatus::Pending, false)]
    #[case(OrderStatus::Accepted, OrderStatus::Pending, false)]
    fn transition_matrix(
        #[case] from: OrderStatus,
        #[case] to: OrderStatus,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn every_non_terminal_state_can_be_cancelled() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Accepted,
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::OutForDelivery,
            OrderStatus::Delivered,
        ] {
            assert!(status.can_transition_to(OrderStatus::Cancelled));
        }
        assert!(!OrderStatus::Completed.can_transition_to(OrderStatus::Cancelled));
        // Cancellation of an already-cancelled order is a harmless no-op
        assert!(OrderStatus::Cancelled.can_transition_to(OrderStatus::Cancelled));
    }

    #[test]
    fn status_strings_round_trip() {
        assert_eq!(OrderStatus::OutForDelivery.to_string(), "out_for_delivery");
        assert_eq!(
            parse_status("out_for_delivery").unwrap(),
            OrderStatus::OutForDelivery
        );
        assert!(parse_status("unknown_state").is_err());
        assert_eq!(PaymentStatus::Completed.to_string(), "completed");
    }
}
