use std::sync::Arc;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, EntityTrait, Set, TransactionTrait};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::order::{ActiveModel as OrderActiveModel, Entity as OrderEntity, Model as OrderModel},
    errors::ServiceError,
    events::{Event, EventSender},
    gateways::{VerificationOutcome, VerificationStatus},
    services::orders::{parse_status, OrderStatus, PaymentStatus},
    services::promotions::PromoCodeService,
};

/// The result of applying a verification outcome to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppliedVerification {
    /// Order transitioned to accepted (or already was, idempotently)
    Completed,
    /// Order transitioned to cancelled (or already was, idempotently)
    Failed,
    /// Gateway status was ambiguous; nothing was written
    Pending,
}

/// Applies gateway verification outcomes to orders.
///
/// This is the only writer of payment-derived status fields. All three
/// adapters converge here so the accepted/cancelled transition logic
/// exists exactly once, and every write is guarded by "the order must
/// still be pending" to close the race against the reaper.
#[derive(Clone)]
pub struct PaymentVerificationService {
    db: Arc<DbPool>,
    promotions: PromoCodeService,
    event_sender: Option<Arc<EventSender>>,
}

impl PaymentVerificationService {
    pub fn new(
        db: Arc<DbPool>,
        promotions: PromoCodeService,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            promotions,
            event_sender,
        }
    }

    /// Routes a gateway outcome to the matching transition.
    #[instrument(skip(self, outcome), fields(order_id = %order_id, status = %outcome.status))]
    pub async fn apply_outcome(
        &self,
        order_id: Uuid,
        outcome: &VerificationOutcome,
    ) -> Result<AppliedVerification, ServiceError> {
        match outcome.status {
            VerificationStatus::Completed => {
                let payment_id = outcome.payment_id.as_deref().ok_or_else(|| {
                    ServiceError::InternalError(
                        "Completed verification outcome is missing a payment id".to_string(),
                    )
                })?;
                self.apply_success(order_id, payment_id).await?;
                Ok(AppliedVerification::Completed)
            }
            VerificationStatus::Failed => {
                self.apply_failure(order_id, "gateway reported payment failure")
                    .await?;
                Ok(AppliedVerification::Failed)
            }
            VerificationStatus::Pending => {
                // Neither success nor failure: leave the row for polling,
                // the webhook, or the reaper
                info!(order_id = %order_id, "Gateway status still pending; order untouched");
                Ok(AppliedVerification::Pending)
            }
        }
    }

    /// Commits a verified payment: `pending → accepted`,
    /// `payment_status = completed`, verified transaction id and
    /// timestamp attached, promo usage counted.
    ///
    /// Idempotent: a repeat call for an already-accepted order returns the
    /// stored row without touching the verification timestamp or the promo
    /// counter. A success arriving after any other transition (reaper or
    /// admin cancellation) is rejected as a conflict, never applied.
    #[instrument(skip(self), fields(order_id = %order_id, payment_id = %payment_id))]
    pub async fn apply_success(
        &self,
        order_id: Uuid,
        payment_id: &str,
    ) -> Result<OrderModel, ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await?;

        let order = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let status = parse_status(&order.status)?;

        if status == OrderStatus::Accepted
            && order.payment_status == PaymentStatus::Completed.to_string()
        {
            info!(order_id = %order_id, "Verification already applied; returning stored result");
            return Ok(order);
        }

        if status != OrderStatus::Pending {
            warn!(
                order_id = %order_id,
                status = %status,
                "Verified payment arrived for an order that is no longer pending; \
                 flagging for manual reconciliation"
            );
            return Err(ServiceError::Conflict(format!(
                "Order {} is no longer pending (status: {}); payment {} needs reconciliation",
                order_id, status, payment_id
            )));
        }

        let promo_code_id = order.promo_code_id;
        let current_version = order.version;
        let mut active: OrderActiveModel = order.into();
        active.status = Set(OrderStatus::Accepted.to_string());
        active.payment_status = Set(PaymentStatus::Completed.to_string());
        active.payment_transaction_id = Set(Some(payment_id.to_string()));
        active.payment_verified_at = Set(Some(Utc::now()));
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(current_version + 1);

        let updated = active.update(&txn).await.map_err(|e| {
            // The gateway-side payment may have succeeded while this write
            // failed; surfaced as an error, not silently resolved
            error!(error = %e, order_id = %order_id, "Failed to persist verified payment");
            ServiceError::DatabaseError(e)
        })?;

        if let Some(promo_id) = promo_code_id {
            self.promotions.increment_usage(&txn, promo_id).await?;
        }

        txn.commit().await?;

        info!(order_id = %order_id, payment_id = %payment_id, "Payment verified, order accepted");

        if let Some(event_sender) = &self.event_sender {
            let event = Event::PaymentCompleted {
                order_id,
                payment_id: payment_id.to_string(),
            };
            if let Err(e) = event_sender.send(event).await {
                warn!(error = %e, order_id = %order_id, "Failed to send payment completed event");
            }
            if let Some(promo_id) = promo_code_id {
                let _ = event_sender
                    .send(Event::PromoCodeRedeemed {
                        promo_code_id: promo_id,
                        order_id,
                    })
                    .await;
            }
        }

        Ok(updated)
    }

    /// Commits a failed payment: `pending → cancelled`,
    /// `payment_status = failed`. Also used when gateway order creation
    /// itself fails, so no orphaned pending row lingers.
    ///
    /// Idempotent: repeating the call for an already-cancelled order is a
    /// no-op. A failure arriving for an order that moved past pending
    /// (e.g. a webhook retry after a successful verification) is rejected
    /// as a conflict.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn apply_failure(
        &self,
        order_id: Uuid,
        reason: &str,
    ) -> Result<OrderModel, ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await?;

        let order = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let status = parse_status(&order.status)?;

        if status == OrderStatus::Cancelled {
            info!(order_id = %order_id, "Order already cancelled; failure is a no-op");
            return Ok(order);
        }

        if status != OrderStatus::Pending {
            return Err(ServiceError::Conflict(format!(
                "Order {} is not pending (status: {}); refusing to cancel on payment failure",
                order_id, status
            )));
        }

        let current_version = order.version;
        let mut active: OrderActiveModel = order.into();
        active.status = Set(OrderStatus::Cancelled.to_string());
        active.payment_status = Set(PaymentStatus::Failed.to_string());
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(current_version + 1);

        let updated = active.update(&txn).await?;
        txn.commit().await?;

        warn!(order_id = %order_id, reason = %reason, "Payment failed, order cancelled");

        if let Some(event_sender) = &self.event_sender {
            let event = Event::PaymentFailed {
                order_id,
                reason: reason.to_string(),
            };
            if let Err(e) = event_sender.send(event).await {
                warn!(error = %e, order_id = %order_id, "Failed to send payment failed event");
            }
            let _ = event_sender.send(Event::OrderCancelled(order_id)).await;
        }

        Ok(updated)
    }
}
