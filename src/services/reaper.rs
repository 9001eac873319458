use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QuerySelect};
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::order::{self, Entity as OrderEntity},
    errors::ServiceError,
    events::{Event, EventSender},
    services::orders::{OrderStatus, PaymentStatus},
};

/// Cancels pending online-payment orders whose checkout was abandoned.
///
/// An order qualifies when a gateway session was actually started (the
/// transaction reference is present) and the row has sat in `pending`
/// past the timeout. Cash-on-delivery orders never carry a gateway
/// reference and are never touched.
#[derive(Clone)]
pub struct StaleOrderReaper {
    db: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    timeout: Duration,
}

impl StaleOrderReaper {
    pub fn new(db: Arc<DbPool>, event_sender: Option<Arc<EventSender>>, timeout: Duration) -> Self {
        Self {
            db,
            event_sender,
            timeout,
        }
    }

    /// One sweep. Idempotent: a second run right after the first finds
    /// nothing, since the first already moved the rows out of `pending`.
    /// If the batch update fails the sweep simply retries on its next
    /// scheduled run; qualifying rows are still `pending` and eligible.
    #[instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, ServiceError> {
        let cutoff = now
            - chrono::Duration::from_std(self.timeout)
                .map_err(|e| ServiceError::InternalError(format!("reaper timeout: {}", e)))?;

        let stale_ids: Vec<Uuid> = OrderEntity::find()
            .select_only()
            .column(order::Column::Id)
            .filter(order::Column::Status.eq(OrderStatus::Pending.to_string()))
            .filter(order::Column::PaymentTransactionId.is_not_null())
            .filter(order::Column::CreatedAt.lt(cutoff))
            .into_tuple()
            .all(&*self.db)
            .await?;

        if stale_ids.is_empty() {
            return Ok(stale_ids);
        }

        // Single batch update; the status filter is repeated so a row that
        // moved on between the select and the update is left alone
        let result = OrderEntity::update_many()
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::Cancelled.to_string()),
            )
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Failed.to_string()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .filter(order::Column::Id.is_in(stale_ids.clone()))
            .filter(order::Column::Status.eq(OrderStatus::Pending.to_string()))
            .exec(&*self.db)
            .await?;

        info!(
            count = result.rows_affected,
            cutoff = %cutoff,
            "Cancelled stale pending orders"
        );

        if let Some(event_sender) = &self.event_sender {
            let _ = event_sender
                .send(Event::StaleOrdersReaped {
                    count: result.rows_affected,
                    swept_at: now,
                })
                .await;
        }

        Ok(stale_ids)
    }

    /// Spawns the background sweep loop. The handle is detached; the loop
    /// lives for the life of the process.
    pub fn start_worker(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(
                interval_secs = interval.as_secs(),
                timeout_secs = self.timeout.as_secs(),
                "Stale-order reaper started"
            );

            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep(Utc::now()).await {
                    // Nothing to roll back; the next tick retries the whole sweep
                    error!(error = %e, "Reaper sweep failed");
                }
            }
        })
    }
}
