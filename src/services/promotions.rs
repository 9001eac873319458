use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::order,
    entities::promo_code::{
        self, ActiveModel as PromoActiveModel, Entity as PromoCode, Model as PromoCodeModel,
    },
    errors::ServiceError,
};

/// Discount shape of a promo code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

#[derive(Clone)]
pub struct PromoCodeService {
    db: Arc<DbPool>,
}

impl PromoCodeService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Finds a usable promo code: active, inside its validity window and
    /// under its global usage cap.
    pub async fn find_active_code(
        &self,
        code: &str,
    ) -> Result<Option<PromoCodeModel>, ServiceError> {
        let now = Utc::now();

        let promo = PromoCode::find()
            .filter(promo_code::Column::Code.eq(code))
            .filter(promo_code::Column::IsActive.eq(true))
            .filter(promo_code::Column::ValidFrom.lte(now))
            .filter(promo_code::Column::ValidUntil.gte(now))
            .one(&*self.db)
            .await?;

        if let Some(ref promo) = promo {
            if let Some(limit) = promo.usage_limit {
                if promo.usage_count >= limit {
                    warn!(code = %code, "Promo code has reached its usage limit");
                    return Ok(None);
                }
            }
        }

        Ok(promo)
    }

    /// Discount for a subtotal; capped at the subtotal, never negative.
    pub fn calculate_discount(
        &self,
        promo: &PromoCodeModel,
        subtotal: Decimal,
    ) -> Result<Decimal, ServiceError> {
        let discount_type = DiscountType::from_str(&promo.discount_type).map_err(|_| {
            ServiceError::InternalError(format!(
                "Promo code {} has unknown discount type '{}'",
                promo.id, promo.discount_type
            ))
        })?;

        let discount = match discount_type {
            DiscountType::Percentage => {
                (subtotal * promo.discount_value / Decimal::from(100)).round_dp(2)
            }
            DiscountType::Fixed => promo.discount_value,
        };

        let capped = discount.min(subtotal).max(Decimal::ZERO);
        debug!(promo_id = %promo.id, %subtotal, discount = %capped, "Calculated promo discount");
        Ok(capped)
    }

    /// How many live (non-cancelled) orders a customer already has
    /// against this code, for the per-user cap.
    pub async fn customer_usage(
        &self,
        promo_code_id: Uuid,
        customer_id: Uuid,
    ) -> Result<u64, ServiceError> {
        use sea_orm::PaginatorTrait;

        order::Entity::find()
            .filter(order::Column::PromoCodeId.eq(promo_code_id))
            .filter(order::Column::CustomerId.eq(customer_id))
            .filter(order::Column::Status.ne("cancelled"))
            .count(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    /// Increments the usage counter; called once per successfully paid
    /// order, inside the verification transaction.
    pub async fn increment_usage<C: ConnectionTrait>(
        &self,
        conn: &C,
        promo_code_id: Uuid,
    ) -> Result<(), ServiceError> {
        let promo = PromoCode::find_by_id(promo_code_id)
            .one(conn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Promo code {} not found", promo_code_id))
            })?;

        let current = promo.usage_count;
        let mut active: PromoActiveModel = promo.into();
        active.usage_count = Set(current + 1);
        active.updated_at = Set(Some(Utc::now()));
        active.update(conn).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use sea_orm::DatabaseConnection;

    fn promo(discount_type: &str, value: Decimal) -> PromoCodeModel {
        let now = Utc::now();
        PromoCodeModel {
            id: Uuid::new_v4(),
            code: "MILLET10".to_string(),
            discount_type: discount_type.to_string(),
            discount_value: value,
            usage_limit: None,
            per_user_limit: None,
            usage_count: 0,
            valid_from: now,
            valid_until: now + chrono::Duration::days(30),
            is_active: true,
            created_at: now,
            updated_at: Some(now),
        }
    }

    fn service() -> PromoCodeService {
        PromoCodeService::new(Arc::new(DatabaseConnection::Disconnected))
    }

    #[test]
    fn percentage_discount_is_computed_on_the_subtotal() {
        let discount = service()
            .calculate_discount(&promo("percentage", dec!(10)), dec!(499))
            .unwrap();
        assert_eq!(discount, dec!(49.90));
    }

    #[test]
    fn fixed_discount_is_capped_at_the_subtotal() {
        let discount = service()
            .calculate_discount(&promo("fixed", dec!(150)), dec!(99))
            .unwrap();
        assert_eq!(discount, dec!(99));
    }

    #[test]
    fn unknown_discount_type_is_an_internal_error() {
        let err = service()
            .calculate_discount(&promo("bogo", dec!(1)), dec!(100))
            .unwrap_err();
        assert!(matches!(err, ServiceError::InternalError(_)));
    }
}
