use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, Validate)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[validate(length(
        min = 1,
        max = 50,
        message = "Order number must be between 1 and 50 characters"
    ))]
    pub order_number: String,

    pub customer_id: Uuid,
    /// Lifecycle state, see services::orders::OrderStatus
    pub status: String,
    pub total_amount: Decimal,
    pub currency: String,
    /// `cod` or one of the gateway names
    pub payment_method: String,
    /// `pending`, `completed` or `failed`
    pub payment_status: String,
    /// Gateway-side order/transaction reference; set when a payment
    /// session is created, replaced by the verified payment id on success
    pub payment_transaction_id: Option<String>,
    pub payment_verified_at: Option<DateTime<Utc>>,
    pub shipping_address: Option<String>,
    pub notes: Option<String>,
    pub promo_code_id: Option<Uuid>,
    pub discount_amount: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::promo_code::Entity",
        from = "Column::PromoCodeId",
        to = "super::promo_code::Column::Id"
    )]
    PromoCode,
}

impl Related<super::promo_code::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PromoCode.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, _insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        Ok(self)
    }
}
