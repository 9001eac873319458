//! Shared harness for the integration suites: an in-memory SQLite store
//! with migrations applied, plus row-level seeding helpers.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};
use uuid::Uuid;

use milletmart_api::entities::{order, promo_code};
use milletmart_api::services::orders::OrderService;
use milletmart_api::services::payments::PaymentVerificationService;
use milletmart_api::services::promotions::PromoCodeService;
use milletmart_api::services::reaper::StaleOrderReaper;

/// One-connection pool so every query sees the same in-memory database.
pub async fn setup_db() -> Arc<DatabaseConnection> {
    let mut opt = ConnectOptions::new("sqlite::memory:".to_owned());
    opt.max_connections(1).sqlx_logging(false);

    let db = Database::connect(opt).await.expect("sqlite connection");
    milletmart_api::db::run_migrations(&db)
        .await
        .expect("migrations");
    Arc::new(db)
}

pub struct Services {
    pub orders: OrderService,
    pub payments: PaymentVerificationService,
    pub promotions: PromoCodeService,
}

pub fn build_services(db: &Arc<DatabaseConnection>) -> Services {
    let promotions = PromoCodeService::new(db.clone());
    Services {
        orders: OrderService::new(db.clone(), None),
        payments: PaymentVerificationService::new(db.clone(), promotions.clone(), None),
        promotions,
    }
}

pub fn build_reaper(db: &Arc<DatabaseConnection>, timeout_secs: u64) -> StaleOrderReaper {
    StaleOrderReaper::new(
        db.clone(),
        None,
        std::time::Duration::from_secs(timeout_secs),
    )
}

/// Raw order row specification; defaults describe a fresh pending
/// Razorpay order.
pub struct OrderSpec {
    pub payment_method: &'static str,
    pub status: &'static str,
    pub payment_status: &'static str,
    pub gateway_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub total_amount: Decimal,
    pub promo_code_id: Option<Uuid>,
}

impl Default for OrderSpec {
    fn default() -> Self {
        Self {
            payment_method: "razorpay",
            status: "pending",
            payment_status: "pending",
            gateway_reference: None,
            created_at: Utc::now(),
            total_amount: Decimal::from(1200),
            promo_code_id: None,
        }
    }
}

pub async fn insert_order(db: &DatabaseConnection, spec: OrderSpec) -> Uuid {
    let id = Uuid::new_v4();
    let model = order::ActiveModel {
        id: Set(id),
        order_number: Set(format!("MM-{}", Uuid::new_v4().simple())),
        customer_id: Set(Uuid::new_v4()),
        status: Set(spec.status.to_string()),
        total_amount: Set(spec.total_amount),
        currency: Set("INR".to_string()),
        payment_method: Set(spec.payment_method.to_string()),
        payment_status: Set(spec.payment_status.to_string()),
        payment_transaction_id: Set(spec.gateway_reference),
        payment_verified_at: Set(None),
        shipping_address: Set(Some("12 Ragi Lane, Bengaluru".to_string())),
        notes: Set(None),
        promo_code_id: Set(spec.promo_code_id),
        discount_amount: Set(None),
        created_at: Set(spec.created_at),
        updated_at: Set(Some(spec.created_at)),
        version: Set(1),
    };
    model.insert(db).await.expect("insert order");
    id
}

pub async fn insert_promo(
    db: &DatabaseConnection,
    code: &str,
    discount_type: &str,
    discount_value: Decimal,
    usage_limit: Option<i32>,
) -> Uuid {
    let id = Uuid::new_v4();
    let now = Utc::now();
    let model = promo_code::ActiveModel {
        id: Set(id),
        code: Set(code.to_string()),
        discount_type: Set(discount_type.to_string()),
        discount_value: Set(discount_value),
        usage_limit: Set(usage_limit),
        per_user_limit: Set(None),
        usage_count: Set(0),
        valid_from: Set(now - chrono::Duration::days(1)),
        valid_until: Set(now + chrono::Duration::days(30)),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(Some(now)),
    };
    model.insert(db).await.expect("insert promo code");
    id
}

pub async fn fetch_order(db: &DatabaseConnection, id: Uuid) -> order::Model {
    use sea_orm::EntityTrait;
    order::Entity::find_by_id(id)
        .one(db)
        .await
        .expect("query order")
        .expect("order exists")
}

pub async fn fetch_promo(db: &DatabaseConnection, id: Uuid) -> promo_code::Model {
    use sea_orm::EntityTrait;
    promo_code::Entity::find_by_id(id)
        .one(db)
        .await
        .expect("query promo")
        .expect("promo exists")
}
