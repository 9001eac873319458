pub mod orders;
pub mod payments;

use std::sync::Arc;

use axum::http::HeaderMap;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::errors::ServiceError;
use crate::events::EventSender;
use crate::gateways::GatewayRegistry;
use crate::services::orders::OrderService;
use crate::services::payments::PaymentVerificationService;
use crate::services::promotions::PromoCodeService;
use crate::services::reaper::StaleOrderReaper;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentVerificationService>,
    pub promotions: PromoCodeService,
    pub reaper: Arc<StaleOrderReaper>,
    pub gateways: GatewayRegistry,
}

impl AppServices {
    /// Builds the service container from shared infrastructure. Everything
    /// is constructed here, once, and injected; no module-level singletons.
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
    ) -> Result<Self, ServiceError> {
        let gateways = GatewayRegistry::from_config(config)?;
        let promotions = PromoCodeService::new(db.clone());
        let orders = Arc::new(OrderService::new(db.clone(), Some(event_sender.clone())));
        let payments = Arc::new(PaymentVerificationService::new(
            db.clone(),
            promotions.clone(),
            Some(event_sender.clone()),
        ));
        let reaper = Arc::new(StaleOrderReaper::new(
            db,
            Some(event_sender),
            config.pending_timeout(),
        ));

        Ok(Self {
            orders,
            payments,
            promotions,
            reaper,
            gateways,
        })
    }
}

/// Admin and cron endpoints require the shared `X-Admin-Token` header.
pub(crate) fn require_admin(headers: &HeaderMap, config: &AppConfig) -> Result<(), ServiceError> {
    let supplied = headers
        .get("X-Admin-Token")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServiceError::Unauthorized("Missing admin token".to_string()))?;

    if supplied != config.admin_api_token {
        return Err(ServiceError::Unauthorized("Invalid admin token".to_string()));
    }
    Ok(())
}
