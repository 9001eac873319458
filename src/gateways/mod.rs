use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::config::AppConfig;
use crate::errors::ServiceError;

pub mod cashfree;
pub mod phonepe;
pub mod razorpay;
pub mod signature;

/// How an order is paid. `cod` never touches a gateway.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cod,
    Razorpay,
    Phonepe,
    Cashfree,
}

impl PaymentMethod {
    pub fn is_online(&self) -> bool {
        !matches!(self, PaymentMethod::Cod)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CustomerInfo {
    #[validate(length(min = 1, message = "Customer name is required"))]
    pub name: String,
    #[validate(email(message = "Customer email must be valid"))]
    pub email: String,
    #[validate(length(min = 1, message = "Customer phone is required"))]
    pub phone: String,
}

/// Server-side order-creation request handed to an adapter. The amount is
/// taken from the stored order row, never from the client.
#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    pub order_id: Uuid,
    pub order_number: String,
    pub amount: Decimal,
    pub currency: String,
    pub customer: CustomerInfo,
}

/// What the client needs to launch the gateway's checkout UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientLaunchParams {
    /// Hosted overlay opened with a publishable key (Razorpay)
    HostedOverlay { key_id: String },
    /// Full-page redirect (PhonePe)
    Redirect { url: String },
    /// Modal checkout bootstrapped from a session id (Cashfree)
    ModalSession { payment_session_id: String },
}

#[derive(Debug, Clone)]
pub struct GatewaySession {
    /// Gateway-side order/transaction reference, persisted on the order
    /// row before the customer ever sees the checkout UI
    pub gateway_reference: String,
    pub launch: ClientLaunchParams,
}

/// Gateway-specific inputs for a verification pass.
#[derive(Debug, Clone)]
pub enum VerificationRequest {
    Razorpay {
        gateway_order_id: String,
        payment_id: String,
        signature: String,
    },
    Phonepe {
        transaction_id: String,
    },
    Cashfree {
        cf_order_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, strum::Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Completed,
    Failed,
    /// Neither success nor failure yet; the caller must not mutate the
    /// order and should re-check later
    Pending,
}

#[derive(Debug, Clone)]
pub struct VerificationOutcome {
    pub status: VerificationStatus,
    pub payment_id: Option<String>,
    pub payment_method: Option<String>,
    pub amount_minor: Option<i64>,
}

impl VerificationOutcome {
    pub fn completed(payment_id: impl Into<String>) -> Self {
        Self {
            status: VerificationStatus::Completed,
            payment_id: Some(payment_id.into()),
            payment_method: None,
            amount_minor: None,
        }
    }

    pub fn failed() -> Self {
        Self {
            status: VerificationStatus::Failed,
            payment_id: None,
            payment_method: None,
            amount_minor: None,
        }
    }

    pub fn pending() -> Self {
        Self {
            status: VerificationStatus::Pending,
            payment_id: None,
            payment_method: None,
            amount_minor: None,
        }
    }
}

/// One implementation per gateway; the shared order transition logic
/// lives in `services::payments`, never in the adapters.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &'static str;

    /// Creates a gateway-side order/session for the given request.
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<GatewaySession, ServiceError>;

    /// Confirms payment status out-of-band. Never trusts client-asserted
    /// success: either recomputes a signature or asks the gateway.
    async fn verify(
        &self,
        request: &VerificationRequest,
    ) -> Result<VerificationOutcome, ServiceError>;
}

/// Converts a rupee amount to integer minor units (paise), rounding the
/// midpoint away from zero so 99.995 becomes exactly 10000.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    if amount <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "Amount must be greater than zero".to_string(),
        ));
    }

    (amount * Decimal::from(100))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| {
            ServiceError::ValidationError(format!("Amount {} out of representable range", amount))
        })
}

/// Strips everything but ASCII digits from a phone number.
pub fn digits_only(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Validations shared by every adapter; gateway-specific phone rules are
/// applied by the adapters themselves.
pub fn validate_session_request(request: &CreateSessionRequest) -> Result<(), ServiceError> {
    if request.amount <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "Amount must be greater than zero".to_string(),
        ));
    }
    if request.order_number.trim().is_empty() {
        return Err(ServiceError::ValidationError(
            "Order number is required".to_string(),
        ));
    }
    request.customer.validate()?;
    Ok(())
}

/// The configured gateway adapters, keyed by payment method. Built once
/// at startup and injected through `AppState`.
#[derive(Clone)]
pub struct GatewayRegistry {
    inner: HashMap<PaymentMethod, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn from_config(cfg: &AppConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;

        let mut inner: HashMap<PaymentMethod, Arc<dyn PaymentGateway>> = HashMap::new();

        if let Some(rp) = &cfg.gateways.razorpay {
            inner.insert(
                PaymentMethod::Razorpay,
                Arc::new(razorpay::RazorpayGateway::new(http.clone(), rp.clone())),
            );
        }
        if let Some(pp) = &cfg.gateways.phonepe {
            inner.insert(
                PaymentMethod::Phonepe,
                Arc::new(phonepe::PhonepeGateway::new(
                    http.clone(),
                    pp.clone(),
                    cfg.api_base_url.clone(),
                )),
            );
        }
        if let Some(cf) = &cfg.gateways.cashfree {
            inner.insert(
                PaymentMethod::Cashfree,
                Arc::new(cashfree::CashfreeGateway::new(http, cf.clone())),
            );
        }

        Ok(Self { inner })
    }

    pub fn get(&self, method: PaymentMethod) -> Result<Arc<dyn PaymentGateway>, ServiceError> {
        self.inner.get(&method).cloned().ok_or_else(|| {
            ServiceError::ConfigurationError(format!("gateway {} not configured", method))
        })
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use std::str::FromStr;

    #[test]
    fn minor_units_round_fractional_paise_away_from_zero() {
        assert_eq!(to_minor_units(dec!(99.995)).unwrap(), 10000);
        assert_eq!(to_minor_units(dec!(1200)).unwrap(), 120000);
        assert_eq!(to_minor_units(dec!(499)).unwrap(), 49900);
        assert_eq!(to_minor_units(dec!(0.01)).unwrap(), 1);
    }

    #[test]
    fn zero_and_negative_amounts_are_rejected() {
        assert!(to_minor_units(Decimal::ZERO).is_err());
        assert!(to_minor_units(dec!(-5)).is_err());
    }

    #[test]
    fn digits_only_strips_formatting() {
        assert_eq!(digits_only("+91 98765-43210"), "919876543210");
        assert_eq!(digits_only("9876543210"), "9876543210");
        assert_eq!(digits_only(""), "");
    }

    #[test]
    fn payment_method_round_trips_through_strings() {
        assert_eq!(PaymentMethod::from_str("razorpay").unwrap(), PaymentMethod::Razorpay);
        assert_eq!(PaymentMethod::Cashfree.to_string(), "cashfree");
        assert!(!PaymentMethod::Cod.is_online());
        assert!(PaymentMethod::Phonepe.is_online());
    }

    proptest! {
        // Whole rupee-and-paise amounts must convert without drift.
        #[test]
        fn exact_two_decimal_amounts_never_drift(rupees in 1i64..10_000_000, paise in 0i64..100) {
            let amount = Decimal::from(rupees) + Decimal::new(paise, 2);
            prop_assert_eq!(to_minor_units(amount).unwrap(), rupees * 100 + paise);
        }
    }
}
