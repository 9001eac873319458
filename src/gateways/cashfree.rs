use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use serde_json::json;
use tracing::{instrument, warn};

use crate::config::CashfreeConfig;
use crate::errors::ServiceError;
use crate::gateways::{
    digits_only, validate_session_request, ClientLaunchParams, CreateSessionRequest,
    GatewaySession, PaymentGateway, VerificationOutcome, VerificationRequest, VerificationStatus,
};

const API_VERSION: &str = "2023-08-01";

/// Cashfree modal checkout. Authentication is transport-level: static
/// client id/secret headers, no computed signature. The modal flow never
/// surfaces a payment id to the client, so verification lists the order's
/// payments server-side and takes the newest entry as authoritative.
pub struct CashfreeGateway {
    http: reqwest::Client,
    config: CashfreeConfig,
}

impl CashfreeGateway {
    pub fn new(http: reqwest::Client, config: CashfreeConfig) -> Self {
        Self { http, config }
    }

    fn credential_headers(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("x-client-id", &self.config.client_id)
            .header("x-client-secret", &self.config.client_secret)
            .header("x-api-version", API_VERSION)
    }

    /// Newest payment attempt wins. The list is ordered explicitly by
    /// completion time (falling back to initiation time) rather than
    /// trusting the response order.
    fn latest_payment(payments: &[serde_json::Value]) -> Option<&serde_json::Value> {
        payments.iter().max_by_key(|p| {
            p.get("payment_completion_time")
                .and_then(|t| t.as_str())
                .or_else(|| p.get("payment_time").and_then(|t| t.as_str()))
                .unwrap_or("")
                .to_string()
        })
    }

    /// Cashfree reports the method as a one-key object, e.g.
    /// `{"upi": {...}}`.
    fn payment_method_of(payment: &serde_json::Value) -> Option<String> {
        match payment.get("payment_method") {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Object(map)) => map.keys().next().cloned(),
            _ => None,
        }
    }
}

#[async_trait]
impl PaymentGateway for CashfreeGateway {
    fn name(&self) -> &'static str {
        "cashfree"
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<GatewaySession, ServiceError> {
        validate_session_request(request)?;

        let phone = digits_only(&request.customer.phone);
        if phone.len() < 10 {
            return Err(ServiceError::ValidationError(
                "Cashfree requires a phone number of at least 10 digits".to_string(),
            ));
        }

        // Cashfree takes major units, not paise
        let order_amount = request.amount.to_f64().ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "Amount {} out of representable range",
                request.amount
            ))
        })?;

        let body = json!({
            "order_id": request.order_number,
            "order_amount": order_amount,
            "order_currency": request.currency,
            "customer_details": {
                "customer_id": request.order_id.to_string(),
                "customer_name": request.customer.name,
                "customer_email": request.customer.email,
                "customer_phone": phone,
            },
            "order_note": "MilletMart storefront order",
        });

        let resp = self
            .credential_headers(self.http.post(format!("{}/orders", self.config.base_url)))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            warn!(status = %status, "Cashfree order creation rejected");
            return Err(ServiceError::GatewayError(format!(
                "Cashfree order creation failed with HTTP {}: {}",
                status.as_u16(),
                text.chars().take(200).collect::<String>()
            )));
        }

        let payload: serde_json::Value = resp.json().await?;
        let cf_order_id = payload
            .get("cf_order_id")
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ServiceError::GatewayError("Cashfree response missing cf_order_id".to_string())
            })?;
        let payment_session_id = payload
            .get("payment_session_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ServiceError::GatewayError(
                    "Cashfree response missing payment_session_id".to_string(),
                )
            })?
            .to_string();

        Ok(GatewaySession {
            gateway_reference: cf_order_id,
            launch: ClientLaunchParams::ModalSession { payment_session_id },
        })
    }

    #[instrument(skip(self, request))]
    async fn verify(
        &self,
        request: &VerificationRequest,
    ) -> Result<VerificationOutcome, ServiceError> {
        let VerificationRequest::Cashfree { cf_order_id } = request else {
            return Err(ServiceError::InvalidOperation(
                "Cashfree adapter received a non-Cashfree verification request".to_string(),
            ));
        };

        let resp = self
            .credential_headers(self.http.get(format!(
                "{}/orders/{}/payments",
                self.config.base_url, cf_order_id
            )))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ServiceError::GatewayError(format!(
                "Cashfree payments lookup failed with HTTP {}",
                resp.status().as_u16()
            )));
        }

        let payments: Vec<serde_json::Value> = resp.json().await?;
        let Some(latest) = Self::latest_payment(&payments) else {
            // No attempt recorded yet; leave the order for polling or the reaper
            return Ok(VerificationOutcome::pending());
        };

        let status = latest
            .get("payment_status")
            .and_then(|s| s.as_str())
            .unwrap_or("");
        let payment_id = latest.get("cf_payment_id").map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        });
        let amount_minor = latest
            .get("payment_amount")
            .and_then(|a| a.as_f64())
            .map(|a| (a * 100.0).round() as i64);

        let outcome_status = match status {
            "SUCCESS" => VerificationStatus::Completed,
            "FAILED" => VerificationStatus::Failed,
            _ => VerificationStatus::Pending,
        };

        Ok(VerificationOutcome {
            status: outcome_status,
            payment_id: if outcome_status == VerificationStatus::Completed {
                payment_id
            } else {
                None
            },
            payment_method: Self::payment_method_of(latest),
            amount_minor,
        })
    }
}
