use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use rand::Rng;
use serde_json::json;
use tracing::{instrument, warn};
use url::Url;

use crate::config::PhonepeConfig;
use crate::errors::ServiceError;
use crate::gateways::{
    digits_only, signature, to_minor_units, validate_session_request, ClientLaunchParams,
    CreateSessionRequest, GatewaySession, PaymentGateway, VerificationOutcome, VerificationRequest,
};

const PAY_PATH: &str = "/pg/v1/pay";

/// PhonePe pay-page checkout. The client performs a full-page redirect;
/// success or failure is only learned through the callback path and the
/// server-to-server status API, never a client-side handler.
pub struct PhonepeGateway {
    http: reqwest::Client,
    config: PhonepeConfig,
    api_base_url: String,
}

impl PhonepeGateway {
    pub fn new(http: reqwest::Client, config: PhonepeConfig, api_base_url: String) -> Self {
        Self {
            http,
            config,
            api_base_url,
        }
    }

    /// Merchant transaction ids are `TXN<millis><random>`, unique enough
    /// to correlate a single checkout attempt.
    fn new_transaction_id() -> String {
        let suffix: u16 = rand::thread_rng().gen_range(0..10_000);
        format!("TXN{}{:04}", Utc::now().timestamp_millis(), suffix)
    }

    /// Callback URL carrying the originating order id, so the callback
    /// handler can correlate without trusting the gateway payload.
    fn callback_url(&self, order_id: uuid::Uuid) -> Result<String, ServiceError> {
        let mut url = Url::parse(&self.api_base_url)
            .map_err(|e| ServiceError::ConfigurationError(format!("api_base_url: {}", e)))?;
        url.set_path("/api/v1/payments/phonepe/callback");
        url.query_pairs_mut()
            .append_pair("orderId", &order_id.to_string());
        Ok(url.to_string())
    }
}

#[async_trait]
impl PaymentGateway for PhonepeGateway {
    fn name(&self) -> &'static str {
        "phonepe"
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<GatewaySession, ServiceError> {
        validate_session_request(request)?;

        // PhonePe requires exactly a 10-digit mobile number; callers must
        // strip country codes and formatting before checkout
        let phone = digits_only(&request.customer.phone);
        if phone.len() != 10 {
            return Err(ServiceError::ValidationError(
                "PhonePe requires a 10-digit mobile number".to_string(),
            ));
        }

        let amount_minor = to_minor_units(request.amount)?;
        let transaction_id = Self::new_transaction_id();
        let callback_url = self.callback_url(request.order_id)?;

        let payload = json!({
            "merchantId": self.config.merchant_id,
            "merchantTransactionId": transaction_id,
            "merchantUserId": format!("USR{}", phone),
            "amount": amount_minor,
            "redirectUrl": callback_url,
            "redirectMode": "REDIRECT",
            "callbackUrl": callback_url,
            "mobileNumber": phone,
            "paymentInstrument": { "type": "PAY_PAGE" }
        });

        let encoded = BASE64.encode(payload.to_string());
        let x_verify = signature::phonepe_x_verify(
            &format!("{}{}", encoded, PAY_PATH),
            &self.config.salt_key,
            &self.config.salt_index,
        );

        let resp = self
            .http
            .post(format!("{}{}", self.config.base_url, PAY_PATH))
            .header("X-VERIFY", x_verify)
            .json(&json!({ "request": encoded }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            warn!(status = %status, "PhonePe pay request rejected");
            return Err(ServiceError::GatewayError(format!(
                "PhonePe session creation failed with HTTP {}: {}",
                status.as_u16(),
                text.chars().take(200).collect::<String>()
            )));
        }

        let payload: serde_json::Value = resp.json().await?;
        let redirect_url = payload
            .pointer("/data/instrumentResponse/redirectInfo/url")
            .and_then(|u| u.as_str())
            .ok_or_else(|| {
                ServiceError::GatewayError("PhonePe response missing redirect URL".to_string())
            })?
            .to_string();

        Ok(GatewaySession {
            gateway_reference: transaction_id,
            launch: ClientLaunchParams::Redirect { url: redirect_url },
        })
    }

    #[instrument(skip(self, request))]
    async fn verify(
        &self,
        request: &VerificationRequest,
    ) -> Result<VerificationOutcome, ServiceError> {
        let VerificationRequest::Phonepe { transaction_id } = request else {
            return Err(ServiceError::InvalidOperation(
                "PhonePe adapter received a non-PhonePe verification request".to_string(),
            ));
        };

        let status_path = format!(
            "/pg/v1/status/{}/{}",
            self.config.merchant_id, transaction_id
        );
        let x_verify = signature::phonepe_x_verify(
            &status_path,
            &self.config.salt_key,
            &self.config.salt_index,
        );

        let resp = self
            .http
            .get(format!("{}{}", self.config.base_url, status_path))
            .header("X-VERIFY", x_verify)
            .header("X-MERCHANT-ID", &self.config.merchant_id)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ServiceError::GatewayError(format!(
                "PhonePe status check failed with HTTP {}",
                resp.status().as_u16()
            )));
        }

        let payload: serde_json::Value = resp.json().await?;
        let state = payload
            .pointer("/data/state")
            .and_then(|s| s.as_str())
            .unwrap_or("");
        let payment_id = payload
            .pointer("/data/transactionId")
            .and_then(|t| t.as_str())
            .map(str::to_string);
        let amount_minor = payload.pointer("/data/amount").and_then(|a| a.as_i64());

        let mut outcome = match state {
            "COMPLETED" => {
                let id = payment_id.clone().unwrap_or_else(|| transaction_id.clone());
                VerificationOutcome::completed(id)
            }
            "FAILED" => VerificationOutcome::failed(),
            // PENDING and everything unrecognized stay unresolved
            _ => VerificationOutcome::pending(),
        };
        outcome.amount_minor = amount_minor;

        Ok(outcome)
    }
}
