use async_trait::async_trait;
use serde_json::json;
use tracing::{instrument, warn};

use crate::config::RazorpayConfig;
use crate::errors::ServiceError;
use crate::gateways::{
    signature, to_minor_units, validate_session_request, ClientLaunchParams, CreateSessionRequest,
    GatewaySession, PaymentGateway, VerificationOutcome, VerificationRequest,
};

/// Razorpay hosted-overlay checkout.
///
/// Order creation is a REST call with the amount in paise; verification is
/// purely cryptographic — the completion handler's signature is recomputed
/// locally, no status API round trip.
pub struct RazorpayGateway {
    http: reqwest::Client,
    config: RazorpayConfig,
}

impl RazorpayGateway {
    pub fn new(http: reqwest::Client, config: RazorpayConfig) -> Self {
        Self { http, config }
    }

    /// Publishable key id handed to the client for checkout bootstrap.
    pub fn key_id(&self) -> &str {
        &self.config.key_id
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    fn name(&self) -> &'static str {
        "razorpay"
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<GatewaySession, ServiceError> {
        validate_session_request(request)?;

        let amount_minor = to_minor_units(request.amount)?;
        let order_url = format!("{}/v1/orders", self.config.base_url);
        let body = json!({
            "amount": amount_minor,
            "currency": request.currency,
            "receipt": request.order_number,
            "payment_capture": 1,
            "notes": { "order_id": request.order_id.to_string() }
        });

        let resp = self
            .http
            .post(order_url)
            .basic_auth(&self.config.key_id, Some(&self.config.key_secret))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            warn!(status = %status, "Razorpay order creation rejected");
            return Err(ServiceError::GatewayError(format!(
                "Razorpay order creation failed with HTTP {}: {}",
                status.as_u16(),
                text.chars().take(200).collect::<String>()
            )));
        }

        let payload: serde_json::Value = resp.json().await?;
        let gateway_order_id = payload
            .get("id")
            .and_then(|id| id.as_str())
            .ok_or_else(|| {
                ServiceError::GatewayError("Razorpay response missing order id".to_string())
            })?
            .to_string();

        Ok(GatewaySession {
            gateway_reference: gateway_order_id,
            launch: ClientLaunchParams::HostedOverlay {
                key_id: self.config.key_id.clone(),
            },
        })
    }

    #[instrument(skip(self, request))]
    async fn verify(
        &self,
        request: &VerificationRequest,
    ) -> Result<VerificationOutcome, ServiceError> {
        let VerificationRequest::Razorpay {
            gateway_order_id,
            payment_id,
            signature: supplied,
        } = request
        else {
            return Err(ServiceError::InvalidOperation(
                "Razorpay adapter received a non-Razorpay verification request".to_string(),
            ));
        };

        let genuine = signature::verify_razorpay_signature(
            &self.config.key_secret,
            gateway_order_id,
            payment_id,
            supplied,
        )?;

        if genuine {
            Ok(VerificationOutcome::completed(payment_id.clone()))
        } else {
            warn!(gateway_order_id = %gateway_order_id, "Razorpay signature mismatch");
            Ok(VerificationOutcome::failed())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::VerificationStatus;

    fn gateway() -> RazorpayGateway {
        RazorpayGateway::new(
            reqwest::Client::new(),
            RazorpayConfig {
                key_id: "rzp_test_key".to_string(),
                key_secret: "test_secret_key".to_string(),
                base_url: "https://api.razorpay.com".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn verification_is_local_and_accepts_a_valid_signature() {
        let gw = gateway();
        let sig = signature::razorpay_signature(
            "test_secret_key",
            "order_IluGWxBm9U8zJ8",
            "pay_29QQoUBi66xm2f",
        )
        .unwrap();

        let outcome = gw
            .verify(&VerificationRequest::Razorpay {
                gateway_order_id: "order_IluGWxBm9U8zJ8".to_string(),
                payment_id: "pay_29QQoUBi66xm2f".to_string(),
                signature: sig,
            })
            .await
            .unwrap();

        assert_eq!(outcome.status, VerificationStatus::Completed);
        assert_eq!(outcome.payment_id.as_deref(), Some("pay_29QQoUBi66xm2f"));
    }

    #[tokio::test]
    async fn forged_signature_fails_verification() {
        let gw = gateway();
        let outcome = gw
            .verify(&VerificationRequest::Razorpay {
                gateway_order_id: "order_IluGWxBm9U8zJ8".to_string(),
                payment_id: "pay_29QQoUBi66xm2f".to_string(),
                signature: "deadbeef".repeat(8),
            })
            .await
            .unwrap();

        assert_eq!(outcome.status, VerificationStatus::Failed);
    }

    #[tokio::test]
    async fn wrong_request_variant_is_an_invalid_operation() {
        let gw = gateway();
        let err = gw
            .verify(&VerificationRequest::Phonepe {
                transaction_id: "TXN1".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidOperation(_)));
    }
}
