use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// JSON error body returned by every failing endpoint.
///
/// Gateway endpoints promise a uniform `{success: false, error}` shape to
/// their callers, so the body carries `success` alongside the usual fields.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Always `false`
    pub success: bool,
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Missing configuration: {0}")]
    ConfigurationError(String),

    #[error("Gateway error: {0}")]
    GatewayError(String),

    #[error("Signature verification failed")]
    SignatureVerificationFailed,

    #[error("Payment failed: {0}")]
    PaymentFailed(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(errors.to_string())
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        ServiceError::GatewayError(err.to_string())
    }
}

impl ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::ValidationError(_)
            | ServiceError::InvalidStatus(_)
            | ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::InvalidOperation(_) | ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::Unauthorized(_) | ServiceError::SignatureVerificationFailed => {
                StatusCode::UNAUTHORIZED
            }
            ServiceError::PaymentFailed(_) => StatusCode::PAYMENT_REQUIRED,
            ServiceError::GatewayError(_) => StatusCode::BAD_GATEWAY,
            ServiceError::DatabaseError(_)
            | ServiceError::ConfigurationError(_)
            | ServiceError::EventError(_)
            | ServiceError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message exposed to the client. Configuration problems are reported
    /// generically so secret names never leak into responses.
    fn public_message(&self) -> String {
        match self {
            ServiceError::ConfigurationError(_) => {
                "Payment provider is not configured for this environment".to_string()
            }
            ServiceError::DatabaseError(_) => "A storage error occurred".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request rejected");
        }

        let body = ErrorResponse {
            success: false,
            error: status
                .canonical_reason()
                .unwrap_or("Unknown")
                .to_string(),
            message: self.public_message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}
