use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Machine-readable error kind
    pub code: String,
    /// Request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// RFC 3339 timestamp when the error was produced
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cart item {0} not found")]
    ItemNotFound(String),

    #[error("Order {0} not found")]
    OrderNotFound(String),

    #[error("Invalid shipping address")]
    InvalidAddress,

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Insufficient stock for {0}")]
    InsufficientStock(String),

    #[error("Invalid coupon code")]
    CouponNotFound,

    #[error("This coupon has expired")]
    CouponExpired,

    #[error("This coupon has reached its usage limit")]
    CouponExhausted,

    #[error("Minimum purchase amount of {required} required")]
    MinimumPurchaseNotMet { required: Decimal },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Payment verification failed: {0}")]
    PaymentVerificationFailed(String),

    #[error("Payment provider unavailable: {0}")]
    PaymentProviderUnavailable(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) | Self::ItemNotFound(_) | Self::OrderNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::InvalidAddress
            | Self::EmptyCart
            | Self::CouponNotFound
            | Self::CouponExpired
            | Self::CouponExhausted
            | Self::MinimumPurchaseNotMet { .. }
            | Self::InvalidState(_)
            | Self::PaymentVerificationFailed(_)
            | Self::ValidationError(_)
            | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::InsufficientStock(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::PaymentProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Stable machine-readable kind, e.g. `coupon_expired`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::NotFound(_) => "not_found",
            Self::ItemNotFound(_) => "item_not_found",
            Self::OrderNotFound(_) => "order_not_found",
            Self::InvalidAddress => "invalid_address",
            Self::EmptyCart => "empty_cart",
            Self::InsufficientStock(_) => "insufficient_stock",
            Self::CouponNotFound => "coupon_not_found",
            Self::CouponExpired => "coupon_expired",
            Self::CouponExhausted => "coupon_exhausted",
            Self::MinimumPurchaseNotMet { .. } => "minimum_purchase_not_met",
            Self::InvalidState(_) => "invalid_state",
            Self::PaymentVerificationFailed(_) => "payment_verification_failed",
            Self::PaymentProviderUnavailable(_) => "payment_provider_unavailable",
            Self::ExternalServiceError(_) => "external_service_error",
            Self::ValidationError(_) => "validation_error",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::BadRequest(_) => "bad_request",
            Self::InternalError(_) => "internal_error",
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            code: self.code().to_string(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn service_error_response_includes_request_id() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("req-123"), async {
                ServiceError::OrderNotFound("missing".into()).into_response()
            })
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.request_id.as_deref(), Some("req-123"));
        assert_eq!(payload.code, "order_not_found");
    }

    #[test]
    fn service_error_status_code_mapping() {
        assert_eq!(ServiceError::EmptyCart.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ServiceError::ItemNotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::InsufficientStock("x".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::CouponExhausted.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::PaymentProviderUnavailable("timeout".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ServiceError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn minimum_purchase_message_names_the_threshold() {
        let err = ServiceError::MinimumPurchaseNotMet {
            required: dec!(1000),
        };
        assert_eq!(err.response_message(), "Minimum purchase amount of 1000 required");
    }

    #[test]
    fn internal_errors_hide_details() {
        assert_eq!(
            ServiceError::DatabaseError(DbErr::Custom("connection refused".into()))
                .response_message(),
            "Database error"
        );
        assert_eq!(
            ServiceError::InternalError("lock poisoned".into()).response_message(),
            "Internal server error"
        );
    }
}
