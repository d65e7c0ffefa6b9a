use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Json},
    routing::post,
    Router,
};
use serde_json::json;

use crate::{entities::PaymentMethod, errors::ServiceError, AppState};

const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";
const RAZORPAY_SIGNATURE_HEADER: &str = "x-razorpay-signature";

/// Provider webhooks; authenticated by signature, not by bearer token
pub fn payment_webhook_routes() -> Router<AppState> {
    Router::new()
        .route("/stripe", post(stripe_webhook))
        .route("/razorpay", post(razorpay_webhook))
}

// POST /api/v1/payments/webhooks/stripe
async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    handle(&state, PaymentMethod::Stripe, &headers, STRIPE_SIGNATURE_HEADER, &body).await
}

// POST /api/v1/payments/webhooks/razorpay
async fn razorpay_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    handle(&state, PaymentMethod::Razorpay, &headers, RAZORPAY_SIGNATURE_HEADER, &body).await
}

async fn handle(
    state: &AppState,
    method: PaymentMethod,
    headers: &HeaderMap,
    header_name: &str,
    body: &[u8],
) -> Result<Json<serde_json::Value>, ServiceError> {
    let signature = headers.get(header_name).and_then(|v| v.to_str().ok());
    state
        .services
        .payments
        .handle_webhook(method, signature, body)
        .await?;
    Ok(Json(json!({ "received": true })))
}
