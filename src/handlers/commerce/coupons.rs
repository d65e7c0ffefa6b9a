use crate::handlers::common::{success_response, validate_input};
use crate::{errors::ServiceError, AppState};
use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::post,
    Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use validator::Validate;

/// Coupon endpoints; no authentication required
pub fn coupon_routes() -> Router<AppState> {
    Router::new().route("/validate", post(validate_coupon))
}

/// Preview the discount a coupon would give on an amount
async fn validate_coupon(
    State(state): State<AppState>,
    Json(payload): Json<ValidateCouponRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let preview = state
        .services
        .coupons
        .preview(&payload.code, payload.amount)
        .await?;
    Ok(success_response(preview))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ValidateCouponRequest {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    #[serde(alias = "cartTotal")]
    pub amount: Decimal,
}
