use crate::handlers::common::{success_response, validate_input};
use crate::{
    auth::AuthenticatedUser, errors::ServiceError, services::commerce::AddToCartInput, AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for the caller's cart
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart).delete(clear_cart))
        .route("/items", post(add_to_cart))
        .route("/items/:item_id", put(update_cart_item).delete(remove_cart_item))
        .route("/coupon", post(apply_coupon).delete(remove_coupon))
}

/// Get the caller's cart with items
async fn get_cart(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.services.cart.get_cart(user.user_id).await?;
    Ok(success_response(cart))
}

/// Add item to cart
async fn add_to_cart(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let input = AddToCartInput {
        variant_id: payload.variant_id,
        quantity: payload.quantity,
    };

    let cart = state.services.cart.add_item(user.user_id, input).await?;
    Ok(success_response(cart))
}

/// Update cart item quantity
async fn update_cart_item(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(item_id): Path<Uuid>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let cart = state
        .services
        .cart
        .update_item(user.user_id, item_id, payload.quantity)
        .await?;

    Ok(success_response(cart))
}

/// Remove item from cart
async fn remove_cart_item(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(item_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.services.cart.remove_item(user.user_id, item_id).await?;
    Ok(success_response(cart))
}

/// Clear all items from cart
async fn clear_cart(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.services.cart.clear(user.user_id).await?;
    Ok(success_response(cart))
}

async fn apply_coupon(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<ApplyCouponRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let cart = state
        .services
        .cart
        .apply_coupon(user.user_id, &payload.code)
        .await?;
    Ok(success_response(cart))
}

async fn remove_coupon(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.services.cart.remove_coupon(user.user_id).await?;
    Ok(success_response(cart))
}

// Request DTOs

#[derive(Debug, Deserialize, Validate)]
pub struct AddItemRequest {
    #[serde(alias = "variantId")]
    pub variant_id: Uuid,
    #[validate(range(min = 1, max = 1000))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateQuantityRequest {
    #[validate(range(min = 1, max = 1000))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ApplyCouponRequest {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_item_request_accepts_camel_case() {
        let request: AddItemRequest = serde_json::from_str(
            r#"{"variantId":"550e8400-e29b-41d4-a716-446655440000","quantity":2}"#,
        )
        .unwrap();
        assert_eq!(request.quantity, 2);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn zero_quantity_is_rejected() {
        assert!(UpdateQuantityRequest { quantity: 0 }.validate().is_err());
    }
}
