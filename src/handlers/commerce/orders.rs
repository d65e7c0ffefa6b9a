use crate::handlers::common::{created_response, success_response};
use crate::{
    auth::AuthenticatedUser,
    entities::{OrderStatus, PaymentMethod},
    errors::ServiceError,
    services::commerce::{CreateOrderInput, VerifyPaymentInput},
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

/// Creates the router for the caller's orders
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order).get(list_orders))
        .route("/by-number/:order_number", get(get_order_by_number))
        .route("/:id", get(get_order))
        .route("/:id/cancel", put(cancel_order))
        .route("/:id/verify-payment", post(verify_payment))
        .route("/:id/payment-attempts", post(create_payment_attempt))
}

/// Administrative order routes; every handler checks the admin role
pub fn admin_order_routes() -> Router<AppState> {
    Router::new().route("/:id/status", put(update_order_status))
}

/// Place an order from the caller's cart
async fn create_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let placed = state
        .services
        .orders
        .create_order(
            user.user_id,
            CreateOrderInput {
                shipping_address_id: payload.shipping_address_id,
                payment_method: payload.payment_method,
            },
        )
        .await?;

    info!(order_id = %placed.order.order.id, user_id = %user.user_id, "order placed");
    Ok(created_response(placed))
}

async fn list_orders(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, ServiceError> {
    let orders = state.services.orders.list_orders(user.user_id).await?;
    Ok(success_response(orders))
}

async fn get_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.get_order(user.user_id, id).await?;
    Ok(success_response(order))
}

async fn get_order_by_number(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(order_number): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .get_order_by_number(user.user_id, &order_number)
        .await?;
    Ok(success_response(order))
}

async fn cancel_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.cancel_order(user.user_id, id).await?;
    Ok(success_response(order))
}

/// Confirm a payment the client completed in the provider's widget
async fn verify_payment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<VerifyPaymentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    if payload.provider_payment_id.trim().is_empty() || payload.provider_order_id.trim().is_empty() {
        return Err(ServiceError::ValidationError(
            "providerPaymentId and providerOrderId are required".to_string(),
        ));
    }

    let verification = state
        .services
        .payments
        .verify_client_payment(
            user.user_id,
            id,
            VerifyPaymentInput {
                provider_payment_id: payload.provider_payment_id,
                provider_order_id: payload.provider_order_id,
                signature: payload.signature,
            },
        )
        .await?;
    Ok(success_response(verification))
}

async fn create_payment_attempt(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let payment = state
        .services
        .payments
        .create_payment_attempt(user.user_id, id)
        .await?;
    Ok(created_response(payment))
}

async fn update_order_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    user.require_admin()?;
    let order = state.services.orders.update_status(id, payload.status).await?;
    Ok(success_response(order))
}

// Request DTOs

/// The payment method is a closed enum, so unknown methods fail to deserialize.
#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    #[serde(alias = "shippingAddressId")]
    pub shipping_address_id: Uuid,
    #[serde(alias = "paymentMethod")]
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Deserialize)]
pub struct VerifyPaymentRequest {
    #[serde(alias = "providerPaymentId", alias = "razorpay_payment_id")]
    pub provider_payment_id: String,
    #[serde(alias = "providerOrderId", alias = "razorpay_order_id")]
    pub provider_order_id: String,
    #[serde(default, alias = "razorpay_signature")]
    pub signature: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_payment_method_is_rejected() {
        let body = r#"{"shippingAddressId":"550e8400-e29b-41d4-a716-446655440000","paymentMethod":"PAYPAL"}"#;
        assert!(serde_json::from_str::<CreateOrderRequest>(body).is_err());

        let body = r#"{"shippingAddressId":"550e8400-e29b-41d4-a716-446655440000","paymentMethod":"RAZORPAY"}"#;
        let request: CreateOrderRequest = serde_json::from_str(body).unwrap();
        assert_eq!(request.payment_method, PaymentMethod::Razorpay);
    }

    #[test]
    fn razorpay_checkout_field_names_are_accepted() {
        let body = r#"{"razorpay_payment_id":"pay_1","razorpay_order_id":"order_1","razorpay_signature":"ab"}"#;
        let request: VerifyPaymentRequest = serde_json::from_str(body).unwrap();
        assert_eq!(request.provider_payment_id, "pay_1");
        assert_eq!(request.provider_order_id, "order_1");
        assert_eq!(request.signature, "ab");
    }
}
