use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    provider_error, signature, to_minor_units, transport_error, CallbackProof, PaymentGateway,
    PaymentRequest, ProviderPayment, WebhookConfirmation,
};
use crate::{entities::PaymentMethod, errors::ServiceError};

const PROVIDER: &str = "Razorpay";

/// Razorpay Orders API client
#[derive(Clone)]
pub struct RazorpayClient {
    http: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
    webhook_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RazorpayOrder {
    id: String,
    amount: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    event: String,
    #[serde(default)]
    payload: Option<WebhookPayload>,
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    payment: Option<PaymentWrapper>,
}

#[derive(Debug, Deserialize)]
struct PaymentWrapper {
    entity: PaymentEntity,
}

#[derive(Debug, Deserialize)]
struct PaymentEntity {
    id: String,
    order_id: Option<String>,
    #[serde(default)]
    notes: Option<serde_json::Value>,
}

impl RazorpayClient {
    pub fn new(
        http: reqwest::Client,
        base_url: String,
        key_id: String,
        key_secret: String,
        webhook_secret: Option<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            key_id,
            key_secret,
            webhook_secret,
        }
    }
}

#[async_trait]
impl PaymentGateway for RazorpayClient {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Razorpay
    }

    #[instrument(skip(self, request), fields(order_number = %request.order_number))]
    async fn create_payment(&self, request: &PaymentRequest) -> Result<ProviderPayment, ServiceError> {
        let amount = to_minor_units(request.amount)?;
        let body = json!({
            "amount": amount,
            "currency": request.currency.to_uppercase(),
            "receipt": request.order_number,
            "notes": { "order_id": request.order_id.to_string() },
        });

        let response = self
            .http
            .post(format!("{}/v1/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;

        if !response.status().is_success() {
            return Err(provider_error(PROVIDER, response).await);
        }

        let order: RazorpayOrder = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("Failed to parse Razorpay response: {}", e))
        })?;

        info!("Razorpay order created: {}", order.id);
        Ok(ProviderPayment {
            method: PaymentMethod::Razorpay,
            provider_order_ref: order.id,
            client_secret: None,
            key_id: Some(self.key_id.clone()),
            amount: order.amount,
            currency: order.currency,
        })
    }

    /// Checkout callbacks are signed as `HMAC(key_secret, "{order_id}|{payment_id}")`.
    async fn verify_callback(&self, proof: &CallbackProof) -> Result<bool, ServiceError> {
        let signed = format!(
            "{}|{}",
            proof.provider_order_ref, proof.provider_transaction_id
        );
        Ok(signature::verify_hex(
            &self.key_secret,
            signed.as_bytes(),
            &proof.signature,
        ))
    }

    fn parse_webhook(
        &self,
        signature_header: Option<&str>,
        payload: &[u8],
    ) -> Result<Option<WebhookConfirmation>, ServiceError> {
        let secret = self.webhook_secret.as_deref().ok_or_else(|| {
            ServiceError::Unauthorized("Razorpay webhook secret is not configured".to_string())
        })?;
        let provided = signature_header.ok_or_else(|| {
            ServiceError::Unauthorized("missing webhook signature".to_string())
        })?;
        if !signature::verify_hex(secret, payload, provided) {
            warn!("Razorpay webhook signature verification failed");
            return Err(ServiceError::Unauthorized(
                "invalid webhook signature".to_string(),
            ));
        }

        let event: WebhookEvent = serde_json::from_slice(payload)
            .map_err(|e| ServiceError::BadRequest(format!("invalid json: {}", e)))?;

        if !matches!(event.event.as_str(), "payment.captured" | "order.paid") {
            info!("Ignoring Razorpay webhook event {}", event.event);
            return Ok(None);
        }

        let Some(entity) = event.payload.and_then(|p| p.payment).map(|p| p.entity) else {
            warn!("Razorpay {} webhook without a payment entity", event.event);
            return Ok(None);
        };

        let order_id = entity
            .notes
            .as_ref()
            .and_then(|notes| notes.get("order_id"))
            .and_then(|v| v.as_str())
            .and_then(|v| Uuid::parse_str(v).ok());

        Ok(Some(WebhookConfirmation {
            provider_order_ref: entity.order_id,
            provider_transaction_id: entity.id,
            order_id,
        }))
    }
}
