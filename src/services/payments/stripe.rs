use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    provider_error, signature, to_minor_units, transport_error, CallbackProof, PaymentGateway,
    PaymentRequest, ProviderPayment, WebhookConfirmation,
};
use crate::{entities::PaymentMethod, errors::ServiceError};

const PROVIDER: &str = "Stripe";

/// Stripe PaymentIntents client
#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
    webhook_secret: Option<String>,
    webhook_tolerance_secs: u64,
}

#[derive(Debug, Deserialize)]
struct PaymentIntentResponse {
    id: String,
    amount: i64,
    currency: String,
    status: String,
    client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: WebhookObject,
}

#[derive(Debug, Deserialize)]
struct WebhookObject {
    id: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

impl StripeClient {
    pub fn new(
        http: reqwest::Client,
        base_url: String,
        secret_key: String,
        webhook_secret: Option<String>,
        webhook_tolerance_secs: u64,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key,
            webhook_secret,
            webhook_tolerance_secs,
        }
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<Option<PaymentIntentResponse>, ServiceError> {
        let response = self
            .http
            .get(format!("{}/v1/payment_intents/{}", self.base_url, intent_id))
            .basic_auth(&self.secret_key, Some(""))
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(provider_error(PROVIDER, response).await);
        }

        let intent = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("Failed to parse Stripe response: {}", e))
        })?;
        Ok(Some(intent))
    }

    fn verify_signature(&self, header: Option<&str>, payload: &[u8]) -> Result<(), ServiceError> {
        let secret = self.webhook_secret.as_deref().ok_or_else(|| {
            ServiceError::Unauthorized("Stripe webhook secret is not configured".to_string())
        })?;
        let header = header
            .ok_or_else(|| ServiceError::Unauthorized("missing webhook signature".to_string()))?;
        let (timestamp, candidates) = signature::parse_timestamped_header(header).ok_or_else(|| {
            ServiceError::Unauthorized("malformed webhook signature".to_string())
        })?;

        if Utc::now().timestamp().abs_diff(timestamp) > self.webhook_tolerance_secs {
            warn!("Stripe webhook timestamp outside tolerance");
            return Err(ServiceError::Unauthorized(
                "webhook timestamp outside tolerance".to_string(),
            ));
        }

        let mut signed = format!("{}.", timestamp).into_bytes();
        signed.extend_from_slice(payload);
        if candidates
            .iter()
            .any(|candidate| signature::verify_hex(secret, &signed, candidate))
        {
            Ok(())
        } else {
            warn!("Stripe webhook signature verification failed");
            Err(ServiceError::Unauthorized(
                "invalid webhook signature".to_string(),
            ))
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeClient {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Stripe
    }

    #[instrument(skip(self, request), fields(order_number = %request.order_number))]
    async fn create_payment(&self, request: &PaymentRequest) -> Result<ProviderPayment, ServiceError> {
        let amount = to_minor_units(request.amount)?;
        let params = [
            ("amount", amount.to_string()),
            ("currency", request.currency.to_lowercase()),
            ("metadata[order_id]", request.order_id.to_string()),
            ("metadata[order_number]", request.order_number.clone()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
        ];

        let response = self
            .http
            .post(format!("{}/v1/payment_intents", self.base_url))
            .basic_auth(&self.secret_key, Some(""))
            .form(&params)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;

        if !response.status().is_success() {
            return Err(provider_error(PROVIDER, response).await);
        }

        let intent: PaymentIntentResponse = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("Failed to parse Stripe response: {}", e))
        })?;

        info!("PaymentIntent created: {}", intent.id);
        Ok(ProviderPayment {
            method: PaymentMethod::Stripe,
            provider_order_ref: intent.id,
            client_secret: intent.client_secret,
            key_id: None,
            amount: intent.amount,
            currency: intent.currency,
        })
    }

    /// Stripe callbacks carry no signature; the intent is fetched and must have succeeded.
    async fn verify_callback(&self, proof: &CallbackProof) -> Result<bool, ServiceError> {
        if proof.provider_transaction_id != proof.provider_order_ref {
            return Ok(false);
        }
        let Some(intent) = self.retrieve_intent(&proof.provider_order_ref).await? else {
            return Ok(false);
        };
        Ok(intent.id == proof.provider_order_ref && intent.status == "succeeded")
    }

    fn parse_webhook(
        &self,
        signature_header: Option<&str>,
        payload: &[u8],
    ) -> Result<Option<WebhookConfirmation>, ServiceError> {
        self.verify_signature(signature_header, payload)?;

        let event: WebhookEvent = serde_json::from_slice(payload)
            .map_err(|e| ServiceError::BadRequest(format!("invalid json: {}", e)))?;

        if event.event_type != "payment_intent.succeeded" {
            info!("Unhandled Stripe webhook type: {}", event.event_type);
            return Ok(None);
        }

        let intent = event.data.object;
        let order_id = intent
            .metadata
            .get("order_id")
            .and_then(|v| Uuid::parse_str(v).ok());

        Ok(Some(WebhookConfirmation {
            provider_order_ref: Some(intent.id.clone()),
            provider_transaction_id: intent.id,
            order_id,
        }))
    }
}
