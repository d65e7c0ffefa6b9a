//! Payment provider integration.
//!
//! Each online provider implements [`PaymentGateway`]; [`PaymentGateways`]
//! looks them up by [`PaymentMethod`]. Provider calls go through a reqwest
//! client with a bounded timeout and surface `PaymentProviderUnavailable`
//! instead of hanging.

use async_trait::async_trait;
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::info;
use uuid::Uuid;

use crate::{config::AppConfig, entities::PaymentMethod, errors::ServiceError};

pub mod razorpay;
pub mod signature;
pub mod stripe;

pub use razorpay::RazorpayClient;
pub use stripe::StripeClient;

/// What the checkout asks a provider to collect.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub order_id: Uuid,
    pub order_number: String,
    pub amount: Decimal,
    pub currency: String,
}

/// Provider-side payment handle returned to the client so it can complete payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderPayment {
    pub method: PaymentMethod,
    /// Razorpay order id or Stripe payment intent id
    pub provider_order_ref: String,
    /// Stripe client secret for confirming the intent in the browser
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Public Razorpay key the checkout widget needs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    /// Amount in the currency's minor unit
    pub amount: i64,
    pub currency: String,
}

/// Proof a client posts back after completing payment in the provider's widget.
#[derive(Debug, Clone)]
pub struct CallbackProof {
    pub provider_order_ref: String,
    pub provider_transaction_id: String,
    pub signature: String,
}

/// Confirmation extracted from a verified webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfirmation {
    pub provider_order_ref: Option<String>,
    pub provider_transaction_id: String,
    pub order_id: Option<Uuid>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn method(&self) -> PaymentMethod;

    /// Creates the provider-side order / intent for `request`.
    async fn create_payment(&self, request: &PaymentRequest) -> Result<ProviderPayment, ServiceError>;

    /// Verifies a client callback. `Ok(false)` means the proof does not match.
    async fn verify_callback(&self, proof: &CallbackProof) -> Result<bool, ServiceError>;

    /// Authenticates a webhook delivery and extracts the payment it confirms.
    ///
    /// Returns `Ok(None)` for event types that do not confirm a payment and
    /// `ServiceError::Unauthorized` when the signature does not verify.
    fn parse_webhook(
        &self,
        signature: Option<&str>,
        payload: &[u8],
    ) -> Result<Option<WebhookConfirmation>, ServiceError>;
}

/// Configured providers keyed by payment method.
#[derive(Clone, Default)]
pub struct PaymentGateways {
    gateways: HashMap<PaymentMethod, Arc<dyn PaymentGateway>>,
}

impl PaymentGateways {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(gateway.method(), gateway);
        self
    }

    /// Returns the gateway for `method` or `PaymentProviderUnavailable` if none is configured.
    pub fn get(&self, method: PaymentMethod) -> Result<Arc<dyn PaymentGateway>, ServiceError> {
        self.gateways.get(&method).cloned().ok_or_else(|| {
            ServiceError::PaymentProviderUnavailable(format!(
                "{} payments are not configured",
                method.as_str()
            ))
        })
    }

    /// Builds every provider that has credentials in `cfg`.
    pub fn from_config(cfg: &AppConfig) -> Result<Self, ServiceError> {
        let http = http_client(cfg.payment_timeout())?;
        let mut gateways = Self::new();

        if let (Some(key_id), Some(key_secret)) = (&cfg.razorpay_key_id, &cfg.razorpay_key_secret) {
            gateways = gateways.with_gateway(Arc::new(RazorpayClient::new(
                http.clone(),
                cfg.razorpay_base_url.clone(),
                key_id.clone(),
                key_secret.clone(),
                cfg.razorpay_webhook_secret.clone(),
            )));
            info!("Razorpay payments enabled");
        }

        if let Some(secret_key) = &cfg.stripe_secret_key {
            gateways = gateways.with_gateway(Arc::new(StripeClient::new(
                http,
                cfg.stripe_base_url.clone(),
                secret_key.clone(),
                cfg.stripe_webhook_secret.clone(),
                cfg.stripe_webhook_tolerance_secs,
            )));
            info!("Stripe payments enabled");
        }

        Ok(gateways)
    }
}

/// HTTP client shared by the provider clients.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, ServiceError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
        .map_err(|e| ServiceError::InternalError(format!("failed to build HTTP client: {}", e)))
}

/// Converts a major-unit amount (rupees, dollars) to the provider's minor unit.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| ServiceError::ValidationError(format!("amount {} is out of range", amount)))
}

pub(crate) fn transport_error(provider: &str, err: reqwest::Error) -> ServiceError {
    if err.is_timeout() || err.is_connect() {
        ServiceError::PaymentProviderUnavailable(format!("{} did not respond: {}", provider, err))
    } else {
        ServiceError::ExternalServiceError(format!("{} request failed: {}", provider, err))
    }
}

pub(crate) async fn provider_error(provider: &str, response: reqwest::Response) -> ServiceError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    tracing::warn!(%provider, %status, "payment provider returned an error: {}", body);
    if status.is_server_error() {
        ServiceError::PaymentProviderUnavailable(format!("{} returned {}", provider, status))
    } else {
        ServiceError::ExternalServiceError(format!("{} returned {}: {}", provider, status, body))
    }
}
