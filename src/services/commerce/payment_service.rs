use crate::{
    entities::{order, payment, OrderStatus, PaymentMethod, PaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    repositories::{CommerceStore, StoreTransaction},
    services::payments::{CallbackProof, PaymentGateways, PaymentRequest, ProviderPayment},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::order_service::find_owned_order;

/// Fields a client posts after finishing payment in the provider's widget
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyPaymentInput {
    pub provider_payment_id: String,
    pub provider_order_id: String,
    #[serde(default)]
    pub signature: String,
}

/// A provider's claim that a payment went through, after its proof checked out.
#[derive(Debug, Clone)]
pub struct PaymentConfirmation {
    pub method: PaymentMethod,
    pub provider_order_ref: Option<String>,
    pub provider_transaction_id: String,
    pub order_id: Option<Uuid>,
    pub signature: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmOutcome {
    /// The payment was marked paid by this call
    Confirmed(order::Model),
    /// The transaction was already recorded or its attempt was already settled; the order is unchanged
    AlreadyConfirmed(order::Model),
    /// No payment row matches the confirmation
    NoMatch,
}

/// Response body of the client verification endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentVerification {
    pub order_id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub provider_transaction_id: String,
    pub already_confirmed: bool,
}

/// Payment confirmation handler.
///
/// Client callbacks and provider webhooks both end in [`PaymentService::confirm`],
/// which is keyed on the provider transaction id so replays change nothing.
#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn CommerceStore>,
    gateways: Arc<PaymentGateways>,
    event_sender: Arc<EventSender>,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn CommerceStore>,
        gateways: Arc<PaymentGateways>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            store,
            gateways,
            event_sender,
        }
    }

    /// Verifies a client-side payment callback for one of the caller's orders.
    ///
    /// # Errors
    ///
    /// * `ServiceError::OrderNotFound` - Missing or owned by another user
    /// * `ServiceError::InvalidState` - Cash-on-delivery or cancelled order
    /// * `ServiceError::PaymentVerificationFailed` - The proof does not verify or
    ///   does not belong to this order
    #[instrument(skip(self, input), fields(provider_payment_id = %input.provider_payment_id))]
    pub async fn verify_client_payment(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        input: VerifyPaymentInput,
    ) -> Result<PaymentVerification, ServiceError> {
        let order = {
            let mut tx = self.store.begin().await?;
            find_owned_order(tx.as_mut(), user_id, order_id).await?
        };

        if !order.payment_method.is_online() {
            return Err(ServiceError::InvalidState(
                "Cash on delivery orders are not paid online".to_string(),
            ));
        }
        if order.status == OrderStatus::Cancelled {
            return Err(ServiceError::InvalidState(
                "Order has been cancelled".to_string(),
            ));
        }

        let gateway = self.gateways.get(order.payment_method)?;
        let proof = CallbackProof {
            provider_order_ref: input.provider_order_id.clone(),
            provider_transaction_id: input.provider_payment_id.clone(),
            signature: input.signature.clone(),
        };
        if !gateway.verify_callback(&proof).await? {
            warn!(%order_id, "payment callback failed verification");
            return Err(ServiceError::PaymentVerificationFailed(
                "signature mismatch".to_string(),
            ));
        }

        let outcome = self
            .confirm(PaymentConfirmation {
                method: order.payment_method,
                provider_order_ref: Some(input.provider_order_id),
                provider_transaction_id: input.provider_payment_id.clone(),
                order_id: Some(order_id),
                signature: Some(input.signature).filter(|s| !s.is_empty()),
            })
            .await?;

        let (order, already_confirmed) = match outcome {
            ConfirmOutcome::Confirmed(order) => (order, false),
            ConfirmOutcome::AlreadyConfirmed(order) => (order, true),
            ConfirmOutcome::NoMatch => {
                return Err(ServiceError::PaymentVerificationFailed(
                    "payment does not belong to this order".to_string(),
                ))
            }
        };
        if order.id != order_id {
            return Err(ServiceError::PaymentVerificationFailed(
                "payment does not belong to this order".to_string(),
            ));
        }

        Ok(PaymentVerification {
            order_id: order.id,
            order_number: order.order_number,
            status: order.status,
            payment_status: order.payment_status,
            provider_transaction_id: input.provider_payment_id,
            already_confirmed,
        })
    }

    /// Authenticates a provider webhook and applies the confirmation it carries.
    ///
    /// Deliveries that do not confirm a payment, or that match no payment, are
    /// acknowledged without changes so the provider stops retrying.
    #[instrument(skip(self, signature, payload))]
    pub async fn handle_webhook(
        &self,
        method: PaymentMethod,
        signature: Option<&str>,
        payload: &[u8],
    ) -> Result<(), ServiceError> {
        let gateway = self.gateways.get(method)?;
        let Some(confirmation) = gateway.parse_webhook(signature, payload)? else {
            return Ok(());
        };

        let transaction_id = confirmation.provider_transaction_id.clone();
        match self
            .confirm(PaymentConfirmation {
                method,
                provider_order_ref: confirmation.provider_order_ref,
                provider_transaction_id: confirmation.provider_transaction_id,
                order_id: confirmation.order_id,
                signature: None,
            })
            .await?
        {
            ConfirmOutcome::NoMatch => {
                warn!(%transaction_id, method = method.as_str(), "webhook matched no payment");
            }
            ConfirmOutcome::AlreadyConfirmed(order) => {
                info!(order_id = %order.id, %transaction_id, "webhook replay ignored");
            }
            ConfirmOutcome::Confirmed(_) => {}
        }
        Ok(())
    }

    /// Records a verified payment against its order.
    ///
    /// The payment row is located by provider order reference, falling back to
    /// the latest pending attempt of `order_id`. A transaction id that is
    /// already stored short-circuits to [`ConfirmOutcome::AlreadyConfirmed`],
    /// as does a new transaction against an attempt that is no longer pending
    /// (it is recorded as an extra PAID row, the order is left alone).
    /// Orders move to PAID only from PENDING; a payment landing on a cancelled
    /// order is recorded but the order stays cancelled.
    #[instrument(skip(self, confirmation), fields(transaction_id = %confirmation.provider_transaction_id))]
    pub async fn confirm(&self, confirmation: PaymentConfirmation) -> Result<ConfirmOutcome, ServiceError> {
        let mut tx = self.store.begin().await?;

        if let Some(existing) = tx
            .find_payment_by_transaction(&confirmation.provider_transaction_id)
            .await?
        {
            return Ok(match tx.find_order(existing.order_id).await? {
                Some(order) => ConfirmOutcome::AlreadyConfirmed(order),
                None => ConfirmOutcome::NoMatch,
            });
        }

        let Some(mut payment) = find_target_payment(tx.as_mut(), &confirmation).await? else {
            return Ok(ConfirmOutcome::NoMatch);
        };

        let now = Utc::now();
        if payment.status != PaymentStatus::Pending {
            // Settled attempts keep their transaction id; a further capture gets its own row.
            let order = tx.find_order(payment.order_id).await?.ok_or_else(|| {
                ServiceError::InternalError(format!("payment {} has no order", payment.id))
            })?;
            tx.insert_payment(payment::Model {
                id: Uuid::new_v4(),
                status: PaymentStatus::Paid,
                provider_transaction_id: Some(confirmation.provider_transaction_id.clone()),
                signature: confirmation.signature.clone(),
                created_at: now,
                updated_at: now,
                ..payment
            })
            .await?;
            tx.commit().await?;

            warn!(
                order_id = %order.id,
                transaction_id = %confirmation.provider_transaction_id,
                "additional capture recorded against a settled payment"
            );
            return Ok(ConfirmOutcome::AlreadyConfirmed(order));
        }

        payment.status = PaymentStatus::Paid;
        payment.provider_transaction_id = Some(confirmation.provider_transaction_id.clone());
        if confirmation.signature.is_some() {
            payment.signature = confirmation.signature.clone();
        }
        payment.updated_at = now;
        let payment = tx.update_payment(payment).await?;

        let mut order = tx.find_order(payment.order_id).await?.ok_or_else(|| {
            ServiceError::InternalError(format!("payment {} has no order", payment.id))
        })?;
        match order.status {
            OrderStatus::Pending => order.status = OrderStatus::Paid,
            OrderStatus::Cancelled => {
                warn!(order_id = %order.id, "payment confirmed for a cancelled order");
            }
            _ => {}
        }
        order.payment_status = PaymentStatus::Paid;
        order.updated_at = now;
        let order = tx.update_order(order).await?;

        tx.commit().await?;

        metrics::increment_counter!("payments_confirmed_total", "method" => confirmation.method.as_str());
        self.event_sender
            .send_or_log(Event::PaymentConfirmed {
                order_id: order.id,
                provider_transaction_id: confirmation.provider_transaction_id,
                confirmed_at: now,
            })
            .await;
        info!(order_id = %order.id, status = %order.status, "payment confirmed");

        Ok(ConfirmOutcome::Confirmed(order))
    }

    /// Starts a fresh provider payment for an online order that is still unpaid.
    #[instrument(skip(self))]
    pub async fn create_payment_attempt(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<ProviderPayment, ServiceError> {
        let order = {
            let mut tx = self.store.begin().await?;
            find_owned_order(tx.as_mut(), user_id, order_id).await?
        };
        ensure_awaiting_payment(&order)?;

        let gateway = self.gateways.get(order.payment_method)?;
        let provider_payment = gateway
            .create_payment(&PaymentRequest {
                order_id: order.id,
                order_number: order.order_number.clone(),
                amount: order.total,
                currency: order.currency.clone(),
            })
            .await?;

        let mut tx = self.store.begin().await?;
        let mut order = find_owned_order(tx.as_mut(), user_id, order_id).await?;
        ensure_awaiting_payment(&order)?;

        let now = Utc::now();
        tx.insert_payment(payment::Model {
            id: Uuid::new_v4(),
            order_id: order.id,
            method: order.payment_method,
            status: PaymentStatus::Pending,
            amount: order.total,
            currency: order.currency.clone(),
            provider_order_ref: Some(provider_payment.provider_order_ref.clone()),
            provider_transaction_id: None,
            signature: None,
            created_at: now,
            updated_at: now,
        })
        .await?;

        order.provider_payment_ref = Some(provider_payment.provider_order_ref.clone());
        order.updated_at = now;
        tx.update_order(order).await?;
        tx.commit().await?;

        info!(%order_id, provider_ref = %provider_payment.provider_order_ref, "new payment attempt");
        Ok(provider_payment)
    }
}

fn ensure_awaiting_payment(order: &order::Model) -> Result<(), ServiceError> {
    if !order.payment_method.is_online() {
        return Err(ServiceError::InvalidState(
            "Cash on delivery orders are not paid online".to_string(),
        ));
    }
    if order.status != OrderStatus::Pending || order.payment_status != PaymentStatus::Pending {
        return Err(ServiceError::InvalidState(format!(
            "Order in status {} is not awaiting payment",
            order.status
        )));
    }
    Ok(())
}

async fn find_target_payment(
    tx: &mut dyn StoreTransaction,
    confirmation: &PaymentConfirmation,
) -> Result<Option<payment::Model>, ServiceError> {
    let by_ref = match confirmation.provider_order_ref.as_deref() {
        Some(reference) => tx.find_payment_by_provider_ref(reference).await?,
        None => None,
    };

    let candidate = match by_ref {
        Some(payment) => Some(payment),
        None => match confirmation.order_id {
            Some(order_id) => tx
                .list_payments(order_id)
                .await?
                .into_iter()
                .rev()
                .find(|p| p.status == PaymentStatus::Pending && p.method == confirmation.method),
            None => None,
        },
    };

    Ok(candidate.filter(|payment| {
        payment.method == confirmation.method
            && confirmation
                .order_id
                .map_or(true, |order_id| payment.order_id == order_id)
    }))
}
