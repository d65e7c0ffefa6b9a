use crate::{
    config::PricingConfig,
    entities::{
        commerce::{cart, cart_item},
        order, order_item, payment, OrderStatus, PaymentMethod, PaymentStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    repositories::{CommerceStore, StoreTransaction},
    services::payments::{PaymentGateways, PaymentRequest, ProviderPayment},
};
use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{cart_service::empty_cart, pricing::shipping_cost};

/// Every order ships with the single method the storefront offers.
pub const DEFAULT_SHIPPING_METHOD: &str = "STANDARD";

/// Input for placing an order from the caller's cart
#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderInput {
    pub shipping_address_id: Uuid,
    pub payment_method: PaymentMethod,
}

/// Order with its items and payment attempts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
    pub payments: Vec<payment::Model>,
}

/// Result of a checkout: the order plus, for online methods, the handle the
/// client needs to complete payment with the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacedOrder {
    #[serde(flatten)]
    pub order: OrderDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<ProviderPayment>,
}

/// Checkout and order lifecycle service.
///
/// `create_order` converts the caller's cart into an order in a single store
/// transaction: the order, its item snapshots, the payment row, the inventory
/// decrements, the cart reset and the coupon usage bump either all commit or
/// none do.
#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn CommerceStore>,
    gateways: Arc<PaymentGateways>,
    event_sender: Arc<EventSender>,
    pricing: PricingConfig,
}

impl OrderService {
    pub fn new(
        store: Arc<dyn CommerceStore>,
        gateways: Arc<PaymentGateways>,
        event_sender: Arc<EventSender>,
        pricing: PricingConfig,
    ) -> Self {
        Self {
            store,
            gateways,
            event_sender,
            pricing,
        }
    }

    /// Places an order from the user's cart.
    ///
    /// Cart totals are taken as stored; only shipping is added here. The
    /// preconditions are checked in a read-only pass, then online methods get a
    /// provider order / intent with no store transaction open, then everything
    /// is written in one transaction that re-reads the cart. A provider failure
    /// leaves the cart and stock untouched.
    ///
    /// # Errors
    ///
    /// * `ServiceError::InvalidAddress` - The address is missing or belongs to someone else
    /// * `ServiceError::EmptyCart` - The cart has no items
    /// * `ServiceError::InsufficientStock` - A line asks for more than is in stock,
    ///   including when a concurrent checkout took the stock first
    /// * `ServiceError::CouponExhausted` - The coupon's last use went to a concurrent checkout
    /// * `ServiceError::InvalidState` - The cart was edited while the checkout was running
    /// * `ServiceError::PaymentProviderUnavailable` - The provider is not configured or did not answer
    #[instrument(skip(self))]
    pub async fn create_order(
        &self,
        user_id: Uuid,
        input: CreateOrderInput,
    ) -> Result<PlacedOrder, ServiceError> {
        let method = input.payment_method;
        let gateway = if method.is_online() {
            Some(self.gateways.get(method)?)
        } else {
            None
        };

        // Reads only; nothing is held while the provider is called.
        let checkout = {
            let mut tx = self.store.begin().await?;
            load_checkout(tx.as_mut(), user_id, input.shipping_address_id).await?
        };
        for item in &checkout.items {
            let available = checkout.inventory.get(&item.variant_id).copied().unwrap_or(0);
            if available < item.quantity {
                warn!(
                    variant_id = %item.variant_id,
                    available,
                    requested = item.quantity,
                    "insufficient stock at checkout"
                );
                return Err(ServiceError::InsufficientStock(checkout.label(item.variant_id)));
            }
        }

        let shipping = shipping_cost(checkout.cart.subtotal, &self.pricing);
        let total = checkout.cart.total + shipping;
        let order_id = Uuid::new_v4();
        let order_number = generate_order_number();

        let provider_payment = match &gateway {
            Some(gateway) => Some(
                gateway
                    .create_payment(&PaymentRequest {
                        order_id,
                        order_number: order_number.clone(),
                        amount: total,
                        currency: self.pricing.currency.clone(),
                    })
                    .await?,
            ),
            None => None,
        };
        let provider_ref = provider_payment
            .as_ref()
            .map(|p| p.provider_order_ref.clone());

        let mut tx = self.store.begin().await?;
        let current = load_checkout(tx.as_mut(), user_id, input.shipping_address_id).await?;
        if !current.same_cart_as(&checkout) {
            warn!(%user_id, "cart changed while checkout was in progress");
            return Err(ServiceError::InvalidState(
                "Cart changed during checkout; review it and try again".to_string(),
            ));
        }
        let address_id = current.address_id;
        let mut cart = current.cart.clone();
        let cart_items = current.items.clone();

        let now = Utc::now();
        let order = tx
            .insert_order(order::Model {
                id: order_id,
                order_number: order_number.clone(),
                user_id,
                status: if method.is_online() {
                    OrderStatus::Pending
                } else {
                    OrderStatus::Paid
                },
                payment_status: PaymentStatus::Pending,
                payment_method: method,
                subtotal: cart.subtotal,
                tax: cart.tax,
                shipping_cost: shipping,
                discount: cart.discount,
                total,
                currency: self.pricing.currency.clone(),
                coupon_code: cart.coupon_code.clone().filter(|_| cart.discount > Decimal::ZERO),
                shipping_address_id: address_id,
                billing_address_id: address_id,
                shipping_method: DEFAULT_SHIPPING_METHOD.to_string(),
                provider_payment_ref: provider_ref.clone(),
                created_at: now,
                updated_at: now,
            })
            .await?;

        let items: Vec<order_item::Model> = cart_items
            .iter()
            .map(|item| order_item::Model {
                id: Uuid::new_v4(),
                order_id,
                product_id: item.product_id,
                variant_id: item.variant_id,
                quantity: item.quantity,
                price: item.price,
                subtotal: item.subtotal,
            })
            .collect();
        tx.insert_order_items(items.clone()).await?;

        let payment = tx
            .insert_payment(payment::Model {
                id: Uuid::new_v4(),
                order_id,
                method,
                status: PaymentStatus::Pending,
                amount: total,
                currency: self.pricing.currency.clone(),
                provider_order_ref: provider_ref,
                provider_transaction_id: None,
                signature: None,
                created_at: now,
                updated_at: now,
            })
            .await?;

        for item in &cart_items {
            if !tx.decrement_inventory(item.variant_id, item.quantity).await? {
                warn!(variant_id = %item.variant_id, "lost stock race at checkout");
                return Err(ServiceError::InsufficientStock(current.label(item.variant_id)));
            }
        }

        let coupon_code = cart.coupon_code.clone();
        let discount = cart.discount;
        empty_cart(tx.as_mut(), &mut cart).await?;
        tx.update_cart(cart).await?;

        if let Some(code) = coupon_code.filter(|_| discount > Decimal::ZERO) {
            if !tx.increment_coupon_usage(&code).await? {
                warn!(%code, "coupon usage limit reached during checkout");
                return Err(ServiceError::CouponExhausted);
            }
        }

        tx.commit().await?;

        metrics::increment_counter!("orders_created_total", "payment_method" => method.as_str());
        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id,
                order_number: order.order_number.clone(),
                total,
            })
            .await;
        info!(%order_id, order_number = %order.order_number, %total, "order placed");

        Ok(PlacedOrder {
            order: OrderDetails {
                order,
                items,
                payments: vec![payment],
            },
            payment: provider_payment,
        })
    }

    /// The caller's orders, newest first.
    #[instrument(skip(self))]
    pub async fn list_orders(&self, user_id: Uuid) -> Result<Vec<OrderDetails>, ServiceError> {
        let mut tx = self.store.begin().await?;
        let orders = tx.list_orders_for_user(user_id).await?;
        let mut details = Vec::with_capacity(orders.len());
        for order in orders {
            details.push(load_details(tx.as_mut(), order).await?);
        }
        Ok(details)
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, user_id: Uuid, order_id: Uuid) -> Result<OrderDetails, ServiceError> {
        let mut tx = self.store.begin().await?;
        let order = find_owned_order(tx.as_mut(), user_id, order_id).await?;
        load_details(tx.as_mut(), order).await
    }

    #[instrument(skip(self))]
    pub async fn get_order_by_number(
        &self,
        user_id: Uuid,
        order_number: &str,
    ) -> Result<OrderDetails, ServiceError> {
        let mut tx = self.store.begin().await?;
        let order = tx
            .find_order_by_number(order_number)
            .await?
            .filter(|o| o.user_id == user_id)
            .ok_or_else(|| ServiceError::OrderNotFound(order_number.to_string()))?;
        load_details(tx.as_mut(), order).await
    }

    /// Cancels a PENDING or PAID order and puts its stock back.
    ///
    /// # Errors
    ///
    /// * `ServiceError::OrderNotFound` - Missing or owned by another user
    /// * `ServiceError::InvalidState` - Fulfilment has already started or the order is closed
    #[instrument(skip(self))]
    pub async fn cancel_order(&self, user_id: Uuid, order_id: Uuid) -> Result<OrderDetails, ServiceError> {
        let mut tx = self.store.begin().await?;
        let mut order = find_owned_order(tx.as_mut(), user_id, order_id).await?;

        if !order.status.is_cancellable() {
            return Err(ServiceError::InvalidState(format!(
                "Order in status {} cannot be cancelled",
                order.status
            )));
        }

        let items = tx.list_order_items(order_id).await?;
        for item in &items {
            tx.increment_inventory(item.variant_id, item.quantity).await?;
        }

        order.status = OrderStatus::Cancelled;
        order.updated_at = Utc::now();
        let order = tx.update_order(order).await?;
        let payments = tx.list_payments(order_id).await?;
        tx.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderCancelled(order_id))
            .await;
        info!(%order_id, restored_lines = items.len(), "order cancelled");

        Ok(OrderDetails {
            order,
            items,
            payments,
        })
    }

    /// Moves an order along the fulfilment flow (administrators only).
    ///
    /// `PAID` also marks the payment collected, as does `DELIVERED` for cash on
    /// delivery. `REFUNDED` marks a collected payment refunded.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<OrderDetails, ServiceError> {
        let mut tx = self.store.begin().await?;
        let mut order = tx
            .find_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::OrderNotFound(order_id.to_string()))?;

        let old_status = order.status;
        if !old_status.can_transition_to(new_status) {
            return Err(ServiceError::InvalidState(format!(
                "Cannot move order from {} to {}",
                old_status, new_status
            )));
        }

        let now = Utc::now();
        order.status = new_status;
        match new_status {
            OrderStatus::Paid => order.payment_status = PaymentStatus::Paid,
            OrderStatus::Delivered
                if order.payment_method == PaymentMethod::Cod
                    && order.payment_status == PaymentStatus::Pending =>
            {
                // Cash is collected on delivery.
                order.payment_status = PaymentStatus::Paid;
                let pending = tx
                    .list_payments(order_id)
                    .await?
                    .into_iter()
                    .rev()
                    .find(|p| p.status == PaymentStatus::Pending);
                if let Some(mut payment) = pending {
                    payment.status = PaymentStatus::Paid;
                    payment.updated_at = now;
                    tx.update_payment(payment).await?;
                }
            }
            // Only money that was collected can be refunded.
            OrderStatus::Refunded if order.payment_status == PaymentStatus::Paid => {
                order.payment_status = PaymentStatus::Refunded
            }
            _ => {}
        }
        order.updated_at = now;
        let order = tx.update_order(order).await?;
        let details = load_details(tx.as_mut(), order).await?;
        tx.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: old_status.to_string(),
                new_status: new_status.to_string(),
            })
            .await;
        info!(%order_id, from = %old_status, to = %new_status, "order status updated");
        Ok(details)
    }
}

/// `ORD` + epoch millis + five random characters from `A-Z0-9`.
pub fn generate_order_number() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..5)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();
    format!("ORD{}{}", Utc::now().timestamp_millis(), suffix)
}

/// Everything checkout reads before writing: the address, the cart as priced,
/// and the stock and display label of each line's variant.
struct CheckoutSnapshot {
    address_id: Uuid,
    cart: cart::Model,
    items: Vec<cart_item::Model>,
    inventory: HashMap<Uuid, i32>,
    labels: HashMap<Uuid, String>,
}

impl CheckoutSnapshot {
    fn label(&self, variant_id: Uuid) -> String {
        self.labels
            .get(&variant_id)
            .cloned()
            .unwrap_or_else(|| variant_id.to_string())
    }

    /// Same lines, quantities, prices, coupon and totals. Stock is not compared;
    /// the conditional decrement guards it.
    fn same_cart_as(&self, other: &CheckoutSnapshot) -> bool {
        let lines = |items: &[cart_item::Model]| {
            items
                .iter()
                .map(|i| (i.id, i.variant_id, i.quantity, i.price))
                .collect::<Vec<_>>()
        };
        self.cart.id == other.cart.id
            && self.cart.coupon_code == other.cart.coupon_code
            && self.cart.subtotal == other.cart.subtotal
            && self.cart.tax == other.cart.tax
            && self.cart.discount == other.cart.discount
            && self.cart.total == other.cart.total
            && lines(&self.items) == lines(&other.items)
    }
}

async fn load_checkout(
    tx: &mut dyn StoreTransaction,
    user_id: Uuid,
    address_id: Uuid,
) -> Result<CheckoutSnapshot, ServiceError> {
    let address = tx
        .find_address(user_id, address_id)
        .await?
        .ok_or(ServiceError::InvalidAddress)?;

    let cart = tx
        .find_cart_by_user(user_id)
        .await?
        .ok_or(ServiceError::EmptyCart)?;
    let items = tx.list_cart_items(cart.id).await?;
    if items.is_empty() {
        return Err(ServiceError::EmptyCart);
    }

    let mut inventory = HashMap::with_capacity(items.len());
    let mut labels = HashMap::with_capacity(items.len());
    for item in &items {
        let variant = tx.find_variant(item.variant_id).await?.ok_or_else(|| {
            ServiceError::NotFound(format!("Variant {} not found", item.variant_id))
        })?;
        let product_name = tx
            .find_product(variant.product_id)
            .await?
            .map(|p| p.name)
            .unwrap_or_else(|| variant.sku.clone());
        inventory.insert(item.variant_id, variant.inventory);
        labels.insert(item.variant_id, format!("{} ({})", product_name, variant.name));
    }

    Ok(CheckoutSnapshot {
        address_id: address.id,
        cart,
        items,
        inventory,
        labels,
    })
}

pub(crate) async fn find_owned_order(
    tx: &mut dyn StoreTransaction,
    user_id: Uuid,
    order_id: Uuid,
) -> Result<order::Model, ServiceError> {
    tx.find_order(order_id)
        .await?
        .filter(|o| o.user_id == user_id)
        .ok_or_else(|| ServiceError::OrderNotFound(order_id.to_string()))
}

pub(crate) async fn load_details(
    tx: &mut dyn StoreTransaction,
    order: order::Model,
) -> Result<OrderDetails, ServiceError> {
    let items = tx.list_order_items(order.id).await?;
    let payments = tx.list_payments(order.id).await?;
    Ok(OrderDetails {
        order,
        items,
        payments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_numbers_have_expected_shape() {
        let number = generate_order_number();
        assert!(number.starts_with("ORD"));
        let suffix = &number[number.len() - 5..];
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        assert!(number[3..number.len() - 5].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn order_numbers_do_not_repeat() {
        let numbers: std::collections::HashSet<_> =
            (0..50).map(|_| generate_order_number()).collect();
        assert_eq!(numbers.len(), 50);
    }

    #[test]
    fn create_order_input_uses_upper_case_methods() {
        let input: CreateOrderInput = serde_json::from_str(
            r#"{"shipping_address_id":"550e8400-e29b-41d4-a716-446655440000","payment_method":"COD"}"#,
        )
        .unwrap();
        assert_eq!(input.payment_method, PaymentMethod::Cod);
        assert!(serde_json::from_str::<CreateOrderInput>(
            r#"{"shipping_address_id":"550e8400-e29b-41d4-a716-446655440000","payment_method":"PAYPAL"}"#
        )
        .is_err());
    }
}
