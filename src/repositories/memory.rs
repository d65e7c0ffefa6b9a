use async_trait::async_trait;
use chrono::Utc;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{CommerceStore, StoreTransaction};
use crate::entities::{
    commerce::{address, cart, cart_item, coupon, product, product_variant},
    order, order_item, payment,
};
use crate::errors::ServiceError;

/// Each collection is shared between the committed state and open
/// transactions until one of them writes to it.
#[derive(Debug, Clone, Default)]
struct State {
    carts: Arc<HashMap<Uuid, cart::Model>>,
    cart_items: Arc<Vec<cart_item::Model>>,
    products: Arc<HashMap<Uuid, product::Model>>,
    variants: Arc<HashMap<Uuid, product_variant::Model>>,
    coupons: Arc<HashMap<String, coupon::Model>>,
    addresses: Arc<HashMap<Uuid, address::Model>>,
    orders: Arc<HashMap<Uuid, order::Model>>,
    order_items: Arc<Vec<order_item::Model>>,
    payments: Arc<Vec<payment::Model>>,
}

/// Process-local store for tests and the demo mode. Transactions are serialized
/// behind a single lock and work on a private copy that replaces the shared
/// state on commit; only the collections a transaction writes are copied.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_product(&self, product: product::Model) {
        Arc::make_mut(&mut self.state.lock().await.products).insert(product.id, product);
    }

    pub async fn insert_variant(&self, variant: product_variant::Model) {
        Arc::make_mut(&mut self.state.lock().await.variants).insert(variant.id, variant);
    }

    pub async fn insert_coupon(&self, mut coupon: coupon::Model) {
        coupon.code = coupon.code.to_uppercase();
        Arc::make_mut(&mut self.state.lock().await.coupons).insert(coupon.code.clone(), coupon);
    }

    pub async fn insert_address(&self, address: address::Model) {
        Arc::make_mut(&mut self.state.lock().await.addresses).insert(address.id, address);
    }

    /// Current committed view of a variant
    pub async fn variant(&self, variant_id: Uuid) -> Option<product_variant::Model> {
        self.state.lock().await.variants.get(&variant_id).cloned()
    }

    /// Current committed view of a coupon
    pub async fn coupon(&self, code: &str) -> Option<coupon::Model> {
        self.state
            .lock()
            .await
            .coupons
            .get(&code.to_uppercase())
            .cloned()
    }
}

#[async_trait]
impl CommerceStore for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, ServiceError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTransaction { guard, working }))
    }
}

pub struct InMemoryTransaction {
    guard: OwnedMutexGuard<State>,
    working: State,
}

fn missing(kind: &str, id: impl std::fmt::Display) -> ServiceError {
    ServiceError::NotFound(format!("{} {} not found", kind, id))
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn find_cart_by_user(&mut self, user_id: Uuid) -> Result<Option<cart::Model>, ServiceError> {
        Ok(self
            .working
            .carts
            .values()
            .find(|c| c.user_id == user_id)
            .cloned())
    }

    async fn insert_cart(&mut self, cart: cart::Model) -> Result<cart::Model, ServiceError> {
        if self.working.carts.values().any(|c| c.user_id == cart.user_id) {
            return Err(ServiceError::InvalidState(format!(
                "user {} already has a cart",
                cart.user_id
            )));
        }
        Arc::make_mut(&mut self.working.carts).insert(cart.id, cart.clone());
        Ok(cart)
    }

    async fn update_cart(&mut self, cart: cart::Model) -> Result<cart::Model, ServiceError> {
        match Arc::make_mut(&mut self.working.carts).get_mut(&cart.id) {
            Some(slot) => {
                *slot = cart.clone();
                Ok(cart)
            }
            None => Err(missing("Cart", cart.id)),
        }
    }

    async fn list_cart_items(&mut self, cart_id: Uuid) -> Result<Vec<cart_item::Model>, ServiceError> {
        Ok(self
            .working
            .cart_items
            .iter()
            .filter(|i| i.cart_id == cart_id)
            .cloned()
            .collect())
    }

    async fn find_cart_item(
        &mut self,
        cart_id: Uuid,
        item_id: Uuid,
    ) -> Result<Option<cart_item::Model>, ServiceError> {
        Ok(self
            .working
            .cart_items
            .iter()
            .find(|i| i.id == item_id && i.cart_id == cart_id)
            .cloned())
    }

    async fn find_cart_item_by_variant(
        &mut self,
        cart_id: Uuid,
        variant_id: Uuid,
    ) -> Result<Option<cart_item::Model>, ServiceError> {
        Ok(self
            .working
            .cart_items
            .iter()
            .find(|i| i.cart_id == cart_id && i.variant_id == variant_id)
            .cloned())
    }

    async fn insert_cart_item(&mut self, item: cart_item::Model) -> Result<cart_item::Model, ServiceError> {
        if self
            .working
            .cart_items
            .iter()
            .any(|i| i.cart_id == item.cart_id && i.variant_id == item.variant_id)
        {
            return Err(ServiceError::InvalidState(format!(
                "variant {} is already in cart {}",
                item.variant_id, item.cart_id
            )));
        }
        Arc::make_mut(&mut self.working.cart_items).push(item.clone());
        Ok(item)
    }

    async fn update_cart_item(&mut self, item: cart_item::Model) -> Result<cart_item::Model, ServiceError> {
        match Arc::make_mut(&mut self.working.cart_items).iter_mut().find(|i| i.id == item.id) {
            Some(slot) => {
                *slot = item.clone();
                Ok(item)
            }
            None => Err(ServiceError::ItemNotFound(item.id.to_string())),
        }
    }

    async fn delete_cart_item(&mut self, item_id: Uuid) -> Result<(), ServiceError> {
        Arc::make_mut(&mut self.working.cart_items).retain(|i| i.id != item_id);
        Ok(())
    }

    async fn delete_cart_items(&mut self, cart_id: Uuid) -> Result<(), ServiceError> {
        Arc::make_mut(&mut self.working.cart_items).retain(|i| i.cart_id != cart_id);
        Ok(())
    }

    async fn find_product(&mut self, product_id: Uuid) -> Result<Option<product::Model>, ServiceError> {
        Ok(self.working.products.get(&product_id).cloned())
    }

    async fn find_variant(
        &mut self,
        variant_id: Uuid,
    ) -> Result<Option<product_variant::Model>, ServiceError> {
        Ok(self.working.variants.get(&variant_id).cloned())
    }

    async fn decrement_inventory(&mut self, variant_id: Uuid, quantity: i32) -> Result<bool, ServiceError> {
        let variant = Arc::make_mut(&mut self.working.variants)
            .get_mut(&variant_id)
            .ok_or_else(|| missing("Variant", variant_id))?;
        if variant.inventory < quantity {
            return Ok(false);
        }
        variant.inventory -= quantity;
        variant.updated_at = Utc::now();
        Ok(true)
    }

    async fn increment_inventory(&mut self, variant_id: Uuid, quantity: i32) -> Result<(), ServiceError> {
        let variant = Arc::make_mut(&mut self.working.variants)
            .get_mut(&variant_id)
            .ok_or_else(|| missing("Variant", variant_id))?;
        variant.inventory += quantity;
        variant.updated_at = Utc::now();
        Ok(())
    }

    async fn find_coupon(&mut self, code: &str) -> Result<Option<coupon::Model>, ServiceError> {
        Ok(self.working.coupons.get(code).cloned())
    }

    async fn increment_coupon_usage(&mut self, code: &str) -> Result<bool, ServiceError> {
        let coupon = Arc::make_mut(&mut self.working.coupons)
            .get_mut(code)
            .ok_or(ServiceError::CouponNotFound)?;
        if matches!(coupon.usage_limit, Some(limit) if coupon.usage_count >= limit) {
            return Ok(false);
        }
        coupon.usage_count += 1;
        Ok(true)
    }

    async fn find_address(
        &mut self,
        user_id: Uuid,
        address_id: Uuid,
    ) -> Result<Option<address::Model>, ServiceError> {
        Ok(self
            .working
            .addresses
            .get(&address_id)
            .filter(|a| a.user_id == user_id)
            .cloned())
    }

    async fn insert_order(&mut self, order: order::Model) -> Result<order::Model, ServiceError> {
        if self
            .working
            .orders
            .values()
            .any(|o| o.order_number == order.order_number)
        {
            return Err(ServiceError::InternalError(format!(
                "duplicate order number {}",
                order.order_number
            )));
        }
        Arc::make_mut(&mut self.working.orders).insert(order.id, order.clone());
        Ok(order)
    }

    async fn update_order(&mut self, order: order::Model) -> Result<order::Model, ServiceError> {
        match Arc::make_mut(&mut self.working.orders).get_mut(&order.id) {
            Some(slot) => {
                *slot = order.clone();
                Ok(order)
            }
            None => Err(ServiceError::OrderNotFound(order.id.to_string())),
        }
    }

    async fn find_order(&mut self, order_id: Uuid) -> Result<Option<order::Model>, ServiceError> {
        Ok(self.working.orders.get(&order_id).cloned())
    }

    async fn find_order_by_number(
        &mut self,
        order_number: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        Ok(self
            .working
            .orders
            .values()
            .find(|o| o.order_number == order_number)
            .cloned())
    }

    async fn list_orders_for_user(&mut self, user_id: Uuid) -> Result<Vec<order::Model>, ServiceError> {
        let mut orders: Vec<_> = self
            .working
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn insert_order_items(&mut self, items: Vec<order_item::Model>) -> Result<(), ServiceError> {
        Arc::make_mut(&mut self.working.order_items).extend(items);
        Ok(())
    }

    async fn list_order_items(&mut self, order_id: Uuid) -> Result<Vec<order_item::Model>, ServiceError> {
        Ok(self
            .working
            .order_items
            .iter()
            .filter(|i| i.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn insert_payment(&mut self, payment: payment::Model) -> Result<payment::Model, ServiceError> {
        Arc::make_mut(&mut self.working.payments).push(payment.clone());
        Ok(payment)
    }

    async fn update_payment(&mut self, payment: payment::Model) -> Result<payment::Model, ServiceError> {
        match Arc::make_mut(&mut self.working.payments).iter_mut().find(|p| p.id == payment.id) {
            Some(slot) => {
                *slot = payment.clone();
                Ok(payment)
            }
            None => Err(missing("Payment", payment.id)),
        }
    }

    async fn list_payments(&mut self, order_id: Uuid) -> Result<Vec<payment::Model>, ServiceError> {
        Ok(self
            .working
            .payments
            .iter()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn find_payment_by_transaction(
        &mut self,
        provider_transaction_id: &str,
    ) -> Result<Option<payment::Model>, ServiceError> {
        Ok(self
            .working
            .payments
            .iter()
            .find(|p| p.provider_transaction_id.as_deref() == Some(provider_transaction_id))
            .cloned())
    }

    async fn find_payment_by_provider_ref(
        &mut self,
        provider_order_ref: &str,
    ) -> Result<Option<payment::Model>, ServiceError> {
        Ok(self
            .working
            .payments
            .iter()
            .rev()
            .find(|p| p.provider_order_ref.as_deref() == Some(provider_order_ref))
            .cloned())
    }

    async fn commit(self: Box<Self>) -> Result<(), ServiceError> {
        let InMemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
