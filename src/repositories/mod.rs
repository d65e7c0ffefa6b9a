//! Data-store interface used by the commerce services.
//!
//! Every service operation runs inside one [`StoreTransaction`]: it is opened with
//! [`CommerceStore::begin`], committed explicitly, and rolled back when dropped
//! without a commit. Inventory and coupon counters are only changed through the
//! conditional primitives on the transaction, never by writing a value read earlier.

use async_trait::async_trait;
use uuid::Uuid;

use crate::entities::{
    commerce::{address, cart, cart_item, coupon, product, product_variant},
    order, order_item, payment,
};
use crate::errors::ServiceError;

pub mod memory;
pub mod sea_orm_store;

pub use memory::InMemoryStore;
pub use sea_orm_store::SeaOrmStore;

/// Opens units of work against the backing store.
#[async_trait]
pub trait CommerceStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, ServiceError>;
}

/// A single all-or-nothing unit of work.
#[async_trait]
pub trait StoreTransaction: Send {
    // ----- carts -----

    /// Loads the user's cart. Backends that support it lock the row until commit.
    async fn find_cart_by_user(&mut self, user_id: Uuid) -> Result<Option<cart::Model>, ServiceError>;
    async fn insert_cart(&mut self, cart: cart::Model) -> Result<cart::Model, ServiceError>;
    async fn update_cart(&mut self, cart: cart::Model) -> Result<cart::Model, ServiceError>;

    /// Items in insertion order
    async fn list_cart_items(&mut self, cart_id: Uuid) -> Result<Vec<cart_item::Model>, ServiceError>;
    async fn find_cart_item(
        &mut self,
        cart_id: Uuid,
        item_id: Uuid,
    ) -> Result<Option<cart_item::Model>, ServiceError>;
    async fn find_cart_item_by_variant(
        &mut self,
        cart_id: Uuid,
        variant_id: Uuid,
    ) -> Result<Option<cart_item::Model>, ServiceError>;
    async fn insert_cart_item(&mut self, item: cart_item::Model) -> Result<cart_item::Model, ServiceError>;
    async fn update_cart_item(&mut self, item: cart_item::Model) -> Result<cart_item::Model, ServiceError>;
    async fn delete_cart_item(&mut self, item_id: Uuid) -> Result<(), ServiceError>;
    async fn delete_cart_items(&mut self, cart_id: Uuid) -> Result<(), ServiceError>;

    // ----- catalog -----

    async fn find_product(&mut self, product_id: Uuid) -> Result<Option<product::Model>, ServiceError>;
    async fn find_variant(
        &mut self,
        variant_id: Uuid,
    ) -> Result<Option<product_variant::Model>, ServiceError>;

    /// Atomically subtracts `quantity` when at least that much stock remains.
    /// Returns `false` and changes nothing otherwise.
    async fn decrement_inventory(&mut self, variant_id: Uuid, quantity: i32) -> Result<bool, ServiceError>;

    /// Atomically adds `quantity` back to the variant's stock.
    async fn increment_inventory(&mut self, variant_id: Uuid, quantity: i32) -> Result<(), ServiceError>;

    // ----- coupons -----

    async fn find_coupon(&mut self, code: &str) -> Result<Option<coupon::Model>, ServiceError>;

    /// Atomically bumps `usage_count` while it is below `usage_limit` (or no limit is set).
    /// Returns `false` when the limit has already been reached.
    async fn increment_coupon_usage(&mut self, code: &str) -> Result<bool, ServiceError>;

    // ----- addresses -----

    /// Only returns the address when it belongs to `user_id`.
    async fn find_address(
        &mut self,
        user_id: Uuid,
        address_id: Uuid,
    ) -> Result<Option<address::Model>, ServiceError>;

    // ----- orders -----

    async fn insert_order(&mut self, order: order::Model) -> Result<order::Model, ServiceError>;
    async fn update_order(&mut self, order: order::Model) -> Result<order::Model, ServiceError>;
    async fn find_order(&mut self, order_id: Uuid) -> Result<Option<order::Model>, ServiceError>;
    async fn find_order_by_number(
        &mut self,
        order_number: &str,
    ) -> Result<Option<order::Model>, ServiceError>;
    /// Newest first
    async fn list_orders_for_user(&mut self, user_id: Uuid) -> Result<Vec<order::Model>, ServiceError>;
    async fn insert_order_items(&mut self, items: Vec<order_item::Model>) -> Result<(), ServiceError>;
    async fn list_order_items(&mut self, order_id: Uuid) -> Result<Vec<order_item::Model>, ServiceError>;

    // ----- payments -----

    async fn insert_payment(&mut self, payment: payment::Model) -> Result<payment::Model, ServiceError>;
    async fn update_payment(&mut self, payment: payment::Model) -> Result<payment::Model, ServiceError>;
    async fn list_payments(&mut self, order_id: Uuid) -> Result<Vec<payment::Model>, ServiceError>;
    async fn find_payment_by_transaction(
        &mut self,
        provider_transaction_id: &str,
    ) -> Result<Option<payment::Model>, ServiceError>;
    /// Most recent payment created for a provider-side order / intent id
    async fn find_payment_by_provider_ref(
        &mut self,
        provider_order_ref: &str,
    ) -> Result<Option<payment::Model>, ServiceError>;

    /// Makes every write of this unit of work visible at once.
    async fn commit(self: Box<Self>) -> Result<(), ServiceError>;
}
