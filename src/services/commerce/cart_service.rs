use crate::{
    config::PricingConfig,
    entities::commerce::{cart, cart_item, CartModel},
    errors::ServiceError,
    events::{Event, EventSender},
    repositories::{CommerceStore, StoreTransaction},
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    coupon_service::{normalize_code, validate_coupon},
    pricing::{compute_totals, PricedLine},
};

/// Shopping cart service.
///
/// Every user owns exactly one cart. It is created on first access, reused
/// across sessions and emptied (never deleted) by checkout. Each mutation runs
/// in its own store transaction, recomputes the totals from the current lines
/// and re-validates the applied coupon before persisting.
///
/// # Examples
///
/// ```ignore
/// use nursery_api::services::commerce::{AddToCartInput, CartService};
///
/// let cart_service = CartService::new(store, event_sender, config.pricing());
/// let cart = cart_service
///     .add_item(user_id, AddToCartInput { variant_id, quantity: 2 })
///     .await?;
/// println!("total: {}", cart.cart.total);
/// ```
#[derive(Clone)]
pub struct CartService {
    store: Arc<dyn CommerceStore>,
    event_sender: Arc<EventSender>,
    pricing: PricingConfig,
}

impl CartService {
    /// Creates a new `CartService` instance.
    ///
    /// # Arguments
    ///
    /// * `store` - Backing data store
    /// * `event_sender` - Event sender for publishing cart events
    /// * `pricing` - Tax rate used when recomputing totals
    pub fn new(
        store: Arc<dyn CommerceStore>,
        event_sender: Arc<EventSender>,
        pricing: PricingConfig,
    ) -> Self {
        Self {
            store,
            event_sender,
            pricing,
        }
    }

    /// Returns the user's cart, creating an empty one on first access.
    ///
    /// Totals are recomputed on read so a coupon that lapsed since the last
    /// mutation shows up as a warning with no discount.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, user_id: Uuid) -> Result<CartWithItems, ServiceError> {
        let mut tx = self.store.begin().await?;
        let cart = load_or_create_cart(tx.as_mut(), user_id).await?;
        let items = tx.list_cart_items(cart.id).await?;

        let (recalculated, coupon_warning) = self.recalculate(tx.as_mut(), cart.clone(), &items).await?;
        let cart = if recalculated != cart {
            tx.update_cart(recalculated).await?
        } else {
            cart
        };

        let view = hydrate(tx.as_mut(), cart, items, coupon_warning).await?;
        tx.commit().await?;
        Ok(view)
    }

    /// Adds a variant to the cart.
    ///
    /// If the variant is already in the cart its quantity accumulates. The
    /// line price is refreshed to the variant's current price.
    ///
    /// # Errors
    ///
    /// * `ServiceError::ValidationError` - `quantity` is below 1
    /// * `ServiceError::NotFound` - The variant does not exist
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        input: AddToCartInput,
    ) -> Result<CartWithItems, ServiceError> {
        ensure_positive_quantity(input.quantity)?;

        let mut tx = self.store.begin().await?;
        let cart = load_or_create_cart(tx.as_mut(), user_id).await?;

        let variant = tx.find_variant(input.variant_id).await?.ok_or_else(|| {
            ServiceError::NotFound(format!("Variant {} not found", input.variant_id))
        })?;

        let now = Utc::now();
        match tx.find_cart_item_by_variant(cart.id, variant.id).await? {
            Some(mut item) => {
                let quantity = item.quantity.checked_add(input.quantity).ok_or_else(|| {
                    ServiceError::ValidationError("quantity is too large".to_string())
                })?;
                item.quantity = quantity;
                item.price = variant.price;
                item.subtotal = PricedLine::new(variant.price, quantity).subtotal();
                item.updated_at = now;
                tx.update_cart_item(item).await?;
            }
            None => {
                tx.insert_cart_item(cart_item::Model {
                    id: Uuid::new_v4(),
                    cart_id: cart.id,
                    product_id: variant.product_id,
                    variant_id: variant.id,
                    quantity: input.quantity,
                    price: variant.price,
                    subtotal: PricedLine::new(variant.price, input.quantity).subtotal(),
                    created_at: now,
                    updated_at: now,
                })
                .await?;
            }
        }

        let view = self.persist_totals(tx, cart).await?;
        info!(
            "Added item to cart {}: variant {} x{}",
            view.cart.id, input.variant_id, input.quantity
        );
        Ok(view)
    }

    /// Sets the quantity of one cart line.
    ///
    /// # Errors
    ///
    /// * `ServiceError::ValidationError` - `quantity` is below 1
    /// * `ServiceError::ItemNotFound` - The line is missing or belongs to another user's cart
    #[instrument(skip(self))]
    pub async fn update_item(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<CartWithItems, ServiceError> {
        ensure_positive_quantity(quantity)?;

        let mut tx = self.store.begin().await?;
        let cart = load_or_create_cart(tx.as_mut(), user_id).await?;
        let mut item = tx
            .find_cart_item(cart.id, item_id)
            .await?
            .ok_or_else(|| ServiceError::ItemNotFound(item_id.to_string()))?;

        let price = match tx.find_variant(item.variant_id).await? {
            Some(variant) => variant.price,
            None => item.price,
        };
        item.quantity = quantity;
        item.price = price;
        item.subtotal = PricedLine::new(price, quantity).subtotal();
        item.updated_at = Utc::now();
        tx.update_cart_item(item).await?;

        self.persist_totals(tx, cart).await
    }

    /// Removes one line from the cart.
    ///
    /// # Errors
    ///
    /// * `ServiceError::ItemNotFound` - The line is missing or belongs to another user's cart
    #[instrument(skip(self))]
    pub async fn remove_item(&self, user_id: Uuid, item_id: Uuid) -> Result<CartWithItems, ServiceError> {
        let mut tx = self.store.begin().await?;
        let cart = load_or_create_cart(tx.as_mut(), user_id).await?;
        let item = tx
            .find_cart_item(cart.id, item_id)
            .await?
            .ok_or_else(|| ServiceError::ItemNotFound(item_id.to_string()))?;

        tx.delete_cart_item(item.id).await?;
        self.persist_totals(tx, cart).await
    }

    /// Removes every line and the coupon, zeroing the totals.
    #[instrument(skip(self))]
    pub async fn clear(&self, user_id: Uuid) -> Result<CartWithItems, ServiceError> {
        let mut tx = self.store.begin().await?;
        let mut cart = load_or_create_cart(tx.as_mut(), user_id).await?;
        empty_cart(tx.as_mut(), &mut cart).await?;
        let cart = tx.update_cart(cart).await?;
        let view = hydrate(tx.as_mut(), cart, Vec::new(), None).await?;
        tx.commit().await?;

        self.publish_updated(&view).await;
        info!("Cleared cart: {}", view.cart.id);
        Ok(view)
    }

    /// Applies a coupon to the cart.
    ///
    /// The code is upper-cased and checked against the current subtotal. When a
    /// check fails the cart is left untouched and the coupon error is returned.
    #[instrument(skip(self))]
    pub async fn apply_coupon(&self, user_id: Uuid, code: &str) -> Result<CartWithItems, ServiceError> {
        let code = normalize_code(code);
        let mut tx = self.store.begin().await?;
        let mut cart = load_or_create_cart(tx.as_mut(), user_id).await?;
        let items = tx.list_cart_items(cart.id).await?;

        let subtotal = compute_totals(&priced_lines(&items), Decimal::ZERO, Decimal::ZERO).subtotal;
        let coupon = tx.find_coupon(&code).await?;
        validate_coupon(coupon.as_ref(), subtotal, Utc::now())?;

        cart.coupon_code = Some(code.clone());
        let view = self.persist_totals(tx, cart).await?;

        self.event_sender
            .send_or_log(Event::CouponApplied {
                cart_id: view.cart.id,
                code: code.clone(),
            })
            .await;
        info!(cart_id = %view.cart.id, %code, discount = %view.cart.discount, "coupon applied");
        Ok(view)
    }

    /// Drops the applied coupon and recomputes totals without a discount.
    #[instrument(skip(self))]
    pub async fn remove_coupon(&self, user_id: Uuid) -> Result<CartWithItems, ServiceError> {
        let mut tx = self.store.begin().await?;
        let mut cart = load_or_create_cart(tx.as_mut(), user_id).await?;
        cart.coupon_code = None;
        self.persist_totals(tx, cart).await
    }

    /// Recomputes totals, writes the cart, commits and publishes `CartUpdated`.
    async fn persist_totals(
        &self,
        mut tx: Box<dyn StoreTransaction>,
        cart: CartModel,
    ) -> Result<CartWithItems, ServiceError> {
        let items = tx.list_cart_items(cart.id).await?;
        let (cart, coupon_warning) = self.recalculate(tx.as_mut(), cart, &items).await?;
        let cart = tx.update_cart(cart).await?;
        let view = hydrate(tx.as_mut(), cart, items, coupon_warning).await?;
        tx.commit().await?;

        self.publish_updated(&view).await;
        Ok(view)
    }

    /// Recalculate cart totals, re-validating the applied coupon.
    ///
    /// A coupon that no longer validates stays on the cart but contributes no
    /// discount; the failure message is returned as a warning.
    async fn recalculate(
        &self,
        tx: &mut dyn StoreTransaction,
        mut cart: CartModel,
        items: &[cart_item::Model],
    ) -> Result<(CartModel, Option<String>), ServiceError> {
        let lines = priced_lines(items);
        let subtotal = compute_totals(&lines, Decimal::ZERO, Decimal::ZERO).subtotal;

        let mut coupon_warning = None;
        let discount = match cart.coupon_code.as_deref() {
            Some(code) => {
                let coupon = tx.find_coupon(code).await?;
                match validate_coupon(coupon.as_ref(), subtotal, Utc::now()) {
                    Ok(discount) => discount,
                    Err(e) => {
                        warn!(cart_id = %cart.id, %code, error = %e, "applied coupon no longer valid");
                        coupon_warning = Some(e.to_string());
                        Decimal::ZERO
                    }
                }
            }
            None => Decimal::ZERO,
        };

        let totals = compute_totals(&lines, discount, self.pricing.tax_rate_percent);
        if (cart.subtotal, cart.discount, cart.tax, cart.total)
            != (totals.subtotal, totals.discount, totals.tax, totals.total)
        {
            cart.subtotal = totals.subtotal;
            cart.discount = totals.discount;
            cart.tax = totals.tax;
            cart.total = totals.total;
            cart.updated_at = Utc::now();
        }

        Ok((cart, coupon_warning))
    }

    async fn publish_updated(&self, view: &CartWithItems) {
        self.event_sender
            .send_or_log(Event::CartUpdated {
                cart_id: view.cart.id,
                user_id: view.cart.user_id,
            })
            .await;
    }
}

/// Loads the user's cart inside `tx`, inserting an empty one if none exists yet.
pub(crate) async fn load_or_create_cart(
    tx: &mut dyn StoreTransaction,
    user_id: Uuid,
) -> Result<CartModel, ServiceError> {
    match tx.find_cart_by_user(user_id).await? {
        Some(cart) => Ok(cart),
        None => {
            let cart = tx.insert_cart(cart::Model::empty(user_id)).await?;
            info!("Created cart {} for user {}", cart.id, user_id);
            Ok(cart)
        }
    }
}

/// Deletes every line, drops the coupon and zeroes the totals on `cart`.
/// The caller persists `cart`.
pub(crate) async fn empty_cart(
    tx: &mut dyn StoreTransaction,
    cart: &mut CartModel,
) -> Result<(), ServiceError> {
    tx.delete_cart_items(cart.id).await?;
    cart.coupon_code = None;
    cart.subtotal = Decimal::ZERO;
    cart.discount = Decimal::ZERO;
    cart.tax = Decimal::ZERO;
    cart.total = Decimal::ZERO;
    cart.updated_at = Utc::now();
    Ok(())
}

fn priced_lines(items: &[cart_item::Model]) -> Vec<PricedLine> {
    items
        .iter()
        .map(|item| PricedLine::new(item.price, item.quantity))
        .collect()
}

fn ensure_positive_quantity(quantity: i32) -> Result<(), ServiceError> {
    if quantity < 1 {
        return Err(ServiceError::ValidationError(
            "quantity must be at least 1".to_string(),
        ));
    }
    Ok(())
}

async fn hydrate(
    tx: &mut dyn StoreTransaction,
    cart: CartModel,
    items: Vec<cart_item::Model>,
    coupon_warning: Option<String>,
) -> Result<CartWithItems, ServiceError> {
    let mut lines = Vec::with_capacity(items.len());
    for item in items {
        let product = tx.find_product(item.product_id).await?;
        let variant = tx.find_variant(item.variant_id).await?;
        lines.push(CartLine {
            id: item.id,
            product_id: item.product_id,
            variant_id: item.variant_id,
            product_name: product.as_ref().map(|p| p.name.clone()).unwrap_or_default(),
            image_url: product.and_then(|p| p.image_url),
            variant_name: variant.as_ref().map(|v| v.name.clone()).unwrap_or_default(),
            sku: variant.map(|v| v.sku).unwrap_or_default(),
            quantity: item.quantity,
            price: item.price,
            subtotal: item.subtotal,
        });
    }

    Ok(CartWithItems {
        cart,
        items: lines,
        coupon_warning,
    })
}

/// Input for adding item to cart
#[derive(Debug, Clone, Deserialize)]
pub struct AddToCartInput {
    pub variant_id: Uuid,
    pub quantity: i32,
}

/// A cart line with the product and variant details needed for display
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartLine {
    pub id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub product_name: String,
    pub variant_name: String,
    pub sku: String,
    pub image_url: Option<String>,
    pub quantity: i32,
    pub price: Decimal,
    pub subtotal: Decimal,
}

/// Cart with items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartWithItems {
    #[serde(flatten)]
    pub cart: CartModel,
    pub items: Vec<CartLine>,
    /// Set when the applied coupon no longer validates against the cart
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_warning: Option<String>,
}
