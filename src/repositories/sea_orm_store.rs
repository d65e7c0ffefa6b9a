use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    sea_query::{Condition, Expr},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseBackend, DatabaseConnection,
    DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use std::sync::Arc;
use uuid::Uuid;

use super::{CommerceStore, StoreTransaction};
use crate::entities::{
    commerce::{address, cart, cart_item, coupon, product, product_variant},
    order, order_item, payment,
};
use crate::errors::ServiceError;

/// Store backed by a relational database through sea-orm.
#[derive(Clone)]
pub struct SeaOrmStore {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CommerceStore for SeaOrmStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, ServiceError> {
        let txn = self.db.begin().await?;
        Ok(Box::new(SeaOrmTransaction { txn }))
    }
}

pub struct SeaOrmTransaction {
    txn: DatabaseTransaction,
}

impl SeaOrmTransaction {
    fn supports_row_locks(&self) -> bool {
        matches!(
            self.txn.get_database_backend(),
            DatabaseBackend::Postgres | DatabaseBackend::MySql
        )
    }
}

#[async_trait]
impl StoreTransaction for SeaOrmTransaction {
    async fn find_cart_by_user(&mut self, user_id: Uuid) -> Result<Option<cart::Model>, ServiceError> {
        let mut query = cart::Entity::find().filter(cart::Column::UserId.eq(user_id));
        if self.supports_row_locks() {
            query = query.lock_exclusive();
        }
        Ok(query.one(&self.txn).await?)
    }

    async fn insert_cart(&mut self, cart: cart::Model) -> Result<cart::Model, ServiceError> {
        let active: cart::ActiveModel = cart.into();
        Ok(active.reset_all().insert(&self.txn).await?)
    }

    async fn update_cart(&mut self, cart: cart::Model) -> Result<cart::Model, ServiceError> {
        let active: cart::ActiveModel = cart.into();
        Ok(active.reset_all().update(&self.txn).await?)
    }

    async fn list_cart_items(&mut self, cart_id: Uuid) -> Result<Vec<cart_item::Model>, ServiceError> {
        Ok(cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&self.txn)
            .await?)
    }

    async fn find_cart_item(
        &mut self,
        cart_id: Uuid,
        item_id: Uuid,
    ) -> Result<Option<cart_item::Model>, ServiceError> {
        Ok(cart_item::Entity::find_by_id(item_id)
            .filter(cart_item::Column::CartId.eq(cart_id))
            .one(&self.txn)
            .await?)
    }

    async fn find_cart_item_by_variant(
        &mut self,
        cart_id: Uuid,
        variant_id: Uuid,
    ) -> Result<Option<cart_item::Model>, ServiceError> {
        Ok(cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .filter(cart_item::Column::VariantId.eq(variant_id))
            .one(&self.txn)
            .await?)
    }

    async fn insert_cart_item(&mut self, item: cart_item::Model) -> Result<cart_item::Model, ServiceError> {
        let active: cart_item::ActiveModel = item.into();
        Ok(active.reset_all().insert(&self.txn).await?)
    }

    async fn update_cart_item(&mut self, item: cart_item::Model) -> Result<cart_item::Model, ServiceError> {
        let active: cart_item::ActiveModel = item.into();
        Ok(active.reset_all().update(&self.txn).await?)
    }

    async fn delete_cart_item(&mut self, item_id: Uuid) -> Result<(), ServiceError> {
        cart_item::Entity::delete_by_id(item_id)
            .exec(&self.txn)
            .await?;
        Ok(())
    }

    async fn delete_cart_items(&mut self, cart_id: Uuid) -> Result<(), ServiceError> {
        cart_item::Entity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .exec(&self.txn)
            .await?;
        Ok(())
    }

    async fn find_product(&mut self, product_id: Uuid) -> Result<Option<product::Model>, ServiceError> {
        Ok(product::Entity::find_by_id(product_id).one(&self.txn).await?)
    }

    async fn find_variant(
        &mut self,
        variant_id: Uuid,
    ) -> Result<Option<product_variant::Model>, ServiceError> {
        Ok(product_variant::Entity::find_by_id(variant_id)
            .one(&self.txn)
            .await?)
    }

    async fn decrement_inventory(&mut self, variant_id: Uuid, quantity: i32) -> Result<bool, ServiceError> {
        // UPDATE ... SET inventory = inventory - q WHERE id = ? AND inventory >= q
        let result = product_variant::Entity::update_many()
            .col_expr(
                product_variant::Column::Inventory,
                Expr::col(product_variant::Column::Inventory).sub(quantity),
            )
            .col_expr(product_variant::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product_variant::Column::Id.eq(variant_id))
            .filter(product_variant::Column::Inventory.gte(quantity))
            .exec(&self.txn)
            .await?;
        Ok(result.rows_affected == 1)
    }

    async fn increment_inventory(&mut self, variant_id: Uuid, quantity: i32) -> Result<(), ServiceError> {
        let result = product_variant::Entity::update_many()
            .col_expr(
                product_variant::Column::Inventory,
                Expr::col(product_variant::Column::Inventory).add(quantity),
            )
            .col_expr(product_variant::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product_variant::Column::Id.eq(variant_id))
            .exec(&self.txn)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Variant {} not found",
                variant_id
            )));
        }
        Ok(())
    }

    async fn find_coupon(&mut self, code: &str) -> Result<Option<coupon::Model>, ServiceError> {
        Ok(coupon::Entity::find()
            .filter(coupon::Column::Code.eq(code))
            .one(&self.txn)
            .await?)
    }

    async fn increment_coupon_usage(&mut self, code: &str) -> Result<bool, ServiceError> {
        let result = coupon::Entity::update_many()
            .col_expr(
                coupon::Column::UsageCount,
                Expr::col(coupon::Column::UsageCount).add(1),
            )
            .filter(coupon::Column::Code.eq(code))
            .filter(
                Condition::any()
                    .add(coupon::Column::UsageLimit.is_null())
                    .add(Expr::col(coupon::Column::UsageCount).lt(Expr::col(coupon::Column::UsageLimit))),
            )
            .exec(&self.txn)
            .await?;
        Ok(result.rows_affected == 1)
    }

    async fn find_address(
        &mut self,
        user_id: Uuid,
        address_id: Uuid,
    ) -> Result<Option<address::Model>, ServiceError> {
        Ok(address::Entity::find_by_id(address_id)
            .filter(address::Column::UserId.eq(user_id))
            .one(&self.txn)
            .await?)
    }

    async fn insert_order(&mut self, order: order::Model) -> Result<order::Model, ServiceError> {
        let active: order::ActiveModel = order.into();
        Ok(active.reset_all().insert(&self.txn).await?)
    }

    async fn update_order(&mut self, order: order::Model) -> Result<order::Model, ServiceError> {
        let active: order::ActiveModel = order.into();
        Ok(active.reset_all().update(&self.txn).await?)
    }

    async fn find_order(&mut self, order_id: Uuid) -> Result<Option<order::Model>, ServiceError> {
        let mut query = order::Entity::find_by_id(order_id);
        if self.supports_row_locks() {
            query = query.lock_exclusive();
        }
        Ok(query.one(&self.txn).await?)
    }

    async fn find_order_by_number(
        &mut self,
        order_number: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        Ok(order::Entity::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(&self.txn)
            .await?)
    }

    async fn list_orders_for_user(&mut self, user_id: Uuid) -> Result<Vec<order::Model>, ServiceError> {
        Ok(order::Entity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .all(&self.txn)
            .await?)
    }

    async fn insert_order_items(&mut self, items: Vec<order_item::Model>) -> Result<(), ServiceError> {
        if items.is_empty() {
            return Ok(());
        }
        let models = items
            .into_iter()
            .map(|item| order_item::ActiveModel::from(item).reset_all());
        order_item::Entity::insert_many(models)
            .exec(&self.txn)
            .await?;
        Ok(())
    }

    async fn list_order_items(&mut self, order_id: Uuid) -> Result<Vec<order_item::Model>, ServiceError> {
        Ok(order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&self.txn)
            .await?)
    }

    async fn insert_payment(&mut self, payment: payment::Model) -> Result<payment::Model, ServiceError> {
        let active: payment::ActiveModel = payment.into();
        Ok(active.reset_all().insert(&self.txn).await?)
    }

    async fn update_payment(&mut self, payment: payment::Model) -> Result<payment::Model, ServiceError> {
        let active: payment::ActiveModel = payment.into();
        Ok(active.reset_all().update(&self.txn).await?)
    }

    async fn list_payments(&mut self, order_id: Uuid) -> Result<Vec<payment::Model>, ServiceError> {
        Ok(payment::Entity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .order_by_asc(payment::Column::CreatedAt)
            .all(&self.txn)
            .await?)
    }

    async fn find_payment_by_transaction(
        &mut self,
        provider_transaction_id: &str,
    ) -> Result<Option<payment::Model>, ServiceError> {
        Ok(payment::Entity::find()
            .filter(payment::Column::ProviderTransactionId.eq(provider_transaction_id))
            .one(&self.txn)
            .await?)
    }

    async fn find_payment_by_provider_ref(
        &mut self,
        provider_order_ref: &str,
    ) -> Result<Option<payment::Model>, ServiceError> {
        Ok(payment::Entity::find()
            .filter(payment::Column::ProviderOrderRef.eq(provider_order_ref))
            .order_by_desc(payment::Column::CreatedAt)
            .one(&self.txn)
            .await?)
    }

    async fn commit(self: Box<Self>) -> Result<(), ServiceError> {
        self.txn.commit().await?;
        Ok(())
    }
}
