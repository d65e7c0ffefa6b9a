use sea_orm::{EntityTrait, Schema};
use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_catalog_tables::Migration),
            Box::new(m20240101_000002_create_cart_tables::Migration),
            Box::new(m20240101_000003_create_order_tables::Migration),
        ]
    }
}

/// Creates the table for `entity` straight from its model definition.
async fn create_entity_table<E>(manager: &SchemaManager<'_>, entity: E) -> Result<(), DbErr>
where
    E: EntityTrait,
{
    let schema = Schema::new(manager.get_database_backend());
    manager
        .create_table(schema.create_table_from_entity(entity).if_not_exists().to_owned())
        .await
}

async fn drop_entity_table<E>(manager: &SchemaManager<'_>, entity: E) -> Result<(), DbErr>
where
    E: EntityTrait + Iden + 'static,
{
    manager
        .drop_table(Table::drop().table(entity).if_exists().to_owned())
        .await
}

mod m20240101_000001_create_catalog_tables {
    use super::*;
    use crate::entities::commerce::{address, coupon, product, product_variant};

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_catalog_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            create_entity_table(manager, product::Entity).await?;
            create_entity_table(manager, product_variant::Entity).await?;
            create_entity_table(manager, coupon::Entity).await?;
            create_entity_table(manager, address::Entity).await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_addresses_user_id")
                        .table(address::Entity)
                        .col(address::Column::UserId)
                        .if_not_exists()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            drop_entity_table(manager, address::Entity).await?;
            drop_entity_table(manager, coupon::Entity).await?;
            drop_entity_table(manager, product_variant::Entity).await?;
            drop_entity_table(manager, product::Entity).await
        }
    }
}

mod m20240101_000002_create_cart_tables {
    use super::*;
    use crate::entities::commerce::{cart, cart_item};

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_cart_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            create_entity_table(manager, cart::Entity).await?;
            create_entity_table(manager, cart_item::Entity).await?;

            // One line per variant in a cart
            manager
                .create_index(
                    Index::create()
                        .name("uq_cart_items_cart_variant")
                        .table(cart_item::Entity)
                        .col(cart_item::Column::CartId)
                        .col(cart_item::Column::VariantId)
                        .unique()
                        .if_not_exists()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            drop_entity_table(manager, cart_item::Entity).await?;
            drop_entity_table(manager, cart::Entity).await
        }
    }
}

mod m20240101_000003_create_order_tables {
    use super::*;
    use crate::entities::{order, order_item, payment};

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_order_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            create_entity_table(manager, order::Entity).await?;
            create_entity_table(manager, order_item::Entity).await?;
            create_entity_table(manager, payment::Entity).await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_orders_user_id")
                        .table(order::Entity)
                        .col(order::Column::UserId)
                        .if_not_exists()
                        .to_owned(),
                )
                .await?;
            manager
                .create_index(
                    Index::create()
                        .name("idx_order_items_order_id")
                        .table(order_item::Entity)
                        .col(order_item::Column::OrderId)
                        .if_not_exists()
                        .to_owned(),
                )
                .await?;
            manager
                .create_index(
                    Index::create()
                        .name("idx_payments_order_id")
                        .table(payment::Entity)
                        .col(payment::Column::OrderId)
                        .if_not_exists()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            drop_entity_table(manager, payment::Entity).await?;
            drop_entity_table(manager, order_item::Entity).await?;
            drop_entity_table(manager, order::Entity).await
        }
    }
}
