use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_create_orders_table::Migration),
            Box::new(m20250301_000002_create_promo_codes_table::Migration),
            Box::new(m20250301_000003_add_order_indexes::Migration),
        ]
    }
}

// Migration implementations

mod m20250301_000001_create_orders_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000001_create_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Orders table aligned with entities::order Model
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Orders::OrderNumber)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Orders::CustomerId).uuid().not_null())
                        .col(ColumnDef::new(Orders::Status).string().not_null())
                        .col(
                            ColumnDef::new(Orders::TotalAmount)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::Currency).string().not_null())
                        .col(ColumnDef::new(Orders::PaymentMethod).string().not_null())
                        .col(ColumnDef::new(Orders::PaymentStatus).string().not_null())
                        .col(ColumnDef::new(Orders::PaymentTransactionId).string().null())
                        .col(ColumnDef::new(Orders::PaymentVerifiedAt).timestamp().null())
                        .col(ColumnDef::new(Orders::ShippingAddress).text().null())
                        .col(ColumnDef::new(Orders::Notes).text().null())
                        .col(ColumnDef::new(Orders::PromoCodeId).uuid().null())
                        .col(ColumnDef::new(Orders::DiscountAmount).decimal().null())
                        .col(ColumnDef::new(Orders::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Orders::UpdatedAt).timestamp().null())
                        .col(
                            ColumnDef::new(Orders::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum Orders {
        Table,
        Id,
        OrderNumber,
        CustomerId,
        Status,
        TotalAmount,
        Currency,
        PaymentMethod,
        PaymentStatus,
        PaymentTransactionId,
        PaymentVerifiedAt,
        ShippingAddress,
        Notes,
        PromoCodeId,
        DiscountAmount,
        CreatedAt,
        UpdatedAt,
        Version,
    }
}

mod m20250301_000002_create_promo_codes_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000002_create_promo_codes_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PromoCodes::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PromoCodes::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PromoCodes::Code)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(PromoCodes::DiscountType).string().not_null())
                        .col(
                            ColumnDef::new(PromoCodes::DiscountValue)
                                .decimal()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PromoCodes::UsageLimit).integer().null())
                        .col(ColumnDef::new(PromoCodes::PerUserLimit).integer().null())
                        .col(
                            ColumnDef::new(PromoCodes::UsageCount)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(PromoCodes::ValidFrom).timestamp().not_null())
                        .col(
                            ColumnDef::new(PromoCodes::ValidUntil)
                                .timestamp()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PromoCodes::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(ColumnDef::new(PromoCodes::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(PromoCodes::UpdatedAt).timestamp().null())
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PromoCodes::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum PromoCodes {
        Table,
        Id,
        Code,
        DiscountType,
        DiscountValue,
        UsageLimit,
        PerUserLimit,
        UsageCount,
        ValidFrom,
        ValidUntil,
        IsActive,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250301_000003_add_order_indexes {

    use sea_orm_migration::prelude::*;

    use super::m20250301_000001_create_orders_table::Orders;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000003_add_order_indexes"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // The reaper scans by (status, created_at); customer listings by customer_id
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_status_created_at")
                        .table(Orders::Table)
                        .col(Orders::Status)
                        .col(Orders::CreatedAt)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_customer_id")
                        .table(Orders::Table)
                        .col(Orders::CustomerId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_index(
                    Index::drop()
                        .name("idx_orders_status_created_at")
                        .table(Orders::Table)
                        .to_owned(),
                )
                .await?;

            manager
                .drop_index(
                    Index::drop()
                        .name("idx_orders_customer_id")
                        .table(Orders::Table)
                        .to_owned(),
                )
                .await
        }
    }
}
