use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_create_users_table::Migration),
            Box::new(m20250301_000002_create_orders_table::Migration),
            Box::new(m20250301_000003_create_order_items_table::Migration),
            Box::new(m20250301_000004_create_status_ledgers::Migration),
            Box::new(m20250301_000005_create_receipts_table::Migration),
        ]
    }
}

// Migration implementations

mod m20250301_000001_create_users_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000001_create_users_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Users::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Users::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Users::Email).string().not_null().unique_key())
                        .col(ColumnDef::new(Users::Name).string().null())
                        .col(ColumnDef::new(Users::Phone).string().null())
                        .col(ColumnDef::new(Users::UserType).string_len(16).not_null())
                        .col(
                            ColumnDef::new(Users::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Users::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Users {
        Table,
        Id,
        Email,
        Name,
        Phone,
        UserType,
        CreatedAt,
    }
}

mod m20250301_000002_create_orders_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000002_create_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::ClientId).uuid().not_null())
                        .col(ColumnDef::new(Orders::PickupAddress).string().not_null())
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_client_id")
                        .table(Orders::Table)
                        .col(Orders::ClientId)
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
    pub(super) enum Orders {
        Table,
        Id,
        ClientId,
        PickupAddress,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250301_000003_create_order_items_table {

    use super::m20250301_000002_create_orders_table::Orders;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000003_create_order_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItems::OrderId).uuid().not_null())
                        .col(
                            ColumnDef::new(OrderItems::DeliveryAddress)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItems::DeliveryPhone).string().not_null())
                        .col(ColumnDef::new(OrderItems::DeliveryNotes).text().null())
                        .col(ColumnDef::new(OrderItems::CourierId).uuid().null())
                        .col(ColumnDef::new(OrderItems::Status).string_len(32).not_null())
                        .col(
                            ColumnDef::new(OrderItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderItems::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_items_order_id")
                                .from(OrderItems::Table, OrderItems::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_items_order_id")
                        .table(OrderItems::Table)
                        .col(OrderItems::OrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_items_courier_id")
                        .table(OrderItems::Table)
                        .col(OrderItems::CourierId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum OrderItems {
        Table,
        Id,
        OrderId,
        DeliveryAddress,
        DeliveryPhone,
        DeliveryNotes,
        CourierId,
        Status,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250301_000004_create_status_ledgers {

    use super::m20250301_000002_create_orders_table::Orders;
    use super::m20250301_000003_create_order_items_table::OrderItems;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000004_create_status_ledgers"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(OrderStatuses::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderStatuses::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderStatuses::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderStatuses::Sequence).integer().not_null())
                        .col(
                            ColumnDef::new(OrderStatuses::Status)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderStatuses::Description).text().null())
                        .col(
                            ColumnDef::new(OrderStatuses::IsCurrent)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(OrderStatuses::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_statuses_order_id")
                                .from(OrderStatuses::Table, OrderStatuses::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            // Two writers that read the same history length collide here.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_order_statuses_order_sequence")
                        .table(OrderStatuses::Table)
                        .col(OrderStatuses::OrderId)
                        .col(OrderStatuses::Sequence)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(OrderItemStatuses::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderItemStatuses::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderItemStatuses::OrderItemId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderItemStatuses::Sequence)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderItemStatuses::Status)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItemStatuses::Notes).text().null())
                        .col(
                            ColumnDef::new(OrderItemStatuses::IsCurrent)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(OrderItemStatuses::UpdatedBy).uuid().null())
                        .col(
                            ColumnDef::new(OrderItemStatuses::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_item_statuses_order_item_id")
                                .from(OrderItemStatuses::Table, OrderItemStatuses::OrderItemId)
                                .to(OrderItems::Table, OrderItems::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_order_item_statuses_item_sequence")
                        .table(OrderItemStatuses::Table)
                        .col(OrderItemStatuses::OrderItemId)
                        .col(OrderItemStatuses::Sequence)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderItemStatuses::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(OrderStatuses::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum OrderStatuses {
        Table,
        Id,
        OrderId,
        Sequence,
        Status,
        Description,
        IsCurrent,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum OrderItemStatuses {
        Table,
        Id,
        OrderItemId,
        Sequence,
        Status,
        Notes,
        IsCurrent,
        UpdatedBy,
        CreatedAt,
    }
}

mod m20250301_000005_create_receipts_table {

    use super::m20250301_000002_create_orders_table::Orders;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000005_create_receipts_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Receipts::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Receipts::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Receipts::OrderId).uuid().not_null().unique_key())
                        .col(
                            ColumnDef::new(Receipts::DeliveryFee)
                                .decimal_len(10, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Receipts::BookingFee)
                                .decimal_len(10, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Receipts::Discount)
                                .decimal_len(10, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Receipts::Total).decimal_len(10, 2).not_null())
                        .col(
                            ColumnDef::new(Receipts::AmountPaid)
                                .decimal_len(10, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Receipts::ReceiptStatus)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Receipts::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Receipts::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_receipts_order_id")
                                .from(Receipts::Table, Receipts::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Receipts::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Receipts {
        Table,
        Id,
        OrderId,
        DeliveryFee,
        BookingFee,
        Discount,
        Total,
        AmountPaid,
        ReceiptStatus,
        CreatedAt,
        UpdatedAt,
    }
}
