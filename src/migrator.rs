use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20241101_000001_create_branch_stock_table::Migration),
            Box::new(m20241101_000002_create_medicines_table::Migration),
            Box::new(m20241101_000003_create_reservations_table::Migration),
            Box::new(m20241101_000004_create_orders_tables::Migration),
        ]
    }
}

mod m20241101_000001_create_branch_stock_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20241101_000001_create_branch_stock_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PharmacyBranchStock::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PharmacyBranchStock::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(PharmacyBranchStock::PharmacyBranchId)
                                .integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PharmacyBranchStock::ItemId).integer().not_null())
                        .col(
                            ColumnDef::new(PharmacyBranchStock::Quantity)
                                .integer()
                                .not_null()
                                .default(0)
                                .check(Expr::col(PharmacyBranchStock::Quantity).gte(0)),
                        )
                        .col(
                            ColumnDef::new(PharmacyBranchStock::InitialPrice)
                                .decimal_len(10, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PharmacyBranchStock::SoldPrice)
                                .decimal_len(10, 2)
                                .not_null(),
                        )
                        .col(ColumnDef::new(PharmacyBranchStock::ExpiryDate).date().null())
                        .col(
                            ColumnDef::new(PharmacyBranchStock::LastUpdated)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // One row per (branch, item); the ledger's conditional updates target it.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_branch_stock_branch_item")
                        .table(PharmacyBranchStock::Table)
                        .col(PharmacyBranchStock::PharmacyBranchId)
                        .col(PharmacyBranchStock::ItemId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PharmacyBranchStock::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum PharmacyBranchStock {
        Table,
        Id,
        PharmacyBranchId,
        ItemId,
        Quantity,
        InitialPrice,
        SoldPrice,
        ExpiryDate,
        LastUpdated,
    }
}

mod m20241101_000002_create_medicines_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20241101_000002_create_medicines_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Medicines::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Medicines::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Medicines::ItemId).integer().not_null())
                        .col(ColumnDef::new(Medicines::Name).string().not_null())
                        .col(
                            ColumnDef::new(Medicines::PrescriptionRequired)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(Medicines::MedicineType).string().null())
                        .col(ColumnDef::new(Medicines::Dosage).string().null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_medicines_item_id")
                        .table(Medicines::Table)
                        .col(Medicines::ItemId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Medicines::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Medicines {
        Table,
        Id,
        ItemId,
        Name,
        PrescriptionRequired,
        MedicineType,
        Dosage,
    }
}

mod m20241101_000003_create_reservations_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20241101_000003_create_reservations_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Reservations::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Reservations::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Reservations::PatientId).integer().not_null())
                        .col(
                            ColumnDef::new(Reservations::PharmacyBranchId)
                                .integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Reservations::MedicineId).integer().not_null())
                        .col(ColumnDef::new(Reservations::ItemId).integer().not_null())
                        .col(ColumnDef::new(Reservations::PrescriptionId).integer().null())
                        .col(
                            ColumnDef::new(Reservations::QuantityReserved)
                                .integer()
                                .not_null()
                                .check(Expr::col(Reservations::QuantityReserved).gt(0)),
                        )
                        .col(ColumnDef::new(Reservations::Status).string_len(50).not_null())
                        .col(
                            ColumnDef::new(Reservations::ReservedDate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Reservations::PickupDeadline)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(Reservations::Notes).text().null())
                        .col(ColumnDef::new(Reservations::CancelledBy).integer().null())
                        .col(
                            ColumnDef::new(Reservations::CancellationReason)
                                .string_len(50)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Reservations::UpdatedAt)
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
                        .name("idx_reservations_status_deadline")
                        .table(Reservations::Table)
                        .col(Reservations::Status)
                        .col(Reservations::PickupDeadline)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_reservations_patient_id")
                        .table(Reservations::Table)
                        .col(Reservations::PatientId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Reservations::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Reservations {
        Table,
        Id,
        PatientId,
        PharmacyBranchId,
        MedicineId,
        ItemId,
        PrescriptionId,
        QuantityReserved,
        Status,
        ReservedDate,
        PickupDeadline,
        Notes,
        CancelledBy,
        CancellationReason,
        UpdatedAt,
    }
}

mod m20241101_000004_create_orders_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20241101_000004_create_orders_tables"
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
                        .col(
                            ColumnDef::new(Orders::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Orders::PatientId).integer().not_null())
                        .col(ColumnDef::new(Orders::PharmacyBranchId).integer().not_null())
                        .col(ColumnDef::new(Orders::PrescriptionId).integer().null())
                        .col(
                            ColumnDef::new(Orders::OrderDate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::Status).string_len(32).not_null())
                        .col(ColumnDef::new(Orders::DeliveryMethod).string_len(32).not_null())
                        .col(ColumnDef::new(Orders::PaymentMethod).string_len(50).not_null())
                        .col(ColumnDef::new(Orders::PaymentStatus).string_len(50).not_null())
                        .col(
                            ColumnDef::new(Orders::TotalAmount)
                                .decimal_len(10, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::Notes).text().null())
                        .col(
                            ColumnDef::new(Orders::StockReleased)
                                .boolean()
                                .not_null()
                                .default(false),
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
                        .name("idx_orders_patient_status")
                        .table(Orders::Table)
                        .col(Orders::PatientId)
                        .col(Orders::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderItems::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(OrderItems::OrderId).integer().not_null())
                        .col(ColumnDef::new(OrderItems::LineNumber).integer().not_null())
                        .col(ColumnDef::new(OrderItems::ItemId).integer().not_null())
                        .col(
                            ColumnDef::new(OrderItems::Quantity)
                                .integer()
                                .not_null()
                                .check(Expr::col(OrderItems::Quantity).gt(0)),
                        )
                        .col(
                            ColumnDef::new(OrderItems::UnitPrice)
                                .decimal_len(10, 2)
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItems::Instructions).text().null())
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
                .create_table(
                    Table::create()
                        .table(Deliveries::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Deliveries::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(Deliveries::OrderId)
                                .integer()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Deliveries::AddressId).integer().not_null())
                        .col(
                            ColumnDef::new(Deliveries::DeliveryMethod)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Deliveries::DeliveryStatus)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Deliveries::Notes).text().null())
                        .col(
                            ColumnDef::new(Deliveries::ScheduledDate)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Deliveries::DeliveredDate)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(Deliveries::TrackingNumber).string().null())
                        .col(
                            ColumnDef::new(Deliveries::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_deliveries_order_id")
                                .from(Deliveries::Table, Deliveries::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Deliveries::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(OrderItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
        PatientId,
        PharmacyBranchId,
        PrescriptionId,
        OrderDate,
        Status,
        DeliveryMethod,
        PaymentMethod,
        PaymentStatus,
        TotalAmount,
        Notes,
        StockReleased,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum OrderItems {
        Table,
        Id,
        OrderId,
        LineNumber,
        ItemId,
        Quantity,
        UnitPrice,
        Instructions,
    }

    #[derive(DeriveIden)]
    enum Deliveries {
        Table,
        Id,
        OrderId,
        AddressId,
        DeliveryMethod,
        DeliveryStatus,
        Notes,
        ScheduledDate,
        DeliveredDate,
        TrackingNumber,
        CreatedAt,
    }
}
