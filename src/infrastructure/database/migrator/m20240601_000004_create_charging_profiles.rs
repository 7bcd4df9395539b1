//! Migration to create the charging_profiles table

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ChargingProfiles::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ChargingProfiles::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ChargingProfiles::ProfileId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ChargingProfiles::ConnectorId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ChargingProfiles::StackLevel)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ChargingProfiles::Purpose)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ChargingProfiles::Kind)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ChargingProfiles::RecurrencyKind)
                            .string_len(16)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ChargingProfiles::ValidFrom)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ChargingProfiles::ValidTo)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ChargingProfiles::TransactionId)
                            .integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ChargingProfiles::ScheduleJson)
                            .text()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_charging_profiles_connector")
                    .table(ChargingProfiles::Table)
                    .col(ChargingProfiles::ConnectorId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ChargingProfiles::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ChargingProfiles {
    Table,
    Id,
    ProfileId,
    ConnectorId,
    StackLevel,
    Purpose,
    Kind,
    RecurrencyKind,
    ValidFrom,
    ValidTo,
    TransactionId,
    ScheduleJson,
}
