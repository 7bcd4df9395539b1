//! Migration to create the internal_config table

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(InternalConfig::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(InternalConfig::Key)
                            .string_len(64)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(InternalConfig::Value).text().not_null())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(InternalConfig::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum InternalConfig {
    Table,
    Key,
    Value,
}
