//! Migration to create the request_fifo table

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RequestFifo::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RequestFifo::Id)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(RequestFifo::Action)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(ColumnDef::new(RequestFifo::Request).text().not_null())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RequestFifo::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum RequestFifo {
    Table,
    Id,
    Action,
    Request,
}
