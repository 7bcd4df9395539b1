//! Migration to create the auth_local_list table

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AuthLocalList::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AuthLocalList::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(AuthLocalList::Tag)
                            .string_len(20)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AuthLocalList::Parent)
                            .string_len(20)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(AuthLocalList::Expiry)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(AuthLocalList::Status)
                            .string_len(20)
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_auth_local_list_tag")
                    .table(AuthLocalList::Table)
                    .col(AuthLocalList::Tag)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AuthLocalList::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum AuthLocalList {
    Table,
    Id,
    Tag,
    Parent,
    Expiry,
    Status,
}
