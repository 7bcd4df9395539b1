//! Migration to create the auth_cache table

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AuthCache::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AuthCache::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AuthCache::Tag).string_len(20).not_null())
                    .col(ColumnDef::new(AuthCache::Parent).string_len(20).null())
                    .col(
                        ColumnDef::new(AuthCache::Expiry)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(AuthCache::Status).string_len(20).not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_auth_cache_tag")
                    .table(AuthCache::Table)
                    .col(AuthCache::Tag)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AuthCache::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum AuthCache {
    Table,
    Id,
    Tag,
    Parent,
    Expiry,
    Status,
}
